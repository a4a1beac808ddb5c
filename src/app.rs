//! Application root: plugins, components, mounting and the event loop.

use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::time::Instant;

use anyhow::{bail, Result};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::chart::Chart;
use crate::config::Config;
use crate::logging::{info, obj, v_num, v_str, warn, Domain};
use crate::realtime::{RealtimeClient, RealtimeMessage};
use crate::store::DashboardStore;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// Something drawn into every frame.
pub trait Component: Send {
    fn name(&self) -> &'static str;
    fn render(&self, store: &DashboardStore, out: &mut String);
}

/// Extension installed onto the root before mounting.
pub trait Plugin {
    fn name(&self) -> &'static str;
    fn install(self: Box<Self>, app: &mut App);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Offline,
    Connecting,
    Connected,
    Disconnected(String),
}

impl ConnectionStatus {
    fn label(&self) -> String {
        match self {
            ConnectionStatus::Offline => "offline".to_string(),
            ConnectionStatus::Connecting => "connecting".to_string(),
            ConnectionStatus::Connected => "connected".to_string(),
            ConnectionStatus::Disconnected(reason) => format!("disconnected: {}", reason),
        }
    }
}

pub struct App {
    plugins: Vec<&'static str>,
    components: Vec<Box<dyn Component>>,
    socket: Option<RealtimeClient>,
    store: DashboardStore,
    status: ConnectionStatus,
    namespace: String,
    chart_width: usize,
    render_min_interval: Duration,
}

impl App {
    pub fn new(cfg: &Config) -> Self {
        Self {
            plugins: Vec::new(),
            components: vec![Box::new(CoinList)],
            socket: None,
            store: DashboardStore::from_config(cfg),
            status: ConnectionStatus::Offline,
            namespace: cfg.endpoint().namespace,
            chart_width: 60,
            render_min_interval: Duration::from_millis(cfg.render_min_interval_ms),
        }
    }

    pub fn use_plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        let name = plugin.name();
        if self.has_plugin(name) {
            return self;
        }
        Box::new(plugin).install(&mut self);
        self.plugins.push(name);
        info(Domain::Render, "plugin_installed", obj(&[("plugin", v_str(name))]));
        self
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| *p == name)
    }

    pub fn add_component(&mut self, component: Box<dyn Component>) {
        self.components.push(component);
    }

    pub fn component_names(&self) -> Vec<&'static str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    pub fn bind_socket(&mut self, socket: RealtimeClient) {
        self.namespace = socket.namespace().to_string();
        self.status = ConnectionStatus::Connecting;
        self.socket = Some(socket);
    }

    pub fn chart_width(&self) -> usize {
        self.chart_width
    }

    /// Attach the root to the page element `target`. A missing element is fatal.
    pub fn mount(self, target: &str, mut page: Page) -> Result<MountedApp> {
        let element = match page.take(target) {
            Some(el) => el,
            None => bail!("mount target #{} not found on page", target),
        };
        info(
            Domain::Render,
            "mounted",
            obj(&[
                ("target", v_str(target)),
                ("components", v_num(self.components.len() as f64)),
            ]),
        );
        let mut mounted = MountedApp {
            app: self,
            target: target.to_string(),
            element,
            last_draw: None,
            pending: false,
        };
        mounted.draw()?;
        Ok(mounted)
    }
}

/// A page element frames are written into.
pub struct Element {
    sink: Box<dyn Write + Send>,
    clear: bool,
}

/// Named output elements an app can mount on.
#[derive(Default)]
pub struct Page {
    elements: HashMap<String, Element>,
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page whose `id` element is the terminal.
    pub fn terminal(id: &str) -> Self {
        let mut page = Self::new();
        page.elements.insert(
            id.to_string(),
            Element {
                sink: Box::new(std::io::stdout()),
                clear: true,
            },
        );
        page
    }

    pub fn with_element(mut self, id: &str, sink: Box<dyn Write + Send>) -> Self {
        self.elements
            .insert(id.to_string(), Element { sink, clear: false });
        self
    }

    fn take(&mut self, id: &str) -> Option<Element> {
        self.elements.remove(id)
    }
}

pub struct MountedApp {
    app: App,
    target: String,
    element: Element,
    last_draw: Option<Instant>,
    pending: bool,
}

impl MountedApp {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn store(&self) -> &DashboardStore {
        &self.app.store
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.app.status
    }

    pub fn render_frame(&self) -> String {
        let app = &self.app;
        let stats = app.store.stats;
        let mut out = format!(
            "== scoutdash {} [{}] updates={} unhandled={} rejected={}\n",
            app.namespace,
            app.status.label(),
            stats.applied,
            stats.unhandled,
            stats.rejected
        );
        for c in &app.components {
            c.render(&app.store, &mut out);
        }
        out
    }

    pub fn draw(&mut self) -> Result<()> {
        let frame = self.render_frame();
        let el = &mut self.element;
        if el.clear {
            el.sink.write_all(CLEAR_SCREEN.as_bytes())?;
        }
        el.sink.write_all(frame.as_bytes())?;
        el.sink.flush()?;
        self.last_draw = Some(Instant::now());
        self.pending = false;
        Ok(())
    }

    fn draw_if_due(&mut self) -> Result<()> {
        let due = match self.last_draw {
            Some(t) => t.elapsed() >= self.app.render_min_interval,
            None => true,
        };
        if due {
            self.draw()
        } else {
            self.pending = true;
            Ok(())
        }
    }

    pub fn handle(&mut self, msg: RealtimeMessage) {
        match msg {
            RealtimeMessage::Connected { .. } => self.app.status = ConnectionStatus::Connected,
            RealtimeMessage::Disconnected { reason } => {
                self.app.status = ConnectionStatus::Disconnected(reason)
            }
            RealtimeMessage::Event(ev) => {
                self.app.store.apply_event(&ev);
            }
        }
    }

    /// Process realtime messages until `shutdown` resolves.
    ///
    /// Losing the connection is not fatal: the page stays mounted and shows the
    /// disconnected status until shutdown.
    pub async fn run<F>(mut self, shutdown: F) -> Result<Self>
    where
        F: Future<Output = ()>,
    {
        let mut socket = self.app.socket.take();
        let mut live = socket.is_some();
        let mut tick = interval(self.app.render_min_interval.max(Duration::from_millis(10)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                msg = next_message(&mut socket), if live => match msg {
                    Some(m) => {
                        self.handle(m);
                        self.draw_if_due()?;
                    }
                    None => {
                        live = false;
                        warn(Domain::Transport, "stream_ended", obj(&[("status", v_str(&self.app.status.label()))]));
                        self.draw()?;
                    }
                },
                _ = tick.tick() => {
                    if self.pending {
                        self.draw()?;
                    }
                }
            }
        }

        info(Domain::System, "shutting_down", obj(&[("target", v_str(&self.target))]));
        if let Some(socket) = socket {
            socket.shutdown().await;
        }
        self.draw()?;
        Ok(self)
    }
}

async fn next_message(socket: &mut Option<RealtimeClient>) -> Option<RealtimeMessage> {
    match socket {
        Some(s) => s.next_message().await,
        None => None,
    }
}

/// Resolves once `signal` fires. A signal that cannot be installed is logged
/// and never resolves, so the app keeps running instead of exiting at once.
pub async fn wait_for_shutdown<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn(
            Domain::System,
            "signal_handler_failed",
            obj(&[("error", v_str(&e.to_string()))]),
        );
        std::future::pending::<()>().await;
    }
}

// =============================================================================
// Built-in components
// =============================================================================

struct CoinList;

impl Component for CoinList {
    fn name(&self) -> &'static str {
        "coins"
    }

    fn render(&self, store: &DashboardStore, out: &mut String) {
        out.push_str("-- coins\n");
        if store.coins().is_empty() {
            out.push_str("(none)\n");
        }
        for coin in store.coins() {
            let state = if coin.enabled { "enabled" } else { "disabled" };
            out.push_str(&format!("{:<8} {}\n", coin.symbol, state));
        }
    }
}

/// Registers chart components: scout ratio per pair and coin value history.
pub struct ChartPlugin;

impl Plugin for ChartPlugin {
    fn name(&self) -> &'static str {
        "chart"
    }

    fn install(self: Box<Self>, app: &mut App) {
        let width = app.chart_width();
        app.add_component(Box::new(ValueCharts { width }));
        app.add_component(Box::new(ScoutRatioCharts { width }));
    }
}

struct ValueCharts {
    width: usize,
}

impl Component for ValueCharts {
    fn name(&self) -> &'static str {
        "coin_values"
    }

    fn render(&self, store: &DashboardStore, out: &mut String) {
        out.push_str("-- coin values (usd)\n");
        for value in store.latest_values() {
            let symbol = &value.coin.symbol;
            let chart = Chart::new(symbol, store.usd_history(symbol), self.width);
            out.push_str(&format!(
                "{} balance={} btc={}\n",
                chart.render(),
                value.balance,
                value
                    .btc_value()
                    .map(|v| format!("{:.8}", v))
                    .unwrap_or_else(|| "-".to_string())
            ));
        }
    }
}

struct ScoutRatioCharts {
    width: usize,
}

impl Component for ScoutRatioCharts {
    fn name(&self) -> &'static str {
        "scout_ratios"
    }

    fn render(&self, store: &DashboardStore, out: &mut String) {
        out.push_str("-- scout ratios\n");
        let grouped = store.grouped_scout_logs();
        let mut pairs: Vec<&String> = grouped.keys().collect();
        pairs.sort();
        for pair in pairs {
            let entries = &grouped[pair];
            let ratios = entries.iter().map(|e| e.current_ratio).collect();
            let chart = Chart::new(pair, ratios, self.width);
            let target = entries.last().map(|e| e.target_ratio).unwrap_or_default();
            out.push_str(&format!("{} target={:.6}\n", chart.render(), target));
        }
    }
}

/// Binds the realtime connection to the root so updates reach the store.
pub struct SocketPlugin {
    client: RealtimeClient,
}

impl SocketPlugin {
    pub fn new(client: RealtimeClient) -> Self {
        Self { client }
    }
}

impl Plugin for SocketPlugin {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn install(self: Box<Self>, app: &mut App) {
        app.bind_socket(self.client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coin, ScoutLogEntry, Update};
    use crate::realtime::RealtimeEvent;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn update_event(table: &str, data: serde_json::Value) -> RealtimeMessage {
        RealtimeMessage::Event(RealtimeEvent {
            namespace: "/frontend".to_string(),
            name: "update".to_string(),
            args: vec![serde_json::to_value(Update {
                table: table.to_string(),
                data,
            })
            .unwrap()],
        })
    }

    #[test]
    fn test_mount_missing_target_fails() {
        let app = App::new(&Config::default());
        let page = Page::new().with_element("sidebar", Box::new(Shared::default()));
        let err = app.mount("app", page).err().unwrap();
        assert!(err.to_string().contains("#app"));
    }

    #[test]
    fn test_chart_plugin_registers_once() {
        let app = App::new(&Config::default())
            .use_plugin(ChartPlugin)
            .use_plugin(ChartPlugin);
        assert!(app.has_plugin("chart"));
        assert_eq!(app.component_names(), vec!["coins", "coin_values", "scout_ratios"]);
    }

    #[test]
    fn test_mount_draws_initial_frame() {
        let sink = Shared::default();
        let page = Page::new().with_element("app", Box::new(sink.clone()));
        let mounted = App::new(&Config::default()).mount("app", page).unwrap();
        assert_eq!(mounted.target(), "app");
        let text = sink.text();
        assert!(text.starts_with("== scoutdash /frontend [offline]"));
        assert!(text.contains("(none)"));
    }

    #[test]
    fn test_frame_shows_updates() {
        let page = Page::new().with_element("app", Box::new(Shared::default()));
        let mut mounted = App::new(&Config::default())
            .use_plugin(ChartPlugin)
            .mount("app", page)
            .unwrap();

        mounted.handle(RealtimeMessage::Connected {
            namespace: "/frontend".to_string(),
        });
        mounted.handle(update_event("coins", json!([Coin::new("XLM", true)])));
        let entry = ScoutLogEntry {
            from_coin: Coin::new("XLM", true),
            to_coin: Coin::new("ADA", true),
            current_ratio: 0.5,
            target_ratio: 0.45,
            current_coin_price: 0.4,
            other_coin_price: 0.8,
            datetime: "2021-03-01T10:00:00".to_string(),
        };
        mounted.handle(update_event("scout_history", serde_json::to_value(&entry).unwrap()));

        let frame = mounted.render_frame();
        assert!(frame.contains("[connected]"));
        assert!(frame.contains("XLM      enabled"));
        assert!(frame.contains("XLM->ADA"));
        assert!(frame.contains("target=0.450000"));
        assert_eq!(mounted.store().stats.applied, 2);
    }

    #[tokio::test]
    async fn test_run_without_socket_waits_for_shutdown() {
        let page = Page::new().with_element("app", Box::new(Shared::default()));
        let mounted = App::new(&Config::default()).mount("app", page).unwrap();
        let mounted = mounted.run(std::future::ready(())).await.unwrap();
        assert_eq!(mounted.status(), &ConnectionStatus::Offline);

        let page = Page::new().with_element("app", Box::new(Shared::default()));
        let mounted = App::new(&Config::default()).mount("app", page).unwrap();
        let still_running = tokio::time::timeout(
            Duration::from_millis(50),
            mounted.run(std::future::pending()),
        )
        .await;
        assert!(still_running.is_err());
    }

    #[test]
    fn test_redraws_throttled_within_interval() {
        let sink = Shared::default();
        let cfg = Config {
            render_min_interval_ms: 60_000,
            ..Config::default()
        };
        let page = Page::new().with_element("app", Box::new(sink.clone()));
        let mut mounted = App::new(&cfg).mount("app", page).unwrap();

        for symbol in ["BTC", "ETH", "XLM"] {
            mounted.handle(update_event("coins", json!([Coin::new(symbol, true)])));
            mounted.draw_if_due().unwrap();
        }
        // only the frame drawn on mount
        assert_eq!(sink.text().matches("== scoutdash").count(), 1);
        assert!(mounted.pending);

        mounted.draw().unwrap();
        assert_eq!(sink.text().matches("== scoutdash").count(), 2);
        assert!(!mounted.pending);
        assert!(sink.text().contains("XLM      enabled"));
    }

    #[test]
    fn test_redraws_every_update_without_interval() {
        let sink = Shared::default();
        let cfg = Config {
            render_min_interval_ms: 0,
            ..Config::default()
        };
        let page = Page::new().with_element("app", Box::new(sink.clone()));
        let mut mounted = App::new(&cfg).mount("app", page).unwrap();
        for symbol in ["BTC", "ETH"] {
            mounted.handle(update_event("coins", json!([Coin::new(symbol, true)])));
            mounted.draw_if_due().unwrap();
        }
        assert_eq!(sink.text().matches("== scoutdash").count(), 3);
    }

    #[tokio::test]
    async fn test_failed_signal_keeps_waiting() {
        let failed = async {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no signal handler"))
        };
        let waited =
            tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown(failed)).await;
        assert!(waited.is_err());

        let fired = tokio::time::timeout(
            Duration::from_millis(50),
            wait_for_shutdown(async { Ok(()) }),
        )
        .await;
        assert!(fired.is_ok());
    }
}
