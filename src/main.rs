use anyhow::Result;

use scoutdash::app::{wait_for_shutdown, App, ChartPlugin, Page, SocketPlugin};
use scoutdash::config::{Config, DEFAULT_MOUNT_TARGET};
use scoutdash::logging::{info, obj, v_num, v_str, Domain};
use scoutdash::realtime::RealtimeClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    info(
        Domain::System,
        "starting",
        obj(&[
            ("host", v_str(&cfg.host)),
            ("port", v_num(cfg.port as f64)),
            ("namespace", v_str(&cfg.namespace)),
        ]),
    );

    let socket = RealtimeClient::connect(&cfg)?;

    let mounted = App::new(&cfg)
        .use_plugin(ChartPlugin)
        .use_plugin(SocketPlugin::new(socket))
        .mount(&cfg.mount_target, Page::terminal(DEFAULT_MOUNT_TARGET))?;

    let mounted = mounted.run(wait_for_shutdown(tokio::signal::ctrl_c())).await?;

    let stats = mounted.store().stats;
    info(
        Domain::System,
        "stopped",
        obj(&[
            ("applied", v_num(stats.applied as f64)),
            ("rejected", v_num(stats.rejected as f64)),
        ]),
    );
    Ok(())
}
