use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use serde_json::Value;

use crate::config::Config;
use crate::group::group_scout_logs;
use crate::logging::{debug, obj, v_str, warn, Domain};
use crate::models::{
    Coin, CoinValue, ScoutLogEntry, ScoutLogsGrouped, Update, TABLE_COINS, TABLE_COIN_VALUE,
    TABLE_SCOUT_HISTORY,
};
use crate::realtime::RealtimeEvent;

pub const UPDATE_EVENT: &str = "update";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Coins(usize),
    ScoutLog,
    CoinValue,
    Unhandled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub applied: u64,
    pub unhandled: u64,
    pub rejected: u64,
}

/// Latest dashboard state built from pushed updates.
#[derive(Debug, Clone)]
pub struct DashboardStore {
    coins: Vec<Coin>,
    scout_logs: VecDeque<ScoutLogEntry>,
    scout_cap: usize,
    values: HashMap<String, VecDeque<CoinValue>>,
    value_cap: usize,
    pub stats: UpdateStats,
}

impl DashboardStore {
    pub fn new(scout_cap: usize, value_cap: usize) -> Self {
        Self {
            coins: Vec::new(),
            scout_logs: VecDeque::new(),
            scout_cap: scout_cap.max(1),
            values: HashMap::new(),
            value_cap: value_cap.max(1),
            stats: UpdateStats::default(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.scout_history_cap, cfg.value_history_cap)
    }

    /// Apply one envelope. Unknown tables are counted, not rejected.
    pub fn apply(&mut self, update: &Update<Value>) -> Result<Applied> {
        let applied = match update.table.as_str() {
            TABLE_COINS => {
                let coins: Vec<Coin> = if update.data.is_array() {
                    update.decode::<Vec<Coin>>()?.data
                } else {
                    vec![update.decode::<Coin>()?.data]
                };
                let n = coins.len();
                for coin in coins {
                    self.upsert_coin(coin);
                }
                Applied::Coins(n)
            }
            TABLE_SCOUT_HISTORY => {
                let entry = update.decode::<ScoutLogEntry>()?.data;
                self.push_scout_log(entry);
                Applied::ScoutLog
            }
            TABLE_COIN_VALUE => {
                let value = update.decode::<CoinValue>()?.data;
                self.push_value(value);
                Applied::CoinValue
            }
            _ => Applied::Unhandled,
        };
        match applied {
            Applied::Unhandled => self.stats.unhandled += 1,
            _ => self.stats.applied += 1,
        }
        Ok(applied)
    }

    /// Apply every envelope carried by an `update` event; malformed ones are logged and skipped.
    pub fn apply_event(&mut self, event: &RealtimeEvent) -> Vec<Applied> {
        if event.name != UPDATE_EVENT {
            debug(Domain::Update, "event_ignored", obj(&[("name", v_str(&event.name))]));
            return Vec::new();
        }
        let mut out = Vec::new();
        for arg in &event.args {
            let result = serde_json::from_value::<Update<Value>>(arg.clone())
                .map_err(anyhow::Error::from)
                .and_then(|u| self.apply(&u).map(|a| (u.table, a)));
            match result {
                Ok((table, applied)) => {
                    if applied == Applied::Unhandled {
                        debug(Domain::Update, "table_unhandled", obj(&[("table", v_str(&table))]));
                    }
                    out.push(applied);
                }
                Err(e) => {
                    self.stats.rejected += 1;
                    warn(Domain::Update, "update_rejected", obj(&[("error", v_str(&e.to_string()))]));
                }
            }
        }
        out
    }

    fn upsert_coin(&mut self, coin: Coin) {
        match self.coins.iter_mut().find(|c| c.symbol == coin.symbol) {
            Some(existing) => *existing = coin,
            None => self.coins.push(coin),
        }
    }

    fn push_scout_log(&mut self, entry: ScoutLogEntry) {
        self.scout_logs.push_back(entry);
        while self.scout_logs.len() > self.scout_cap {
            self.scout_logs.pop_front();
        }
    }

    fn push_value(&mut self, value: CoinValue) {
        let cap = self.value_cap;
        let history = self.values.entry(value.coin.symbol.clone()).or_default();
        history.push_back(value);
        while history.len() > cap {
            history.pop_front();
        }
    }

    pub fn coins(&self) -> &[Coin] {
        &self.coins
    }

    pub fn scout_logs(&self) -> impl Iterator<Item = &ScoutLogEntry> {
        self.scout_logs.iter()
    }

    pub fn grouped_scout_logs(&self) -> ScoutLogsGrouped {
        group_scout_logs(self.scout_logs.iter().cloned())
    }

    /// Most recent value per coin, sorted by symbol.
    pub fn latest_values(&self) -> Vec<&CoinValue> {
        let mut out: Vec<&CoinValue> = self.values.values().filter_map(|h| h.back()).collect();
        out.sort_by(|a, b| a.coin.symbol.cmp(&b.coin.symbol));
        out
    }

    /// USD value series for one coin, oldest first, skipping unpriced points.
    pub fn usd_history(&self, symbol: &str) -> Vec<f64> {
        self.values
            .get(symbol)
            .map(|h| h.iter().filter_map(CoinValue::usd_value).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(table: &str, data: Value) -> Update<Value> {
        Update {
            table: table.to_string(),
            data,
        }
    }

    fn scout(from: &str, to: &str, ratio: f64) -> Value {
        json!({
            "from_coin": {"symbol": from, "enabled": true},
            "to_coin": {"symbol": to, "enabled": true},
            "current_ratio": ratio,
            "target_ratio": 1.0,
            "current_coin_price": 2.0,
            "other_coin_price": 3.0,
            "datetime": "2021-03-01T10:00:00"
        })
    }

    #[test]
    fn test_coins_upsert_by_symbol() {
        let mut store = DashboardStore::new(10, 10);
        store
            .apply(&update("coins", json!([{"symbol": "BTC", "enabled": true}, {"symbol": "ETH", "enabled": true}])))
            .unwrap();
        let applied = store
            .apply(&update("coins", json!({"symbol": "BTC", "enabled": false})))
            .unwrap();
        assert_eq!(applied, Applied::Coins(1));
        assert_eq!(store.coins(), &[Coin::new("BTC", false), Coin::new("ETH", true)]);
    }

    #[test]
    fn test_scout_history_capped_oldest_first() {
        let mut store = DashboardStore::new(2, 10);
        for r in [0.1, 0.2, 0.3] {
            store.apply(&update("scout_history", scout("XLM", "ADA", r))).unwrap();
        }
        let ratios: Vec<f64> = store.scout_logs().map(|e| e.current_ratio).collect();
        assert_eq!(ratios, vec![0.2, 0.3]);
        assert_eq!(store.grouped_scout_logs()["XLM->ADA"].len(), 2);
    }

    #[test]
    fn test_malformed_payload_leaves_store_unchanged() {
        let mut store = DashboardStore::new(10, 10);
        assert!(store.apply(&update("scout_history", json!({"from_coin": 1}))).is_err());
        assert_eq!(store.scout_logs().count(), 0);
        assert_eq!(store.stats.applied, 0);
    }

    #[test]
    fn test_bad_coin_list_reports_list_error() {
        let mut store = DashboardStore::new(10, 10);
        let err = store
            .apply(&update("coins", json!([{"symbol": "BTC"}])))
            .unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("enabled"), "error: {}", msg);
        assert!(!msg.contains("expected struct"), "error: {}", msg);
        assert!(store.coins().is_empty());
    }

    #[test]
    fn test_unknown_table_counted() {
        let mut store = DashboardStore::new(10, 10);
        let applied = store.apply(&update("trade_history", json!({}))).unwrap();
        assert_eq!(applied, Applied::Unhandled);
        assert_eq!(store.stats.unhandled, 1);
    }

    #[test]
    fn test_coin_value_history() {
        let mut store = DashboardStore::new(10, 2);
        for (price, ts) in [(Some(1.0), "t1"), (None, "t2"), (Some(3.0), "t3")] {
            store
                .apply(&update(
                    "coin_value",
                    json!({"coin": {"symbol": "BNB", "enabled": true}, "balance": 2.0,
                           "usd_price": price, "btc_price": null, "datetime": ts}),
                ))
                .unwrap();
        }
        assert_eq!(store.usd_history("BNB"), vec![6.0]);
        assert_eq!(store.latest_values()[0].datetime, "t3");
        assert!(store.usd_history("ETH").is_empty());
    }

    #[test]
    fn test_apply_event_skips_bad_envelopes() {
        let mut store = DashboardStore::new(10, 10);
        let ev = RealtimeEvent {
            namespace: "/frontend".to_string(),
            name: "update".to_string(),
            args: vec![json!("not an envelope"), json!({"table": "scout_history", "data": scout("A", "B", 1.0)})],
        };
        assert_eq!(store.apply_event(&ev), vec![Applied::ScoutLog]);
        assert_eq!(store.stats.rejected, 1);

        let other = RealtimeEvent {
            name: "hello".to_string(),
            ..ev
        };
        assert!(store.apply_event(&other).is_empty());
    }
}
