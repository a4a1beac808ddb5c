//! Payload shapes pushed by the bot's API server on the frontend namespace.

use std::collections::HashMap;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TABLE_COINS: &str = "coins";
pub const TABLE_SCOUT_HISTORY: &str = "scout_history";
pub const TABLE_COIN_VALUE: &str = "coin_value";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coin {
    pub symbol: String,
    pub enabled: bool,
}

impl Coin {
    pub fn new(symbol: &str, enabled: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            enabled,
        }
    }
}

/// One ratio comparison the bot made while scouting for a jump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoutLogEntry {
    pub from_coin: Coin,
    pub to_coin: Coin,
    pub current_ratio: f64,
    pub target_ratio: f64,
    pub current_coin_price: f64,
    pub other_coin_price: f64,
    pub datetime: String,
}

impl ScoutLogEntry {
    /// `FROM->TO`, the key scout logs are charted under.
    pub fn pair_key(&self) -> String {
        format!("{}->{}", self.from_coin.symbol, self.to_coin.symbol)
    }
}

pub type ScoutLogsGrouped = HashMap<String, Vec<ScoutLogEntry>>;

/// Balance snapshot the bot records every minute for each held coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinValue {
    pub coin: Coin,
    pub balance: f64,
    pub usd_price: Option<f64>,
    pub btc_price: Option<f64>,
    pub datetime: String,
}

impl CoinValue {
    pub fn usd_value(&self) -> Option<f64> {
        self.usd_price.map(|p| p * self.balance)
    }

    pub fn btc_value(&self) -> Option<f64> {
        self.btc_price.map(|p| p * self.balance)
    }
}

/// Envelope naming the table a pushed payload belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update<T> {
    pub table: String,
    pub data: T,
}

impl Update<Value> {
    /// Re-decode the untyped payload once the table is known.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Update<T>> {
        let data = serde_json::from_value(self.data.clone())?;
        Ok(Update {
            table: self.table.clone(),
            data,
        })
    }
}
