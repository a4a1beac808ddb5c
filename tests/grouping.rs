//! Grouping laws: membership, per-key order, idempotence, and the
//! non-string key drop.

use std::collections::HashMap;

use serde_json::{json, Value};

use scoutdash::group::{group_by, group_scout_logs, GroupKey};
use scoutdash::models::{Coin, ScoutLogEntry};

fn mixed_items() -> Vec<Value> {
    vec![
        json!({"k": "a", "n": 0}),
        json!({"k": 1, "n": 1}),
        json!({"k": "b", "n": 2}),
        json!({"k": "a", "n": 3}),
        json!({"k": null, "n": 4}),
        json!({"n": 5}),
        json!({"k": "b", "n": 6}),
        json!({"k": ["a"], "n": 7}),
        json!({"k": "c", "n": 8}),
    ]
}

fn sorted_ns(values: &[Value]) -> Vec<i64> {
    let mut ns: Vec<i64> = values.iter().map(|v| v["n"].as_i64().unwrap()).collect();
    ns.sort();
    ns
}

#[test]
fn flattened_result_is_exactly_the_string_keyed_inputs() {
    let items = mixed_items();
    let expected: Vec<Value> = items.iter().filter(|v| v["k"].is_string()).cloned().collect();

    let grouped = group_by(items, &GroupKey::field("k"));
    let flattened: Vec<Value> = grouped.values().flatten().cloned().collect();

    assert_eq!(sorted_ns(&flattened), sorted_ns(&expected));
    assert_eq!(sorted_ns(&flattened), vec![0, 2, 3, 6, 8]);
}

#[test]
fn per_key_order_matches_input_subsequence() {
    let items = mixed_items();
    let grouped = group_by(items.clone(), &GroupKey::field("k"));

    for (key, group) in &grouped {
        let subsequence: Vec<&Value> = items.iter().filter(|v| v["k"] == json!(key)).collect();
        let group: Vec<&Value> = group.iter().collect();
        assert_eq!(group, subsequence, "order broken for key {}", key);
    }
}

#[test]
fn regrouping_concatenated_result_is_idempotent() {
    let grouped = group_by(mixed_items(), &GroupKey::field("k"));
    let concatenated: Vec<Value> = grouped.values().flatten().cloned().collect();
    let regrouped = group_by(concatenated, &GroupKey::field("k"));
    assert_eq!(regrouped, grouped);
}

#[test]
fn empty_input_gives_empty_mapping() {
    let none: Vec<Value> = Vec::new();
    assert!(group_by(none.clone(), &GroupKey::field("k")).is_empty());
    assert!(group_by(none, &GroupKey::derived(|v: &Value| v.to_string())).is_empty());
}

#[test]
fn selector_that_never_yields_a_string_gives_empty_mapping() {
    let coins = vec![Coin::new("BTC", true), Coin::new("ETH", false)];
    assert!(group_by(coins, &GroupKey::field("enabled")).is_empty());
}

#[test]
fn non_string_values_are_dropped_not_errors() {
    // Documented quirk: elements with ill-typed keys silently disappear.
    let items = vec![json!({"a": 1}), json!({"a": "x"}), json!({"a": 2})];
    let grouped = group_by(items, &GroupKey::field("a"));

    let mut expected = HashMap::new();
    expected.insert("x".to_string(), vec![json!({"a": "x"})]);
    assert_eq!(grouped, expected);
}

#[test]
fn coins_grouped_by_symbol() {
    let items = vec![
        Coin::new("BTC", true),
        Coin::new("ETH", true),
        Coin::new("BTC", false),
    ];
    let grouped = group_by(items, &GroupKey::field("symbol"));

    let mut expected = HashMap::new();
    expected.insert(
        "BTC".to_string(),
        vec![Coin::new("BTC", true), Coin::new("BTC", false)],
    );
    expected.insert("ETH".to_string(), vec![Coin::new("ETH", true)]);
    assert_eq!(grouped, expected);
}

fn scout(from: &str, to: &str, ratio: f64, at: &str) -> ScoutLogEntry {
    ScoutLogEntry {
        from_coin: Coin::new(from, true),
        to_coin: Coin::new(to, true),
        current_ratio: ratio,
        target_ratio: 0.9,
        current_coin_price: 0.3,
        other_coin_price: 0.5,
        datetime: at.to_string(),
    }
}

#[test]
fn scout_logs_grouped_by_originating_coin() {
    let logs = vec![
        scout("XLM", "ADA", 1.0, "t0"),
        scout("ADA", "XLM", 1.1, "t1"),
        scout("XLM", "EOS", 1.2, "t2"),
        scout("XLM", "ADA", 1.3, "t3"),
    ];
    let by_origin = group_by(
        logs.clone(),
        &GroupKey::derived(|e: &ScoutLogEntry| e.from_coin.symbol.clone()),
    );
    let times: Vec<&str> = by_origin["XLM"].iter().map(|e| e.datetime.as_str()).collect();
    assert_eq!(times, vec!["t0", "t2", "t3"]);
    assert_eq!(by_origin["ADA"], vec![logs[1].clone()]);

    let by_pair = group_scout_logs(logs);
    assert_eq!(by_pair.len(), 3);
    assert_eq!(by_pair["XLM->ADA"].len(), 2);
}
