use scoutdash::logging::{info, obj, v_str, Domain};

#[test]
fn records_are_mirrored_to_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scoutdash.jsonl");
    // Only test in this binary, so the env var is set before the first record.
    std::env::set_var("LOG_FILE", &path);
    std::env::set_var("LOG_LEVEL", "info");
    std::env::remove_var("LOG_DOMAINS");

    info(Domain::System, "starting", obj(&[("token", v_str("secret")), ("msg", v_str("hi"))]));
    info(Domain::Render, "mounted", obj(&[("target", v_str("app"))]));

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event"], "starting");
    assert_eq!(lines[0]["msg"], "hi");
    assert_eq!(lines[0]["data"]["token"], "[REDACTED]");
    assert_eq!(lines[1]["component"], "render");
    assert!(lines[1]["seq"].as_u64().unwrap() > lines[0]["seq"].as_u64().unwrap());
}
