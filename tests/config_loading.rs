// tests/config_loading.rs
use listing_watch::config::{
    load_config_default, load_config_from, load_recipients, load_recipients_from, NotifySection,
    SourceConfig,
};
use listing_watch::sources::build_sources;
use std::{env, fs};

#[test]
fn parse_full_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("watch.toml");
    fs::write(
        &p,
        r#"
[watch]
state_dir = "/var/lib/listing-watch"
interval_secs = 1800
grace_period_secs = 7200

[retention]
keep_last = 3

[notify]
rate_limit_backoff_ms = 500

[[sources]]
kind = "rss"
name = "Example Corp"
url = "https://careers.example.com/feed.xml"

[[sources]]
kind = "json"
name = "Acme"
url = "https://acme.example/api/jobs"
items_pointer = "/jobs"
"#,
    )
    .unwrap();

    let cfg = load_config_from(&p).unwrap();
    assert_eq!(cfg.watch.interval_secs, 1800);
    assert_eq!(cfg.watch.grace_period().num_hours(), 2);
    assert_eq!(cfg.retention.policy().limit(), 3);
    assert_eq!(cfg.notify.rate_limit_backoff_ms, 500);
    assert_eq!(cfg.notify.message_limit, 4096);
    assert!(matches!(cfg.sources[0], SourceConfig::Rss(_)));

    let sources = build_sources(&cfg.sources).unwrap();
    let names: Vec<_> = sources.iter().map(|s| s.name().to_string()).collect();
    assert_eq!(names, vec!["Example Corp", "Acme"]);
}

#[test]
fn unknown_source_kind_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("watch.toml");
    fs::write(
        &p,
        r#"
[[sources]]
kind = "carrier-pigeon"
name = "X"
url = "https://x"
"#,
    )
    .unwrap();
    assert!(load_config_from(&p).is_err());
}

#[test]
fn recipients_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("creds.json");
    fs::write(
        &p,
        r#"[{"token": "123:abc", "chat_id": "-1001"}, {"token": "456:def", "chat_id": 77}]"#,
    )
    .unwrap();
    let v = load_recipients_from(&p).unwrap();
    assert_eq!(v.len(), 2);
    assert_eq!(v[0].chat_id, "-1001");
    assert_eq!(v[1].chat_id, "77");
}

#[serial_test::serial]
#[test]
fn recipients_fall_back_to_env() {
    let notify = NotifySection {
        credentials_path: "/nonexistent/creds.json".into(),
        ..NotifySection::default()
    };

    env::remove_var("TELEGRAM_BOT_TOKEN");
    env::remove_var("TELEGRAM_CHAT_ID");
    assert!(load_recipients(&notify).unwrap().is_empty());

    env::set_var("TELEGRAM_BOT_TOKEN", "999:zzz");
    env::set_var("TELEGRAM_CHAT_ID", "42");
    let v = load_recipients(&notify).unwrap();
    assert_eq!(v.len(), 1);
    assert_eq!(v[0].token, "999:zzz");

    env::remove_var("TELEGRAM_BOT_TOKEN");
    env::remove_var("TELEGRAM_CHAT_ID");
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // Isolate CWD so the repo's own config/ is not picked up
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var("WATCH_CONFIG_PATH");

    // 1) nothing on disk → defaults
    let cfg = load_config_default().unwrap();
    assert!(cfg.sources.is_empty());

    // 2) ./config/watch.toml
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(
        tmp.path().join("config/watch.toml"),
        "[watch]\ninterval_secs = 60\n",
    )
    .unwrap();
    assert_eq!(load_config_default().unwrap().watch.interval_secs, 60);

    // 3) env wins
    let p_env = tmp.path().join("other.toml");
    fs::write(&p_env, "[watch]\ninterval_secs = 5\n").unwrap();
    env::set_var("WATCH_CONFIG_PATH", p_env.display().to_string());
    assert_eq!(load_config_default().unwrap().watch.interval_secs, 5);

    // 4) env pointing nowhere is an error
    env::set_var("WATCH_CONFIG_PATH", tmp.path().join("missing.toml"));
    assert!(load_config_default().is_err());
    env::remove_var("WATCH_CONFIG_PATH");

    env::set_current_dir(&old).unwrap();
}

#[test]
fn on_change_with_grace_period_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("watch.toml");
    fs::write(&p, "[watch]\npersist = \"on_change\"\ngrace_period_secs = 3600\n").unwrap();
    let err = format!("{:#}", load_config_from(&p).unwrap_err());
    assert!(err.contains("on_change"), "{err}");

    fs::write(&p, "[watch]\npersist = \"on_change\"\ngrace_period_secs = 0\n").unwrap();
    assert!(load_config_from(&p).is_ok());
}

#[test]
fn sources_with_colliding_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("watch.toml");
    fs::write(
        &p,
        r#"
[[sources]]
kind = "rss"
name = "LGT Bank"
url = "https://lgt.example/a.xml"

[[sources]]
kind = "rss"
name = "lgt-bank"
url = "https://lgt.example/b.xml"
"#,
    )
    .unwrap();
    let cfg = load_config_from(&p).unwrap();
    let err = build_sources(&cfg.sources).err().expect("duplicate keys rejected");
    assert!(err.to_string().contains("lgt-bank"), "{err}");
}
