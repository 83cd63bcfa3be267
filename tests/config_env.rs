// tests/config_env.rs
//
// Env overrides touch process-global state, so these run serially.

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;
use threat_monitor::config::app::{
    ENV_CONFIG_PATH, ENV_INGEST_INTERVAL_SECS, ENV_POLL_INTERVAL_SECS, ENV_STATE_DIR,
    ENV_THREAT_URL,
};
use threat_monitor::AppConfig;

const ALL: [&str; 5] = [
    ENV_CONFIG_PATH,
    ENV_THREAT_URL,
    ENV_STATE_DIR,
    ENV_INGEST_INTERVAL_SECS,
    ENV_POLL_INTERVAL_SECS,
];

fn clear_env() {
    for k in ALL {
        std::env::remove_var(k);
    }
}

#[test]
#[serial]
fn env_overrides_win_over_file() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[threat]\nurl = \"https://file.example/threat\"\n\n[tracker]\npoll_interval_secs = 120"
    )
    .unwrap();

    std::env::set_var(ENV_CONFIG_PATH, file.path());
    std::env::set_var(ENV_STATE_DIR, "/tmp/threat-state");
    std::env::set_var(ENV_INGEST_INTERVAL_SECS, "300");

    let cfg = AppConfig::load().unwrap();
    clear_env();

    assert_eq!(cfg.threat.url, "https://file.example/threat");
    assert_eq!(cfg.poll_interval(), Duration::from_secs(120));
    assert_eq!(cfg.store.dir, PathBuf::from("/tmp/threat-state"));
    assert_eq!(cfg.ingest_interval(), Duration::from_secs(300));
}

#[test]
#[serial]
fn invalid_numeric_override_is_ignored() {
    clear_env();
    let mut cfg = AppConfig::default();
    std::env::set_var(ENV_POLL_INTERVAL_SECS, "soon");
    std::env::set_var(ENV_THREAT_URL, "  https://env.example/level  ");
    cfg.apply_env_overrides();
    clear_env();

    assert_eq!(cfg.poll_interval(), Duration::from_secs(60));
    assert_eq!(cfg.threat.url, "https://env.example/level");
}

#[test]
#[serial]
fn missing_config_file_is_an_error() {
    clear_env();
    std::env::set_var(ENV_CONFIG_PATH, "/definitely/not/here.toml");
    let res = AppConfig::load();
    clear_env();
    assert!(res.is_err());
}
