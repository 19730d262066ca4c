use pager_controller::Error;
use pager_controller::config::Config;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn defaults_apply_when_only_manifest_dir_is_set() {
    let config = Config::from_lookup(lookup(&[("PAGER_MANIFEST_DIR", "/etc/alerts")])).unwrap();

    assert_eq!(config.manifest_dir, Path::new("/etc/alerts"));
    assert_eq!(config.workers, 1);
    assert_eq!(config.resync_period, Duration::from_secs(30));
    assert_eq!(config.poll_interval, Duration::from_secs(5));
    assert_eq!(config.backoff_base, Duration::from_secs(5));
    assert_eq!(config.backoff_max, Duration::from_secs(60));
    assert_eq!(config.max_retries, None);
    assert_eq!(config.sync_timeout, Duration::from_secs(60));
    assert_eq!(config.otel_endpoint, None);
    assert_eq!(config.log_level, "info");
}

#[test]
fn explicit_values_override_defaults() {
    let config = Config::from_lookup(lookup(&[
        ("PAGER_MANIFEST_DIR", "/etc/alerts"),
        ("PAGER_WORKERS", "4"),
        ("PAGER_RESYNC_SECS", "0"),
        ("PAGER_BACKOFF_BASE_MS", "250"),
        ("PAGER_BACKOFF_MAX_MS", "2000"),
        ("PAGER_MAX_RETRIES", "10"),
        ("OTEL_ENDPOINT", "http://localhost:4317"),
        ("LOG_LEVEL", "debug"),
    ]))
    .unwrap();

    assert_eq!(config.workers, 4);
    assert!(config.resync_period.is_zero());
    assert_eq!(config.max_retries, Some(10));
    assert_eq!(config.otel_endpoint.as_deref(), Some("http://localhost:4317"));

    let controller = config.controller_config();
    assert_eq!(controller.workers, 4);
    assert_eq!(controller.backoff_base, Duration::from_millis(250));
    assert_eq!(controller.backoff_max, Duration::from_secs(2));
    assert!(controller.retry.should_retry(9));
    assert!(!controller.retry.should_retry(10));
}

#[test]
fn missing_manifest_dir_is_an_error() {
    let err = Config::from_lookup(lookup(&[("PAGER_WORKERS", "2")])).unwrap_err();
    assert!(matches!(err, Error::Config(msg) if msg.contains("PAGER_MANIFEST_DIR")));

    // Blank counts as unset.
    assert!(Config::from_lookup(lookup(&[("PAGER_MANIFEST_DIR", "  ")])).is_err());
}

#[test]
fn malformed_numbers_name_the_variable() {
    let err = Config::from_lookup(lookup(&[
        ("PAGER_MANIFEST_DIR", "/etc/alerts"),
        ("PAGER_WORKERS", "many"),
    ]))
    .unwrap_err();
    assert!(matches!(err, Error::Config(msg) if msg.contains("PAGER_WORKERS")));
}

#[test]
fn inconsistent_values_are_rejected() {
    for vars in [
        [("PAGER_WORKERS", "0"), ("PAGER_POLL_SECS", "5")],
        [("PAGER_BACKOFF_BASE_MS", "5000"), ("PAGER_BACKOFF_MAX_MS", "1000")],
        [("PAGER_BACKOFF_BASE_MS", "0"), ("PAGER_POLL_SECS", "5")],
        [("PAGER_POLL_SECS", "0"), ("PAGER_WORKERS", "1")],
    ] {
        let mut all = vec![("PAGER_MANIFEST_DIR", "/etc/alerts")];
        all.extend(vars);
        assert!(
            matches!(Config::from_lookup(lookup(&all)), Err(Error::Config(_))),
            "{vars:?} should be rejected"
        );
    }
}

#[test]
fn config_from_env_reads_process_environment() {
    unsafe {
        std::env::set_var("PAGER_MANIFEST_DIR", "/tmp/pager-alerts");
        std::env::set_var("PAGER_WORKERS", "3");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.manifest_dir, Path::new("/tmp/pager-alerts"));
    assert_eq!(config.workers, 3);

    unsafe {
        std::env::remove_var("PAGER_MANIFEST_DIR");
        std::env::remove_var("PAGER_WORKERS");
    }
}
