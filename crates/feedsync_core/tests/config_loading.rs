use feedsync_core::{ConfigError, FeedConfig};
use std::io::Write;
use std::time::Duration;

#[test]
fn toml_overrides_merge_with_defaults() {
    let config = FeedConfig::from_toml_str(
        r#"
page_size = 5
cache_ttl_ms = 10000
placeholder_name = "Someone"
utc_offset_minutes = 540
"#,
    )
    .unwrap();

    assert_eq!(config.page_size, 5);
    assert_eq!(config.cache_ttl_ms, 10_000);
    assert_eq!(config.placeholder_name, "Someone");
    assert_eq!(config.utc_offset_minutes, 540);
    assert_eq!(config.poll_interval(), Duration::from_secs(60));
    assert_eq!(config.write_grace_ms, FeedConfig::default().write_grace_ms);
}

#[test]
fn invalid_values_are_rejected() {
    let err = FeedConfig::from_toml_str("poll_interval_ms = 0").unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "poll_interval_ms",
            ..
        }
    ));
    assert!(matches!(
        FeedConfig::from_toml_str("page_size = \"many\""),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn load_reads_file_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "max_concurrent_fetches = 2").unwrap();
    let config = FeedConfig::load(file.path()).unwrap();
    assert_eq!(config.max_concurrent_fetches, 2);

    let missing = FeedConfig::load(file.path().with_extension("absent"));
    assert!(matches!(missing, Err(ConfigError::Io(_))));
}
