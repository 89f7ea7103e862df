use std::path::Path;

use hls_sync_engine::SyncConfig;
use toml::{Table, Value};

use crate::error::AppError;

/// Overlays `overlay` onto `base`, descending into nested tables.
fn merge(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(nested)) => merge(existing, nested),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Parses `contents` on top of `flags`: keys present in the file win, the
/// rest keep their flag values.
pub fn apply_toml(flags: &SyncConfig, contents: &str) -> Result<SyncConfig, AppError> {
    let mut base = Table::try_from(flags)?;
    let file: Table = toml::from_str(contents)?;
    merge(&mut base, file);
    Ok(Value::Table(base).try_into()?)
}

/// Loads the configuration file at `path`, then appends `extra_urls`.
pub fn load(flags: &SyncConfig, path: &Path, extra_urls: &[String]) -> Result<SyncConfig, AppError> {
    let contents = std::fs::read_to_string(path).map_err(|source| AppError::ConfigFile {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = apply_toml(flags, &contents)?;
    config.source.urls.extend(extra_urls.iter().cloned());
    Ok(config)
}

/// Effective configuration as TOML, as printed by `--check`.
pub fn render(config: &SyncConfig) -> Result<String, AppError> {
    Ok(toml::to_string_pretty(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hls_sync_engine::Granularity;

    #[test]
    fn file_overrides_flags_and_keeps_the_rest() {
        let mut flags = SyncConfig::default();
        flags.timeout = 9;
        flags.record.output = "/from/flags".into();

        let cfg = apply_toml(
            &flags,
            r#"
retries = 3

[record]
enabled = true
reindex_by = "minute"

[source]
urls = ["http://example.com/a.m3u8"]
"#,
        )
        .unwrap();

        assert_eq!(cfg.timeout, 9);
        assert_eq!(cfg.retries, 3);
        assert!(cfg.record.enabled);
        assert_eq!(cfg.record.reindex_by, Granularity::Minute);
        assert_eq!(cfg.record.output, std::path::PathBuf::from("/from/flags"));
        assert_eq!(cfg.source.urls.len(), 1);
    }

    #[test]
    fn positional_urls_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hls-sync.toml");
        std::fs::write(&path, "[source]\nurls = [\"http://a/1.m3u8\"]\n").unwrap();

        let cfg = load(&SyncConfig::default(), &path, &["http://b/2.m3u8".to_string()]).unwrap();
        assert_eq!(cfg.source.urls, vec!["http://a/1.m3u8", "http://b/2.m3u8"]);
    }

    #[test]
    fn missing_file_and_bad_toml_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load(&SyncConfig::default(), &missing, &[]),
            Err(AppError::ConfigFile { .. })
        ));
        assert!(apply_toml(&SyncConfig::default(), "timeout = \"soon\"").is_err());
    }

    #[test]
    fn rendered_config_parses_back() {
        let mut cfg = SyncConfig::default();
        cfg.source.urls = vec!["http://a/1.m3u8".to_string()];
        cfg.http.enabled = true;
        let text = render(&cfg).unwrap();
        assert!(text.contains("[http]"));
        let back = apply_toml(&SyncConfig::default(), &text).unwrap();
        assert!(back.http.enabled);
        assert_eq!(back.source.urls, cfg.source.urls);
    }
}
