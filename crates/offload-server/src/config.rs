//! Configuration loading and parsing.
//!
//! Everything can come from a TOML file, with CLI flags taking precedence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::monitor::DEFAULT_MONITOR_INTERVAL;

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct OffloadConfig {
    /// Deck address (host, or host:port).
    pub deck: Option<String>,
    /// Destination directory for offloaded clips.
    pub destination: Option<String>,
    /// Slot numbers to monitor.
    pub slots: Option<Vec<u8>>,
    /// File-retrieval port override.
    pub ftp_port: Option<u16>,
    /// Interval between listing diffs, in milliseconds.
    pub monitor_interval_ms: Option<u64>,
}

impl OffloadConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<OffloadConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Deck address: CLI flag wins over config.
pub fn resolve_deck(cli: Option<&str>, cfg: &OffloadConfig) -> Result<String> {
    cli.map(str::to_string)
        .or_else(|| cfg.deck.clone())
        .ok_or_else(|| anyhow::anyhow!("deck address is required; use --deck"))
}

/// Slots to monitor: CLI flags win; both bays by default.
pub fn resolve_slots(cli: &[u8], cfg: &OffloadConfig) -> Vec<u8> {
    if !cli.is_empty() {
        return cli.to_vec();
    }
    cfg.slots.clone().unwrap_or_else(|| vec![1, 2])
}

/// Destination directory: CLI flag wins over config.
pub fn resolve_destination(cli: Option<&Path>, cfg: &OffloadConfig) -> Result<PathBuf> {
    cli.map(Path::to_path_buf)
        .or_else(|| cfg.destination.as_deref().map(PathBuf::from))
        .ok_or_else(|| anyhow::anyhow!("destination directory is required; use --destination"))
}

pub fn monitor_interval(cfg: &OffloadConfig) -> Duration {
    cfg.monitor_interval_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_MONITOR_INTERVAL)
}

/// Host part of a deck address, for the file-retrieval connection.
pub fn host_only(addr: &str) -> &str {
    addr.split(':').next().unwrap_or(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "deck-offload-config-{}.toml",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, contents).expect("write config");
        path
    }

    #[test]
    fn load_parses_all_fields() {
        let path = write_config(
            r#"
deck = "10.0.1.20"
destination = "/mnt/ingest"
slots = [1]
ftp_port = 2121
monitor_interval_ms = 2000
"#,
        );
        let cfg = OffloadConfig::load(&path).expect("load");
        assert_eq!(cfg.deck.as_deref(), Some("10.0.1.20"));
        assert_eq!(cfg.slots, Some(vec![1]));
        assert_eq!(cfg.ftp_port, Some(2121));
        assert_eq!(monitor_interval(&cfg), Duration::from_millis(2000));
        assert_eq!(
            resolve_destination(None, &cfg).unwrap(),
            PathBuf::from("/mnt/ingest")
        );
    }

    #[test]
    fn cli_flags_win_over_config() {
        let cfg = OffloadConfig {
            deck: Some("10.0.1.20".into()),
            slots: Some(vec![1]),
            ..Default::default()
        };
        assert_eq!(resolve_deck(Some("10.0.1.99"), &cfg).unwrap(), "10.0.1.99");
        assert_eq!(resolve_slots(&[2], &cfg), vec![2]);
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = OffloadConfig::default();
        assert!(resolve_deck(None, &cfg).is_err());
        assert_eq!(resolve_slots(&[], &cfg), vec![1, 2]);
        assert_eq!(monitor_interval(&cfg), DEFAULT_MONITOR_INTERVAL);
    }

    #[test]
    fn host_only_strips_the_port() {
        assert_eq!(host_only("10.0.1.20:9993"), "10.0.1.20");
        assert_eq!(host_only("deck.local"), "deck.local");
    }
}
