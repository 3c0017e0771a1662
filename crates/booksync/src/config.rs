use std::collections::BTreeSet;
use std::path::PathBuf;

use booksync_lib::{ConfigError, SubscriptionKey, SyncConfig};
use clap::Parser;

/// booksync: keep order books in sync from NATS book channels
#[derive(Parser, Debug)]
#[command(name = "booksync")]
pub struct Config {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://localhost:4222")]
    pub nats_url: String,

    /// Subject prefix; book channels are {prefix}.book.{market}.g{granularity}
    #[arg(long, env = "BOOKSYNC_SUBJECT_PREFIX", default_value = "prod.clob")]
    pub subject_prefix: String,

    /// Comma-separated MARKET:GRANULARITY list (e.g. BTC-YES:1,BTC-YES:10)
    #[arg(long, env = "BOOKSYNC_MARKETS")]
    pub markets: String,

    /// YAML file with sync settings (depth, tick size, heartbeat, ...)
    #[arg(long, env = "BOOKSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL of an HTTP snapshot service; NATS request/reply is used when unset
    #[arg(long, env = "BOOKSYNC_SNAPSHOT_URL")]
    pub snapshot_url: Option<String>,

    /// HTTP listen address for health, metrics and book views
    #[arg(long, env = "BOOKSYNC_LISTEN_ADDR", default_value = "0.0.0.0:9090")]
    pub listen_addr: String,
}

impl Config {
    pub fn subscriptions(&self) -> Result<Vec<SubscriptionKey>, ConfigError> {
        parse_markets(&self.markets)
    }

    /// Sync settings from `--config`, or defaults.
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        match &self.config {
            Some(path) => SyncConfig::load(path),
            None => Ok(SyncConfig::default()),
        }
    }
}

/// Parse `MARKET:GRANULARITY,...`, dropping duplicates.
pub fn parse_markets(list: &str) -> Result<Vec<SubscriptionKey>, ConfigError> {
    let mut keys = BTreeSet::new();
    for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        keys.insert(entry.parse::<SubscriptionKey>()?);
    }
    if keys.is_empty() {
        return Err(ConfigError::Invalid("no markets configured".to_string()));
    }
    Ok(keys.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_markets() {
        let keys = parse_markets("BTC-YES:10, ETH-NO:1,BTC-YES:1,").unwrap();
        assert_eq!(
            keys,
            vec![
                SubscriptionKey::new("BTC-YES", 1),
                SubscriptionKey::new("BTC-YES", 10),
                SubscriptionKey::new("ETH-NO", 1),
            ]
        );
    }

    #[test]
    fn test_parse_markets_dedupes() {
        let keys = parse_markets("BTC-YES:5,BTC-YES:5").unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_parse_markets_rejects_bad_entries() {
        assert!(matches!(
            parse_markets("BTC-YES:five"),
            Err(ConfigError::InvalidSubscription(_))
        ));
        assert!(matches!(parse_markets(" , "), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_cli_args() {
        let config = Config::parse_from([
            "booksync",
            "--markets",
            "BTC-YES:5",
            "--subject-prefix",
            "dev.clob",
            "--snapshot-url",
            "http://snapshots:8080",
        ]);
        assert_eq!(config.subject_prefix, "dev.clob");
        assert_eq!(config.snapshot_url.as_deref(), Some("http://snapshots:8080"));
        assert_eq!(config.listen_addr, "0.0.0.0:9090");
        assert_eq!(config.sync_config().unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_sync_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "depth: 10\nheartbeat_interval_ms: 5000").unwrap();

        let config = Config::parse_from([
            "booksync",
            "--markets",
            "BTC-YES",
            "--config",
            file.path().to_str().unwrap(),
        ]);
        let sync = config.sync_config().unwrap();
        assert_eq!(sync.depth, 10);
        assert_eq!(sync.heartbeat_interval_ms, 5000);
    }
}
