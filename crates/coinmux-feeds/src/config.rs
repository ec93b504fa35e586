/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed and validated stream configuration
[POS]:    Configuration layer - endpoints, session, retry and feed setup
[UPDATE]: When adding new configuration options
*/

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use coinmux_adapter::{ClientConfig, FamilyConfig, FamilyKind, SessionTokenStore, expiry_after};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backoff::INITIAL_TIMEOUT;
use crate::feed::FeedEntry;

/// Top-level configuration for the feed runner
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Streaming and snapshot endpoints
    pub endpoints: EndpointConfig,
    /// Session used by private and algo feeds
    #[serde(default)]
    pub session: Option<SessionConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Feature streams to keep alive
    pub feeds: Vec<FeedEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// e.g. `wss://stream.example.com`; the family path is appended
    pub ws_base_url: String,
    /// e.g. `https://api.example.com`
    pub http_base_url: String,
}

/// Session token, given inline or through an environment variable
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub account: String,
    /// Local token lifetime; unset keeps the token until the process exits
    #[serde(default)]
    pub expires_in_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// First wait after a failure; doubles on each further failure
    #[serde(default = "default_initial_timeout_ms")]
    pub initial_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: default_initial_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Treat a socket error as a close when no close follows within this window
    #[serde(default)]
    pub error_close_grace_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_initial_timeout_ms() -> u64 {
    INITIAL_TIMEOUT.as_millis() as u64
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl StreamConfig {
    /// Load and validate configuration from YAML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("read config file {path}"))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ws_base = self.ws_base_url()?;
        if !matches!(ws_base.scheme(), "ws" | "wss") {
            bail!("ws_base_url must use ws or wss, got {}", ws_base.scheme());
        }
        let http_base = self.http_base_url()?;
        if !matches!(http_base.scheme(), "http" | "https") {
            bail!("http_base_url must use http or https, got {}", http_base.scheme());
        }
        if self.retry.initial_timeout_ms == 0 {
            bail!("retry.initial_timeout_ms must be greater than zero");
        }
        if self.feeds.is_empty() {
            bail!("no feeds configured");
        }

        let mut names = HashSet::new();
        let mut slots = HashSet::new();
        for entry in &self.feeds {
            let name = entry.name();
            if !names.insert(name.clone()) {
                bail!("duplicate feed name {name}");
            }
            let family = entry.feed.family();
            let slot = entry.feed.slot();
            if !slots.insert((family, slot)) {
                bail!("feed {name} reuses {family} slot {slot}; one feed per slot");
            }
            if family != FamilyKind::Public && self.session.is_none() {
                bail!("feed {name} needs a session for the {family} family");
            }
        }

        if let Some(session) = &self.session
            && session.token.is_none()
            && session.token_env.is_none()
        {
            bail!("session needs either token or token_env");
        }
        if let Some(secs) = self.session.as_ref().and_then(|session| session.expires_in_secs) {
            if secs == 0 {
                bail!("session.expires_in_secs must be greater than zero");
            }
            if expiry_after(secs).is_none() {
                bail!("session.expires_in_secs {secs} is out of range");
            }
        }
        Ok(())
    }

    pub fn ws_base_url(&self) -> Result<Url> {
        Url::parse(&self.endpoints.ws_base_url).context("parse ws_base_url")
    }

    pub fn http_base_url(&self) -> Result<Url> {
        Url::parse(&self.endpoints.http_base_url).context("parse http_base_url")
    }

    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.retry.initial_timeout_ms)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.http.timeout_secs),
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
        }
    }

    /// Families used by at least one feed, in first-use order.
    pub fn families(&self) -> Vec<FamilyKind> {
        let mut families = Vec::new();
        for entry in &self.feeds {
            let family = entry.feed.family();
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    pub fn family(&self, kind: FamilyKind) -> Result<FamilyConfig> {
        let grace = self.connection.error_close_grace_ms.map(Duration::from_millis);
        Ok(FamilyConfig::for_kind(kind, self.ws_base_url()?).with_error_close_grace(grace))
    }

    /// Resolve the session token; reads the environment when `token_env` is set.
    pub fn token_store(&self) -> Result<Option<SessionTokenStore>> {
        let Some(session) = &self.session else {
            return Ok(None);
        };
        let token = match (&session.token, &session.token_env) {
            (Some(token), _) => token.clone(),
            (None, Some(var)) => std::env::var(var)
                .with_context(|| format!("session token env var {var} is not set"))?,
            (None, None) => return Err(anyhow!("session needs either token or token_env")),
        };

        let store = SessionTokenStore::new();
        match session.expires_in_secs {
            Some(secs) => store.set_token(token, secs, session.account.clone()),
            None => store.set_token_without_expiry(token, session.account.clone()),
        }
        Ok(Some(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedConfig;
    use coinmux_adapter::TokenSource;

    const SAMPLE: &str = r#"
endpoints:
  ws_base_url: wss://stream.example.com
  http_base_url: https://api.example.com
session:
  token: session-abc
  account: acc-1
retry:
  initial_timeout_ms: 500
connection:
  error_close_grace_ms: 2000
feeds:
  - kind: ticker
    exchanges: [BINANCE]
    pairs: [BTC/USD, ETH/USD]
  - kind: balances
    account_id: acc-1
  - kind: bot_run
    run_id: run-42
"#;

    #[test]
    fn config_parses_sample() {
        let config = StreamConfig::from_yaml_str(SAMPLE).expect("sample config");

        assert_eq!(config.feeds.len(), 3);
        assert_eq!(config.initial_timeout(), Duration::from_millis(500));
        assert_eq!(
            config.families(),
            vec![FamilyKind::Public, FamilyKind::Private, FamilyKind::Algo]
        );
        assert_eq!(config.client_config().timeout, Duration::from_secs(30));

        let algo = config.family(FamilyKind::Algo).expect("algo family");
        assert_eq!(algo.error_close_grace, Some(Duration::from_secs(2)));
        assert_eq!(algo.endpoint().as_str(), "wss://stream.example.com/api/v1/algo/ws");
    }

    #[test]
    fn config_defaults_apply() {
        let config = StreamConfig::from_yaml_str(
            r#"
endpoints:
  ws_base_url: ws://localhost:9000
  http_base_url: http://localhost:9001
feeds:
  - kind: trades
    exchange: BINANCE
    pair: BTC/USD
"#,
        )
        .expect("minimal config");

        assert_eq!(config.initial_timeout(), INITIAL_TIMEOUT);
        assert!(config.connection.error_close_grace_ms.is_none());
        assert!(config.token_store().expect("no session").is_none());
        assert_eq!(config.http.connect_timeout_secs, 10);
    }

    #[test]
    fn config_rejects_two_feeds_in_one_slot() {
        let mut config = StreamConfig::from_yaml_str(SAMPLE).expect("sample config");
        config.feeds.push(FeedEntry {
            name: Some("second-ticker".to_string()),
            feed: FeedConfig::Ticker {
                exchanges: vec!["KRAKEN".to_string()],
                pairs: vec!["BTC/USD".to_string()],
            },
        });

        let err = config.validate().expect_err("slot clash");
        assert!(err.to_string().contains("priceStream"));
    }

    #[test]
    fn config_allows_same_slot_name_in_different_families() {
        let mut config = StreamConfig::from_yaml_str(SAMPLE).expect("sample config");
        config.feeds.push(FeedEntry {
            name: None,
            feed: FeedConfig::Trades {
                exchange: "BINANCE".to_string(),
                pair: "BTC/USD".to_string(),
            },
        });
        config.feeds.push(FeedEntry {
            name: None,
            feed: FeedConfig::Fills {
                account_id: "acc-1".to_string(),
            },
        });

        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_requires_session_for_private_feeds() {
        let mut config = StreamConfig::from_yaml_str(SAMPLE).expect("sample config");
        config.session = None;

        let err = config.validate().expect_err("missing session");
        assert!(err.to_string().contains("needs a session"));
    }

    #[test]
    fn config_rejects_bad_schemes_and_zero_timeout() {
        let mut config = StreamConfig::from_yaml_str(SAMPLE).expect("sample config");
        config.endpoints.ws_base_url = "https://stream.example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = StreamConfig::from_yaml_str(SAMPLE).expect("sample config");
        config.retry.initial_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn token_store_reads_inline_token() {
        let config = StreamConfig::from_yaml_str(SAMPLE).expect("sample config");
        let store = config
            .token_store()
            .expect("token store")
            .expect("session configured");

        assert_eq!(store.get_token(), Some("session-abc".to_string()));
        assert!(!store.is_expired());
        assert!(store.token_data().is_some_and(|data| data.expires_at.is_none()));
    }

    #[test]
    fn token_store_applies_configured_expiry() {
        let mut config = StreamConfig::from_yaml_str(SAMPLE).expect("sample config");
        if let Some(session) = config.session.as_mut() {
            session.expires_in_secs = Some(3600);
        }
        let store = config
            .token_store()
            .expect("token store")
            .expect("session configured");

        assert!(store.token_data().is_some_and(|data| data.expires_at.is_some()));
        assert_eq!(store.session_token(), Some("session-abc".to_string()));
    }

    #[test]
    fn config_rejects_out_of_range_expiry() {
        for secs in [0, 10_000_000_000_000_000, u64::MAX] {
            let mut config = StreamConfig::from_yaml_str(SAMPLE).expect("sample config");
            if let Some(session) = config.session.as_mut() {
                session.expires_in_secs = Some(secs);
            }

            let err = config.validate().expect_err("expiry out of range");
            assert!(err.to_string().contains("expires_in_secs"));
        }

        let yaml = SAMPLE.replace("  account: acc-1", "  account: acc-1\n  expires_in_secs: 10000000000000000");
        assert!(StreamConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn token_store_reports_missing_env_var() {
        let mut config = StreamConfig::from_yaml_str(SAMPLE).expect("sample config");
        if let Some(session) = config.session.as_mut() {
            session.token = None;
            session.token_env = Some("COINMUX_TEST_TOKEN_THAT_IS_NEVER_SET".to_string());
        }

        let err = config.token_store().expect_err("env var missing");
        assert!(err.to_string().contains("COINMUX_TEST_TOKEN_THAT_IS_NEVER_SET"));
    }
}
