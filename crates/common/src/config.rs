use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
    #[error("Malformed configuration document: {0}")]
    Malformed(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Retry envelope for one fire-and-poll verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPolicy {
    pub attempts: u32,
    pub attempt_timeout: Duration,
    pub interval: Duration,
}

impl StepPolicy {
    pub const fn new(attempts: u32, attempt_timeout: Duration, interval: Duration) -> Self {
        Self {
            attempts,
            attempt_timeout,
            interval,
        }
    }

    /// Upper bound on the time a full verification can take.
    pub fn budget(&self) -> Duration {
        let attempts = self.attempts.max(1);
        self.attempt_timeout * attempts + self.interval * (attempts - 1)
    }
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub staleness_threshold: Duration,
    pub ledger_capacity: usize,
    pub ledger_retain: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: Duration::from_secs(30),
            ledger_capacity: 1000,
            ledger_retain: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub post_trade_cooldown: Duration,
    pub instrument_cooldown: Duration,
    pub resume_on_clean_failure: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            post_trade_cooldown: Duration::from_secs(35),
            instrument_cooldown: Duration::from_secs(60),
            resume_on_clean_failure: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub host_load_timeout: Duration,
    pub authenticate: StepPolicy,
    pub locate: StepPolicy,
    pub order_entry: StepPolicy,
    pub field_settle_delay: Duration,
    pub trade_settle_delay: Duration,
    pub confirm_delay: Duration,
    pub session_timeout: Duration,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            host_load_timeout: Duration::from_secs(30),
            authenticate: StepPolicy::new(20, Duration::from_secs(3), Duration::from_secs(1)),
            locate: StepPolicy::new(10, Duration::from_secs(2), Duration::from_secs(1)),
            order_entry: StepPolicy::new(8, Duration::from_secs(2), Duration::from_millis(500)),
            field_settle_delay: Duration::from_millis(300),
            trade_settle_delay: Duration::from_secs(2),
            confirm_delay: Duration::from_millis(800),
            session_timeout: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub bridge_url: Option<String>,
    pub create_timeout: Duration,
    pub clear_timeout: Duration,
    pub destroy_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bridge_url: None,
            create_timeout: Duration::from_secs(15),
            clear_timeout: Duration::from_secs(3),
            destroy_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub poll_url: Option<String>,
    pub poll_token: Option<String>,
    pub foreground_interval: Duration,
    pub background_interval: Duration,
    pub push_url: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            poll_url: None,
            poll_token: None,
            foreground_interval: Duration::from_secs(2),
            background_interval: Duration::from_secs(10),
            push_url: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub dedup: DedupConfig,
    pub gate: GateConfig,
    pub automation: AutomationConfig,
    pub host: HostConfig,
    pub sources: SourceConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Self::from_lookup(|key| env::var(key).ok())?;
        debug!(
            "Settings loaded: staleness {}s, post-trade cooldown {}s, session timeout {}s",
            settings.dedup.staleness_threshold.as_secs(),
            settings.gate.post_trade_cooldown.as_secs(),
            settings.automation.session_timeout.as_secs()
        );
        Ok(settings)
    }

    /// Builds settings from any key/value source; every key is optional.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);
        let defaults = Settings::default();

        let dedup = DedupConfig {
            staleness_threshold: vars.secs("STALENESS_SECS", defaults.dedup.staleness_threshold)?,
            ledger_capacity: vars.parse("LEDGER_CAPACITY", defaults.dedup.ledger_capacity)?,
            ledger_retain: vars.parse("LEDGER_RETAIN", defaults.dedup.ledger_retain)?,
        };
        if dedup.ledger_retain == 0 || dedup.ledger_retain > dedup.ledger_capacity {
            return Err(ConfigError::Invalid {
                key: "LEDGER_RETAIN".to_string(),
                reason: format!(
                    "must be between 1 and LEDGER_CAPACITY ({})",
                    dedup.ledger_capacity
                ),
            });
        }

        let gate = GateConfig {
            post_trade_cooldown: vars
                .secs("POST_TRADE_COOLDOWN_SECS", defaults.gate.post_trade_cooldown)?,
            instrument_cooldown: vars
                .secs("INSTRUMENT_COOLDOWN_SECS", defaults.gate.instrument_cooldown)?,
            resume_on_clean_failure: vars.parse(
                "RESUME_ON_CLEAN_FAILURE",
                defaults.gate.resume_on_clean_failure,
            )?,
        };

        let base = defaults.automation;
        let automation = AutomationConfig {
            host_load_timeout: vars.secs("HOST_LOAD_TIMEOUT_SECS", base.host_load_timeout)?,
            authenticate: vars.policy("AUTH", base.authenticate)?,
            locate: vars.policy("LOCATE", base.locate)?,
            order_entry: vars.policy("ORDER_ENTRY", base.order_entry)?,
            field_settle_delay: vars.millis("FIELD_SETTLE_MS", base.field_settle_delay)?,
            trade_settle_delay: vars.millis("TRADE_SETTLE_MS", base.trade_settle_delay)?,
            confirm_delay: vars.millis("CONFIRM_DELAY_MS", base.confirm_delay)?,
            session_timeout: vars.secs("SESSION_TIMEOUT_SECS", base.session_timeout)?,
        };

        let host = HostConfig {
            bridge_url: lookup("HOST_BRIDGE_URL"),
            create_timeout: vars
                .millis("HOST_CREATE_TIMEOUT_MS", defaults.host.create_timeout)?,
            clear_timeout: vars.millis("HOST_CLEAR_TIMEOUT_MS", defaults.host.clear_timeout)?,
            destroy_timeout: vars
                .millis("HOST_DESTROY_TIMEOUT_MS", defaults.host.destroy_timeout)?,
        };

        let sources = SourceConfig {
            poll_url: lookup("SIGNAL_POLL_URL"),
            poll_token: lookup("SIGNAL_POLL_TOKEN"),
            foreground_interval: vars
                .millis("FOREGROUND_POLL_MS", defaults.sources.foreground_interval)?,
            background_interval: vars
                .millis("BACKGROUND_POLL_MS", defaults.sources.background_interval)?,
            push_url: lookup("SIGNAL_PUSH_URL"),
        };

        Ok(Self {
            dedup,
            gate,
            automation,
            host,
            sources,
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_millis() as u64)
            .map(Duration::from_millis)
    }

    fn policy(&self, prefix: &str, default: StepPolicy) -> Result<StepPolicy, ConfigError> {
        let attempts_key = format!("{}_ATTEMPTS", prefix);
        let attempts = self.parse(&attempts_key, default.attempts)?;
        if attempts == 0 {
            return Err(ConfigError::Invalid {
                key: attempts_key,
                reason: "at least one attempt is required".to_string(),
            });
        }
        Ok(StepPolicy {
            attempts,
            attempt_timeout: self
                .millis(&format!("{}_TIMEOUT_MS", prefix), default.attempt_timeout)?,
            interval: self.millis(&format!("{}_INTERVAL_MS", prefix), default.interval)?,
        })
    }
}
