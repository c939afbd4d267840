// Runtime configuration: a TOML file layered under `WAVEBOT__`-prefixed
// environment variables. Env vars take precedence for secrets.

use std::collections::HashMap;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub symbols: Vec<String>,
    /// Optional newline-separated symbol list; appended to `symbols`.
    pub symbols_file: Option<String>,
    pub bus: BusSettings,
    pub providers: HashMap<String, ProviderSettings>,
    pub calendar: CalendarSettings,
    pub fetch: FetchSettings,
    pub gate: GateSettings,
    pub shutdown_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbols: vec!["AAPL".to_string(), "MSFT".to_string(), "SPY".to_string()],
            symbols_file: None,
            bus: BusSettings::default(),
            providers: HashMap::new(),
            calendar: CalendarSettings::default(),
            fetch: FetchSettings::default(),
            gate: GateSettings::default(),
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusBackend {
    InProcess,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub backend: BusBackend,
    pub redis_url: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            backend: BusBackend::InProcess,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub quota_per_window: u32,
    pub window_seconds: u64,
    pub max_retries: u32,
    pub api_key: Option<String>,
    /// Secret for providers that need a key pair (broker).
    pub api_secret: Option<String>,
    pub base_url: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            quota_per_window: 50,
            window_seconds: 60,
            max_retries: 5,
            api_key: None,
            api_secret: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalendarSettings {
    pub after_open_margin_minutes: i64,
    pub before_close_margin_minutes: i64,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            after_open_margin_minutes: 30,
            before_close_margin_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub poll_interval_secs: u64,
    pub news_poll_interval_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            news_poll_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub enable_orders: bool,
    pub max_daily_trades: u32,
    pub portfolio_value: f64,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            enable_orders: false,
            max_daily_trades: 10,
            portfolio_value: 100_000.0,
        }
    }
}

impl Settings {
    /// Load from `path` (optional file) with `WAVEBOT__SECTION__KEY`
    /// environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("WAVEBOT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let mut settings: Settings = cfg.try_deserialize()?;

        if let Some(file) = settings.symbols_file.clone() {
            match std::fs::read_to_string(&file) {
                Ok(contents) => {
                    settings.symbols.extend(
                        contents
                            .lines()
                            .map(str::trim)
                            .filter(|l| !l.is_empty() && !l.starts_with('#'))
                            .map(str::to_string),
                    );
                    settings.symbols.dedup();
                }
                Err(e) => {
                    tracing::warn!(file = %file, error = %e, "could not read symbols file");
                }
            }
        }

        Ok(settings)
    }

    /// Provider settings by name, falling back to defaults when the section
    /// is absent.
    pub fn provider(&self, name: &str) -> ProviderSettings {
        self.providers.get(name).cloned().unwrap_or_default()
    }
}
