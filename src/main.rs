use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use wavebot::bus::Bus;
use wavebot::calendar::SessionCalendar;
use wavebot::config::{BusBackend, ProviderSettings, Settings};
use wavebot::fetch::{FetchOrchestrator, NewsOrchestrator, ProviderHandle};
use wavebot::gate::{ExecutionGate, GateConfig};
use wavebot::providers::{AlpacaClient, FinnhubClient, QuoteProvider, YahooClient};
use wavebot::rate::{RateGovernor, RetryPolicy};

const DEFAULT_ALPACA_BASE: &str = "https://paper-api.alpaca.markets";

#[derive(Parser)]
#[command(name = "wavebot", about = "Market data ingestion and execution gating")]
struct Cli {
    /// Configuration file (TOML, extension optional).
    #[arg(long, default_value = "config/default")]
    config: String,

    /// Force orders off regardless of configuration.
    #[arg(long)]
    dry_run: bool,
}

fn governor_for(name: &str, settings: &ProviderSettings) -> Arc<RateGovernor> {
    Arc::new(RateGovernor::new(
        name,
        settings.quota_per_window,
        Duration::from_secs(settings.window_seconds),
    ))
}

fn policy_for(settings: &ProviderSettings) -> RetryPolicy {
    RetryPolicy::default().with_max_attempts(settings.max_retries)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config).context("loading configuration")?;
    if cli.dry_run {
        settings.gate.enable_orders = false;
    }

    let bus = Arc::new(match settings.bus.backend {
        BusBackend::InProcess => Bus::in_memory(),
        BusBackend::Redis => Bus::redis(&settings.bus.redis_url)
            .await
            .context("connecting redis bus")?,
    });

    // Quote providers, primary first. Finnhub needs a key; Yahoo is the
    // keyless fallback and always present.
    let finnhub_cfg = settings.provider("finnhub");
    let mut quote_providers = Vec::new();
    if let Some(key) = finnhub_cfg.api_key.clone() {
        let client = match finnhub_cfg.base_url.clone() {
            Some(base) => FinnhubClient::with_base_url(key, base),
            None => FinnhubClient::new(key),
        };
        quote_providers.push(ProviderHandle {
            client: QuoteProvider::Finnhub(client),
            governor: governor_for("finnhub", &finnhub_cfg),
            policy: policy_for(&finnhub_cfg),
        });
    } else {
        tracing::warn!("no finnhub api key configured, quotes fall back to yahoo only");
    }
    let yahoo_cfg = settings.provider("yahoo");
    let yahoo = match yahoo_cfg.base_url.clone() {
        Some(base) => YahooClient::with_base_url(base),
        None => YahooClient::new(),
    };
    quote_providers.push(ProviderHandle {
        client: QuoteProvider::Yahoo(yahoo),
        governor: governor_for("yahoo", &yahoo_cfg),
        policy: policy_for(&yahoo_cfg),
    });

    // Broker / calendar source.
    let alpaca_cfg = settings.provider("alpaca");
    let alpaca_base = alpaca_cfg
        .base_url
        .clone()
        .unwrap_or_else(|| DEFAULT_ALPACA_BASE.to_string());
    let alpaca_creds = alpaca_cfg
        .api_key
        .clone()
        .zip(alpaca_cfg.api_secret.clone());
    let broker = match &alpaca_creds {
        Some((key, secret)) => AlpacaClient::new(alpaca_base.clone(), key.clone(), secret.clone()),
        None => {
            if settings.gate.enable_orders {
                tracing::warn!("alpaca credentials missing, forcing orders off");
                settings.gate.enable_orders = false;
            }
            AlpacaClient::new(alpaca_base, String::new(), String::new())
        }
    };
    let calendar_source = alpaca_creds.as_ref().map(|_| broker.clone());

    let calendar = Arc::new(SessionCalendar::new(
        calendar_source,
        settings.calendar.after_open_margin_minutes,
        settings.calendar.before_close_margin_minutes,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = JoinSet::new();

    let orchestrator = FetchOrchestrator::new(
        bus.clone(),
        quote_providers,
        settings.symbols.clone(),
        Duration::from_secs(settings.fetch.poll_interval_secs),
        shutdown_rx.clone(),
    );
    workers.spawn(orchestrator.run());

    if let Some(key) = finnhub_cfg.api_key.clone() {
        let client = match finnhub_cfg.base_url.clone() {
            Some(base) => FinnhubClient::with_base_url(key, base),
            None => FinnhubClient::new(key),
        };
        // News has its own governor instance: its quota is independent of
        // the quote family even on the same vendor.
        let news_cfg = settings.provider("finnhub_news");
        let news = NewsOrchestrator::new(
            bus.clone(),
            client,
            governor_for("finnhub-news", &news_cfg),
            policy_for(&news_cfg),
            Duration::from_secs(settings.fetch.news_poll_interval_secs),
            shutdown_rx.clone(),
        );
        workers.spawn(news.run());
    }

    let gate = ExecutionGate::new(
        bus.clone(),
        calendar,
        governor_for("alpaca", &alpaca_cfg),
        broker,
        policy_for(&alpaca_cfg),
        GateConfig {
            max_daily_trades: settings.gate.max_daily_trades,
            enable_orders: settings.gate.enable_orders,
            portfolio_value: settings.gate.portfolio_value,
        },
        shutdown_rx,
    );
    workers.spawn(gate.run());

    tracing::info!(
        symbols = settings.symbols.len(),
        orders_enabled = settings.gate.enable_orders,
        "wavebot running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    tracing::info!("shutdown requested, draining workers");
    let _ = shutdown_tx.send(true);

    let drained = tokio::time::timeout(
        Duration::from_secs(settings.shutdown_timeout_secs),
        async {
            while workers.join_next().await.is_some() {}
        },
    )
    .await;
    match drained {
        Ok(()) => tracing::info!("all workers idle, exiting"),
        Err(_) => {
            tracing::warn!("drain timeout, abandoning remaining workers");
            workers.abort_all();
        }
    }

    Ok(())
}
