// Fetch orchestration: scheduled, quota-governed polling of quote and news
// providers, publishing raw envelopes to the bus.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::bus::Bus;
use crate::error::CoreError;
use crate::models::{topics, Envelope, PriceTick};
use crate::providers::{FinnhubClient, ProviderError, QuoteProvider};
use crate::rate::{Admission, ErrorClass, NextAction, RateGovernor, RetryPolicy};

/// Retry bookkeeping for one governed fetch. Created when the fetch is
/// scheduled, dropped on success or terminal failure.
#[derive(Debug)]
pub struct FetchAttempt {
    provider: String,
    attempts: u32,
    last_error: Option<ErrorClass>,
}

impl FetchAttempt {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            attempts: 0,
            last_error: None,
        }
    }

    pub fn record_failure(&mut self, class: ErrorClass) {
        self.attempts += 1;
        self.last_error = Some(class);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn last_error(&self) -> Option<ErrorClass> {
        self.last_error
    }
}

/// A quote source paired with its own rate governor and retry policy.
pub struct ProviderHandle {
    pub client: QuoteProvider,
    pub governor: Arc<RateGovernor>,
    pub policy: RetryPolicy,
}

/// Polls quote providers on a schedule and publishes one envelope per
/// symbol per cycle to `prices.raw`.
///
/// Providers are an ordered list, primary first. A terminal failure on one
/// provider hands the unserved symbols to the next for this cycle only —
/// the next cycle starts from the primary again.
pub struct FetchOrchestrator {
    bus: Arc<Bus>,
    providers: Vec<ProviderHandle>,
    symbols: Vec<String>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl FetchOrchestrator {
    pub fn new(
        bus: Arc<Bus>,
        providers: Vec<ProviderHandle>,
        symbols: Vec<String>,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bus,
            providers,
            symbols,
            poll_interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!("fetch orchestrator draining");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let failures = self.run_cycle().await;
                    if failures > 0 {
                        tracing::warn!(failures, "cycle finished with unserved symbols");
                    }
                }
            }
        }
    }

    /// One fetch cycle over all symbols. Returns the number of symbols no
    /// provider could serve (terminal failures, already logged).
    pub async fn run_cycle(&self) -> usize {
        let mut remaining = self.symbols.clone();

        for (rank, handle) in self.providers.iter().enumerate() {
            if remaining.is_empty() {
                break;
            }
            if rank > 0 {
                tracing::info!(
                    provider = handle.client.name(),
                    symbols = remaining.len(),
                    "failing over to fallback provider for this cycle"
                );
            }

            let mut unserved = Vec::new();
            for batch in remaining.chunks(handle.client.batch_size()) {
                match self.fetch_governed(handle, batch).await {
                    Ok(ticks) => {
                        let served = self.publish_ticks(handle, &ticks).await;
                        for symbol in batch {
                            if !served.contains(symbol.as_str()) {
                                unserved.push(symbol.clone());
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            provider = handle.client.name(),
                            batch = batch.len(),
                            error = %e,
                            "terminal failure for batch"
                        );
                        unserved.extend(batch.iter().cloned());
                    }
                }
                if *self.shutdown.borrow() {
                    return remaining.len();
                }
            }
            remaining = unserved;
        }

        for symbol in &remaining {
            tracing::error!(%symbol, "no provider yielded a quote this cycle");
        }
        remaining.len()
    }

    /// Acquire admission, fetch, and classify. Blocked admission suspends
    /// until the governor's reported availability time — never a busy-wait.
    async fn fetch_governed(
        &self,
        handle: &ProviderHandle,
        batch: &[String],
    ) -> crate::Result<Vec<PriceTick>> {
        let provider = handle.client.name();
        let mut attempt = FetchAttempt::new(provider);

        loop {
            match handle.governor.acquire() {
                Admission::Granted(_token) => {}
                Admission::Blocked { wait } => {
                    if !self.sleep_or_drain(wait).await {
                        return Err(CoreError::QuotaExceeded {
                            provider: provider.to_string(),
                            wait,
                        });
                    }
                    continue;
                }
            }

            match handle.client.fetch_quotes(batch).await {
                Ok(ticks) => return Ok(ticks),
                Err(e) => {
                    attempt.record_failure(e.class);
                    match handle.policy.next_action(e.class, attempt.attempts(), e.retry_after) {
                        NextAction::RetryAfter(delay) => {
                            tracing::warn!(
                                provider,
                                attempt = attempt.attempts(),
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "retrying fetch"
                            );
                            if !self.sleep_or_drain(delay).await {
                                return Err(CoreError::TransientProvider {
                                    provider: provider.to_string(),
                                    message: format!("drain interrupted retry: {}", e.message),
                                });
                            }
                        }
                        NextAction::Fatal => return Err(terminal(provider, &e)),
                    }
                }
            }
        }
    }

    async fn publish_ticks(&self, handle: &ProviderHandle, ticks: &[PriceTick]) -> HashSet<String> {
        let mut served = HashSet::new();
        for tick in ticks {
            let envelope =
                match Envelope::new(topics::PRICES_RAW, tick.ts, Some(handle.client.name()), tick) {
                    Ok(env) => env,
                    Err(e) => {
                        tracing::error!(symbol = %tick.symbol, error = %e, "failed to wrap tick");
                        continue;
                    }
                };
            match self.bus.publish(&envelope).await {
                Ok(()) => {
                    served.insert(tick.symbol.clone());
                }
                // Bus failure is fatal to this publish only; the symbol
                // stays unserved and other workers continue.
                Err(e) => {
                    tracing::error!(symbol = %tick.symbol, error = %e, "publish failed");
                }
            }
        }
        served
    }

    /// Sleep for `wait` unless shutdown is requested first. Returns false
    /// when draining.
    async fn sleep_or_drain(&self, wait: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(wait) => true,
            _ = shutdown.changed() => !*shutdown.borrow(),
        }
    }
}

/// Polls the news provider under its own governor and publishes raw
/// headlines to `news.raw`.
pub struct NewsOrchestrator {
    bus: Arc<Bus>,
    client: FinnhubClient,
    governor: Arc<RateGovernor>,
    policy: RetryPolicy,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl NewsOrchestrator {
    pub fn new(
        bus: Arc<Bus>,
        client: FinnhubClient,
        governor: Arc<RateGovernor>,
        policy: RetryPolicy,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bus,
            client,
            governor,
            policy,
            poll_interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!("news orchestrator draining");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "news cycle failed");
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> crate::Result<()> {
        let mut attempt = FetchAttempt::new("finnhub-news");

        let items = loop {
            let _token = self.governor.acquire_or_wait().await;

            match self.client.get_news().await {
                Ok(items) => break items,
                Err(e) => {
                    attempt.record_failure(e.class);
                    match self.policy.next_action(e.class, attempt.attempts(), e.retry_after) {
                        NextAction::RetryAfter(delay) => tokio::time::sleep(delay).await,
                        NextAction::Fatal => return Err(terminal("finnhub-news", &e)),
                    }
                }
            }
        };

        for item in items {
            let envelope = Envelope::new(topics::NEWS_RAW, item.ts, Some("finnhub"), &item)?;
            if let Err(e) = self.bus.publish(&envelope).await {
                tracing::error!(error = %e, "news publish failed");
            }
        }
        Ok(())
    }
}

fn terminal(provider: &str, e: &ProviderError) -> CoreError {
    CoreError::FatalProvider {
        provider: provider.to_string(),
        message: e.message.clone(),
    }
}
