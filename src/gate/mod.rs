// Execution gate: the only path from analysis signals to the broker.
//
// Per signal: Received → Evaluating → Allowed → governed submit → Submitted,
// or Blocked(reason) → Discarded. A Blocked decision is terminal — the
// signal is never queued for after the blackout lifts; upstream re-emits if
// the opportunity persists.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;

use crate::bus::Bus;
use crate::calendar::SessionCalendar;
use crate::error::CoreError;
use crate::models::{
    topics, AnalysisSignal, BlockReason, GateDecision, GateOutcome, OrderSide, Recommendation,
    TradeOrder,
};
use crate::providers::AlpacaClient;
use crate::rate::{Admission, NextAction, RateGovernor, RetryPolicy};

pub struct GateConfig {
    /// Hard cap on allowed actions per UTC day, enforced inside the gate.
    pub max_daily_trades: u32,
    /// When false, allowed actions are logged but never reach the broker.
    pub enable_orders: bool,
    /// Notional portfolio value used to size orders from a signal's
    /// `position_size_pct`.
    pub portfolio_value: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_daily_trades: 10,
            enable_orders: false,
            portfolio_value: 100_000.0,
        }
    }
}

pub struct ExecutionGate {
    bus: Arc<Bus>,
    calendar: Arc<SessionCalendar>,
    /// Order-submission governor — separate instance from any fetch
    /// governor, its quota is unrelated.
    governor: Arc<RateGovernor>,
    broker: AlpacaClient,
    policy: RetryPolicy,
    config: GateConfig,
    trades_today: (NaiveDate, u32),
    shutdown: watch::Receiver<bool>,
}

impl ExecutionGate {
    pub fn new(
        bus: Arc<Bus>,
        calendar: Arc<SessionCalendar>,
        governor: Arc<RateGovernor>,
        broker: AlpacaClient,
        policy: RetryPolicy,
        config: GateConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bus,
            calendar,
            governor,
            broker,
            policy,
            config,
            trades_today: (NaiveDate::MIN, 0),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut sub = match self.bus.subscribe(topics::SIGNALS).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::error!(error = %e, "gate could not subscribe to signals");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!("execution gate draining");
                        break;
                    }
                }
                envelope = sub.recv() => match envelope {
                    Ok(envelope) => {
                        let now = Utc::now();
                        self.process_signal(&envelope, now).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "signal subscription failed");
                        break;
                    }
                }
            }
        }
    }

    /// Evaluate one signal envelope at `now` and, when allowed, forward it
    /// through the governed broker path.
    pub async fn process_signal(&mut self, envelope: &crate::models::Envelope, now: DateTime<Utc>) {
        let signal: AnalysisSignal = match envelope.decode() {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(topic = %envelope.topic, error = %e, "rejecting signal envelope");
                return;
            }
        };

        let side = match signal.recommendation {
            Recommendation::Buy => OrderSide::Buy,
            Recommendation::Sell => OrderSide::Sell,
            Recommendation::Hold | Recommendation::Standby => {
                tracing::debug!(symbol = %signal.symbol, "non-actionable signal");
                return;
            }
        };

        let decision = self.evaluate(&signal, now).await;
        tracing::info!(
            decision_id = %decision.id,
            symbol = %decision.symbol,
            outcome = ?decision.outcome,
            "gate decision"
        );

        if !decision.is_allowed() {
            // Terminal: discarded, not queued for retry.
            return;
        }

        let order = TradeOrder {
            symbol: signal.symbol.clone(),
            ts: now,
            side,
            qty: None,
            notional: Some(self.config.portfolio_value * signal.position_size_pct / 100.0),
            order_type: "market".to_string(),
            limit_price: None,
        };

        if let Err(e) = self.submit_governed(&order).await {
            tracing::error!(symbol = %order.symbol, error = %e, "order submission failed");
        }
    }

    /// Pure-ish evaluation step: blackout policy first, then the daily
    /// action cap. Produces an immutable decision record.
    pub async fn evaluate(&mut self, signal: &AnalysisSignal, now: DateTime<Utc>) -> GateDecision {
        if let Some(reason) = self.calendar.check(now).await {
            return GateDecision::new(
                &signal.symbol,
                signal.recommendation,
                now,
                GateOutcome::Blocked(reason),
            );
        }

        let today = now.date_naive();
        if self.trades_today.0 != today {
            self.trades_today = (today, 0);
        }
        if self.trades_today.1 >= self.config.max_daily_trades {
            return GateDecision::new(
                &signal.symbol,
                signal.recommendation,
                now,
                GateOutcome::Blocked(BlockReason::DailyTradeLimit),
            );
        }

        // Count at decision time so broker retries and failures still use
        // up the day's budget.
        self.trades_today.1 += 1;
        GateDecision::new(&signal.symbol, signal.recommendation, now, GateOutcome::Allowed)
    }

    async fn submit_governed(&mut self, order: &TradeOrder) -> crate::Result<()> {
        if !self.config.enable_orders {
            tracing::info!(
                symbol = %order.symbol,
                side = ?order.side,
                notional = ?order.notional,
                "orders disabled, dry-run only"
            );
            return Ok(());
        }

        let mut attempts: u32 = 0;
        loop {
            match self.governor.acquire() {
                Admission::Granted(_token) => {}
                Admission::Blocked { wait } => {
                    if !self.sleep_or_drain(wait).await {
                        return Err(CoreError::QuotaExceeded {
                            provider: "alpaca".to_string(),
                            wait,
                        });
                    }
                    continue;
                }
            }

            match self.broker.submit(order).await {
                Ok(ack) => {
                    tracing::info!(
                        symbol = %order.symbol,
                        order_id = %ack.id,
                        status = %ack.status,
                        "order submitted"
                    );
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    match self.policy.next_action(e.class, attempts, e.retry_after) {
                        NextAction::RetryAfter(delay) => {
                            tracing::warn!(
                                symbol = %order.symbol,
                                attempt = attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "retrying order submission"
                            );
                            if !self.sleep_or_drain(delay).await {
                                return Err(CoreError::TransientProvider {
                                    provider: "alpaca".to_string(),
                                    message: format!("drain interrupted retry: {}", e.message),
                                });
                            }
                        }
                        NextAction::Fatal => {
                            return Err(CoreError::FatalProvider {
                                provider: "alpaca".to_string(),
                                message: e.message,
                            })
                        }
                    }
                }
            }
        }
    }

    async fn sleep_or_drain(&self, wait: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(wait) => true,
            _ = shutdown.changed() => !*shutdown.borrow(),
        }
    }
}
