//! Per-worker trading loop.
//!
//! Every order path starts with the fleet safety gate, so a tripped kill
//! switch is observed on the very next order intent of every worker.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{ExchangeClient, Signal, Strategy, Ticker};
use crate::audit::Source;
use crate::coordinator::FleetContext;
use crate::domain::{OrderSide, Position, Side, WorkerInstance};
use crate::error::{FleetError, Result};
use crate::safety::BlockReason;

/// What happened to one order intent
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Filled { quantity: Decimal, price: Decimal },
    /// Blocked by the kill switch
    Suppressed,
    /// Blocked by a validator
    Rejected(String),
    /// Acknowledged but not executed yet
    Pending,
}

/// Counters for one analysis cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub prices_rejected: u32,
    pub orders_filled: u32,
    pub orders_suppressed: u32,
    pub orders_rejected: u32,
    pub ticker_errors: u32,
}

impl CycleReport {
    fn count(&mut self, outcome: &OrderOutcome) {
        match outcome {
            OrderOutcome::Filled { .. } => self.orders_filled += 1,
            OrderOutcome::Suppressed => self.orders_suppressed += 1,
            OrderOutcome::Rejected(_) => self.orders_rejected += 1,
            OrderOutcome::Pending => {}
        }
    }
}

pub struct WorkerRuntime {
    name: String,
    instance: Arc<Mutex<WorkerInstance>>,
    exchange: Arc<dyn ExchangeClient>,
    strategy: Arc<dyn Strategy>,
    ctx: FleetContext,
}

impl WorkerRuntime {
    pub fn new(
        name: &str,
        instance: Arc<Mutex<WorkerInstance>>,
        exchange: Arc<dyn ExchangeClient>,
        strategy: Arc<dyn Strategy>,
        ctx: FleetContext,
    ) -> Self {
        Self {
            name: name.to_string(),
            instance,
            exchange,
            strategy,
            ctx,
        }
    }

    /// Run the loop on its own task until stopped
    pub fn spawn(self, interval: Duration) -> WorkerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let name = self.name.clone();

        let task = tokio::spawn(async move {
            info!(worker = %self.name, interval_secs = interval.as_secs(), "Worker loop started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match self.run_cycle().await {
                            Ok(report) => debug!(worker = %self.name, ?report, "Cycle complete"),
                            Err(e) => self.record_cycle_error(&e).await,
                        }
                    }
                }
            }
            info!(worker = %self.name, "Worker loop exited");
        });

        WorkerHandle {
            name,
            stop_tx,
            task,
        }
    }

    async fn record_cycle_error(&self, error: &FleetError) {
        warn!(worker = %self.name, error = %error, "Worker cycle failed");
        self.instance.lock().await.last_error = Some(error.to_string());
        self.ctx.metrics.record_error(error.kind());
        self.ctx
            .audit
            .log_error(Some(&self.name), error.kind(), &error.to_string(), Source::Bot);
    }

    /// One analysis cycle over every configured instrument
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let (config, positions) = {
            let instance = self.instance.lock().await;
            (instance.config.clone(), instance.positions.clone())
        };
        let balance = self.exchange.fetch_balance().await?;
        let mut open_count = positions.len();
        let mut report = CycleReport::default();

        for symbol in &config.instruments {
            let market = match self.exchange.fetch_ticker(symbol).await {
                Ok(market) => market,
                Err(e) => {
                    warn!(worker = %self.name, symbol = %symbol, error = %e, "Ticker fetch failed");
                    report.ticker_errors += 1;
                    continue;
                }
            };

            if !self.ctx.safety.validate_price(symbol, market.last) {
                report.prices_rejected += 1;
                continue;
            }

            if let Some(position) = positions.get(symbol) {
                if let Some(reason) = self.strategy.should_sell(position, &market) {
                    info!(worker = %self.name, symbol = %symbol, %reason, "Exit signal");
                    let outcome = self.close_position(position, &market, balance).await?;
                    if matches!(outcome, OrderOutcome::Filled { .. }) {
                        open_count = open_count.saturating_sub(1);
                    }
                    report.count(&outcome);
                }
                continue;
            }

            if self.strategy.analyze(&market) != Signal::Buy {
                continue;
            }
            if open_count >= config.max_positions as usize {
                self.ctx.safety.record_block(BlockReason::PositionLimit);
                debug!(worker = %self.name, symbol = %symbol, "Position limit reached");
                continue;
            }

            let slots = Decimal::from(config.max_positions.max(1));
            let amount = balance * config.capital_percent / Decimal::ONE_HUNDRED / slots;
            let outcome = self.open_position(symbol, &market, amount, balance).await?;
            if matches!(outcome, OrderOutcome::Filled { .. }) {
                open_count += 1;
            }
            report.count(&outcome);
        }

        Ok(report)
    }

    /// Safety gate shared by every order path. Returns false when the order
    /// must be suppressed.
    fn gate(&self, symbol: &str, side: OrderSide, balance: Decimal) -> bool {
        let safety = &self.ctx.safety;
        if safety.is_safe_to_trade(balance, safety.daily_pnl()) {
            return true;
        }
        safety.suppress_order(&self.name, symbol, side);
        self.ctx.metrics.inc_orders_suppressed();
        false
    }

    async fn open_position(
        &self,
        symbol: &str,
        market: &Ticker,
        amount: Decimal,
        balance: Decimal,
    ) -> Result<OrderOutcome> {
        if !self.gate(symbol, OrderSide::Buy, balance) {
            return Ok(OrderOutcome::Suppressed);
        }

        let amount = match self
            .ctx
            .safety
            .validate_trade(symbol, amount, market.last, balance)
        {
            Ok(amount) => amount,
            Err(FleetError::SafetyTripped(_)) => return Ok(OrderOutcome::Suppressed),
            Err(FleetError::ValidationRejected(reason)) => {
                debug!(worker = %self.name, symbol, %reason, "Entry rejected");
                return Ok(OrderOutcome::Rejected(reason));
            }
            Err(e) => return Err(e),
        };

        let quantity = (amount / market.last).round_dp(8);
        let ack = self
            .exchange
            .place_market_order(symbol, OrderSide::Buy, quantity)
            .await?;
        let status = match self.ctx.safety.validate_order_ack(&ack) {
            Ok(status) => status,
            Err(e) => {
                warn!(worker = %self.name, symbol, error = %e, "Untrusted order acknowledgment");
                return Ok(OrderOutcome::Rejected(e.to_string()));
            }
        };
        if !status.is_executed() {
            info!(worker = %self.name, symbol, id = ?ack.id, "Entry order pending");
            return Ok(OrderOutcome::Pending);
        }

        let filled = ack.filled_qty.unwrap_or(quantity);
        let price = ack.average_price.unwrap_or(market.last);
        let position = Position::open(symbol, Side::Long, price, filled);
        self.instance.lock().await.open_position(position.clone());

        self.ctx.safety.record_executed_trade();
        self.ctx.audit.log_position_change(&self.name, &position, "open");
        self.ctx
            .audit
            .log_trade(&self.name, symbol, OrderSide::Buy.as_str(), price, filled, None);
        info!(worker = %self.name, symbol, %price, quantity = %filled, "Position opened");

        Ok(OrderOutcome::Filled {
            quantity: filled,
            price,
        })
    }

    async fn close_position(
        &self,
        position: &Position,
        market: &Ticker,
        balance: Decimal,
    ) -> Result<OrderOutcome> {
        let symbol = position.instrument.as_str();
        if !self.gate(symbol, OrderSide::Sell, balance) {
            return Ok(OrderOutcome::Suppressed);
        }

        let ack = self
            .exchange
            .place_market_order(symbol, OrderSide::Sell, position.quantity)
            .await?;
        let status = match self.ctx.safety.validate_order_ack(&ack) {
            Ok(status) => status,
            Err(e) => {
                warn!(worker = %self.name, symbol, error = %e, "Untrusted order acknowledgment");
                return Ok(OrderOutcome::Rejected(e.to_string()));
            }
        };
        if !status.is_executed() {
            info!(worker = %self.name, symbol, id = ?ack.id, "Exit order pending");
            return Ok(OrderOutcome::Pending);
        }

        let price = ack.average_price.unwrap_or(market.last);
        let pnl = position.pnl_at(price);
        {
            let mut instance = self.instance.lock().await;
            instance.close_position(symbol);
            instance.stats.record_close(pnl);
        }

        self.ctx.safety.record_executed_trade();
        self.ctx.safety.record_pnl(pnl);
        self.ctx.metrics.record_trade(&self.name, pnl).await;
        self.ctx.audit.log_position_change(&self.name, position, "close");
        self.ctx.audit.log_trade(
            &self.name,
            symbol,
            OrderSide::Sell.as_str(),
            price,
            position.quantity,
            Some(pnl),
        );
        info!(worker = %self.name, symbol, %price, %pnl, "Position closed");

        Ok(OrderOutcome::Filled {
            quantity: position.quantity,
            price,
        })
    }
}

/// Owner-side handle of a running worker loop
pub struct WorkerHandle {
    name: String,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the loop to exit after its current cycle. Aborts it if it does
    /// not exit within `timeout`. Returns true on a clean exit.
    pub async fn stop(mut self, timeout: Duration) -> bool {
        let _ = self.stop_tx.send(true);
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(worker = %self.name, "Worker did not stop in time, aborting");
                self.task.abort();
                false
            }
        }
    }

    /// Abort immediately, regardless of in-flight work
    pub fn abort(self) {
        let _ = self.stop_tx.send(true);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{EventFilter, EventType, Severity};
    use crate::config::{SafetyConfig, WorkerConfig};
    use crate::domain::{Issuer, OrderAck};
    use crate::worker::{MockExchangeClient, MockStrategy};
    use rust_decimal_macros::dec;

    fn instance(instruments: &[&str]) -> Arc<Mutex<WorkerInstance>> {
        let config = WorkerConfig {
            capital_percent: dec!(50),
            max_positions: 2,
            instruments: instruments.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        Arc::new(Mutex::new(WorkerInstance::new("bot_a", config)))
    }

    fn filled(price: Decimal, qty: Decimal) -> OrderAck {
        OrderAck {
            id: Some("ord-1".into()),
            symbol: None,
            status: Some("filled".into()),
            filled_qty: Some(qty),
            average_price: Some(price),
        }
    }

    fn runtime(
        exchange: MockExchangeClient,
        strategy: MockStrategy,
        instance: Arc<Mutex<WorkerInstance>>,
        ctx: &FleetContext,
    ) -> WorkerRuntime {
        WorkerRuntime::new(
            "bot_a",
            instance,
            Arc::new(exchange),
            Arc::new(strategy),
            ctx.clone(),
        )
    }

    #[tokio::test]
    async fn test_buy_signal_opens_position() {
        let ctx = FleetContext::in_memory(SafetyConfig::default());
        let mut exchange = MockExchangeClient::new();
        exchange.expect_fetch_balance().returning(|| Ok(dec!(1000)));
        exchange
            .expect_fetch_ticker()
            .returning(|s| Ok(Ticker::new(s, dec!(100))));
        exchange
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, qty| Ok(filled(dec!(100), qty)));

        let mut strategy = MockStrategy::new();
        strategy.expect_analyze().returning(|_| Signal::Buy);

        let instance = instance(&["BTC/USDT"]);
        let report = runtime(exchange, strategy, instance.clone(), &ctx)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.orders_filled, 1);
        let instance = instance.lock().await;
        let position = &instance.positions["BTC/USDT"];
        // 1000 * 50% / 2 slots = 250, clamped to the 100 order maximum
        assert_eq!(position.quantity, dec!(1));
        assert_eq!(position.entry_price, dec!(100));

        let trades = ctx
            .audit
            .get_recent_events(10, &EventFilter::event_type(EventType::Trade));
        assert_eq!(trades.len(), 1);
    }

    #[tokio::test]
    async fn test_tripped_kill_switch_suppresses_order() {
        let ctx = FleetContext::in_memory(SafetyConfig::default());
        ctx.safety.trip("test", &Issuer::coordinator());

        let mut exchange = MockExchangeClient::new();
        exchange.expect_fetch_balance().returning(|| Ok(dec!(1000)));
        exchange
            .expect_fetch_ticker()
            .returning(|s| Ok(Ticker::new(s, dec!(100))));
        exchange.expect_place_market_order().times(0);

        let mut strategy = MockStrategy::new();
        strategy.expect_analyze().returning(|_| Signal::Buy);

        let instance = instance(&["BTC/USDT", "ETH/USDT"]);
        let report = runtime(exchange, strategy, instance.clone(), &ctx)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.orders_suppressed, 2);
        assert!(instance.lock().await.positions.is_empty());

        let suppressed: Vec<_> = ctx
            .audit
            .get_recent_events(10, &EventFilter::severity(Severity::Critical))
            .into_iter()
            .filter(|e| e.action == "order_suppressed")
            .collect();
        assert_eq!(suppressed.len(), 2);
    }

    #[tokio::test]
    async fn test_price_spike_skips_instrument() {
        let ctx = FleetContext::in_memory(SafetyConfig::default());
        ctx.safety.validate_price("BTC/USDT", dec!(100));

        let mut exchange = MockExchangeClient::new();
        exchange.expect_fetch_balance().returning(|| Ok(dec!(1000)));
        exchange
            .expect_fetch_ticker()
            .returning(|s| Ok(Ticker::new(s, dec!(120))));
        exchange.expect_place_market_order().times(0);

        let mut strategy = MockStrategy::new();
        strategy.expect_analyze().times(0);

        let report = runtime(exchange, strategy, instance(&["BTC/USDT"]), &ctx)
            .run_cycle()
            .await
            .unwrap();
        assert_eq!(report.prices_rejected, 1);
        assert!(!ctx.safety.is_tripped());
    }

    #[tokio::test]
    async fn test_exit_closes_position_and_records_pnl() {
        let ctx = FleetContext::in_memory(SafetyConfig::default());
        let instance = instance(&["ETH/USDT"]);
        instance
            .lock()
            .await
            .open_position(Position::open("ETH/USDT", Side::Long, dec!(100), dec!(2)));

        let mut exchange = MockExchangeClient::new();
        exchange.expect_fetch_balance().returning(|| Ok(dec!(1000)));
        exchange
            .expect_fetch_ticker()
            .returning(|s| Ok(Ticker::new(s, dec!(103))));
        exchange
            .expect_place_market_order()
            .times(1)
            .returning(|_, side, qty| {
                assert_eq!(side, OrderSide::Sell);
                Ok(filled(dec!(103), qty))
            });

        let mut strategy = MockStrategy::new();
        strategy
            .expect_should_sell()
            .returning(|_, _| Some("take_profit".to_string()));

        runtime(exchange, strategy, instance.clone(), &ctx)
            .run_cycle()
            .await
            .unwrap();

        let instance = instance.lock().await;
        assert!(instance.positions.is_empty());
        assert_eq!(instance.stats.total_trades, 1);
        assert_eq!(instance.stats.total_pnl, dec!(6));
        assert_eq!(ctx.safety.daily_pnl(), dec!(6));
    }

    #[tokio::test]
    async fn test_unrecognized_ack_is_not_trusted() {
        let ctx = FleetContext::in_memory(SafetyConfig::default());
        let mut exchange = MockExchangeClient::new();
        exchange.expect_fetch_balance().returning(|| Ok(dec!(1000)));
        exchange
            .expect_fetch_ticker()
            .returning(|s| Ok(Ticker::new(s, dec!(100))));
        exchange.expect_place_market_order().returning(|_, _, _| {
            Ok(OrderAck {
                status: Some("expired".into()),
                ..Default::default()
            })
        });

        let mut strategy = MockStrategy::new();
        strategy.expect_analyze().returning(|_| Signal::Buy);

        let instance = instance(&["BTC/USDT"]);
        let report = runtime(exchange, strategy, instance.clone(), &ctx)
            .run_cycle()
            .await
            .unwrap();
        assert_eq!(report.orders_rejected, 1);
        assert!(instance.lock().await.positions.is_empty());
    }

    #[tokio::test]
    async fn test_handle_stops_loop() {
        let ctx = FleetContext::in_memory(SafetyConfig::default());
        let mut exchange = MockExchangeClient::new();
        exchange.expect_fetch_balance().returning(|| Ok(dec!(1000)));
        exchange
            .expect_fetch_ticker()
            .returning(|s| Ok(Ticker::new(s, dec!(100))));
        let mut strategy = MockStrategy::new();
        strategy.expect_analyze().returning(|_| Signal::Hold);

        let handle = runtime(exchange, strategy, instance(&["BTC/USDT"]), &ctx)
            .spawn(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.stop(Duration::from_secs(1)).await);
    }
}
