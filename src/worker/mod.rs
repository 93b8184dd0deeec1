//! Worker trading loops and the collaborators they consume.

pub mod exchange;
pub mod runtime;
pub mod strategy;

pub use exchange::{ExchangeClient, PaperExchange, Ticker};
pub use runtime::{CycleReport, OrderOutcome, WorkerHandle, WorkerRuntime};
pub use strategy::{RiskExitFactory, RiskExitStrategy, Signal, Strategy, StrategyFactory};

#[cfg(test)]
pub use exchange::MockExchangeClient;
#[cfg(test)]
pub use strategy::MockStrategy;
