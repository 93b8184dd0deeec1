//! Safety supervisor: fleet kill switch plus per-sample validators.

pub mod kill_switch;
pub mod supervisor;
pub mod validators;

pub use kill_switch::{
    KillSwitch, KillSwitchConfig, KillSwitchState, KillSwitchStatus, LimitCheck, TripReason,
};
pub use supervisor::{BlockReason, SafetyStats, SafetySupervisor};
pub use validators::{OrderValidator, PriceValidator, TradeFrequencyValidator};
