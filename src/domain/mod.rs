pub mod control;
pub mod order;
pub mod position;
pub mod worker;

pub use control::*;
pub use order::*;
pub use position::*;
pub use worker::*;
