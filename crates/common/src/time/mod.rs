//! Time abstractions
//!
//! - **[`clock`]**: real and mock wall clocks reporting epoch milliseconds

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
