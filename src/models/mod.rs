//! Data models for signal candidates, fills, positions, and realized trades.

mod candidate;
mod fill;
mod position;

pub use candidate::{Candidate, Setup};
pub use fill::{FillEvent, FillSide};
pub use position::{Position, RealizedTrade, SellOutcome};
