//! Core engine: candidate selection, risk management, position ledger,
//! profit accounting, lot sizing.

mod accounting;
mod config;
mod cycle;
mod ledger;
mod risk;
mod selector;
mod sizing;

pub use accounting::{AccountingEngine, EquityPoint};
pub use config::{EngineConfig, RiskConfig};
pub use cycle::{CycleReport, EntryOutcome, EntryRecord, SkipReason};
pub use ledger::PositionLedger;
pub use risk::{RiskEngine, StopCheck};
pub use selector::{CandidateSelector, EntryPlan};
pub use sizing::{size_entry, SizingOutcome};
