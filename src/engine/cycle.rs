//! Per-cycle entry outcomes. Skips are expected results of a cycle, not
//! errors; they are collected into a report so one bad candidate never
//! aborts the others.

use std::fmt;

use rust_decimal::Decimal;

/// Why a selected candidate did not turn into a submitted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No quote was available for the ticker this cycle
    DataUnavailable,
    /// The allocation buys less than one whole share
    InsufficientFunds,
    /// The brokerage rejected the order
    OrderRejected(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DataUnavailable => write!(f, "no market data"),
            SkipReason::InsufficientFunds => write!(f, "allocation below one share"),
            SkipReason::OrderRejected(msg) => write!(f, "order rejected: {msg}"),
        }
    }
}

/// What happened to one candidate this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Submitted {
        order_id: String,
        quantity: i64,
        stop_price: Decimal,
        /// True when the signal stop was unusable and the fallback
        /// stop was substituted
        stop_adjusted: bool,
    },
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub ticker: String,
    pub outcome: EntryOutcome,
}

/// Summary of one entry cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub entries: Vec<EntryRecord>,
}

impl CycleReport {
    pub fn push(&mut self, ticker: String, outcome: EntryOutcome) {
        self.entries.push(EntryRecord { ticker, outcome });
    }

    pub fn submitted(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, EntryOutcome::Submitted { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.entries.len() - self.submitted()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "no entries this cycle");
        }
        write!(f, "{} submitted, {} skipped", self.submitted(), self.skipped())?;
        for entry in &self.entries {
            match &entry.outcome {
                EntryOutcome::Submitted {
                    quantity,
                    stop_price,
                    ..
                } => write!(f, "\n  {} BUY {} (stop {})", entry.ticker, quantity, stop_price)?,
                EntryOutcome::Skipped(reason) => {
                    write!(f, "\n  {} skipped: {}", entry.ticker, reason)?
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_report_counts() {
        let mut report = CycleReport::default();
        report.push(
            "NVDA".to_string(),
            EntryOutcome::Submitted {
                order_id: "o1".to_string(),
                quantity: 7,
                stop_price: dec!(96),
                stop_adjusted: false,
            },
        );
        report.push(
            "AMD".to_string(),
            EntryOutcome::Skipped(SkipReason::InsufficientFunds),
        );
        report.push(
            "TSLA".to_string(),
            EntryOutcome::Skipped(SkipReason::DataUnavailable),
        );

        assert_eq!(report.submitted(), 1);
        assert_eq!(report.skipped(), 2);

        let rendered = report.to_string();
        assert!(rendered.contains("NVDA BUY 7"));
        assert!(rendered.contains("AMD skipped: allocation below one share"));
    }

    #[test]
    fn test_empty_report() {
        assert_eq!(CycleReport::default().to_string(), "no entries this cycle");
    }
}
