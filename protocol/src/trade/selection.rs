//! What the buyer asks for.
//!
//! Range-addressed modes select blocks (plain) or rows (table) with
//! `{start, count}` ranges. In OT modes the seller only ever sees the
//! phantom ranges; the demands must hide inside them. VRF-query modes
//! select rows by the values of one key column instead.

use serde::{Deserialize, Serialize};

use super::bulletin::Bulletin;
use super::error::TradeError;
use super::mode::{Scheme, Transfer};

/// A half-open run of block or row indices, `[start, start + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: u64,
    pub count: u64,
}

impl Range {
    pub fn new(start: u64, count: u64) -> Self {
        Self { start, count }
    }

    /// One past the last index, or `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.start.checked_add(self.count)
    }

    pub fn contains(&self, other: &Range) -> bool {
        match (self.end(), other.end()) {
            (Some(end), Some(other_end)) => other.start >= self.start && other_end <= end,
            _ => false,
        }
    }

    pub fn indices(&self) -> std::ops::Range<u64> {
        self.start..self.start.saturating_add(self.count)
    }
}

/// The buyer's selection for one trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    /// Block or row ranges. `phantoms` is empty for plain transfer.
    Ranges {
        demands: Vec<Range>,
        phantoms: Vec<Range>,
    },
    /// Keyed lookup on a table column. `phantoms` are decoy values for OT.
    Query {
        key: String,
        values: Vec<String>,
        phantoms: Vec<String>,
    },
}

impl Selection {
    /// Plain-transfer range selection.
    pub fn ranges(demands: Vec<Range>) -> Self {
        Selection::Ranges {
            demands,
            phantoms: Vec::new(),
        }
    }

    /// Number of demanded items the buyer pays for.
    pub fn demand_count(&self) -> u64 {
        match self {
            Selection::Ranges { demands, .. } => demands.iter().map(|r| r.count).sum(),
            Selection::Query { values, .. } => values.len() as u64,
        }
    }

    /// Check the selection against the bulletin it is meant for.
    pub fn validate(&self, bulletin: &Bulletin) -> Result<(), TradeError> {
        let mode = bulletin.mode;
        let invalid = |reason: String| Err(TradeError::InvalidSelection(reason));

        match self {
            Selection::Ranges { demands, phantoms } => {
                if mode.scheme() == Scheme::VrfQuery {
                    return invalid(format!("{mode} selects by key, not by range"));
                }
                if demands.is_empty() {
                    return invalid("no demand ranges".to_string());
                }
                for range in demands.iter().chain(phantoms) {
                    match range.end() {
                        _ if range.count == 0 => {
                            return invalid(format!("empty range at {}", range.start));
                        }
                        None => return invalid(format!("range at {} overflows", range.start)),
                        Some(end) if end > bulletin.n => {
                            return invalid(format!(
                                "range [{}, {end}) exceeds {} items",
                                range.start, bulletin.n
                            ));
                        }
                        Some(_) => {}
                    }
                }
                match mode.transfer() {
                    Transfer::Ot => {
                        if let Some(d) = demands
                            .iter()
                            .find(|d| !phantoms.iter().any(|p| p.contains(d)))
                        {
                            return invalid(format!(
                                "demand [{}, +{}) is not covered by a phantom range",
                                d.start, d.count
                            ));
                        }
                    }
                    Transfer::Plain if !phantoms.is_empty() => {
                        return invalid(format!("{mode} takes no phantom ranges"));
                    }
                    Transfer::Plain => {}
                }
            }
            Selection::Query {
                key,
                values,
                phantoms,
            } => {
                if mode.scheme() != Scheme::VrfQuery {
                    return invalid(format!("{mode} selects by range, not by key"));
                }
                if key.is_empty() || values.is_empty() {
                    return invalid("query needs a key and at least one value".to_string());
                }
                match mode.transfer() {
                    Transfer::Ot => {
                        if let Some(v) = values.iter().find(|v| !phantoms.contains(v)) {
                            return invalid(format!("value {v:?} is not among the phantoms"));
                        }
                    }
                    Transfer::Plain if !phantoms.is_empty() => {
                        return invalid(format!("{mode} takes no phantom values"));
                    }
                    Transfer::Plain => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::TradeMode;
    use alloy_primitives::B256;

    fn bulletin(mode: TradeMode) -> Bulletin {
        Bulletin {
            mode,
            size: 100 * 64,
            s: 64,
            n: 100,
            sigma_merkle_root: B256::ZERO,
        }
    }

    #[test]
    fn plain_demands_within_bounds() {
        let b = bulletin(TradeMode::PlainComplaint);
        assert!(Selection::ranges(vec![Range::new(0, 10)]).validate(&b).is_ok());
        assert!(Selection::ranges(vec![Range::new(90, 10)]).validate(&b).is_ok());
        assert!(Selection::ranges(vec![Range::new(95, 10)]).validate(&b).is_err());
        assert!(Selection::ranges(vec![Range::new(3, 0)]).validate(&b).is_err());
        assert!(Selection::ranges(vec![]).validate(&b).is_err());
        assert!(Selection::ranges(vec![Range::new(u64::MAX, 2)])
            .validate(&b)
            .is_err());
    }

    #[test]
    fn ot_demands_must_hide_in_phantoms() {
        let b = bulletin(TradeMode::PlainOtComplaint);
        let covered = Selection::Ranges {
            demands: vec![Range::new(12, 3)],
            phantoms: vec![Range::new(10, 10)],
        };
        assert!(covered.validate(&b).is_ok());

        let exposed = Selection::Ranges {
            demands: vec![Range::new(18, 5)],
            phantoms: vec![Range::new(10, 10)],
        };
        assert!(exposed.validate(&b).is_err());
    }

    #[test]
    fn plain_transfer_rejects_phantoms() {
        let b = bulletin(TradeMode::TableAtomicSwap);
        let s = Selection::Ranges {
            demands: vec![Range::new(0, 1)],
            phantoms: vec![Range::new(0, 5)],
        };
        assert!(s.validate(&b).is_err());
    }

    #[test]
    fn query_only_for_vrf_modes() {
        let query = Selection::Query {
            key: "name".into(),
            values: vec!["alice".into()],
            phantoms: vec![],
        };
        assert!(query.validate(&bulletin(TradeMode::TableVrfQuery)).is_ok());
        assert!(query.validate(&bulletin(TradeMode::TableComplaint)).is_err());
        assert!(Selection::ranges(vec![Range::new(0, 1)])
            .validate(&bulletin(TradeMode::TableVrfQuery))
            .is_err());
    }

    #[test]
    fn ot_query_values_hide_in_phantoms() {
        let b = bulletin(TradeMode::TableOtVrfQuery);
        let ok = Selection::Query {
            key: "name".into(),
            values: vec!["bob".into()],
            phantoms: vec!["alice".into(), "bob".into(), "carol".into()],
        };
        assert!(ok.validate(&b).is_ok());
        let bad = Selection::Query {
            key: "name".into(),
            values: vec!["dave".into()],
            phantoms: vec!["alice".into()],
        };
        assert!(bad.validate(&b).is_err());
    }

    #[test]
    fn demand_count_sums_ranges() {
        let s = Selection::ranges(vec![Range::new(0, 10), Range::new(20, 5)]);
        assert_eq!(s.demand_count(), 15);
    }
}
