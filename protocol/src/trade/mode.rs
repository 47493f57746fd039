//! Trade modes and their decomposition.
//!
//! A wire `mode: u8` names one of fourteen concrete modes. Each is the
//! product of three independent choices:
//!
//! | Axis       | Values                                           |
//! |------------|--------------------------------------------------|
//! | [`DataKind`] | plain bytes, or a keyed table                  |
//! | [`Scheme`]   | complaint, atomic swap, atomic swap VC, VRF    |
//! | [`Transfer`] | plain, or oblivious transfer (OT)              |
//!
//! VRF query only exists for tables.

use serde::{Deserialize, Serialize};

use crate::config;

/// Shape of the traded dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    /// Opaque bytes, addressed by block ranges.
    Plain,
    /// Rows with indexed key columns.
    Table,
}

/// Fair-exchange scheme: what the receipt commits to and whether a buyer
/// holding a bad secret can claim a refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// Seller reveals a seed; a bad block can be proven on-chain.
    Complaint,
    /// The verification happens before payment; no claim path.
    AtomicSwap,
    /// Atomic swap against a verifiable commitment to the seed.
    AtomicSwapVc,
    /// Keyed lookup; the secret unblinds the query result positions.
    VrfQuery,
}

/// Whether the demanded positions are hidden from the seller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transfer {
    /// Seller learns which blocks or keys were asked for.
    Plain,
    /// Demands are hidden among phantoms; needs a negotiation round.
    Ot,
}

/// One of the registered trade modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TradeMode {
    PlainComplaint = 0,
    PlainOtComplaint = 1,
    PlainAtomicSwap = 2,
    PlainOtAtomicSwap = 3,
    PlainAtomicSwapVc = 4,
    PlainOtAtomicSwapVc = 5,
    TableComplaint = 6,
    TableOtComplaint = 7,
    TableAtomicSwap = 8,
    TableOtAtomicSwap = 9,
    TableAtomicSwapVc = 10,
    TableOtAtomicSwapVc = 11,
    TableVrfQuery = 12,
    TableOtVrfQuery = 13,
}

impl TradeMode {
    /// Every mode, in wire-code order.
    pub const ALL: [TradeMode; config::MODE_MAX as usize] = [
        TradeMode::PlainComplaint,
        TradeMode::PlainOtComplaint,
        TradeMode::PlainAtomicSwap,
        TradeMode::PlainOtAtomicSwap,
        TradeMode::PlainAtomicSwapVc,
        TradeMode::PlainOtAtomicSwapVc,
        TradeMode::TableComplaint,
        TradeMode::TableOtComplaint,
        TradeMode::TableAtomicSwap,
        TradeMode::TableOtAtomicSwap,
        TradeMode::TableAtomicSwapVc,
        TradeMode::TableOtAtomicSwapVc,
        TradeMode::TableVrfQuery,
        TradeMode::TableOtVrfQuery,
    ];

    /// Wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn data_kind(self) -> DataKind {
        if self.code() < TradeMode::TableComplaint.code() {
            DataKind::Plain
        } else {
            DataKind::Table
        }
    }

    pub fn scheme(self) -> Scheme {
        use TradeMode::*;
        match self {
            PlainComplaint | PlainOtComplaint | TableComplaint | TableOtComplaint => {
                Scheme::Complaint
            }
            PlainAtomicSwap | PlainOtAtomicSwap | TableAtomicSwap | TableOtAtomicSwap => {
                Scheme::AtomicSwap
            }
            PlainAtomicSwapVc | PlainOtAtomicSwapVc | TableAtomicSwapVc | TableOtAtomicSwapVc => {
                Scheme::AtomicSwapVc
            }
            TableVrfQuery | TableOtVrfQuery => Scheme::VrfQuery,
        }
    }

    /// OT modes are exactly the odd codes.
    pub fn transfer(self) -> Transfer {
        if self.code() % 2 == 1 {
            Transfer::Ot
        } else {
            Transfer::Plain
        }
    }

    /// Whether this mode runs the negotiation sub-protocol.
    pub fn is_ot(self) -> bool {
        self.transfer() == Transfer::Ot
    }

    /// Whether a buyer who receives a bad secret can claim on-chain.
    pub fn has_claim_path(self) -> bool {
        self.scheme() == Scheme::Complaint
    }

    /// Recompose a mode from its axes. `None` for combinations that do not
    /// exist (a VRF query over plain data).
    pub fn compose(kind: DataKind, scheme: Scheme, transfer: Transfer) -> Option<Self> {
        TradeMode::ALL.into_iter().find(|mode| {
            mode.data_kind() == kind && mode.scheme() == scheme && mode.transfer() == transfer
        })
    }
}

impl TryFrom<u8> for TradeMode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        TradeMode::ALL.get(code as usize).copied().ok_or(code)
    }
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_table_order() {
        for (i, mode) in TradeMode::ALL.iter().enumerate() {
            assert_eq!(mode.code() as usize, i);
            assert_eq!(TradeMode::try_from(i as u8), Ok(*mode));
        }
        assert_eq!(TradeMode::try_from(config::MODE_MAX), Err(config::MODE_MAX));
    }

    #[test]
    fn decomposition() {
        assert_eq!(TradeMode::PlainComplaint.data_kind(), DataKind::Plain);
        assert_eq!(TradeMode::PlainOtAtomicSwapVc.data_kind(), DataKind::Plain);
        assert_eq!(TradeMode::TableComplaint.data_kind(), DataKind::Table);

        assert!(TradeMode::TableOtVrfQuery.is_ot());
        assert!(!TradeMode::TableVrfQuery.is_ot());
        assert_eq!(TradeMode::TableOtVrfQuery.scheme(), Scheme::VrfQuery);
        assert_eq!(TradeMode::PlainOtAtomicSwap.scheme(), Scheme::AtomicSwap);
    }

    #[test]
    fn only_complaint_modes_can_claim() {
        let claimable: Vec<_> = TradeMode::ALL
            .into_iter()
            .filter(|m| m.has_claim_path())
            .collect();
        assert_eq!(
            claimable,
            vec![
                TradeMode::PlainComplaint,
                TradeMode::PlainOtComplaint,
                TradeMode::TableComplaint,
                TradeMode::TableOtComplaint,
            ]
        );
    }

    #[test]
    fn compose_inverts_decomposition() {
        for mode in TradeMode::ALL {
            assert_eq!(
                TradeMode::compose(mode.data_kind(), mode.scheme(), mode.transfer()),
                Some(mode)
            );
        }
        assert_eq!(
            TradeMode::compose(DataKind::Plain, Scheme::VrfQuery, Transfer::Plain),
            None
        );
    }
}
