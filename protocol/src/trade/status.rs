//! Durable trade status.
//!
//! The status of a [`Transaction`](super::Transaction) is its checkpoint:
//! every step of a flow writes it before returning, success or failure.
//! Statuses carry a stage number and only ever move forward. Terminal
//! statuses are final.
//!
//! ```text
//! stage  buyer                          seller
//!   0    START                          START
//!   1    NEGOTIATED (OT)                NEGOTIATED (OT)
//!   2    REQUEST_SENT                   (request received)
//!   3    RESPONSE_RECEIVED              RESPONSE_SENT
//!   4    RECEIPT_CREATED
//!   5    RECEIPT_SENT                   RECEIPT_RECEIVED
//!   6    SECRET_RECEIVED                SECRET_SENT
//!   7    SECRET_VERIFIED | INVALID_SECRET
//!   8    SEND_CLAIM
//!   9    CLOSED                         CLOSED
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Start,
    SessionFailed,
    InvalidBulletin,
    InvalidSession,
    Negotiated,
    NegoFailed,
    RequestSent,
    RequestFailed,
    ResponseReceived,
    ResponseSent,
    ResponseFailed,
    InvalidResponse,
    ReceiptCreated,
    ReceiptSent,
    ReceiptReceived,
    ReceiptFailed,
    InvalidReceipt,
    SecretSent,
    SendSecretTerminated,
    SendSecretFailed,
    SecretReceived,
    ReadSecretFailed,
    SecretVerified,
    /// Terminal for schemes without a claim path; complaint modes move on
    /// to `SEND_CLAIM` or `SEND_CLAIM_FAILED`.
    InvalidSecret,
    SendClaim,
    SendClaimFailed,
    DecryptFailed,
    Cancelled,
    Closed,
}

impl TxStatus {
    /// Whether no further transition is possible from this status.
    pub fn is_terminal(self) -> bool {
        use TxStatus::*;
        matches!(
            self,
            SessionFailed
                | InvalidBulletin
                | InvalidSession
                | NegoFailed
                | RequestFailed
                | ResponseFailed
                | InvalidResponse
                | ReceiptFailed
                | InvalidReceipt
                | SendSecretTerminated
                | SendSecretFailed
                | ReadSecretFailed
                | SendClaimFailed
                | DecryptFailed
                | Cancelled
                | Closed
        )
    }

    /// Position in the flow. Failure statuses share the stage of the step
    /// that produced them.
    pub fn stage(self) -> u8 {
        use TxStatus::*;
        match self {
            Start | SessionFailed | InvalidBulletin | InvalidSession | Cancelled => 0,
            Negotiated | NegoFailed => 1,
            RequestSent | RequestFailed => 2,
            ResponseReceived | ResponseSent | ResponseFailed | InvalidResponse => 3,
            ReceiptCreated => 4,
            ReceiptSent | ReceiptReceived | ReceiptFailed | InvalidReceipt => 5,
            SecretSent | SendSecretTerminated | SendSecretFailed | SecretReceived
            | ReadSecretFailed => 6,
            SecretVerified | InvalidSecret | DecryptFailed => 7,
            SendClaim | SendClaimFailed => 8,
            Closed => 9,
        }
    }

    /// Whether a trade currently at `self` may be moved to `next`.
    ///
    /// A terminal status may be entered from any non-terminal one; any
    /// other status must be strictly further along the flow.
    pub fn can_advance_to(self, next: TxStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.stage() > self.stage()
    }

    /// Wire/log name, e.g. `SEND_SECRET_TERMINATED`.
    pub fn as_str(self) -> &'static str {
        use TxStatus::*;
        match self {
            Start => "START",
            SessionFailed => "SESSION_FAILED",
            InvalidBulletin => "INVALID_BULLETIN",
            InvalidSession => "INVALID_SESSION",
            Negotiated => "NEGOTIATED",
            NegoFailed => "NEGO_FAILED",
            RequestSent => "REQUEST_SENT",
            RequestFailed => "REQUEST_FAILED",
            ResponseReceived => "RESPONSE_RECEIVED",
            ResponseSent => "RESPONSE_SENT",
            ResponseFailed => "RESPONSE_FAILED",
            InvalidResponse => "INVALID_RESPONSE",
            ReceiptCreated => "RECEIPT_CREATED",
            ReceiptSent => "RECEIPT_SENT",
            ReceiptReceived => "RECEIPT_RECEIVED",
            ReceiptFailed => "RECEIPT_FAILED",
            InvalidReceipt => "INVALID_RECEIPT",
            SecretSent => "SECRET_SENT",
            SendSecretTerminated => "SEND_SECRET_TERMINATED",
            SendSecretFailed => "SEND_SECRET_FAILED",
            SecretReceived => "SECRET_RECEIVED",
            ReadSecretFailed => "READ_SECRET_FAILED",
            SecretVerified => "SECRET_VERIFIED",
            InvalidSecret => "INVALID_SECRET",
            SendClaim => "SEND_CLAIM",
            SendClaimFailed => "SEND_CLAIM_FAILED",
            DecryptFailed => "DECRYPT_FAILED",
            Cancelled => "CANCELLED",
            Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_only() {
        assert!(TxStatus::Start.can_advance_to(TxStatus::RequestSent));
        assert!(TxStatus::RequestSent.can_advance_to(TxStatus::ResponseReceived));
        assert!(!TxStatus::ResponseReceived.can_advance_to(TxStatus::RequestSent));
        assert!(!TxStatus::RequestSent.can_advance_to(TxStatus::RequestSent));
    }

    #[test]
    fn terminal_is_final() {
        assert!(TxStatus::ReceiptSent.can_advance_to(TxStatus::Cancelled));
        assert!(!TxStatus::Closed.can_advance_to(TxStatus::SendClaim));
        assert!(!TxStatus::Cancelled.can_advance_to(TxStatus::Closed));
        assert!(!TxStatus::SendSecretTerminated.can_advance_to(TxStatus::SecretSent));
    }

    #[test]
    fn claim_path_after_invalid_secret() {
        assert!(!TxStatus::InvalidSecret.is_terminal());
        assert!(TxStatus::InvalidSecret.can_advance_to(TxStatus::SendClaim));
        assert!(TxStatus::SendClaim.can_advance_to(TxStatus::Closed));
    }

    #[test]
    fn display_names() {
        assert_eq!(TxStatus::SendSecretTerminated.to_string(), "SEND_SECRET_TERMINATED");
        assert_eq!(TxStatus::Closed.to_string(), "CLOSED");
    }
}
