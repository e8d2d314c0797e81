//! Transaction FSM state definitions.
//!
//! State IDs are designed for PostgreSQL storage as SMALLINT.
//! Terminal states: COMPLETED (50), FAILED (-10), REVERSED (-20).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TxStatus {
    /// Created and persisted, no external step attempted yet
    Pending = 0,

    /// A step worker holds the transaction and is mid-call
    Processing = 10,

    /// Mobile-money charge pushed, waiting for the provider callback
    AwaitingMobileMoneyConfirm = 20,

    /// Waiting for the trading-ledger transfer to confirm
    AwaitingLedgerConfirm = 30,

    /// Ledger debited, waiting for the mobile-money payout to settle
    AwaitingMobileMoneyPayout = 40,

    /// Terminal: business effect fully applied on both rails
    Completed = 50,

    /// Terminal: saga failed, reason and provider error recorded
    Failed = -10,

    /// Terminal: completed transfer later reversed
    Reversed = -20,
}

impl TxStatus {
    /// Every state, for exhaustive table checks.
    pub const ALL: [TxStatus; 8] = [
        TxStatus::Pending,
        TxStatus::Processing,
        TxStatus::AwaitingMobileMoneyConfirm,
        TxStatus::AwaitingLedgerConfirm,
        TxStatus::AwaitingMobileMoneyPayout,
        TxStatus::Completed,
        TxStatus::Failed,
        TxStatus::Reversed,
    ];

    /// Check if this is a terminal state.
    ///
    /// The single exception to "terminal means frozen" is
    /// COMPLETED -> REVERSED, which `can_transition` still allows.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Completed | TxStatus::Failed | TxStatus::Reversed
        )
    }

    /// The legal transition table. Everything not listed here is rejected.
    pub fn can_transition(from: TxStatus, to: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (from, to),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, AwaitingMobileMoneyConfirm)
                | (Processing, AwaitingLedgerConfirm)
                | (Processing, Completed)
                | (Processing, Failed)
                | (AwaitingMobileMoneyConfirm, AwaitingLedgerConfirm)
                | (AwaitingMobileMoneyConfirm, Failed)
                | (AwaitingLedgerConfirm, Processing)
                | (AwaitingLedgerConfirm, AwaitingMobileMoneyPayout)
                | (AwaitingLedgerConfirm, Completed)
                | (AwaitingLedgerConfirm, Failed)
                | (AwaitingMobileMoneyPayout, Processing)
                | (AwaitingMobileMoneyPayout, Completed)
                | (AwaitingMobileMoneyPayout, Failed)
                | (Completed, Reversed)
        )
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TxStatus::Pending),
            10 => Some(TxStatus::Processing),
            20 => Some(TxStatus::AwaitingMobileMoneyConfirm),
            30 => Some(TxStatus::AwaitingLedgerConfirm),
            40 => Some(TxStatus::AwaitingMobileMoneyPayout),
            50 => Some(TxStatus::Completed),
            -10 => Some(TxStatus::Failed),
            -20 => Some(TxStatus::Reversed),
            _ => None,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "PENDING",
            TxStatus::Processing => "PROCESSING",
            TxStatus::AwaitingMobileMoneyConfirm => "AWAITING_MOBILE_MONEY_CONFIRM",
            TxStatus::AwaitingLedgerConfirm => "AWAITING_LEDGER_CONFIRM",
            TxStatus::AwaitingMobileMoneyPayout => "AWAITING_MOBILE_MONEY_PAYOUT",
            TxStatus::Completed => "COMPLETED",
            TxStatus::Failed => "FAILED",
            TxStatus::Reversed => "REVERSED",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TxStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TxStatus::from_id(value).ok_or(())
    }
}
