use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::charge::ChargeType;

/// How the patient pays.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementMethod {
    /// Settled synchronously at the front desk.
    Cash,
    GatewayA,
    GatewayB,
}

impl SettlementMethod {
    /// Gateway methods settle asynchronously and must be polled.
    pub fn is_gateway(self) -> bool {
        !matches!(self, Self::Cash)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "CASH",
            Self::GatewayA => "GATEWAY_A",
            Self::GatewayB => "GATEWAY_B",
        }
    }
}

impl fmt::Display for SettlementMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single gateway transaction covering several charge lines.
///
/// Immutable once created; a retry after cancel gets a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSettlement {
    pub payment_id: String,
    pub payment_url: String,
    #[serde(default)]
    pub total_amount: Decimal,
    #[serde(default)]
    pub breakdown: Vec<SettlementBreakdownItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettlementBreakdownItem {
    pub code: String,
    #[serde(rename = "type", default)]
    pub charge_type: ChargeType,
    #[serde(default)]
    pub amount: Decimal,
}

/// Gateway-side status of a composite payment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Pending,
    Processing,
    Completed,
    Failed,
    /// Any status this client does not know yet. Treated as still pending.
    #[serde(other)]
    Unknown,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Terminal result of one settlement attempt.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementOutcome {
    Completed {
        /// Amount confirmed by the backend, when it reports one.
        #[serde(skip_serializing_if = "Option::is_none")]
        amount: Option<Decimal>,
    },
    Failed {
        reason: String,
    },
    /// Poll budget exhausted without a terminal gateway status. Money may
    /// have moved.
    TimedOut,
    Cancelled,
}

impl SettlementOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Short label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}
