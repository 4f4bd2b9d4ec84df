//! Charge lines and the outstanding summary built from them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One payable item on the billing ledger.
///
/// `code` is unique and stable across fetches of the same charge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChargeLine {
    pub code: String,
    #[serde(rename = "type", default)]
    pub charge_type: ChargeType,
    /// Missing amounts are treated as zero, see [`ChargeLine::amount`].
    #[serde(default)]
    pub amount: Option<Decimal>,
    pub status: ChargeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChargeLine {
    pub fn amount(&self) -> Decimal {
        self.amount.unwrap_or(Decimal::ZERO)
    }

    pub fn is_unpaid(&self) -> bool {
        self.status.is_unpaid()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeType {
    EncounterFee,
    LabTest,
    Prescription,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Unpaid,
    Pending,
    Processing,
    Completed,
    Paid,
}

impl ChargeStatus {
    /// Money has not (yet) been confirmed for this charge.
    pub fn is_unpaid(self) -> bool {
        matches!(self, Self::Unpaid | Self::Pending | Self::Processing)
    }

    pub fn is_paid(self) -> bool {
        matches!(self, Self::Completed | Self::Paid)
    }
}

/// Paid/unpaid view over every charge of a set of billable references.
///
/// Totals are always derived from `lines`; construct through
/// [`OutstandingSummary::from_lines`].
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutstandingSummary {
    lines: Vec<ChargeLine>,
    total_unpaid: Decimal,
    total_paid: Decimal,
}

impl OutstandingSummary {
    pub fn from_lines(lines: Vec<ChargeLine>) -> Self {
        let total_unpaid = lines
            .iter()
            .filter(|line| line.status.is_unpaid())
            .map(ChargeLine::amount)
            .sum();
        let total_paid = lines
            .iter()
            .filter(|line| line.status.is_paid())
            .map(ChargeLine::amount)
            .sum();

        Self {
            lines,
            total_unpaid,
            total_paid,
        }
    }

    pub fn lines(&self) -> &[ChargeLine] {
        &self.lines
    }

    pub fn total_unpaid(&self) -> Decimal {
        self.total_unpaid
    }

    pub fn total_paid(&self) -> Decimal {
        self.total_paid
    }

    pub fn unpaid_lines(&self) -> impl Iterator<Item = &ChargeLine> {
        self.lines.iter().filter(|line| line.is_unpaid())
    }

    pub fn unpaid_codes(&self) -> Vec<String> {
        self.unpaid_lines().map(|line| line.code.clone()).collect()
    }

    pub fn is_settled(&self) -> bool {
        self.unpaid_lines().next().is_none()
    }
}
