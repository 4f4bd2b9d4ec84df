//! Clinical encounter as seen by the billing dialog.
//!
//! Only the fields the settlement flow reads are modelled; the exam wizard
//! owns the rest of the record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A clinical encounter (one patient visit).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    pub id: String,
    #[serde(default)]
    pub patient_id: Option<String>,
    /// Orders attached to the encounter that carry their own charges,
    /// in the order the encounter lists them.
    #[serde(default)]
    pub auxiliary_orders: Vec<AuxiliaryOrder>,
    #[serde(default)]
    pub medical_record: Option<MedicalRecord>,
}

impl Encounter {
    /// Prescription to print once the bill is settled.
    ///
    /// Only a finalized record yields one; drafts are still being edited by
    /// the doctor.
    pub fn printable_prescription(&self) -> Option<&PrescriptionRef> {
        self.medical_record
            .as_ref()
            .filter(|record| record.finalized)
            .and_then(|record| record.prescription.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxiliaryOrder {
    pub id: String,
    #[serde(default)]
    pub kind: AuxiliaryOrderKind,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuxiliaryOrderKind {
    #[default]
    LabTest,
    Imaging,
    Procedure,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    pub id: String,
    #[serde(default)]
    pub finalized: bool,
    #[serde(default)]
    pub prescription: Option<PrescriptionRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrescriptionRef {
    pub id: String,
}

/// Identifier of anything the billing ledger can attach charges to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillableReference(String);

impl BillableReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BillableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BillableReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
