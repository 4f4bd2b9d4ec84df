pub mod charge;
pub mod encounter;
pub mod settlement;

pub use charge::{ChargeLine, ChargeStatus, ChargeType, OutstandingSummary};
pub use encounter::{AuxiliaryOrder, AuxiliaryOrderKind, BillableReference, Encounter, MedicalRecord, PrescriptionRef};
pub use settlement::{
    CompositeSettlement, PaymentStatus, SettlementBreakdownItem, SettlementMethod,
    SettlementOutcome,
};
