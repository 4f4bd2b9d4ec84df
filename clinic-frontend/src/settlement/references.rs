use crate::models::{BillableReference, Encounter};

/// Every identifier the ledger may have charged for this encounter: the
/// encounter itself first, then each auxiliary order in encounter order.
pub fn build_references(encounter: &Encounter) -> Vec<BillableReference> {
    std::iter::once(BillableReference::new(encounter.id.as_str()))
        .chain(
            encounter
                .auxiliary_orders
                .iter()
                .map(|order| BillableReference::new(order.id.as_str())),
        )
        .collect()
}
