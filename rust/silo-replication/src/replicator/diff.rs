use std::collections::HashMap;

use silo_core::data::{BlindIndex, Operation, Secret, SecretId, SecretVersion};

use crate::SecretOperation;

/// A classified change: the operation that will actually be applied to the
/// reserved folder, after reconciling the reported operation against what
/// the replica really holds.
#[derive(Clone, Debug)]
pub struct ClassifiedOp {
    /// The effective operation
    pub operation: Operation,
    /// The source version document the change carries
    pub source: SecretVersion,
    /// The replica's current row under the same blind index, if any
    pub local: Option<Secret>,
}

/// Reconcile the incoming operations against the replica.
///
/// Create and Update collapse into an upsert: the dashboard's create and
/// update events are indistinguishable at the replica, so existence under
/// the blind index is the only truth. A delete needs both source evidence
/// of the blind index and a matching local row; otherwise there is nothing
/// to delete and the entry is dropped.
pub fn classify(
    operations: &[SecretOperation],
    sources_by_id: &HashMap<SecretId, SecretVersion>,
    local_by_index: &HashMap<BlindIndex, Secret>,
) -> Vec<ClassifiedOp> {
    let mut classified = Vec::with_capacity(operations.len());

    for incoming in operations {
        let source = match sources_by_id.get(&incoming.id) {
            Some(source) => source,
            None => continue,
        };
        let blind_index = match source.blind_index.as_ref() {
            Some(blind_index) => blind_index,
            None => continue,
        };
        let local = local_by_index.get(blind_index);

        let operation = match (incoming.operation, local) {
            (Operation::Create | Operation::Update, None) => Operation::Create,
            (Operation::Create | Operation::Update, Some(_)) => Operation::Update,
            (Operation::Delete, Some(_)) => Operation::Delete,
            (Operation::Delete, None) => continue,
        };

        classified.push(ClassifiedOp {
            operation,
            source: source.clone(),
            local: local.cloned(),
        });
    }

    classified
}
