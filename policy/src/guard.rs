//! Critical gate guard: the last line of defense against a misconfigured
//! or malicious policy silently disabling a security-relevant check.
//!
//! Load-time validation already rejects critical gates in exemption
//! lists, so violations here can only come from composition effects or
//! hand-built models. Belt and suspenders.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::model::{GateId, GateRegistry};

/// A policy attempted to exempt a critical gate. The gate still runs;
/// the violation is surfaced loudly for operator review.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CriticalGateViolation {
    /// Name of the critical gate that was targeted
    pub gate: String,
    /// Descriptions of the policies that attempted the exemption
    pub attempted_by: Vec<String>,
}

/// Force every critical gate in the consideration set back into
/// `candidate`, regardless of exemptions, and record which policies
/// attempted to exempt one.
///
/// `considered` is the registry-level consideration set (enabled gates
/// whose `applies_to` filter is satisfied); the guard overrides policy
/// exemptions, not registry scoping.
pub fn enforce(
    mut candidate: BTreeSet<GateId>,
    considered: &BTreeSet<GateId>,
    attempted_exemptions: &BTreeMap<GateId, Vec<String>>,
    registry: &GateRegistry,
) -> (BTreeSet<GateId>, Vec<CriticalGateViolation>) {
    let mut violations = Vec::new();
    for &id in considered {
        let gate = registry.get(id);
        if !gate.critical {
            continue;
        }
        candidate.insert(id);
        if let Some(sources) = attempted_exemptions.get(&id) {
            tracing::error!(
                gate = %gate.name,
                attempted_by = ?sources,
                "policy attempted to exempt a critical gate; the gate will run anyway"
            );
            violations.push(CriticalGateViolation {
                gate: gate.name.clone(),
                attempted_by: sources.clone(),
            });
        }
    }
    (candidate, violations)
}
