//! Converting a finished session's draft graph into an immutable result.
//!
//! An untouched node resolves to its base unchanged, preserving reference
//! identity with the original — this is what guarantees structural sharing.
//! A modified node resolves to a fresh container built from its working
//! copy, with every child draft resolved in place first. When auto-freeze
//! applies, everything the resolution discovers is frozen on the way out.

use crate::draft::{Draft, DraftValue, NodeData};
use crate::patches::PatchesCapability;
use crate::scope::{revoke_scope, Scope};
use crate::{
    freeze, registry, DriftError, DriftResult, MapValue, Path, RecordValue, SequenceValue,
    SetValue, Value,
};
use std::sync::Arc;

/// What a recipe produced.
///
/// The tagged form removes the ambiguity a sentinel value would have: not
/// returning a replacement, explicitly producing an absent result, and
/// replacing the state with a value are three distinct cases.
#[derive(Debug)]
pub enum Produced {
    /// The recipe mutated its draft in place (or did nothing); the draft is
    /// the implicit result.
    Unchanged,
    /// The result is explicitly absent; finalizes to [`Value::Null`].
    Nothing,
    /// The recipe replaced the state wholesale.
    Replaced(DraftValue),
}

impl From<()> for Produced {
    fn from(_: ()) -> Self {
        Produced::Unchanged
    }
}

impl From<Value> for Produced {
    fn from(v: Value) -> Self {
        Produced::Replaced(DraftValue::Value(v))
    }
}

impl From<Draft> for Produced {
    fn from(d: Draft) -> Self {
        Produced::Replaced(DraftValue::Draft(d))
    }
}

impl From<DraftValue> for Produced {
    fn from(v: DraftValue) -> Self {
        Produced::Replaced(v)
    }
}

/// Compute the committed result of a session and retire it.
///
/// Whatever the outcome, every draft the session created is inert once this
/// returns.
pub(crate) fn process_result(outcome: Produced, scope: &Scope, root: &Draft) -> DriftResult<Value> {
    let result = match commit(outcome, scope, root) {
        Ok(v) => v,
        Err(e) => {
            revoke_scope(scope);
            return Err(e);
        }
    };
    revoke_scope(scope);
    Ok(result)
}

fn commit(outcome: Produced, scope: &Scope, root: &Draft) -> DriftResult<Value> {
    let is_replaced = match &outcome {
        Produced::Unchanged => false,
        Produced::Replaced(DraftValue::Draft(d)) if d.ptr_eq(root) => false,
        _ => true,
    };

    if !is_replaced {
        let value = resolve(scope, root)?;
        if scope.is_recording() {
            let codec = registry::lookup::<PatchesCapability>(registry::PATCHES)?;
            codec.record_tree(scope, root, &Path::root())?;
        }
        tracing::trace!(modified = root.is_modified(), "session committed");
        return Ok(value);
    }

    // A replacement is only legal when the draft tree was left untouched.
    if root.is_modified() {
        return Err(DriftError::ReplacedAndMutated);
    }

    let replacement = match outcome {
        Produced::Nothing => None,
        Produced::Replaced(DraftValue::Value(v)) => {
            // Values the recipe fabricated are frozen top-level only; deep
            // freezing applies to trees discovered through draft resolution.
            if scope.freeze_allowed() && v.is_draftable() {
                freeze(&v, false);
            }
            Some(v)
        }
        Produced::Replaced(DraftValue::Draft(d)) => {
            if d.owning_scope().is_some_and(|s| Arc::ptr_eq(&s, scope)) {
                Some(resolve(scope, &d)?)
            } else {
                scope.disable_auto_freeze();
                Some(d.snapshot()?)
            }
        }
        Produced::Unchanged => unreachable!("handled by the is_replaced check"),
    };

    if scope.is_recording() {
        let codec = registry::lookup::<PatchesCapability>(registry::PATCHES)?;
        codec.record_replacement(scope, &root.original()?, replacement.as_ref());
    }
    tracing::trace!(nothing = replacement.is_none(), "session committed with replacement");
    Ok(replacement.unwrap_or(Value::Null))
}

/// Resolve a draft into its final value.
///
/// The result is cached on the node, so a draft aliased into several
/// positions resolves to one shared container.
pub(crate) fn resolve(scope: &Scope, draft: &Draft) -> DriftResult<Value> {
    enum Plan {
        Untouched(Value),
        Foreign,
        Keyed { is_record: bool, slots: Vec<(String, DraftValue)> },
        Listed { is_sequence: bool, slots: Vec<DraftValue> },
    }

    let plan = {
        let mut st = draft
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if st.revoked {
            return Err(DriftError::RevokedDraft);
        }
        if let Some(v) = &st.resolved {
            return Ok(v.clone());
        }
        let owned_here = st
            .scope
            .as_ref()
            .is_some_and(|owner| Arc::ptr_eq(owner, scope));
        if !owned_here {
            Plan::Foreign
        } else if !st.modified {
            Plan::Untouched(st.data.base_value())
        } else {
            if st.finalized {
                return Err(DriftError::invalid_operation(
                    "draft graph contains a cycle",
                ));
            }
            st.finalized = true;
            match &st.data {
                NodeData::Record { base, copy, .. } => Plan::Keyed {
                    is_record: true,
                    slots: copy
                        .as_ref()
                        .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                        .unwrap_or_else(|| {
                            base.iter()
                                .map(|(k, v)| (k.clone(), DraftValue::Value(v.clone())))
                                .collect()
                        }),
                },
                NodeData::Map { base, copy, .. } => Plan::Keyed {
                    is_record: false,
                    slots: copy
                        .as_ref()
                        .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                        .unwrap_or_else(|| {
                            base.iter()
                                .map(|(k, v)| (k.clone(), DraftValue::Value(v.clone())))
                                .collect()
                        }),
                },
                NodeData::Sequence { base, copy, .. } => Plan::Listed {
                    is_sequence: true,
                    slots: copy.as_ref().cloned().unwrap_or_else(|| {
                        base.iter().map(|v| DraftValue::Value(v.clone())).collect()
                    }),
                },
                NodeData::Set { base, copy, .. } => Plan::Listed {
                    is_sequence: false,
                    slots: copy.as_ref().cloned().unwrap_or_else(|| {
                        base.iter().map(|v| DraftValue::Value(v.clone())).collect()
                    }),
                },
                NodeData::Leaf { base } => Plan::Untouched(base.clone()),
            }
        }
    };

    match plan {
        Plan::Untouched(base) => {
            // Reference identity with the original is preserved; the shared
            // subtree is frozen in place when freezing applies.
            if scope.freeze_allowed() {
                freeze(&base, true);
            }
            Ok(base)
        }
        Plan::Foreign => {
            // A draft owned by another session leaked into this result.
            // Freezing its state could corrupt the other session, so freeze
            // is disabled and the current working state is captured instead.
            scope.disable_auto_freeze();
            draft.snapshot()
        }
        Plan::Keyed { is_record, slots } => {
            let mut entries = Vec::with_capacity(slots.len());
            for (key, slot) in slots {
                entries.push((key, resolve_slot(scope, slot)?));
            }
            let value = if is_record {
                Value::from(entries.into_iter().collect::<RecordValue>())
            } else {
                Value::from(entries.into_iter().collect::<MapValue>())
            };
            finish_node(scope, draft, value)
        }
        Plan::Listed { is_sequence, slots } => {
            let mut items = Vec::with_capacity(slots.len());
            for slot in slots {
                items.push(resolve_slot(scope, slot)?);
            }
            let value = if is_sequence {
                Value::from(items.into_iter().collect::<SequenceValue>())
            } else {
                Value::from(items.into_iter().collect::<SetValue>())
            };
            finish_node(scope, draft, value)
        }
    }
}

fn resolve_slot(scope: &Scope, slot: DraftValue) -> DriftResult<Value> {
    match slot {
        DraftValue::Value(v) => {
            if scope.freeze_allowed() {
                freeze(&v, true);
            }
            Ok(v)
        }
        DraftValue::Draft(d) => resolve(scope, &d),
    }
}

fn finish_node(scope: &Scope, draft: &Draft, value: Value) -> DriftResult<Value> {
    if scope.freeze_allowed() {
        // Children were frozen as they resolved; the new container itself
        // only needs a shallow freeze.
        freeze(&value, false);
    }
    draft
        .inner
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .resolved = Some(value.clone());
    Ok(value)
}
