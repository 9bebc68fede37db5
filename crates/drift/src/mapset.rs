//! Container adapters for keyed-map and unique-set values.
//!
//! Maps and sets mutate through named operations rather than key assignment,
//! so they cannot reuse the generic interception path. Each gets a dedicated
//! node shape: reads resolve against `copy ?? base`, the first mutating call
//! materializes a full shallow duplicate, and set membership recognizes both
//! an original member and the draft lazily created from it.
//!
//! The adapters are installed as the `"map-set"` capability; drafting a map
//! or set value without [`enable_map_set`] having run is a configuration
//! error.

use crate::draft::{create_draft, Draft, DraftValue, NodeData, NodeState};
use crate::scope::Scope;
use crate::{registry, DriftError, DriftResult, MapValue, SetValue, Value};
use indexmap::IndexMap;
use std::sync::Arc;

/// Implementation object registered under [`registry::MAP_SET`].
#[derive(Debug)]
pub struct MapSetCapability {
    _private: (),
}

impl MapSetCapability {
    pub(crate) fn draft_map(
        &self,
        base: Arc<MapValue>,
        scope: &Scope,
        parent: Option<&Draft>,
    ) -> Draft {
        Draft::from_data(
            NodeData::Map {
                base,
                copy: None,
                assigned: IndexMap::new(),
            },
            Some(scope.clone()),
            parent,
        )
    }

    pub(crate) fn draft_set(
        &self,
        base: Arc<SetValue>,
        scope: &Scope,
        parent: Option<&Draft>,
    ) -> Draft {
        Draft::from_data(
            NodeData::Set {
                base,
                copy: None,
                drafts: Vec::new(),
            },
            Some(scope.clone()),
            parent,
        )
    }
}

/// Install the keyed-map / unique-set adapters.
pub fn enable_map_set() {
    registry::register(
        registry::MAP_SET,
        Arc::new(MapSetCapability { _private: () }),
    );
}

pub(crate) fn map_materialize<'a>(
    base: &Arc<MapValue>,
    copy: &'a mut Option<IndexMap<String, DraftValue>>,
) -> &'a mut IndexMap<String, DraftValue> {
    copy.get_or_insert_with(|| {
        base.iter()
            .map(|(k, v)| (k.clone(), DraftValue::Value(v.clone())))
            .collect()
    })
}

/// Read one map entry, lazily drafting a value still shared with the base.
/// The draft is created once and memoized into the copy, so repeated reads
/// return the same child.
pub(crate) fn map_get(
    draft: &Draft,
    st: &mut NodeState,
    key: &str,
) -> DriftResult<Option<DraftValue>> {
    let (slot, shared_with_base) = {
        let NodeData::Map { base, copy, .. } = &st.data else {
            unreachable!("caller checked the kind");
        };
        let slot = match copy {
            Some(c) => c.get(key).cloned(),
            None => base.get(key).cloned().map(DraftValue::Value),
        };
        let shared = match (&slot, base.get(key)) {
            (Some(DraftValue::Value(v)), Some(base_value)) => v.same(base_value),
            _ => false,
        };
        (slot, shared)
    };
    match slot {
        Some(DraftValue::Value(v)) if v.is_draftable() && shared_with_base => {
            let scope = st.scope.clone().ok_or(DriftError::NoActiveSession)?;
            let child = create_draft(&v, Some(draft), &scope)?;
            let NodeData::Map { base, copy, .. } = &mut st.data else {
                unreachable!("caller checked the kind");
            };
            map_materialize(base, copy).insert(key.to_owned(), DraftValue::Draft(child.clone()));
            Ok(Some(DraftValue::Draft(child)))
        }
        other => Ok(other),
    }
}

/// Write one map entry. Writing a value identical to the currently visible
/// one is a no-op regardless of prior mutation.
pub(crate) fn map_set(st: &mut NodeState, key: String, value: DraftValue) -> DriftResult<bool> {
    let NodeData::Map { base, copy, assigned } = &mut st.data else {
        unreachable!("caller checked the kind");
    };
    let current = match copy.as_ref() {
        Some(c) => c.get(&key).cloned(),
        None => base.get(&key).cloned().map(DraftValue::Value),
    };
    if current.is_some_and(|existing| existing.same(&value)) {
        return Ok(false);
    }
    assigned.insert(key.clone(), true);
    map_materialize(base, copy).insert(key, value);
    Ok(true)
}

/// Remove one map entry. Returns `(mutated, removed)`.
pub(crate) fn map_remove(st: &mut NodeState, key: &str) -> DriftResult<(bool, bool)> {
    let NodeData::Map { base, copy, assigned } = &mut st.data else {
        unreachable!("caller checked the kind");
    };
    let present = match copy.as_ref() {
        Some(c) => c.contains_key(key),
        None => base.contains_key(key),
    };
    if !present {
        return Ok((false, false));
    }
    assigned.insert(key.to_owned(), false);
    map_materialize(base, copy).shift_remove(key);
    Ok((true, true))
}

/// Remove every map entry, recording each base key as removed.
pub(crate) fn map_clear(st: &mut NodeState) -> DriftResult<bool> {
    let NodeData::Map { base, copy, assigned } = &mut st.data else {
        unreachable!("caller checked the kind");
    };
    // Entries that only ever existed through assignment leave no trace.
    assigned.retain(|key, _| base.contains_key(key));
    for key in base.keys() {
        assigned.insert(key.clone(), false);
    }
    map_materialize(base, copy).clear();
    Ok(true)
}

/// Entries of the working map, drafting lazily via [`map_get`] in iteration
/// order.
pub(crate) fn map_entries(
    draft: &Draft,
    st: &mut NodeState,
) -> DriftResult<Vec<(String, DraftValue)>> {
    let keys: Vec<String> = {
        let NodeData::Map { base, copy, .. } = &st.data else {
            unreachable!("caller checked the kind");
        };
        match copy {
            Some(c) => c.keys().cloned().collect(),
            None => base.keys().cloned().collect(),
        }
    };
    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(value) = map_get(draft, st, &key)? {
            entries.push((key, value));
        }
    }
    Ok(entries)
}

/// Membership test against the working set. Recognizes a raw value, a draft
/// handle stored in the copy, and the draft of a previously seen original
/// member. Never materializes.
pub(crate) fn set_has(st: &NodeState, value: &DraftValue) -> bool {
    let NodeData::Set { base, copy, drafts } = &st.data else {
        unreachable!("caller checked the kind");
    };
    match copy {
        None => match value {
            DraftValue::Value(v) => base.contains(v),
            DraftValue::Draft(_) => false,
        },
        Some(c) => {
            if c.iter().any(|slot| slot.same(value)) {
                return true;
            }
            if let DraftValue::Value(v) = value {
                if let Some((_, drafted)) = drafts.iter().find(|(original, _)| original.same(v)) {
                    return c
                        .iter()
                        .any(|slot| matches!(slot, DraftValue::Draft(d) if d.ptr_eq(drafted)));
                }
            }
            false
        }
    }
}

/// Materialize the working copy of a set, eagerly drafting every draftable
/// member up front so iteration order is preserved.
fn prepare_set_copy(draft: &Draft, st: &mut NodeState) -> DriftResult<()> {
    {
        let NodeData::Set { copy, .. } = &st.data else {
            unreachable!("caller checked the kind");
        };
        if copy.is_some() {
            return Ok(());
        }
    }
    let scope = st.scope.clone().ok_or(DriftError::NoActiveSession)?;
    let members: Vec<Value> = {
        let NodeData::Set { base, .. } = &st.data else {
            unreachable!("caller checked the kind");
        };
        base.iter().cloned().collect()
    };
    let mut new_copy = Vec::with_capacity(members.len());
    let mut new_drafts = Vec::new();
    for member in members {
        if member.is_draftable() {
            let child = create_draft(&member, Some(draft), &scope)?;
            new_drafts.push((member, child.clone()));
            new_copy.push(DraftValue::Draft(child));
        } else {
            new_copy.push(DraftValue::Value(member));
        }
    }
    let NodeData::Set { copy, drafts, .. } = &mut st.data else {
        unreachable!("caller checked the kind");
    };
    *copy = Some(new_copy);
    drafts.extend(new_drafts);
    Ok(())
}

/// Add a member. Returns whether the working set changed.
pub(crate) fn set_add(draft: &Draft, st: &mut NodeState, value: DraftValue) -> DriftResult<bool> {
    if set_has(st, &value) {
        return Ok(false);
    }
    prepare_set_copy(draft, st)?;
    let NodeData::Set { copy, .. } = &mut st.data else {
        unreachable!("caller checked the kind");
    };
    copy.as_mut()
        .expect("set copy was just materialized")
        .push(value);
    Ok(true)
}

/// Remove a member (or the draft standing in for it). Returns whether the
/// working set changed.
pub(crate) fn set_delete(
    draft: &Draft,
    st: &mut NodeState,
    value: &DraftValue,
) -> DriftResult<bool> {
    if !set_has(st, value) {
        return Ok(false);
    }
    prepare_set_copy(draft, st)?;
    let NodeData::Set { copy, drafts, .. } = &mut st.data else {
        unreachable!("caller checked the kind");
    };
    let c = copy.as_mut().expect("set copy was just materialized");
    let position = c.iter().position(|slot| slot.same(value)).or_else(|| {
        let DraftValue::Value(v) = value else {
            return None;
        };
        let (_, drafted) = drafts.iter().find(|(original, _)| original.same(v))?;
        c.iter()
            .position(|slot| matches!(slot, DraftValue::Draft(d) if d.ptr_eq(drafted)))
    });
    match position {
        Some(pos) => {
            c.remove(pos);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Remove every member.
pub(crate) fn set_clear(draft: &Draft, st: &mut NodeState) -> DriftResult<bool> {
    prepare_set_copy(draft, st)?;
    let NodeData::Set { copy, .. } = &mut st.data else {
        unreachable!("caller checked the kind");
    };
    copy.as_mut()
        .expect("set copy was just materialized")
        .clear();
    Ok(true)
}

/// Working members, in order. Materializes (drafting every member) but does
/// not mark the node modified.
pub(crate) fn set_values(draft: &Draft, st: &mut NodeState) -> DriftResult<Vec<DraftValue>> {
    prepare_set_copy(draft, st)?;
    let NodeData::Set { copy, .. } = &st.data else {
        unreachable!("caller checked the kind");
    };
    Ok(copy.as_ref().expect("set copy was just materialized").clone())
}
