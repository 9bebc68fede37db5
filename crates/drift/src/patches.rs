//! Change-record codec, installed as the `"patches"` capability.
//!
//! Synthesis walks the finalized draft graph top-down: a node's own records
//! come before its descendants', and within a node records follow insertion
//! order. Records and maps synthesize from assignment bookkeeping, sequences
//! from a base-versus-copy diff, sets from an identity membership diff
//! (removals in base iteration order, then additions in working order).
//!
//! Application replays records against a live draft, so replaying through
//! the session facade keeps structural sharing for untouched subtrees.

use crate::draft::{want_index, Draft, DraftKind, DraftValue, NodeData};
use crate::scope::Scope;
use crate::{
    registry, DriftError, DriftResult, MapValue, PatchOp, Path, RecordValue, Seg, SequenceValue,
    SetValue, Value,
};
use indexmap::IndexMap;
use std::sync::Arc;

/// Implementation object registered under [`registry::PATCHES`].
pub struct PatchesCapability {
    _private: (),
}

/// Install the change-record codec.
pub fn enable_patches() {
    registry::register(
        registry::PATCHES,
        Arc::new(PatchesCapability { _private: () }),
    );
}

enum KeyedBase {
    Record(Arc<RecordValue>),
    Map(Arc<MapValue>),
}

impl KeyedBase {
    fn get(&self, key: &str) -> Option<&Value> {
        match self {
            KeyedBase::Record(r) => r.get(key),
            KeyedBase::Map(m) => m.get(key),
        }
    }
}

enum NodeInfo {
    Keyed {
        base: KeyedBase,
        copy: IndexMap<String, DraftValue>,
        assigned: IndexMap<String, bool>,
    },
    Listed {
        base: Arc<SequenceValue>,
        copy: Vec<DraftValue>,
        assigned: IndexMap<usize, bool>,
    },
    Members {
        base: Arc<SetValue>,
        copy: Vec<DraftValue>,
    },
}

impl PatchesCapability {
    /// Record a wholesale replacement of the root. `None` records an
    /// explicitly absent result.
    pub(crate) fn record_replacement(&self, scope: &Scope, base: &Value, result: Option<&Value>) {
        let forward = match result {
            Some(v) => PatchOp::replace(Path::root(), v.clone()),
            None => PatchOp::replace_with_nothing(Path::root()),
        };
        scope.record(forward, PatchOp::replace(Path::root(), base.clone()));
    }

    /// Synthesize records for a finalized draft graph, ancestors before
    /// descendants.
    pub(crate) fn record_tree(&self, scope: &Scope, draft: &Draft, path: &Path) -> DriftResult<()> {
        let info = {
            let st = draft
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !st.modified {
                return Ok(());
            }
            match &st.data {
                NodeData::Record { base, copy, assigned } => NodeInfo::Keyed {
                    base: KeyedBase::Record(base.clone()),
                    copy: copy.clone().unwrap_or_default(),
                    assigned: assigned.clone(),
                },
                NodeData::Map { base, copy, assigned } => NodeInfo::Keyed {
                    base: KeyedBase::Map(base.clone()),
                    copy: copy.clone().unwrap_or_default(),
                    assigned: assigned.clone(),
                },
                NodeData::Sequence { base, copy, assigned } => NodeInfo::Listed {
                    base: base.clone(),
                    copy: copy.clone().unwrap_or_default(),
                    assigned: assigned.clone(),
                },
                NodeData::Set { base, copy, .. } => NodeInfo::Members {
                    base: base.clone(),
                    copy: copy.clone().unwrap_or_default(),
                },
                NodeData::Leaf { .. } => return Ok(()),
            }
        };

        match info {
            NodeInfo::Keyed { base, copy, assigned } => {
                for (key, added) in &assigned {
                    let target = path.with_segment(Seg::Key(key.clone()));
                    if !*added {
                        if let Some(old) = base.get(key) {
                            scope.record(
                                PatchOp::remove(target.clone()),
                                PatchOp::add(target, old.clone()),
                            );
                        }
                        continue;
                    }
                    let Some(slot) = copy.get(key) else {
                        continue;
                    };
                    let value = final_slot_value(slot)?;
                    match base.get(key) {
                        Some(old) => {
                            if !old.same(&value) {
                                scope.record(
                                    PatchOp::replace(target.clone(), value),
                                    PatchOp::replace(target, old.clone()),
                                );
                            }
                        }
                        None => scope.record(
                            PatchOp::add(target.clone(), value),
                            PatchOp::remove(target),
                        ),
                    }
                }
                for (key, slot) in &copy {
                    if assigned.contains_key(key) {
                        continue;
                    }
                    if let DraftValue::Draft(child) = slot {
                        if child.owning_scope().is_some_and(|s| Arc::ptr_eq(&s, scope)) {
                            self.record_tree(scope, child, &path.with_segment(Seg::Key(key.clone())))?;
                        }
                    }
                }
            }
            NodeInfo::Listed { base, copy, assigned } => {
                let base_len = base.len();
                let copy_len = copy.len();
                for index in 0..base_len.min(copy_len) {
                    if assigned.get(&index).copied() != Some(true) {
                        continue;
                    }
                    let value = final_slot_value(&copy[index])?;
                    if let Some(old) = base.get(index) {
                        if !old.same(&value) {
                            let target = path.with_segment(Seg::Index(index));
                            scope.record(
                                PatchOp::replace(target.clone(), value),
                                PatchOp::replace(target, old.clone()),
                            );
                        }
                    }
                }
                if copy_len > base_len {
                    // Forward additions in ascending order; their inverses
                    // remove from the tail down so replay stays aligned.
                    for index in base_len..copy_len {
                        scope.record_forward(PatchOp::add(
                            path.with_segment(Seg::Index(index)),
                            final_slot_value(&copy[index])?,
                        ));
                    }
                    for index in (base_len..copy_len).rev() {
                        scope.record_inverse(PatchOp::remove(path.with_segment(Seg::Index(index))));
                    }
                } else if copy_len < base_len {
                    for index in (copy_len..base_len).rev() {
                        scope.record_forward(PatchOp::remove(path.with_segment(Seg::Index(index))));
                    }
                    for index in copy_len..base_len {
                        if let Some(old) = base.get(index) {
                            scope.record_inverse(PatchOp::add(
                                path.with_segment(Seg::Index(index)),
                                old.clone(),
                            ));
                        }
                    }
                }
                for (index, slot) in copy.iter().enumerate() {
                    if assigned.contains_key(&index) {
                        continue;
                    }
                    if let DraftValue::Draft(child) = slot {
                        if child.owning_scope().is_some_and(|s| Arc::ptr_eq(&s, scope)) {
                            self.record_tree(scope, child, &path.with_segment(Seg::Index(index)))?;
                        }
                    }
                }
            }
            NodeInfo::Members { base, copy } => {
                // Nested mutation of a drafted member surfaces as the old
                // member removed and the new one added; members never get
                // per-member record paths.
                let mut finals = Vec::with_capacity(copy.len());
                for slot in &copy {
                    finals.push(final_slot_value(slot)?);
                }
                for (index, member) in base.iter().enumerate() {
                    if !finals.iter().any(|candidate| candidate.same(member)) {
                        let target = path.with_segment(Seg::Index(index));
                        scope.record(
                            PatchOp::remove_member(target.clone(), member.clone()),
                            PatchOp::add(target, member.clone()),
                        );
                    }
                }
                for (index, candidate) in finals.iter().enumerate() {
                    if !base.contains(candidate) {
                        let target = path.with_segment(Seg::Index(index));
                        scope.record(
                            PatchOp::add(target.clone(), candidate.clone()),
                            PatchOp::remove_member(target, candidate.clone()),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Replay records against a live draft.
    pub(crate) fn apply(&self, root: &Draft, ops: &[PatchOp]) -> DriftResult<()> {
        for op in ops {
            apply_record(root, op)?;
        }
        Ok(())
    }
}

fn final_slot_value(slot: &DraftValue) -> DriftResult<Value> {
    match slot {
        DraftValue::Value(v) => Ok(v.clone()),
        DraftValue::Draft(d) => {
            let cached = d
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .resolved
                .clone();
            match cached {
                Some(v) => Ok(v),
                // A foreign-session draft has no cached resolution; its
                // working state stands in.
                None => d.snapshot(),
            }
        }
    }
}

fn apply_record(root: &Draft, op: &PatchOp) -> DriftResult<()> {
    let segs = op.path().segments();
    let Some((last, parents)) = segs.split_last() else {
        return Err(DriftError::invalid_operation(
            "a root-path record must be a replacement, applied before drafting",
        ));
    };

    let mut target = root.clone();
    for seg in parents {
        target = target.child(seg.clone()).map_err(|e| match e {
            DriftError::PathNotFound { .. } => DriftError::path_not_found(op.path().clone()),
            other => other,
        })?;
    }

    match op {
        PatchOp::Replace { value, .. } => {
            let value = value.clone().ok_or_else(|| {
                DriftError::invalid_operation("a replace record below the root must carry a value")
            })?;
            match target.kind() {
                DraftKind::Record | DraftKind::Map => target.set(last.clone(), value),
                DraftKind::Sequence => {
                    let index = want_index(last)?;
                    let len = target.len()?;
                    if index >= len {
                        return Err(DriftError::index_out_of_bounds(index, len));
                    }
                    target.set(index, value)
                }
                DraftKind::Set => Err(DriftError::invalid_operation(
                    "replace does not address set members",
                )),
                DraftKind::Scalar => Err(DriftError::type_mismatch("container", "scalar")),
            }
        }
        PatchOp::Add { value, .. } => match target.kind() {
            DraftKind::Record | DraftKind::Map => target.set(last.clone(), value.clone()),
            DraftKind::Sequence => {
                let index = want_index(last)?;
                target.insert(index, value.clone())
            }
            DraftKind::Set => target.add(value.clone()).map(|_| ()),
            DraftKind::Scalar => Err(DriftError::type_mismatch("container", "scalar")),
        },
        PatchOp::Remove { value, .. } => match target.kind() {
            DraftKind::Record | DraftKind::Map => target.remove(last.clone()).map(|_| ()),
            DraftKind::Sequence => {
                let index = want_index(last)?;
                target.remove(index).map(|_| ())
            }
            DraftKind::Set => {
                let member = value.clone().ok_or_else(|| {
                    DriftError::invalid_operation("a set removal record must carry the member")
                })?;
                target.delete_value(&DraftValue::Value(member)).map(|_| ())
            }
            DraftKind::Scalar => Err(DriftError::type_mismatch("container", "scalar")),
        },
    }
}
