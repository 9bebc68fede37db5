//! The draft interception layer.
//!
//! A [`Draft`] is the working handle a recipe mutates. Reads resolve against
//! the lazily materialized working copy (falling back to the untouched base),
//! writes record assignment bookkeeping and mark the node and all of its
//! ancestors modified, and reads of still-shared nested containers lazily
//! wrap them in child drafts so mutations compose at any depth.
//!
//! Record and sequence nodes are handled here; keyed-map and unique-set
//! nodes go through the container adapters behind the `"map-set"` capability.

use crate::mapset::{self, MapSetCapability};
use crate::scope::Scope;
use crate::{
    registry, DriftError, DriftResult, MapValue, Path, RecordValue, Seg, SequenceValue, SetValue,
    Value,
};
use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// The kind of position a draft stands in for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DraftKind {
    /// String-keyed record.
    Record,
    /// Ordered sequence.
    Sequence,
    /// Keyed-map container.
    Map,
    /// Unique-set container.
    Set,
    /// Non-draftable base; reads work, structural mutation does not.
    Scalar,
}

/// A slot in a working copy: either a settled value or a live child draft.
#[derive(Clone)]
pub enum DraftValue {
    /// A plain value.
    Value(Value),
    /// A live draft handle.
    Draft(Draft),
}

impl DraftValue {
    /// Identity comparison: values by [`Value::same`], drafts by handle.
    pub fn same(&self, other: &DraftValue) -> bool {
        match (self, other) {
            (DraftValue::Value(a), DraftValue::Value(b)) => a.same(b),
            (DraftValue::Draft(a), DraftValue::Draft(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Identity comparison against a plain value.
    pub fn same_value(&self, value: &Value) -> bool {
        matches!(self, DraftValue::Value(v) if v.same(value))
    }

    /// The plain value, if this slot is settled.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            DraftValue::Value(v) => Some(v),
            DraftValue::Draft(_) => None,
        }
    }

    /// The draft handle, if this slot is live.
    pub fn as_draft(&self) -> Option<&Draft> {
        match self {
            DraftValue::Value(_) => None,
            DraftValue::Draft(d) => Some(d),
        }
    }

    /// Current value of the slot, resolving a live draft to its working
    /// state without finalizing it.
    pub fn snapshot(&self) -> DriftResult<Value> {
        match self {
            DraftValue::Value(v) => Ok(v.clone()),
            DraftValue::Draft(d) => d.snapshot(),
        }
    }
}

impl fmt::Debug for DraftValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DraftValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            DraftValue::Draft(d) => f.debug_tuple("Draft").field(d).finish(),
        }
    }
}

impl From<Value> for DraftValue {
    fn from(v: Value) -> Self {
        DraftValue::Value(v)
    }
}

impl From<Draft> for DraftValue {
    fn from(d: Draft) -> Self {
        DraftValue::Draft(d)
    }
}

macro_rules! draft_value_from_scalar {
    ($($ty:ty),+) => {
        $(impl From<$ty> for DraftValue {
            fn from(v: $ty) -> Self {
                DraftValue::Value(Value::from(v))
            }
        })+
    };
}

draft_value_from_scalar!(bool, i32, i64, u32, f64, &str, String);

/// Kind-specific node state.
pub(crate) enum NodeData {
    Record {
        base: Arc<RecordValue>,
        copy: Option<IndexMap<String, DraftValue>>,
        assigned: IndexMap<String, bool>,
    },
    Sequence {
        base: Arc<SequenceValue>,
        copy: Option<Vec<DraftValue>>,
        assigned: IndexMap<usize, bool>,
    },
    Map {
        base: Arc<MapValue>,
        copy: Option<IndexMap<String, DraftValue>>,
        assigned: IndexMap<String, bool>,
    },
    Set {
        base: Arc<SetValue>,
        copy: Option<Vec<DraftValue>>,
        /// Original member -> its lazily created draft, so membership checks
        /// recognize both.
        drafts: Vec<(Value, Draft)>,
    },
    Leaf {
        base: Value,
    },
}

impl NodeData {
    pub(crate) fn kind(&self) -> DraftKind {
        match self {
            NodeData::Record { .. } => DraftKind::Record,
            NodeData::Sequence { .. } => DraftKind::Sequence,
            NodeData::Map { .. } => DraftKind::Map,
            NodeData::Set { .. } => DraftKind::Set,
            NodeData::Leaf { .. } => DraftKind::Scalar,
        }
    }

    /// The base value this node wraps.
    pub(crate) fn base_value(&self) -> Value {
        match self {
            NodeData::Record { base, .. } => Value::Record(base.clone()),
            NodeData::Sequence { base, .. } => Value::Sequence(base.clone()),
            NodeData::Map { base, .. } => Value::Map(base.clone()),
            NodeData::Set { base, .. } => Value::Set(base.clone()),
            NodeData::Leaf { base } => base.clone(),
        }
    }
}

/// Bookkeeping for one position in the working tree.
pub(crate) struct NodeState {
    pub(crate) data: NodeData,
    /// Owning session. Absent only for leaf drafts, which need none.
    pub(crate) scope: Option<Scope>,
    /// Back-reference, never an ownership edge.
    pub(crate) parent: Option<Weak<Mutex<NodeState>>>,
    /// True for both shallow and deep changes; monotonic.
    pub(crate) modified: bool,
    pub(crate) finalized: bool,
    pub(crate) revoked: bool,
    /// Set for drafts created with `begin_draft`.
    pub(crate) manual: bool,
    /// Finalized value, cached so aliased references resolve identically.
    pub(crate) resolved: Option<Value>,
}

/// Handle standing in for a value during a mutation session.
///
/// Cloning a `Draft` clones the handle, not the node; all clones observe and
/// apply the same pending state.
#[derive(Clone)]
pub struct Draft {
    pub(crate) inner: Arc<Mutex<NodeState>>,
}

/// Create a draft node for a draftable value.
///
/// Keyed-map and unique-set values dispatch through the `"map-set"`
/// capability; drafting one without the capability registered is a
/// configuration error.
pub(crate) fn create_draft(value: &Value, parent: Option<&Draft>, scope: &Scope) -> DriftResult<Draft> {
    let draft = match value {
        Value::Record(base) => Draft::from_data(
            NodeData::Record {
                base: base.clone(),
                copy: None,
                assigned: IndexMap::new(),
            },
            Some(scope.clone()),
            parent,
        ),
        Value::Sequence(base) => Draft::from_data(
            NodeData::Sequence {
                base: base.clone(),
                copy: None,
                assigned: IndexMap::new(),
            },
            Some(scope.clone()),
            parent,
        ),
        Value::Map(_) | Value::Set(_) => {
            let adapters = registry::lookup::<MapSetCapability>(registry::MAP_SET)?;
            match value {
                Value::Map(base) => adapters.draft_map(base.clone(), scope, parent),
                Value::Set(base) => adapters.draft_set(base.clone(), scope, parent),
                _ => unreachable!("guarded by the outer match"),
            }
        }
        other => return Err(DriftError::not_draftable(other.kind_name())),
    };
    scope.register_draft(draft.clone());
    Ok(draft)
}

impl Draft {
    pub(crate) fn from_data(data: NodeData, scope: Option<Scope>, parent: Option<&Draft>) -> Draft {
        Draft {
            inner: Arc::new(Mutex::new(NodeState {
                data,
                scope,
                parent: parent.map(|p| Arc::downgrade(&p.inner)),
                modified: false,
                finalized: false,
                revoked: false,
                manual: false,
                resolved: None,
            })),
        }
    }

    /// Wrap a non-draftable base so recipes always receive a draft. Reads
    /// work; structural operations are type mismatches.
    pub(crate) fn new_leaf(base: Value) -> Draft {
        Draft::from_data(NodeData::Leaf { base }, None, None)
    }

    /// True when both handles refer to the same node.
    #[inline]
    pub fn ptr_eq(&self, other: &Draft) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The kind of this draft.
    pub fn kind(&self) -> DraftKind {
        self.lock().data.kind()
    }

    /// True once any mutation was observed at or below this node.
    pub fn is_modified(&self) -> bool {
        self.lock().modified
    }

    /// True once the owning session finalized.
    pub fn is_finalized(&self) -> bool {
        self.lock().finalized
    }

    /// True once the owning session rolled back.
    pub fn is_revoked(&self) -> bool {
        self.lock().revoked
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock the node, rejecting inert drafts.
    pub(crate) fn live(&self) -> DriftResult<MutexGuard<'_, NodeState>> {
        let st = self.lock();
        if st.revoked {
            return Err(DriftError::RevokedDraft);
        }
        if st.finalized {
            return Err(DriftError::DraftAlreadyFinalized);
        }
        Ok(st)
    }

    pub(crate) fn revoke(&self) {
        self.lock().revoked = true;
    }

    pub(crate) fn mark_manual(&self) {
        self.lock().manual = true;
    }

    pub(crate) fn owning_scope(&self) -> Option<Scope> {
        self.lock().scope.clone()
    }

    /// Mark this node and every transitive ancestor modified. Propagation is
    /// eager and stops at the first already-modified ancestor.
    pub(crate) fn mark_changed(&self) {
        let mut cur = self.clone();
        loop {
            let parent = {
                let mut st = cur.lock();
                if st.modified {
                    return;
                }
                st.modified = true;
                st.parent.clone()
            };
            match parent.and_then(|weak| weak.upgrade()) {
                Some(inner) => cur = Draft { inner },
                None => return,
            }
        }
    }

    // -----------------------------------------------------------------------
    // reads
    // -----------------------------------------------------------------------

    /// Resolve one segment against the working state.
    ///
    /// A nested container still shared with the base is lazily wrapped in a
    /// child draft (created once and memoized); anything else — scalars,
    /// explicitly assigned values, already-drafted children — comes back
    /// verbatim.
    pub fn get(&self, seg: impl Into<Seg>) -> DriftResult<Option<DraftValue>> {
        let seg = seg.into();
        let mut st = self.live()?;
        match st.data.kind() {
            DraftKind::Record => {
                let key = want_key(&seg)?.to_owned();
                record_get(self, &mut st, &key)
            }
            DraftKind::Sequence => {
                let index = want_index(&seg)?;
                sequence_get(self, &mut st, index)
            }
            DraftKind::Map => {
                let key = want_key(&seg)?.to_owned();
                mapset::map_get(self, &mut st, &key)
            }
            DraftKind::Set => Err(DriftError::type_mismatch("record, sequence, or map", "set")),
            DraftKind::Scalar => Err(DriftError::type_mismatch(
                "container",
                st.data.base_value().kind_name(),
            )),
        }
    }

    /// Existence check against the working state. Never creates child drafts
    /// or materializes the copy.
    pub fn has(&self, seg: impl Into<Seg>) -> DriftResult<bool> {
        let seg = seg.into();
        let st = self.live()?;
        match (&st.data, &seg) {
            (NodeData::Record { base, copy, .. }, Seg::Key(key)) => Ok(match copy {
                Some(c) => c.contains_key(key),
                None => base.contains_key(key),
            }),
            (NodeData::Map { base, copy, .. }, Seg::Key(key)) => Ok(match copy {
                Some(c) => c.contains_key(key),
                None => base.contains_key(key),
            }),
            (NodeData::Sequence { base, copy, .. }, Seg::Index(i)) => Ok(match copy {
                Some(c) => *i < c.len(),
                None => *i < base.len(),
            }),
            (NodeData::Record { .. }, _) | (NodeData::Map { .. }, _) => {
                Err(DriftError::type_mismatch("key segment", "index segment"))
            }
            (NodeData::Sequence { .. }, _) => {
                Err(DriftError::type_mismatch("index segment", "key segment"))
            }
            (NodeData::Set { .. }, _) => {
                Err(DriftError::type_mismatch("record, sequence, or map", "set"))
            }
            (NodeData::Leaf { base }, _) => {
                Err(DriftError::type_mismatch("container", base.kind_name()))
            }
        }
    }

    /// Enumerate keys of the working state, in order. Never materializes.
    pub fn keys(&self) -> DriftResult<Vec<Seg>> {
        let st = self.live()?;
        match &st.data {
            NodeData::Record { base, copy, .. } => Ok(match copy {
                Some(c) => c.keys().cloned().map(Seg::Key).collect(),
                None => base.keys().cloned().map(Seg::Key).collect(),
            }),
            NodeData::Map { base, copy, .. } => Ok(match copy {
                Some(c) => c.keys().cloned().map(Seg::Key).collect(),
                None => base.keys().cloned().map(Seg::Key).collect(),
            }),
            NodeData::Sequence { base, copy, .. } => {
                let len = copy.as_ref().map_or(base.len(), |c| c.len());
                Ok((0..len).map(Seg::Index).collect())
            }
            NodeData::Set { .. } => Err(DriftError::type_mismatch("record, sequence, or map", "set")),
            NodeData::Leaf { base } => {
                Err(DriftError::type_mismatch("container", base.kind_name()))
            }
        }
    }

    /// Size of the working state: entries, items, or members.
    pub fn len(&self) -> DriftResult<usize> {
        let st = self.live()?;
        Ok(match &st.data {
            NodeData::Record { base, copy, .. } => copy.as_ref().map_or(base.len(), |c| c.len()),
            NodeData::Map { base, copy, .. } => copy.as_ref().map_or(base.len(), |c| c.len()),
            NodeData::Sequence { base, copy, .. } => copy.as_ref().map_or(base.len(), |c| c.len()),
            NodeData::Set { base, copy, .. } => copy.as_ref().map_or(base.len(), |c| c.len()),
            NodeData::Leaf { base } => {
                return Err(DriftError::type_mismatch("container", base.kind_name()))
            }
        })
    }

    /// True when the working state holds no entries, items, or members.
    pub fn is_empty(&self) -> DriftResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Navigate to a child draft.
    ///
    /// Like [`Draft::get`], but an explicitly assigned container is drafted
    /// as well, so nested edits compose after a wholesale assignment. Fails
    /// when the position is absent or holds a scalar.
    pub fn child(&self, seg: impl Into<Seg>) -> DriftResult<Draft> {
        let seg = seg.into();
        match self.get(seg.clone())? {
            None => Err(DriftError::path_not_found(Path::from_segments(vec![seg]))),
            Some(DraftValue::Draft(d)) => Ok(d),
            Some(DraftValue::Value(v)) if v.is_draftable() => {
                let mut st = self.live()?;
                let scope = st.scope.clone().ok_or(DriftError::NoActiveSession)?;
                let child = create_draft(&v, Some(self), &scope)?;
                install_slot(&mut st, &seg, DraftValue::Draft(child.clone()));
                Ok(child)
            }
            Some(DraftValue::Value(v)) => {
                Err(DriftError::type_mismatch("container", v.kind_name()))
            }
        }
    }

    /// Current working value of this draft: the base when untouched, the
    /// copy with child drafts resolved otherwise. Does not finalize and
    /// never freezes.
    pub fn snapshot(&self) -> DriftResult<Value> {
        enum Plan {
            Ready(Value),
            Keyed(bool, Vec<(String, DraftValue)>),
            Listed(bool, Vec<DraftValue>),
        }

        let plan = {
            let st = self.lock();
            if st.revoked {
                return Err(DriftError::RevokedDraft);
            }
            if let Some(v) = &st.resolved {
                return Ok(v.clone());
            }
            match &st.data {
                NodeData::Leaf { base } => Plan::Ready(base.clone()),
                NodeData::Record { base, copy, .. } => match copy {
                    None => Plan::Ready(Value::Record(base.clone())),
                    Some(c) => Plan::Keyed(
                        true,
                        c.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    ),
                },
                NodeData::Map { base, copy, .. } => match copy {
                    None => Plan::Ready(Value::Map(base.clone())),
                    Some(c) => Plan::Keyed(
                        false,
                        c.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    ),
                },
                NodeData::Sequence { base, copy, .. } => match copy {
                    None => Plan::Ready(Value::Sequence(base.clone())),
                    Some(c) => Plan::Listed(true, c.clone()),
                },
                NodeData::Set { base, copy, .. } => match copy {
                    None => Plan::Ready(Value::Set(base.clone())),
                    Some(c) => Plan::Listed(false, c.clone()),
                },
            }
        };

        match plan {
            Plan::Ready(v) => Ok(v),
            Plan::Keyed(is_record, slots) => {
                let mut entries = Vec::with_capacity(slots.len());
                for (key, slot) in slots {
                    entries.push((key, slot.snapshot()?));
                }
                Ok(if is_record {
                    Value::from(entries.into_iter().collect::<RecordValue>())
                } else {
                    Value::from(entries.into_iter().collect::<MapValue>())
                })
            }
            Plan::Listed(is_sequence, slots) => {
                let mut items = Vec::with_capacity(slots.len());
                for slot in slots {
                    items.push(slot.snapshot()?);
                }
                Ok(if is_sequence {
                    Value::from(items.into_iter().collect::<SequenceValue>())
                } else {
                    Value::from(items.into_iter().collect::<SetValue>())
                })
            }
        }
    }

    /// The original value this draft was created over. Unaffected by any
    /// pending mutation.
    pub fn original(&self) -> DriftResult<Value> {
        let st = self.lock();
        if st.revoked {
            return Err(DriftError::RevokedDraft);
        }
        Ok(st.data.base_value())
    }

    // -----------------------------------------------------------------------
    // writes
    // -----------------------------------------------------------------------

    /// Assign a value at a key or index.
    ///
    /// The first write to an untouched node whose value is identical to the
    /// currently visible one is a no-op: the node stays unmodified and the
    /// final result keeps its identity with the base.
    pub fn set(&self, seg: impl Into<Seg>, value: impl Into<DraftValue>) -> DriftResult<()> {
        let seg = seg.into();
        let value = value.into();
        let mutated = {
            let mut st = self.live()?;
            match st.data.kind() {
                DraftKind::Record => {
                    let key = want_key(&seg)?.to_owned();
                    record_set(&mut st, key, value)?
                }
                DraftKind::Sequence => {
                    let index = want_index(&seg)?;
                    sequence_set(&mut st, index, value)?
                }
                DraftKind::Map => {
                    let key = want_key(&seg)?.to_owned();
                    mapset::map_set(&mut st, key, value)?
                }
                DraftKind::Set => {
                    return Err(DriftError::type_mismatch("record, sequence, or map", "set"))
                }
                DraftKind::Scalar => {
                    return Err(DriftError::type_mismatch(
                        "container",
                        st.data.base_value().kind_name(),
                    ))
                }
            }
        };
        if mutated {
            self.mark_changed();
        }
        Ok(())
    }

    /// Remove the entry at a key, or the item at an index (shifting the tail
    /// left). Returns whether something visible was removed.
    ///
    /// Removing a key that never existed only forgets stale assignment
    /// bookkeeping.
    pub fn remove(&self, seg: impl Into<Seg>) -> DriftResult<bool> {
        let seg = seg.into();
        let (mutated, removed) = {
            let mut st = self.live()?;
            match st.data.kind() {
                DraftKind::Record => {
                    let key = want_key(&seg)?.to_owned();
                    record_remove(&mut st, &key)?
                }
                DraftKind::Sequence => {
                    let index = want_index(&seg)?;
                    sequence_remove(&mut st, index)?
                }
                DraftKind::Map => {
                    let key = want_key(&seg)?.to_owned();
                    mapset::map_remove(&mut st, &key)?
                }
                DraftKind::Set => {
                    return Err(DriftError::type_mismatch("record, sequence, or map", "set"))
                }
                DraftKind::Scalar => {
                    return Err(DriftError::type_mismatch(
                        "container",
                        st.data.base_value().kind_name(),
                    ))
                }
            }
        };
        if mutated {
            self.mark_changed();
        }
        Ok(removed)
    }

    /// Append to a sequence.
    pub fn push(&self, value: impl Into<DraftValue>) -> DriftResult<()> {
        let value = value.into();
        {
            let mut st = self.live()?;
            let (copy, assigned) = sequence_parts(&mut st)?;
            let index = copy.len();
            assigned.insert(index, true);
            copy.push(value);
        }
        self.mark_changed();
        Ok(())
    }

    /// Remove and return the last item of a sequence.
    pub fn pop(&self) -> DriftResult<Option<DraftValue>> {
        let popped = {
            let mut st = self.live()?;
            let len = sequence_len(&st)?;
            if len == 0 {
                return Ok(None);
            }
            let (copy, _) = sequence_parts(&mut st)?;
            copy.pop()
        };
        self.mark_changed();
        Ok(popped)
    }

    /// Insert into a sequence, shifting the tail right.
    pub fn insert(&self, index: usize, value: impl Into<DraftValue>) -> DriftResult<()> {
        let value = value.into();
        {
            let mut st = self.live()?;
            let len = sequence_len(&st)?;
            if index > len {
                return Err(DriftError::index_out_of_bounds(index, len));
            }
            let (copy, assigned) = sequence_parts(&mut st)?;
            copy.insert(index, value);
            for shifted in index..copy.len() {
                assigned.insert(shifted, true);
            }
        }
        self.mark_changed();
        Ok(())
    }

    /// Shorten a sequence. A no-op when `len` is not below the current
    /// length.
    pub fn truncate(&self, len: usize) -> DriftResult<()> {
        {
            let mut st = self.live()?;
            let current = sequence_len(&st)?;
            if len >= current {
                return Ok(());
            }
            let (copy, _) = sequence_parts(&mut st)?;
            copy.truncate(len);
        }
        self.mark_changed();
        Ok(())
    }

    /// Resize a sequence: truncate when shrinking, pad with nulls when
    /// growing.
    pub fn set_len(&self, len: usize) -> DriftResult<()> {
        let current = {
            let st = self.live()?;
            sequence_len(&st)?
        };
        if len < current {
            return self.truncate(len);
        }
        if len == current {
            return Ok(());
        }
        {
            let mut st = self.live()?;
            let (copy, assigned) = sequence_parts(&mut st)?;
            for index in copy.len()..len {
                assigned.insert(index, true);
                copy.push(DraftValue::Value(Value::Null));
            }
        }
        self.mark_changed();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // keyed-map / unique-set surface (container adapters)
    // -----------------------------------------------------------------------

    /// Remove every entry of a keyed map, or every member of a set.
    pub fn clear(&self) -> DriftResult<()> {
        let mutated = {
            let mut st = self.live()?;
            match st.data.kind() {
                DraftKind::Map => mapset::map_clear(&mut st)?,
                DraftKind::Set => mapset::set_clear(self, &mut st)?,
                _ => {
                    return Err(DriftError::type_mismatch(
                        "map or set",
                        st.data.base_value().kind_name(),
                    ))
                }
            }
        };
        if mutated {
            self.mark_changed();
        }
        Ok(())
    }

    /// Entries of a keyed map, drafting each still-shared value lazily.
    pub fn entries(&self) -> DriftResult<Vec<(String, DraftValue)>> {
        let mut st = self.live()?;
        if st.data.kind() != DraftKind::Map {
            return Err(DriftError::type_mismatch(
                "map",
                st.data.base_value().kind_name(),
            ));
        }
        mapset::map_entries(self, &mut st)
    }

    /// Add a member to a set. Returns whether the member was new.
    pub fn add(&self, value: impl Into<DraftValue>) -> DriftResult<bool> {
        let value = value.into();
        let added = {
            let mut st = self.live()?;
            if st.data.kind() != DraftKind::Set {
                return Err(DriftError::type_mismatch(
                    "set",
                    st.data.base_value().kind_name(),
                ));
            }
            mapset::set_add(self, &mut st, value)?
        };
        if added {
            self.mark_changed();
        }
        Ok(added)
    }

    /// Remove a set member. Recognizes both an original member and the draft
    /// created from it. Returns whether a member was removed.
    pub fn delete_value(&self, value: &DraftValue) -> DriftResult<bool> {
        let deleted = {
            let mut st = self.live()?;
            if st.data.kind() != DraftKind::Set {
                return Err(DriftError::type_mismatch(
                    "set",
                    st.data.base_value().kind_name(),
                ));
            }
            mapset::set_delete(self, &mut st, value)?
        };
        if deleted {
            self.mark_changed();
        }
        Ok(deleted)
    }

    /// Set membership test. Never materializes the working copy.
    pub fn contains_value(&self, value: &DraftValue) -> DriftResult<bool> {
        let st = self.live()?;
        if st.data.kind() != DraftKind::Set {
            return Err(DriftError::type_mismatch(
                "set",
                st.data.base_value().kind_name(),
            ));
        }
        Ok(mapset::set_has(&st, value))
    }

    /// Working members of a set, drafting every still-shared member.
    pub fn values(&self) -> DriftResult<Vec<DraftValue>> {
        let mut st = self.live()?;
        if st.data.kind() != DraftKind::Set {
            return Err(DriftError::type_mismatch(
                "set",
                st.data.base_value().kind_name(),
            ));
        }
        mapset::set_values(self, &mut st)
    }
}

impl fmt::Debug for Draft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Ok(st) => f
                .debug_struct("Draft")
                .field("kind", &st.data.kind())
                .field("modified", &st.modified)
                .field("revoked", &st.revoked)
                .finish(),
            Err(_) => f.write_str("Draft { .. }"),
        }
    }
}

pub(crate) fn want_key(seg: &Seg) -> DriftResult<&str> {
    seg.as_key()
        .ok_or(DriftError::type_mismatch("key segment", "index segment"))
}

pub(crate) fn want_index(seg: &Seg) -> DriftResult<usize> {
    seg.as_index()
        .ok_or(DriftError::type_mismatch("index segment", "key segment"))
}

fn record_materialize<'a>(
    base: &Arc<RecordValue>,
    copy: &'a mut Option<IndexMap<String, DraftValue>>,
) -> &'a mut IndexMap<String, DraftValue> {
    copy.get_or_insert_with(|| {
        base.iter()
            .map(|(k, v)| (k.clone(), DraftValue::Value(v.clone())))
            .collect()
    })
}

fn sequence_materialize<'a>(
    base: &Arc<SequenceValue>,
    copy: &'a mut Option<Vec<DraftValue>>,
) -> &'a mut Vec<DraftValue> {
    copy.get_or_insert_with(|| base.iter().map(|v| DraftValue::Value(v.clone())).collect())
}

fn record_get(draft: &Draft, st: &mut NodeState, key: &str) -> DriftResult<Option<DraftValue>> {
    let (slot, shared_with_base) = {
        let NodeData::Record { base, copy, .. } = &st.data else {
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
            let NodeData::Record { base, copy, .. } = &mut st.data else {
                unreachable!("caller checked the kind");
            };
            record_materialize(base, copy)
                .insert(key.to_owned(), DraftValue::Draft(child.clone()));
            Ok(Some(DraftValue::Draft(child)))
        }
        other => Ok(other),
    }
}

fn sequence_get(draft: &Draft, st: &mut NodeState, index: usize) -> DriftResult<Option<DraftValue>> {
    let (slot, shared_with_base) = {
        let NodeData::Sequence { base, copy, .. } = &st.data else {
            unreachable!("caller checked the kind");
        };
        let slot = match copy {
            Some(c) => c.get(index).cloned(),
            None => base.get(index).cloned().map(DraftValue::Value),
        };
        let shared = match (&slot, base.get(index)) {
            (Some(DraftValue::Value(v)), Some(base_value)) => v.same(base_value),
            _ => false,
        };
        (slot, shared)
    };
    match slot {
        Some(DraftValue::Value(v)) if v.is_draftable() && shared_with_base => {
            let scope = st.scope.clone().ok_or(DriftError::NoActiveSession)?;
            let child = create_draft(&v, Some(draft), &scope)?;
            let NodeData::Sequence { base, copy, .. } = &mut st.data else {
                unreachable!("caller checked the kind");
            };
            sequence_materialize(base, copy)[index] = DraftValue::Draft(child.clone());
            Ok(Some(DraftValue::Draft(child)))
        }
        other => Ok(other),
    }
}

fn record_set(st: &mut NodeState, key: String, value: DraftValue) -> DriftResult<bool> {
    let NodeState { data, modified, .. } = st;
    let NodeData::Record { base, copy, assigned } = data else {
        unreachable!("caller checked the kind");
    };
    assigned.insert(key.clone(), true);
    if !*modified {
        let visible = match copy.as_ref() {
            Some(c) => c.get(&key).cloned(),
            None => base.get(&key).cloned().map(DraftValue::Value),
        };
        if visible.is_some_and(|current| current.same(&value)) {
            // Stale assignment bookkeeping is harmless on an unmodified node.
            return Ok(false);
        }
    }
    record_materialize(base, copy).insert(key, value);
    Ok(true)
}

fn sequence_set(st: &mut NodeState, index: usize, value: DraftValue) -> DriftResult<bool> {
    let NodeState { data, modified, .. } = st;
    let NodeData::Sequence { base, copy, assigned } = data else {
        unreachable!("caller checked the kind");
    };
    let len = copy.as_ref().map_or(base.len(), |c| c.len());
    if index > len {
        return Err(DriftError::index_out_of_bounds(index, len));
    }
    assigned.insert(index, true);
    if !*modified && index < len {
        let visible = match copy.as_ref() {
            Some(c) => c.get(index).cloned(),
            None => base.get(index).cloned().map(DraftValue::Value),
        };
        if visible.is_some_and(|current| current.same(&value)) {
            return Ok(false);
        }
    }
    let c = sequence_materialize(base, copy);
    if index == c.len() {
        c.push(value);
    } else {
        c[index] = value;
    }
    Ok(true)
}

fn record_remove(st: &mut NodeState, key: &str) -> DriftResult<(bool, bool)> {
    let NodeData::Record { base, copy, assigned } = &mut st.data else {
        unreachable!("caller checked the kind");
    };
    if base.contains_key(key) {
        assigned.insert(key.to_owned(), false);
        let removed = record_materialize(base, copy).shift_remove(key).is_some();
        Ok((true, removed))
    } else {
        // The key only ever existed through assignment; forget the stale
        // bookkeeping entry.
        assigned.shift_remove(key);
        let removed = copy
            .as_mut()
            .is_some_and(|c| c.shift_remove(key).is_some());
        Ok((false, removed))
    }
}

fn sequence_remove(st: &mut NodeState, index: usize) -> DriftResult<(bool, bool)> {
    let NodeData::Sequence { base, copy, assigned } = &mut st.data else {
        unreachable!("caller checked the kind");
    };
    let len = copy.as_ref().map_or(base.len(), |c| c.len());
    if index >= len {
        return Err(DriftError::index_out_of_bounds(index, len));
    }
    let c = sequence_materialize(base, copy);
    c.remove(index);
    for shifted in index..c.len() {
        assigned.insert(shifted, true);
    }
    Ok((true, true))
}

fn sequence_len(st: &NodeState) -> DriftResult<usize> {
    match &st.data {
        NodeData::Sequence { base, copy, .. } => {
            Ok(copy.as_ref().map_or(base.len(), |c| c.len()))
        }
        other => Err(DriftError::type_mismatch(
            "sequence",
            other.base_value().kind_name(),
        )),
    }
}

fn sequence_parts<'a>(
    st: &'a mut NodeState,
) -> DriftResult<(&'a mut Vec<DraftValue>, &'a mut IndexMap<usize, bool>)> {
    match &mut st.data {
        NodeData::Sequence { base, copy, assigned } => {
            Ok((sequence_materialize(base, copy), assigned))
        }
        other => Err(DriftError::type_mismatch(
            "sequence",
            other.base_value().kind_name(),
        )),
    }
}

/// Write a slot into the working copy without touching assignment
/// bookkeeping, used when memoizing a child draft over an assigned value.
fn install_slot(st: &mut NodeState, seg: &Seg, slot: DraftValue) {
    match (&mut st.data, seg) {
        (NodeData::Record { base, copy, .. }, Seg::Key(key)) => {
            record_materialize(base, copy).insert(key.clone(), slot);
        }
        (NodeData::Map { base, copy, .. }, Seg::Key(key)) => {
            mapset::map_materialize(base, copy).insert(key.clone(), slot);
        }
        (NodeData::Sequence { base, copy, .. }, Seg::Index(index)) => {
            let c = sequence_materialize(base, copy);
            if *index < c.len() {
                c[*index] = slot;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{enter_scope, leave_scope, revoke_scope};
    use crate::{record, seq};

    fn with_scope<R>(f: impl FnOnce(&Scope) -> R) -> R {
        let scope = enter_scope(false);
        let out = f(&scope);
        leave_scope(&scope);
        out
    }

    #[test]
    fn test_reads_resolve_against_base_before_mutation() {
        with_scope(|scope| {
            let base = record! { "a" => 1, "b" => 2 };
            let draft = create_draft(&base, None, scope).unwrap();
            assert_eq!(draft.len().unwrap(), 2);
            assert!(draft.has("a").unwrap());
            let a = draft.get("a").unwrap().unwrap();
            assert!(a.same_value(&Value::Int(1)));
            assert!(!draft.is_modified());
        });
    }

    #[test]
    fn test_set_marks_node_and_ancestors() {
        with_scope(|scope| {
            let base = record! { "nested" => record! { "x" => 1 } };
            let root = create_draft(&base, None, scope).unwrap();
            let nested = root.child("nested").unwrap();
            assert!(!root.is_modified());

            nested.set("x", 2).unwrap();
            assert!(nested.is_modified());
            assert!(root.is_modified());
        });
    }

    #[test]
    fn test_identical_first_write_is_noop() {
        with_scope(|scope| {
            let base = record! { "a" => 1 };
            let draft = create_draft(&base, None, scope).unwrap();
            draft.set("a", 1).unwrap();
            assert!(!draft.is_modified());
        });
    }

    #[test]
    fn test_child_draft_is_memoized() {
        with_scope(|scope| {
            let base = record! { "nested" => record! {} };
            let root = create_draft(&base, None, scope).unwrap();
            let first = root.child("nested").unwrap();
            let second = root.child("nested").unwrap();
            assert!(first.ptr_eq(&second));
        });
    }

    #[test]
    fn test_remove_of_never_existing_key_is_noop() {
        with_scope(|scope| {
            let base = record! { "a" => 1 };
            let draft = create_draft(&base, None, scope).unwrap();
            assert!(!draft.remove("ghost").unwrap());
            assert!(!draft.is_modified());
        });
    }

    #[test]
    fn test_sequence_ops() {
        with_scope(|scope| {
            let base = seq![1, 2, 3];
            let draft = create_draft(&base, None, scope).unwrap();
            draft.push(4).unwrap();
            assert_eq!(draft.len().unwrap(), 4);
            draft.insert(0, 0).unwrap();
            assert_eq!(draft.len().unwrap(), 5);
            let popped = draft.pop().unwrap().unwrap();
            assert!(popped.same_value(&Value::Int(4)));
            assert!(draft.remove(0usize).unwrap());
            assert_eq!(draft.len().unwrap(), 3);
        });
    }

    #[test]
    fn test_sequence_rejects_key_segment() {
        with_scope(|scope| {
            let draft = create_draft(&seq![1], None, scope).unwrap();
            let err = draft.set("name", 1).unwrap_err();
            assert!(matches!(err, DriftError::TypeMismatch { .. }));
        });
    }

    #[test]
    fn test_revoked_draft_is_inert() {
        let scope = enter_scope(false);
        let draft = create_draft(&record! { "a" => 1 }, None, &scope).unwrap();
        revoke_scope(&scope);
        assert!(matches!(draft.get("a"), Err(DriftError::RevokedDraft)));
        assert!(matches!(draft.set("a", 2), Err(DriftError::RevokedDraft)));
    }

    #[test]
    fn test_snapshot_reflects_pending_state() {
        with_scope(|scope| {
            let base = record! { "a" => 1, "nested" => record! { "x" => 1 } };
            let root = create_draft(&base, None, scope).unwrap();
            root.child("nested").unwrap().set("x", 5).unwrap();
            let snap = root.snapshot().unwrap();
            assert_eq!(
                crate::get_at_path(&snap, &crate::path!("nested", "x"))
                    .unwrap()
                    .as_int(),
                Some(5)
            );
            // The base is untouched.
            assert_eq!(
                crate::get_at_path(&base, &crate::path!("nested", "x"))
                    .unwrap()
                    .as_int(),
                Some(1)
            );
        });
    }

    #[test]
    fn test_leaf_draft_rejects_structural_ops() {
        let draft = Draft::new_leaf(Value::Int(3));
        assert!(matches!(
            draft.get("a"),
            Err(DriftError::TypeMismatch { .. })
        ));
        assert_eq!(draft.snapshot().unwrap().as_int(), Some(3));
    }
}
