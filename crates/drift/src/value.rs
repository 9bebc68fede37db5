//! The immutable value tree.
//!
//! [`Value`] is the data model every drafting session works over: scalars
//! plus four container kinds, each shared behind an `Arc`. Cloning a value is
//! cheap, and a derived tree reuses every untouched subtree of its base by
//! reference (structural sharing).
//!
//! Containers carry a freeze flag. Finalized results are frozen when
//! auto-freeze is enabled, after which the remaining mutation surface (the
//! builder methods and the `make_*_mut` copy-on-write accessors) refuses to
//! touch them.

use crate::{DriftError, DriftResult, Path, Seg};
use indexmap::IndexMap;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An immutable tree of values.
///
/// Scalars are stored inline; containers are `Arc`-shared nodes. Two values
/// built from the same container are *identical* (see [`Value::same`]), which
/// is the notion of sameness drafting uses throughout: a subtree carried over
/// unchanged into a derived tree is identical to the base's subtree.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// Text scalar.
    Text(Arc<str>),
    /// String-keyed record (the "plain object" of the tree).
    Record(Arc<RecordValue>),
    /// Ordered sequence.
    Sequence(Arc<SequenceValue>),
    /// Keyed-map container, drafted through a dedicated adapter.
    Map(Arc<MapValue>),
    /// Unique-set container, membership by identity.
    Set(Arc<SetValue>),
}

impl Value {
    /// Text scalar from anything string-like.
    #[inline]
    pub fn text(s: impl AsRef<str>) -> Self {
        Value::Text(Arc::from(s.as_ref()))
    }

    /// Kind name of this value, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Record(_) => "record",
            Value::Sequence(_) => "sequence",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
        }
    }

    /// True for values a session can draft: the four container kinds.
    #[inline]
    pub fn is_draftable(&self) -> bool {
        matches!(
            self,
            Value::Record(_) | Value::Sequence(_) | Value::Map(_) | Value::Set(_)
        )
    }

    /// Identity comparison.
    ///
    /// Containers are identical only when they are the same shared node.
    /// Scalars compare by value, with two floating-point refinements: NaN is
    /// identical to NaN, and `+0.0` is not identical to `-0.0`. Integers and
    /// floats are never identical to each other.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                if *a == 0.0 && *b == 0.0 {
                    a.is_sign_positive() == b.is_sign_positive()
                } else {
                    a == b || (a.is_nan() && b.is_nan())
                }
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => Arc::ptr_eq(a, b),
            (Value::Sequence(a), Value::Sequence(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Get the boolean if this is a boolean scalar.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the integer if this is an integer scalar.
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the float if this is a float scalar.
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get the text if this is a text scalar.
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Get the record node if this is a record.
    #[inline]
    pub fn as_record(&self) -> Option<&RecordValue> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Get the sequence node if this is a sequence.
    #[inline]
    pub fn as_sequence(&self) -> Option<&SequenceValue> {
        match self {
            Value::Sequence(q) => Some(q),
            _ => None,
        }
    }

    /// Get the map node if this is a keyed map.
    #[inline]
    pub fn as_map(&self) -> Option<&MapValue> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get the set node if this is a set.
    #[inline]
    pub fn as_set(&self) -> Option<&SetValue> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Resolve one segment against this value.
    pub fn get(&self, seg: impl Into<Seg>) -> Option<&Value> {
        match (self, seg.into()) {
            (Value::Record(r), Seg::Key(k)) => r.get(&k),
            (Value::Map(m), Seg::Key(k)) => m.get(&k),
            (Value::Sequence(q), Seg::Index(i)) => q.get(i),
            _ => None,
        }
    }

    /// True when this value is frozen. Scalars are inherently immutable and
    /// always report frozen.
    pub fn is_frozen(&self) -> bool {
        match self {
            Value::Record(r) => r.is_frozen(),
            Value::Sequence(q) => q.is_frozen(),
            Value::Map(m) => m.is_frozen(),
            Value::Set(s) => s.is_frozen(),
            _ => true,
        }
    }

    /// Copy-on-write access to a record node. Fails on frozen nodes.
    pub fn make_record_mut(&mut self) -> DriftResult<&mut RecordValue> {
        match self {
            Value::Record(r) => {
                if r.is_frozen() {
                    return Err(DriftError::frozen("record"));
                }
                Ok(Arc::make_mut(r))
            }
            other => Err(DriftError::type_mismatch("record", other.kind_name())),
        }
    }

    /// Copy-on-write access to a sequence node. Fails on frozen nodes.
    pub fn make_sequence_mut(&mut self) -> DriftResult<&mut SequenceValue> {
        match self {
            Value::Sequence(q) => {
                if q.is_frozen() {
                    return Err(DriftError::frozen("sequence"));
                }
                Ok(Arc::make_mut(q))
            }
            other => Err(DriftError::type_mismatch("sequence", other.kind_name())),
        }
    }

    /// Copy-on-write access to a keyed-map node. Fails on frozen nodes.
    pub fn make_map_mut(&mut self) -> DriftResult<&mut MapValue> {
        match self {
            Value::Map(m) => {
                if m.is_frozen() {
                    return Err(DriftError::frozen("map"));
                }
                Ok(Arc::make_mut(m))
            }
            other => Err(DriftError::type_mismatch("map", other.kind_name())),
        }
    }

    /// Copy-on-write access to a set node. Fails on frozen nodes.
    pub fn make_set_mut(&mut self) -> DriftResult<&mut SetValue> {
        match self {
            Value::Set(s) => {
                if s.is_frozen() {
                    return Err(DriftError::frozen("set"));
                }
                Ok(Arc::make_mut(s))
            }
            other => Err(DriftError::type_mismatch("set", other.kind_name())),
        }
    }

    /// Convert to a `serde_json::Value`.
    ///
    /// Keyed maps and sets serialize tagged (`{"$map": {..}}`, `{"$set":
    /// [..]}`) so they survive a round trip through [`Value::from_json`].
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Build a value from a `serde_json::Value`: objects become records,
    /// arrays become sequences, except for the tagged map/set forms emitted
    /// by [`Value::to_json`].
    pub fn from_json(json: serde_json::Value) -> Value {
        match serde_json::from_value(json) {
            Ok(v) => v,
            Err(_) => Value::Null,
        }
    }
}

/// Mark a value (and, with `deep`, everything reachable from it) frozen.
///
/// Freezing an already-frozen subtree is a no-op, so shared frozen structure
/// is not re-walked.
pub fn freeze(value: &Value, deep: bool) {
    match value {
        Value::Record(r) => {
            if r.frozen.swap(true, Ordering::Relaxed) {
                return;
            }
            if deep {
                for (_, v) in r.iter() {
                    freeze(v, true);
                }
            }
        }
        Value::Sequence(q) => {
            if q.frozen.swap(true, Ordering::Relaxed) {
                return;
            }
            if deep {
                for v in q.iter() {
                    freeze(v, true);
                }
            }
        }
        Value::Map(m) => {
            if m.frozen.swap(true, Ordering::Relaxed) {
                return;
            }
            if deep {
                for (_, v) in m.iter() {
                    freeze(v, true);
                }
            }
        }
        Value::Set(s) => {
            if s.frozen.swap(true, Ordering::Relaxed) {
                return;
            }
            if deep {
                for v in s.iter() {
                    freeze(v, true);
                }
            }
        }
        _ => {}
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Sequence(a), Value::Sequence(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::text(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(Arc::from(v.as_str()))
    }
}

impl From<RecordValue> for Value {
    fn from(v: RecordValue) -> Self {
        Value::Record(Arc::new(v))
    }
}

impl From<SequenceValue> for Value {
    fn from(v: SequenceValue) -> Self {
        Value::Sequence(Arc::new(v))
    }
}

impl From<MapValue> for Value {
    fn from(v: MapValue) -> Self {
        Value::Map(Arc::new(v))
    }
}

impl From<SetValue> for Value {
    fn from(v: SetValue) -> Self {
        Value::Set(Arc::new(v))
    }
}

/// Resolve a full path against a tree.
pub fn get_at_path<'a>(root: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut current = root;
    for seg in path.iter() {
        current = current.get(seg.clone())?;
    }
    Some(current)
}

/// String-keyed record node with insertion-ordered entries.
#[derive(Debug, Default)]
pub struct RecordValue {
    entries: IndexMap<String, Value>,
    frozen: AtomicBool,
}

/// Ordered sequence node.
#[derive(Debug, Default)]
pub struct SequenceValue {
    items: Vec<Value>,
    frozen: AtomicBool,
}

/// Keyed-map node. Like a record at the data level, but a distinct kind that
/// is drafted through the keyed-map container adapter.
#[derive(Debug, Default)]
pub struct MapValue {
    entries: IndexMap<String, Value>,
    frozen: AtomicBool,
}

/// Unique-set node. Members are unique by identity ([`Value::same`]) and
/// keep insertion order.
#[derive(Debug, Default)]
pub struct SetValue {
    members: Vec<Value>,
    frozen: AtomicBool,
}

macro_rules! keyed_node_impl {
    ($ty:ident, $kind:literal) => {
        impl $ty {
            /// Create an empty node.
            pub fn new() -> Self {
                Self::default()
            }

            /// Number of entries.
            #[inline]
            pub fn len(&self) -> usize {
                self.entries.len()
            }

            /// True when there are no entries.
            #[inline]
            pub fn is_empty(&self) -> bool {
                self.entries.is_empty()
            }

            /// Look up an entry by key.
            #[inline]
            pub fn get(&self, key: &str) -> Option<&Value> {
                self.entries.get(key)
            }

            /// True when the key is present.
            #[inline]
            pub fn contains_key(&self, key: &str) -> bool {
                self.entries.contains_key(key)
            }

            /// Insert an entry. Fails on a frozen node.
            pub fn insert(
                &mut self,
                key: impl Into<String>,
                value: impl Into<Value>,
            ) -> DriftResult<Option<Value>> {
                self.ensure_unfrozen()?;
                Ok(self.entries.insert(key.into(), value.into()))
            }

            /// Remove an entry, preserving the order of the rest. Fails on a
            /// frozen node.
            pub fn remove(&mut self, key: &str) -> DriftResult<Option<Value>> {
                self.ensure_unfrozen()?;
                Ok(self.entries.shift_remove(key))
            }

            /// Drop every entry. Fails on a frozen node.
            pub fn clear(&mut self) -> DriftResult<()> {
                self.ensure_unfrozen()?;
                self.entries.clear();
                Ok(())
            }

            /// Iterate entries in insertion order.
            #[inline]
            pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
                self.entries.iter()
            }

            /// Iterate keys in insertion order.
            #[inline]
            pub fn keys(&self) -> impl Iterator<Item = &String> {
                self.entries.keys()
            }

            /// True once the node was frozen.
            #[inline]
            pub fn is_frozen(&self) -> bool {
                self.frozen.load(Ordering::Relaxed)
            }

            fn ensure_unfrozen(&self) -> DriftResult<()> {
                if self.is_frozen() {
                    Err(DriftError::frozen($kind))
                } else {
                    Ok(())
                }
            }
        }

        impl Clone for $ty {
            fn clone(&self) -> Self {
                // A clone is a new, unfrozen node.
                Self {
                    entries: self.entries.clone(),
                    frozen: AtomicBool::new(false),
                }
            }
        }

        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.entries == other.entries
            }
        }

        impl FromIterator<(String, Value)> for $ty {
            fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
                Self {
                    entries: iter.into_iter().collect(),
                    frozen: AtomicBool::new(false),
                }
            }
        }
    };
}

keyed_node_impl!(RecordValue, "record");
keyed_node_impl!(MapValue, "map");

impl SequenceValue {
    /// Create an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when there are no items.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up an item by index.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    /// Append an item. Fails on a frozen node.
    pub fn push(&mut self, value: impl Into<Value>) -> DriftResult<()> {
        self.ensure_unfrozen()?;
        self.items.push(value.into());
        Ok(())
    }

    /// Insert an item, shifting the tail right. Fails on a frozen node.
    pub fn insert(&mut self, index: usize, value: impl Into<Value>) -> DriftResult<()> {
        self.ensure_unfrozen()?;
        if index > self.items.len() {
            return Err(DriftError::index_out_of_bounds(index, self.items.len()));
        }
        self.items.insert(index, value.into());
        Ok(())
    }

    /// Remove the item at `index`, shifting the tail left. Fails on a frozen
    /// node.
    pub fn remove(&mut self, index: usize) -> DriftResult<Value> {
        self.ensure_unfrozen()?;
        if index >= self.items.len() {
            return Err(DriftError::index_out_of_bounds(index, self.items.len()));
        }
        Ok(self.items.remove(index))
    }

    /// Iterate items in order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }

    /// True once the node was frozen.
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Relaxed)
    }

    fn ensure_unfrozen(&self) -> DriftResult<()> {
        if self.is_frozen() {
            Err(DriftError::frozen("sequence"))
        } else {
            Ok(())
        }
    }
}

impl Clone for SequenceValue {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            frozen: AtomicBool::new(false),
        }
    }
}

impl PartialEq for SequenceValue {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl FromIterator<Value> for SequenceValue {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
            frozen: AtomicBool::new(false),
        }
    }
}

impl SetValue {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when there are no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Membership test by identity.
    pub fn contains(&self, value: &Value) -> bool {
        self.members.iter().any(|m| m.same(value))
    }

    /// Add a member if no identical member is present. Returns whether the
    /// member was added. Fails on a frozen node.
    pub fn insert(&mut self, value: impl Into<Value>) -> DriftResult<bool> {
        self.ensure_unfrozen()?;
        let value = value.into();
        if self.contains(&value) {
            return Ok(false);
        }
        self.members.push(value);
        Ok(true)
    }

    /// Remove the member identical to `value`. Returns whether a member was
    /// removed. Fails on a frozen node.
    pub fn remove(&mut self, value: &Value) -> DriftResult<bool> {
        self.ensure_unfrozen()?;
        match self.members.iter().position(|m| m.same(value)) {
            Some(pos) => {
                self.members.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop every member. Fails on a frozen node.
    pub fn clear(&mut self) -> DriftResult<()> {
        self.ensure_unfrozen()?;
        self.members.clear();
        Ok(())
    }

    /// Iterate members in insertion order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.members.iter()
    }

    /// True once the node was frozen.
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Relaxed)
    }

    fn ensure_unfrozen(&self) -> DriftResult<()> {
        if self.is_frozen() {
            Err(DriftError::frozen("set"))
        } else {
            Ok(())
        }
    }
}

impl Clone for SetValue {
    fn clone(&self) -> Self {
        Self {
            members: self.members.clone(),
            frozen: AtomicBool::new(false),
        }
    }
}

impl PartialEq for SetValue {
    /// Sets compare as unordered collections: same size, every member
    /// deep-equal to a member of the other.
    fn eq(&self, other: &Self) -> bool {
        self.members.len() == other.members.len()
            && self
                .members
                .iter()
                .all(|m| other.members.iter().any(|o| o == m))
    }
}

impl FromIterator<Value> for SetValue {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut set = Self::new();
        for v in iter {
            let _ = set.insert(v);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// serde
// ---------------------------------------------------------------------------

struct Entries<'a>(&'a IndexMap<String, Value>);

impl Serialize for Entries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Text(t) => serializer.serialize_str(t),
            Value::Record(r) => Entries(&r.entries).serialize(serializer),
            Value::Sequence(q) => {
                let mut seq = serializer.serialize_seq(Some(q.items.len()))?;
                for v in &q.items {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$map", &Entries(&m.entries))?;
                map.end()
            }
            Value::Set(s) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$set", &s.members)?;
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a drift value")
    }

    fn visit_unit<E>(self) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::Int(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(i64::try_from(v)
            .map(Value::Int)
            .unwrap_or(Value::Float(v as f64)))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::Float(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::text(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(v) = seq.next_element::<Value>()? {
            items.push(v);
        }
        Ok(Value::from(SequenceValue::from_iter(items)))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut entries: IndexMap<String, Value> = IndexMap::new();
        while let Some((k, v)) = access.next_entry::<String, Value>()? {
            entries.insert(k, v);
        }
        if entries.len() == 1 {
            // Tagged container forms produced by serialization.
            if let Some(Value::Record(r)) = entries.get("$map") {
                return Ok(Value::from(MapValue::from_iter(
                    r.iter().map(|(k, v)| (k.clone(), v.clone())),
                )));
            }
            if let Some(Value::Sequence(q)) = entries.get("$set") {
                return Ok(Value::from(SetValue::from_iter(q.iter().cloned())));
            }
        }
        Ok(Value::from(RecordValue {
            entries,
            frozen: AtomicBool::new(false),
        }))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

// ---------------------------------------------------------------------------
// construction macros
// ---------------------------------------------------------------------------

/// Build a record [`Value`] from `key => value` pairs.
///
/// # Examples
///
/// ```
/// use drift::record;
///
/// let v = record! { "name" => "alice", "age" => 30 };
/// assert_eq!(v.get("age").unwrap().as_int(), Some(30));
/// ```
#[macro_export]
macro_rules! record {
    {} => { $crate::Value::from($crate::RecordValue::new()) };
    { $($key:expr => $value:expr),+ $(,)? } => {
        $crate::Value::from(
            [$( (::std::string::String::from($key), $crate::Value::from($value)) ),+]
                .into_iter()
                .collect::<$crate::RecordValue>()
        )
    };
}

/// Build a sequence [`Value`] from items.
#[macro_export]
macro_rules! seq {
    [] => { $crate::Value::from($crate::SequenceValue::new()) };
    [ $($item:expr),+ $(,)? ] => {
        $crate::Value::from(
            [$( $crate::Value::from($item) ),+]
                .into_iter()
                .collect::<$crate::SequenceValue>()
        )
    };
}

/// Build a keyed-map [`Value`] from `key => value` pairs.
#[macro_export]
macro_rules! map {
    {} => { $crate::Value::from($crate::MapValue::new()) };
    { $($key:expr => $value:expr),+ $(,)? } => {
        $crate::Value::from(
            [$( (::std::string::String::from($key), $crate::Value::from($value)) ),+]
                .into_iter()
                .collect::<$crate::MapValue>()
        )
    };
}

/// Build a set [`Value`] from members (identity-deduplicated).
#[macro_export]
macro_rules! set {
    [] => { $crate::Value::from($crate::SetValue::new()) };
    [ $($member:expr),+ $(,)? ] => {
        $crate::Value::from(
            [$( $crate::Value::from($member) ),+]
                .into_iter()
                .collect::<$crate::SetValue>()
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;

    #[test]
    fn test_same_scalars() {
        assert!(Value::Int(1).same(&Value::Int(1)));
        assert!(!Value::Int(1).same(&Value::Float(1.0)));
        assert!(Value::Float(f64::NAN).same(&Value::Float(f64::NAN)));
        assert!(!Value::Float(0.0).same(&Value::Float(-0.0)));
        assert!(Value::text("a").same(&Value::text("a")));
    }

    #[test]
    fn test_same_containers_by_identity() {
        let a = record! { "x" => 1 };
        let b = a.clone();
        let c = record! { "x" => 1 };
        assert!(a.same(&b));
        assert!(!a.same(&c));
        assert_eq!(a, c); // deep equality still holds
    }

    #[test]
    fn test_get_at_path() {
        let v = record! { "a" => record! { "b" => seq![1, 2, 3] } };
        let found = get_at_path(&v, &path!("a", "b", 2)).unwrap();
        assert_eq!(found.as_int(), Some(3));
        assert!(get_at_path(&v, &path!("a", "x")).is_none());
    }

    #[test]
    fn test_freeze_blocks_builder_mutation() {
        let mut v = record! { "a" => 1 };
        freeze(&v, true);
        assert!(v.is_frozen());
        let err = v.make_record_mut().unwrap_err();
        assert!(matches!(err, DriftError::FrozenMutation { kind: "record" }));
    }

    #[test]
    fn test_freeze_deep_reaches_nested_containers() {
        let v = record! { "a" => record! { "b" => 1 }, "q" => seq![set![1]] };
        freeze(&v, true);
        assert!(v.get("a").unwrap().is_frozen());
        let inner_set = get_at_path(&v, &path!("q", 0)).unwrap();
        assert!(inner_set.is_frozen());
    }

    #[test]
    fn test_clone_of_frozen_node_is_unfrozen() {
        let v = record! { "a" => 1 };
        freeze(&v, false);
        let copy = RecordValue::clone(v.as_record().unwrap());
        assert!(!copy.is_frozen());
    }

    #[test]
    fn test_set_identity_membership() {
        let shared = record! { "id" => 1 };
        let mut s = SetValue::new();
        assert!(s.insert(shared.clone()).unwrap());
        assert!(!s.insert(shared.clone()).unwrap());
        // Deep-equal but distinct container is a different member.
        assert!(s.insert(record! { "id" => 1 }).unwrap());
        assert_eq!(s.len(), 2);
        assert!(s.contains(&shared));
    }

    #[test]
    fn test_serde_round_trip_with_containers() {
        let v = record! {
            "m" => map! { "x" => 1 },
            "s" => set![1, 2],
            "q" => seq![true, "t"],
        };
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
        assert!(back.get("m").unwrap().as_map().is_some());
        assert!(back.get("s").unwrap().as_set().is_some());
    }

    #[test]
    fn test_from_json_untagged() {
        let v = Value::from_json(serde_json::json!({"a": [1, 2.5, null]}));
        assert!(v.as_record().is_some());
        let seq = v.get("a").unwrap().as_sequence().unwrap();
        assert_eq!(seq.get(0).unwrap().as_int(), Some(1));
        assert_eq!(seq.get(1).unwrap().as_float(), Some(2.5));
    }
}
