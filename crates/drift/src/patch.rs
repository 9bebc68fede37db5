//! Change records describing observed mutations.
//!
//! Each record is one instruction — an operation kind, a path from the root,
//! and an optional value — sufficient to replay or invert a single observed
//! mutation. An ordered list of them is a [`Patch`].

use crate::{Path, Value};
use serde::{Deserialize, Serialize};

/// A single change record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PatchOp {
    /// Insert a value at a position that did not exist before.
    Add {
        /// Target path.
        path: Path,
        /// Value to insert.
        value: Value,
    },

    /// Remove the value at the path. For unique sets the removed member is
    /// carried in `value`, since set members have no stable key.
    Remove {
        /// Target path.
        path: Path,
        /// Member to remove, for sets.
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },

    /// Replace the value at the path. A root-path replacement with no value
    /// records an explicitly absent result.
    Replace {
        /// Target path.
        path: Path,
        /// Replacement value.
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
}

impl PatchOp {
    /// Create an Add record.
    #[inline]
    pub fn add(path: Path, value: impl Into<Value>) -> Self {
        PatchOp::Add {
            path,
            value: value.into(),
        }
    }

    /// Create a Remove record.
    #[inline]
    pub fn remove(path: Path) -> Self {
        PatchOp::Remove { path, value: None }
    }

    /// Create a Remove record carrying the removed set member.
    #[inline]
    pub fn remove_member(path: Path, value: impl Into<Value>) -> Self {
        PatchOp::Remove {
            path,
            value: Some(value.into()),
        }
    }

    /// Create a Replace record.
    #[inline]
    pub fn replace(path: Path, value: impl Into<Value>) -> Self {
        PatchOp::Replace {
            path,
            value: Some(value.into()),
        }
    }

    /// Create a root-path Replace record with an explicitly absent value.
    #[inline]
    pub fn replace_with_nothing(path: Path) -> Self {
        PatchOp::Replace { path, value: None }
    }

    /// The path this record targets.
    #[inline]
    pub fn path(&self) -> &Path {
        match self {
            PatchOp::Add { path, .. } => path,
            PatchOp::Remove { path, .. } => path,
            PatchOp::Replace { path, .. } => path,
        }
    }

    /// The value carried by this record, if any.
    #[inline]
    pub fn value(&self) -> Option<&Value> {
        match self {
            PatchOp::Add { value, .. } => Some(value),
            PatchOp::Remove { value, .. } => value.as_ref(),
            PatchOp::Replace { value, .. } => value.as_ref(),
        }
    }

    /// The operation name.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            PatchOp::Add { .. } => "add",
            PatchOp::Remove { .. } => "remove",
            PatchOp::Replace { .. } => "replace",
        }
    }

    /// True for a record that replaces the whole tree.
    #[inline]
    pub fn is_root_replacement(&self) -> bool {
        matches!(self, PatchOp::Replace { path, .. } if path.is_empty())
    }
}

/// An ordered collection of change records.
///
/// # Examples
///
/// ```
/// use drift::{Patch, PatchOp, path};
///
/// let patch = Patch::new()
///     .with_op(PatchOp::replace(path!("count"), 10))
///     .with_op(PatchOp::add(path!("tags", 0), "fresh"));
/// assert_eq!(patch.len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    /// Create an empty patch.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a patch from records.
    #[inline]
    pub fn with_ops(ops: Vec<PatchOp>) -> Self {
        Self { ops }
    }

    /// Append a record (builder pattern).
    #[inline]
    pub fn with_op(mut self, op: PatchOp) -> Self {
        self.ops.push(op);
        self
    }

    /// Push a record.
    #[inline]
    pub fn push(&mut self, op: PatchOp) {
        self.ops.push(op);
    }

    /// The records, in order.
    #[inline]
    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    /// Consume the patch, returning its records.
    #[inline]
    pub fn into_ops(self) -> Vec<PatchOp> {
        self.ops
    }

    /// True when there are no records.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of records.
    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Append every record of another patch.
    #[inline]
    pub fn extend(&mut self, other: Patch) {
        self.ops.extend(other.ops);
    }

    /// Iterate over the records.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PatchOp> {
        self.ops.iter()
    }
}

impl FromIterator<PatchOp> for Patch {
    fn from_iter<I: IntoIterator<Item = PatchOp>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Patch {
    type Item = PatchOp;
    type IntoIter = std::vec::IntoIter<PatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

impl<'a> IntoIterator for &'a Patch {
    type Item = &'a PatchOp;
    type IntoIter = std::slice::Iter<'a, PatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{path, record};

    #[test]
    fn test_op_constructors() {
        let op = PatchOp::replace(path!("a"), 1);
        assert_eq!(op.name(), "replace");
        assert_eq!(op.path(), &path!("a"));
        assert_eq!(op.value().unwrap().as_int(), Some(1));

        let op = PatchOp::remove(path!("b"));
        assert_eq!(op.name(), "remove");
        assert!(op.value().is_none());
    }

    #[test]
    fn test_root_replacement_detection() {
        assert!(PatchOp::replace(Path::root(), 1).is_root_replacement());
        assert!(PatchOp::replace_with_nothing(Path::root()).is_root_replacement());
        assert!(!PatchOp::replace(path!("a"), 1).is_root_replacement());
        assert!(!PatchOp::add(Path::root(), 1).is_root_replacement());
    }

    #[test]
    fn test_patch_serde() {
        let patch = Patch::new()
            .with_op(PatchOp::add(path!("users", 0), record! { "name" => "alice" }))
            .with_op(PatchOp::remove(path!("stale")));
        let json = serde_json::to_string(&patch).unwrap();
        let parsed: Patch = serde_json::from_str(&json).unwrap();
        assert_eq!(patch, parsed);
    }

    #[test]
    fn test_patch_builder_and_extend() {
        let mut a = Patch::new().with_op(PatchOp::replace(path!("x"), 1));
        let b = Patch::new().with_op(PatchOp::replace(path!("y"), 2));
        a.extend(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.ops()[1].path(), &path!("y"));
    }
}
