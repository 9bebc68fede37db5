//! Draft-based production of immutable value trees.
//!
//! `drift` lets a caller describe a change to an immutable [`Value`] tree
//! with ordinary mutating operations against a *draft*, then derives a new
//! immutable tree that shares every untouched subtree with the original —
//! optionally together with a minimal ordered list of change records that
//! can replay or invert exactly what differed.
//!
//! # Core Concepts
//!
//! - **Value**: an immutable tree of scalars, records, sequences, keyed
//!   maps, and unique sets, shared by reference
//! - **Draft**: the working handle a recipe mutates; reads are intercepted,
//!   writes are deferred into a lazily materialized copy
//! - **Session**: the bookkeeping for one recipe invocation; commits on
//!   return, rolls back on error
//! - **Finalization**: converts the draft graph into the result, reusing
//!   untouched subtrees by reference (structural sharing)
//! - **Patch**: ordered change records with symmetric inverses
//!
//! # Quick Start
//!
//! ```
//! use drift::{record, seq};
//!
//! # fn main() -> drift::DriftResult<()> {
//! let base = record! {
//!     "user" => record! { "name" => "alice" },
//!     "tags" => seq!["reader"],
//!     "stats" => record! { "logins" => 3 },
//! };
//!
//! let next = drift::run(&base, |draft| {
//!     draft.child("user")?.set("name", "bob")?;
//!     draft.child("tags")?.push("writer")?;
//!     Ok(())
//! })?;
//!
//! assert_eq!(
//!     drift::get_at_path(&next, &drift::path!("user", "name")).unwrap().as_text(),
//!     Some("bob"),
//! );
//! // The untouched subtree is the same node, not a copy.
//! assert!(next.get("stats").unwrap().same(base.get("stats").unwrap()));
//! // The original is untouched.
//! assert_eq!(
//!     drift::get_at_path(&base, &drift::path!("user", "name")).unwrap().as_text(),
//!     Some("alice"),
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Change Records
//!
//! ```
//! use drift::{enable_patches, record};
//!
//! # fn main() -> drift::DriftResult<()> {
//! enable_patches();
//!
//! let base = record! { "count" => 1 };
//! let (next, forward, inverse) = drift::run_collecting_patches(&base, |draft| {
//!     draft.set("count", 2)?;
//!     Ok(())
//! })?;
//!
//! assert_eq!(next.get("count").unwrap().as_int(), Some(2));
//! assert_eq!(drift::apply_patch(&base, &forward)?, next);
//! assert_eq!(drift::apply_patch(&next, &inverse)?, base);
//! # Ok(())
//! # }
//! ```
//!
//! # Keyed Maps and Unique Sets
//!
//! Map and set values mutate through named operations, so they are drafted
//! by dedicated container adapters. The adapters (and the change-record
//! codec above) are optional capabilities, installed once near process
//! start:
//!
//! ```
//! use drift::{enable_map_set, map};
//!
//! # fn main() -> drift::DriftResult<()> {
//! enable_map_set();
//!
//! let base = map! { "x" => 1 };
//! let next = drift::run(&base, |draft| {
//!     draft.set("x", 2)?;
//!     Ok(())
//! })?;
//! assert_eq!(next.get("x").unwrap().as_int(), Some(2));
//! # Ok(())
//! # }
//! ```

mod draft;
mod error;
mod finalize;
mod mapset;
mod patch;
mod patches;
mod path;
mod producer;
pub mod registry;
mod scope;
mod value;

// Core types
pub use draft::{Draft, DraftKind, DraftValue};
pub use error::{DriftError, DriftResult};
pub use finalize::Produced;
pub use patch::{Patch, PatchOp};
pub use path::{Path, Seg};
pub use value::{
    freeze, get_at_path, MapValue, RecordValue, SequenceValue, SetValue, Value,
};

// Capabilities
pub use mapset::{enable_map_set, MapSetCapability};
pub use patches::{enable_patches, PatchesCapability};

// Session facade
pub use producer::{
    apply_patch, begin_draft, finish_draft, finish_draft_collecting_patches, run, run_async,
    run_collecting_patches, run_with_patches, set_auto_freeze, Producer,
};
