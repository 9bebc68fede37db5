//! Session (scope) bookkeeping.
//!
//! A scope tracks one in-flight recipe invocation: every draft it created,
//! the optional change-record accumulator, and a link to the parent scope for
//! reentrant invocations. Exactly one scope is *current* per thread at any
//! instant; scopes nest as a stack and never interleave within one
//! synchronous call chain.

use crate::draft::Draft;
use crate::{DriftError, DriftResult, Patch};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Forward and inverse change records accumulated during finalization.
#[derive(Debug, Default)]
pub(crate) struct PatchRecorder {
    /// Records that replay the session's mutations.
    pub forward: Patch,
    /// Records that undo them.
    pub inverse: Patch,
}

/// Shared handle to one session's bookkeeping.
pub(crate) type Scope = Arc<ScopeInner>;

#[derive(Debug)]
pub(crate) struct ScopeInner {
    /// Every draft created while this scope was active, so rollback can
    /// invalidate them.
    drafts: Mutex<Vec<Draft>>,
    /// Parent scope for reentrant invocations.
    parent: Option<Scope>,
    /// Change-record accumulator, present only when recording was requested.
    recorder: Mutex<Option<PatchRecorder>>,
    /// Cleared when a draft owned by another session leaks into this
    /// session's result; freezing it could corrupt state the other session
    /// still owns.
    can_auto_freeze: AtomicBool,
    /// Auto-freeze setting captured when the session opened.
    auto_freeze: bool,
}

impl ScopeInner {
    /// True for an outermost (non-nested) session.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Track a draft created inside this session.
    pub fn register_draft(&self, draft: Draft) {
        self.drafts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(draft);
    }

    pub fn disable_auto_freeze(&self) {
        self.can_auto_freeze.store(false, Ordering::Relaxed);
    }

    /// Whether finalization may freeze values it produces: only an outermost
    /// session with auto-freeze on and no foreign-draft leak.
    pub fn freeze_allowed(&self) -> bool {
        self.is_root() && self.auto_freeze && self.can_auto_freeze.load(Ordering::Relaxed)
    }

    /// Start accumulating change records.
    pub fn start_recording(&self) {
        *self
            .recorder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(PatchRecorder::default());
    }

    /// True when recording was requested for this session.
    pub fn is_recording(&self) -> bool {
        self.recorder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Append one forward/inverse record pair.
    pub fn record(&self, forward: crate::PatchOp, inverse: crate::PatchOp) {
        let mut guard = self
            .recorder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(rec) = guard.as_mut() {
            rec.forward.push(forward);
            rec.inverse.push(inverse);
        }
    }

    /// Append a forward record only. Used where forward and inverse records
    /// need different orders (sequence tails).
    pub fn record_forward(&self, forward: crate::PatchOp) {
        let mut guard = self
            .recorder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(rec) = guard.as_mut() {
            rec.forward.push(forward);
        }
    }

    /// Append an inverse record only.
    pub fn record_inverse(&self, inverse: crate::PatchOp) {
        let mut guard = self
            .recorder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(rec) = guard.as_mut() {
            rec.inverse.push(inverse);
        }
    }

    /// Take the accumulated records, ending recording.
    pub fn take_records(&self) -> Option<(Patch, Patch)> {
        self.recorder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .map(|rec| (rec.forward, rec.inverse))
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Scope>> = const { RefCell::new(None) };
}

/// The scope of the session currently executing on this thread.
///
/// Drafting with no open session is a usage error.
pub(crate) fn current_scope() -> DriftResult<Scope> {
    CURRENT
        .with(|c| c.borrow().clone())
        .ok_or(DriftError::NoActiveSession)
}

/// Open a new session as a child of the current one and make it current.
pub(crate) fn enter_scope(auto_freeze: bool) -> Scope {
    let scope = Arc::new(ScopeInner {
        drafts: Mutex::new(Vec::new()),
        parent: CURRENT.with(|c| c.borrow().clone()),
        recorder: Mutex::new(None),
        can_auto_freeze: AtomicBool::new(true),
        auto_freeze,
    });
    CURRENT.with(|c| *c.borrow_mut() = Some(scope.clone()));
    tracing::trace!(nested = !scope.is_root(), "drafting session opened");
    scope
}

/// Close a session: restore its parent as current, if the session is still
/// the current one.
pub(crate) fn leave_scope(scope: &Scope) {
    CURRENT.with(|c| {
        let mut current = c.borrow_mut();
        if current.as_ref().is_some_and(|cur| Arc::ptr_eq(cur, scope)) {
            *current = scope.parent.clone();
        }
    });
}

/// Roll a session back: close it and invalidate every draft it created.
pub(crate) fn revoke_scope(scope: &Scope) {
    leave_scope(scope);
    let drafts = std::mem::take(
        &mut *scope
            .drafts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()),
    );
    tracing::trace!(drafts = drafts.len(), "drafting session revoked");
    for draft in drafts {
        draft.revoke();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_current_scope_is_usage_error() {
        let err = current_scope().unwrap_err();
        assert!(matches!(err, DriftError::NoActiveSession));
    }

    #[test]
    fn test_scopes_nest_as_a_stack() {
        let outer = enter_scope(true);
        assert!(outer.is_root());
        let inner = enter_scope(true);
        assert!(!inner.is_root());
        assert!(Arc::ptr_eq(&current_scope().unwrap(), &inner));

        leave_scope(&inner);
        assert!(Arc::ptr_eq(&current_scope().unwrap(), &outer));
        leave_scope(&outer);
        assert!(current_scope().is_err());
    }

    #[test]
    fn test_leave_is_noop_when_not_current() {
        let outer = enter_scope(true);
        let inner = enter_scope(true);
        // Leaving the outer scope while the inner one is current changes
        // nothing.
        leave_scope(&outer);
        assert!(Arc::ptr_eq(&current_scope().unwrap(), &inner));
        leave_scope(&inner);
        leave_scope(&outer);
        assert!(current_scope().is_err());
    }

    #[test]
    fn test_freeze_allowed_requires_root_scope() {
        let outer = enter_scope(true);
        let inner = enter_scope(true);
        assert!(!inner.freeze_allowed());
        leave_scope(&inner);
        assert!(outer.freeze_allowed());
        outer.disable_auto_freeze();
        assert!(!outer.freeze_allowed());
        leave_scope(&outer);
    }
}
