//! The session facade: run recipes, manage manual drafts, replay records.
//!
//! A [`Producer`] owns the configuration (auto-freeze, interception
//! strategy) and sequences the scope manager, interception layer, and
//! finalizer. The free functions at the crate root delegate to a process-wide
//! default instance.

use crate::draft::{create_draft, Draft, DraftValue};
use crate::finalize::{process_result, Produced};
use crate::patches::PatchesCapability;
use crate::scope::{current_scope, enter_scope, leave_scope, revoke_scope};
use crate::{freeze, registry, DriftError, DriftResult, Patch, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Configured entry point for producing derived trees.
///
/// # Examples
///
/// ```
/// use drift::{record, Producer};
///
/// # fn main() -> drift::DriftResult<()> {
/// let producer = Producer::with_auto_freeze(true);
/// let base = record! { "count" => 0 };
/// let next = producer.run(&base, |draft| {
///     draft.set("count", 1)?;
///     Ok(())
/// })?;
/// assert_eq!(next.get("count").unwrap().as_int(), Some(1));
/// assert!(next.is_frozen());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Producer {
    auto_freeze: AtomicBool,
}

impl Default for Producer {
    fn default() -> Self {
        Self::new()
    }
}

impl Producer {
    /// Create a producer with the default freeze policy: results are frozen
    /// in debug builds, left unfrozen in release builds.
    pub fn new() -> Self {
        Self {
            auto_freeze: AtomicBool::new(cfg!(debug_assertions)),
        }
    }

    /// Create a producer with an explicit freeze policy.
    pub fn with_auto_freeze(enabled: bool) -> Self {
        Self {
            auto_freeze: AtomicBool::new(enabled),
        }
    }

    /// Whether finalized results are frozen.
    pub fn auto_freeze(&self) -> bool {
        self.auto_freeze.load(Ordering::Relaxed)
    }

    /// Change the freeze policy for subsequent sessions.
    pub fn set_auto_freeze(&self, enabled: bool) {
        self.auto_freeze.store(enabled, Ordering::Relaxed);
    }

    /// Select transparent (compiler-level) draft interception.
    ///
    /// This runtime drafts exclusively through explicit handle dispatch;
    /// requesting the transparent strategy is a configuration error.
    /// Passing `false` is accepted and changes nothing.
    pub fn set_transparent_interception(&self, enabled: bool) -> DriftResult<()> {
        if enabled {
            return Err(DriftError::InterceptionUnsupported);
        }
        Ok(())
    }

    /// Run a recipe against a draft of `base` and finalize the outcome.
    ///
    /// An error from the recipe rolls the session back — every draft it
    /// created becomes inert and `base` is observably unchanged — before the
    /// original error propagates.
    pub fn run<R>(
        &self,
        base: &Value,
        recipe: impl FnOnce(&Draft) -> DriftResult<R>,
    ) -> DriftResult<Value>
    where
        R: Into<Produced>,
    {
        self.run_inner(base, recipe, false).map(|(value, _)| value)
    }

    /// Like [`Producer::run`], invoking `listener` with the forward and
    /// inverse change records after finalization.
    pub fn run_with_patches<R>(
        &self,
        base: &Value,
        recipe: impl FnOnce(&Draft) -> DriftResult<R>,
        listener: impl FnOnce(&Patch, &Patch),
    ) -> DriftResult<Value>
    where
        R: Into<Produced>,
    {
        let (value, records) = self.run_inner(base, recipe, true)?;
        let (forward, inverse) = records.unwrap_or_default();
        listener(&forward, &inverse);
        Ok(value)
    }

    /// Like [`Producer::run`], returning the result together with the
    /// forward and inverse change records.
    pub fn run_collecting_patches<R>(
        &self,
        base: &Value,
        recipe: impl FnOnce(&Draft) -> DriftResult<R>,
    ) -> DriftResult<(Value, Patch, Patch)>
    where
        R: Into<Produced>,
    {
        let (value, records) = self.run_inner(base, recipe, true)?;
        let (forward, inverse) = records.unwrap_or_default();
        Ok((value, forward, inverse))
    }

    fn run_inner<R>(
        &self,
        base: &Value,
        recipe: impl FnOnce(&Draft) -> DriftResult<R>,
        record: bool,
    ) -> DriftResult<(Value, Option<(Patch, Patch)>)>
    where
        R: Into<Produced>,
    {
        if record {
            registry::lookup::<PatchesCapability>(registry::PATCHES)?;
        }

        if !base.is_draftable() {
            // Nothing to draft: the recipe runs against a leaf handle with
            // no session at all.
            let draft = Draft::new_leaf(base.clone());
            let produced = recipe(&draft)?.into();
            let value = self.settle_undrafted(base, produced)?;
            return Ok((value, record.then(|| (Patch::new(), Patch::new()))));
        }

        let scope = enter_scope(self.auto_freeze());
        let root = match current_scope().and_then(|s| create_draft(base, None, &s)) {
            Ok(root) => root,
            Err(e) => {
                revoke_scope(&scope);
                return Err(e);
            }
        };
        let produced = match recipe(&root) {
            Ok(produced) => produced.into(),
            Err(e) => {
                tracing::debug!(error = %e, "recipe failed; session rolled back");
                revoke_scope(&scope);
                return Err(e);
            }
        };
        leave_scope(&scope);

        if record {
            scope.start_recording();
        }
        let value = process_result(produced, &scope, &root)?;
        let records = scope.take_records();
        Ok((value, if record { Some(records.unwrap_or_default()) } else { None }))
    }

    fn settle_undrafted(&self, base: &Value, produced: Produced) -> DriftResult<Value> {
        Ok(match produced {
            Produced::Unchanged => base.clone(),
            Produced::Nothing => Value::Null,
            Produced::Replaced(DraftValue::Value(v)) => {
                if self.auto_freeze() && v.is_draftable() {
                    freeze(&v, false);
                }
                v
            }
            Produced::Replaced(DraftValue::Draft(d)) => d.snapshot()?,
        })
    }

    /// Run a recipe that settles asynchronously.
    ///
    /// The session is closed before the returned future is first polled, and
    /// finalization runs when it settles; an `Err` settlement rolls the
    /// session back exactly like a synchronous error. Starting another
    /// drafting session while this one is suspended and unsettled is the
    /// caller's responsibility to avoid.
    pub async fn run_async<R, Fut>(
        &self,
        base: &Value,
        recipe: impl FnOnce(Draft) -> Fut,
    ) -> DriftResult<Value>
    where
        R: Into<Produced>,
        Fut: Future<Output = DriftResult<R>>,
    {
        self.run_async_inner(base, recipe, false)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`Producer::run_async`], returning the change records as well.
    pub async fn run_async_collecting_patches<R, Fut>(
        &self,
        base: &Value,
        recipe: impl FnOnce(Draft) -> Fut,
    ) -> DriftResult<(Value, Patch, Patch)>
    where
        R: Into<Produced>,
        Fut: Future<Output = DriftResult<R>>,
    {
        let (value, records) = self.run_async_inner(base, recipe, true).await?;
        let (forward, inverse) = records.unwrap_or_default();
        Ok((value, forward, inverse))
    }

    async fn run_async_inner<R, Fut>(
        &self,
        base: &Value,
        recipe: impl FnOnce(Draft) -> Fut,
        record: bool,
    ) -> DriftResult<(Value, Option<(Patch, Patch)>)>
    where
        R: Into<Produced>,
        Fut: Future<Output = DriftResult<R>>,
    {
        if record {
            registry::lookup::<PatchesCapability>(registry::PATCHES)?;
        }

        if !base.is_draftable() {
            let draft = Draft::new_leaf(base.clone());
            let produced = recipe(draft).await?.into();
            let value = self.settle_undrafted(base, produced)?;
            return Ok((value, record.then(|| (Patch::new(), Patch::new()))));
        }

        let scope = enter_scope(self.auto_freeze());
        let root = match current_scope().and_then(|s| create_draft(base, None, &s)) {
            Ok(root) => root,
            Err(e) => {
                revoke_scope(&scope);
                return Err(e);
            }
        };
        let future = recipe(root.clone());
        // The scope is closed before the first poll; drafting that happens
        // during the suspension belongs to whatever session is current then.
        leave_scope(&scope);

        let produced = match future.await {
            Ok(produced) => produced.into(),
            Err(e) => {
                tracing::debug!(error = %e, "async recipe rejected; session rolled back");
                revoke_scope(&scope);
                return Err(e);
            }
        };

        if record {
            scope.start_recording();
        }
        let value = process_result(produced, &scope, &root)?;
        let records = scope.take_records();
        Ok((value, if record { Some(records.unwrap_or_default()) } else { None }))
    }

    /// Open a session and return its root draft, holding the session across
    /// calls until the matching finish.
    ///
    /// A session opened this way that is never finished leaks its
    /// bookkeeping until the draft is dropped.
    pub fn begin_draft(&self, base: &Value) -> DriftResult<Draft> {
        if !base.is_draftable() {
            return Err(DriftError::not_draftable(base.kind_name()));
        }
        let scope = enter_scope(self.auto_freeze());
        let root = match current_scope().and_then(|s| create_draft(base, None, &s)) {
            Ok(root) => root,
            Err(e) => {
                revoke_scope(&scope);
                return Err(e);
            }
        };
        root.mark_manual();
        leave_scope(&scope);
        Ok(root)
    }

    /// Finalize a draft created with [`Producer::begin_draft`].
    pub fn finish_draft(&self, draft: &Draft) -> DriftResult<Value> {
        self.finish_inner(draft, false).map(|(value, _)| value)
    }

    /// Like [`Producer::finish_draft`], invoking `listener` with the change
    /// records.
    pub fn finish_draft_with_patches(
        &self,
        draft: &Draft,
        listener: impl FnOnce(&Patch, &Patch),
    ) -> DriftResult<Value> {
        let (value, records) = self.finish_inner(draft, true)?;
        let (forward, inverse) = records.unwrap_or_default();
        listener(&forward, &inverse);
        Ok(value)
    }

    /// Like [`Producer::finish_draft`], returning the change records.
    pub fn finish_draft_collecting_patches(
        &self,
        draft: &Draft,
    ) -> DriftResult<(Value, Patch, Patch)> {
        let (value, records) = self.finish_inner(draft, true)?;
        let (forward, inverse) = records.unwrap_or_default();
        Ok((value, forward, inverse))
    }

    fn finish_inner(
        &self,
        draft: &Draft,
        record: bool,
    ) -> DriftResult<(Value, Option<(Patch, Patch)>)> {
        {
            let st = draft
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !st.manual {
                return Err(DriftError::NotManualDraft);
            }
            // A manual session only ever retires through a finish call, so a
            // revoked manual draft has necessarily been finished already.
            if st.finalized || st.revoked {
                return Err(DriftError::DraftAlreadyFinalized);
            }
        }
        let scope = draft.owning_scope().ok_or(DriftError::NoActiveSession)?;
        if record {
            registry::lookup::<PatchesCapability>(registry::PATCHES)?;
            scope.start_recording();
        }
        let value = process_result(Produced::Unchanged, &scope, draft)?;
        let records = scope.take_records();
        Ok((value, if record { Some(records.unwrap_or_default()) } else { None }))
    }

    /// Derive a new tree by replaying change records against `base`.
    ///
    /// A record that replaces the whole tree supersedes `base`; only the
    /// records after the last such replacement are replayed, through a
    /// normal drafting session, so untouched subtrees keep their identity.
    pub fn apply_patch(&self, base: &Value, patch: &Patch) -> DriftResult<Value> {
        let codec = registry::lookup::<PatchesCapability>(registry::PATCHES)?;
        let ops = patch.ops();
        let mut effective_base = base.clone();
        let mut start = 0;
        for (i, op) in ops.iter().enumerate().rev() {
            if op.is_root_replacement() {
                effective_base = op.value().cloned().unwrap_or(Value::Null);
                start = i + 1;
                break;
            }
        }
        let rest = &ops[start..];
        self.run(&effective_base, |draft| {
            codec.apply(draft, rest)?;
            Ok(())
        })
    }
}

fn default_producer() -> &'static Producer {
    static DEFAULT: OnceLock<Producer> = OnceLock::new();
    DEFAULT.get_or_init(Producer::new)
}

/// Run a recipe using the process-wide default [`Producer`].
pub fn run<R>(base: &Value, recipe: impl FnOnce(&Draft) -> DriftResult<R>) -> DriftResult<Value>
where
    R: Into<Produced>,
{
    default_producer().run(base, recipe)
}

/// [`Producer::run_with_patches`] on the default instance.
pub fn run_with_patches<R>(
    base: &Value,
    recipe: impl FnOnce(&Draft) -> DriftResult<R>,
    listener: impl FnOnce(&Patch, &Patch),
) -> DriftResult<Value>
where
    R: Into<Produced>,
{
    default_producer().run_with_patches(base, recipe, listener)
}

/// [`Producer::run_collecting_patches`] on the default instance.
pub fn run_collecting_patches<R>(
    base: &Value,
    recipe: impl FnOnce(&Draft) -> DriftResult<R>,
) -> DriftResult<(Value, Patch, Patch)>
where
    R: Into<Produced>,
{
    default_producer().run_collecting_patches(base, recipe)
}

/// [`Producer::run_async`] on the default instance.
pub async fn run_async<R, Fut>(base: &Value, recipe: impl FnOnce(Draft) -> Fut) -> DriftResult<Value>
where
    R: Into<Produced>,
    Fut: Future<Output = DriftResult<R>>,
{
    default_producer().run_async(base, recipe).await
}

/// [`Producer::begin_draft`] on the default instance.
pub fn begin_draft(base: &Value) -> DriftResult<Draft> {
    default_producer().begin_draft(base)
}

/// [`Producer::finish_draft`] on the default instance.
pub fn finish_draft(draft: &Draft) -> DriftResult<Value> {
    default_producer().finish_draft(draft)
}

/// [`Producer::finish_draft_collecting_patches`] on the default instance.
pub fn finish_draft_collecting_patches(draft: &Draft) -> DriftResult<(Value, Patch, Patch)> {
    default_producer().finish_draft_collecting_patches(draft)
}

/// [`Producer::apply_patch`] on the default instance.
pub fn apply_patch(base: &Value, patch: &Patch) -> DriftResult<Value> {
    default_producer().apply_patch(base, patch)
}

/// Change the default instance's freeze policy.
pub fn set_auto_freeze(enabled: bool) {
    default_producer().set_auto_freeze(enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{record, DriftError};

    #[test]
    fn test_transparent_interception_is_rejected() {
        let producer = Producer::new();
        assert!(matches!(
            producer.set_transparent_interception(true),
            Err(DriftError::InterceptionUnsupported)
        ));
        assert!(producer.set_transparent_interception(false).is_ok());
    }

    #[test]
    fn test_auto_freeze_toggle() {
        let producer = Producer::with_auto_freeze(false);
        assert!(!producer.auto_freeze());
        producer.set_auto_freeze(true);
        assert!(producer.auto_freeze());
    }

    #[test]
    fn test_run_against_scalar_base() {
        let producer = Producer::with_auto_freeze(false);
        let result = producer
            .run(&Value::Int(41), |draft| {
                let current = draft.snapshot()?.as_int().unwrap_or(0);
                Ok(Value::Int(current + 1))
            })
            .unwrap();
        assert_eq!(result.as_int(), Some(42));

        // No replacement: the base itself comes back.
        let result = producer.run(&Value::Int(7), |_| Ok(())).unwrap();
        assert_eq!(result.as_int(), Some(7));
    }

    #[test]
    fn test_begin_draft_requires_draftable_base() {
        let producer = Producer::with_auto_freeze(false);
        assert!(matches!(
            producer.begin_draft(&Value::Bool(true)),
            Err(DriftError::NotDraftable { .. })
        ));
    }

    #[test]
    fn test_finish_requires_manual_draft() {
        let producer = Producer::with_auto_freeze(false);
        let base = record! { "a" => 1 };
        producer
            .run(&base, |draft| {
                let err = producer.finish_draft(draft).unwrap_err();
                assert!(matches!(err, DriftError::NotManualDraft));
                Ok(())
            })
            .unwrap();
    }
}
