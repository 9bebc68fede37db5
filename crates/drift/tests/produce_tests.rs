//! Core production behavior: structural sharing, no-op identity, rollback.

use drift::{get_at_path, path, record, seq, Draft, DriftError, Produced, Producer, Value};

fn producer() -> Producer {
    Producer::with_auto_freeze(false)
}

// ============================================================================
// Structural sharing
// ============================================================================

#[test]
fn test_mutation_copies_only_the_touched_path() {
    let base = record! { "a" => 1, "b" => record! { "c" => 2 } };

    let next = producer()
        .run(&base, |draft| {
            draft.set("a", 2)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(next.get("a").unwrap().as_int(), Some(2));
    assert_eq!(get_at_path(&next, &path!("b", "c")).unwrap().as_int(), Some(2));
    // The untouched subtree is the very same node.
    assert!(next.get("b").unwrap().same(base.get("b").unwrap()));
    // The original is observably unchanged.
    assert_eq!(base.get("a").unwrap().as_int(), Some(1));
}

#[test]
fn test_sibling_subtrees_stay_shared() {
    let base = record! {
        "left" => record! { "v" => 1 },
        "mid" => record! { "v" => 2 },
        "right" => record! { "v" => 3 },
    };

    let next = producer()
        .run(&base, |draft| {
            draft.child("left")?.set("v", 10)?;
            draft.child("right")?.set("v", 30)?;
            Ok(())
        })
        .unwrap();

    assert!(!next.get("left").unwrap().same(base.get("left").unwrap()));
    assert!(next.get("mid").unwrap().same(base.get("mid").unwrap()));
    assert!(!next.get("right").unwrap().same(base.get("right").unwrap()));
}

#[test]
fn test_sequence_push_produces_new_sequence() {
    let base = seq![1, 2, 3];

    let next = producer()
        .run(&base, |draft| {
            draft.push(4)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(next, seq![1, 2, 3, 4]);
    assert!(!next.same(&base));
    assert_eq!(base.as_sequence().unwrap().len(), 3);
}

// ============================================================================
// No-op idempotence
// ============================================================================

#[test]
fn test_untouched_recipe_returns_base_identity() {
    let base = record! { "a" => 1 };
    let next = producer().run(&base, |_| Ok(())).unwrap();
    assert!(next.same(&base));
}

#[test]
fn test_identical_write_returns_base_identity() {
    let base = record! { "a" => 1 };
    let next = producer()
        .run(&base, |draft| {
            draft.set("a", 1)?;
            Ok(())
        })
        .unwrap();
    assert!(next.same(&base));
}

#[test]
fn test_reads_alone_never_copy() {
    let base = record! { "nested" => record! { "x" => 1 } };
    let next = producer()
        .run(&base, |draft| {
            let nested = draft.child("nested")?;
            assert_eq!(nested.len()?, 1);
            assert!(nested.has("x")?);
            Ok(())
        })
        .unwrap();
    assert!(next.same(&base));
}

// ============================================================================
// Modification propagation
// ============================================================================

#[test]
fn test_deep_mutation_marks_every_ancestor() {
    let base = record! {
        "l1" => record! { "l2" => record! { "l3" => record! { "v" => 1 } } },
        "side" => record! { "untouched" => true },
    };

    let next = producer()
        .run(&base, |draft| {
            let l1 = draft.child("l1")?;
            let l2 = l1.child("l2")?;
            let l3 = l2.child("l3")?;
            assert!(!draft.is_modified());

            l3.set("v", 2)?;
            assert!(l3.is_modified());
            assert!(l2.is_modified());
            assert!(l1.is_modified());
            assert!(draft.is_modified());
            Ok(())
        })
        .unwrap();

    assert_eq!(
        get_at_path(&next, &path!("l1", "l2", "l3", "v")).unwrap().as_int(),
        Some(2)
    );
    assert!(next.get("side").unwrap().same(base.get("side").unwrap()));
}

// ============================================================================
// Recipe outcomes
// ============================================================================

#[test]
fn test_replacement_value_becomes_the_result() {
    let base = record! { "old" => true };
    let replacement = record! { "new" => true };

    let next = producer()
        .run(&base, |_| Ok(replacement.clone()))
        .unwrap();

    assert!(next.same(&replacement));
}

#[test]
fn test_replacing_and_mutating_is_a_usage_error() {
    let base = record! { "a" => 1 };
    let err = producer()
        .run(&base, |draft| {
            draft.set("a", 2)?;
            Ok(record! { "b" => 2 })
        })
        .unwrap_err();
    assert!(matches!(err, DriftError::ReplacedAndMutated));
}

#[test]
fn test_nothing_yields_null() {
    let base = record! { "a" => 1 };
    let next = producer().run(&base, |_| Ok(Produced::Nothing)).unwrap();
    assert_eq!(next, Value::Null);
}

#[test]
fn test_returning_an_untouched_child_draft_resolves_to_its_base() {
    let base = record! { "b" => record! { "c" => 2 } };
    let next = producer()
        .run(&base, |draft| {
            let b = draft.child("b")?;
            Ok(b)
        })
        .unwrap();
    assert!(next.same(base.get("b").unwrap()));
}

// ============================================================================
// Rollback and revocation
// ============================================================================

#[test]
fn test_error_rolls_back_and_revokes_drafts() {
    let base = record! { "b" => record! { "c" => 2 } };
    let mut leaked: Option<Draft> = None;

    let err = producer()
        .run(&base, |draft| {
            let b = draft.child("b")?;
            b.set("c", 99)?;
            leaked = Some(b.clone());
            Err::<(), DriftError>(DriftError::invalid_operation("boom"))
        })
        .unwrap_err();

    // The caller sees the original error.
    assert!(matches!(err, DriftError::InvalidOperation { .. }));
    // The base is observably unchanged.
    assert_eq!(get_at_path(&base, &path!("b", "c")).unwrap().as_int(), Some(2));
    // Every draft created in the session is permanently inert.
    let b = leaked.unwrap();
    assert!(matches!(b.get("c"), Err(DriftError::RevokedDraft)));
    assert!(matches!(b.set("c", 1), Err(DriftError::RevokedDraft)));
}

#[test]
fn test_drafts_are_inert_after_commit() {
    let base = record! { "a" => 1 };
    let mut leaked: Option<Draft> = None;

    producer()
        .run(&base, |draft| {
            draft.set("a", 2)?;
            leaked = Some(draft.clone());
            Ok(())
        })
        .unwrap();

    let stale = leaked.unwrap();
    assert!(stale.get("a").is_err());
}

// ============================================================================
// Reentrancy
// ============================================================================

#[test]
fn test_nested_sessions_unwind_in_call_order() {
    let p = producer();
    let outer_base = record! { "items" => seq![] };
    let inner_base = record! { "n" => 1 };

    let next = p
        .run(&outer_base, |draft| {
            let inner = p.run(&inner_base, |inner_draft| {
                inner_draft.set("n", 2)?;
                Ok(())
            })?;
            // The outer session is current again.
            draft.child("items")?.push(inner)?;
            draft.set("done", true)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(
        get_at_path(&next, &path!("items", 0, "n")).unwrap().as_int(),
        Some(2)
    );
    assert_eq!(next.get("done").unwrap().as_bool(), Some(true));
}

#[test]
fn test_deleting_keys() {
    let base = record! { "keep" => 1, "drop" => 2 };
    let next = producer()
        .run(&base, |draft| {
            assert!(draft.remove("drop")?);
            assert!(!draft.remove("never-there")?);
            Ok(())
        })
        .unwrap();
    assert_eq!(next, record! { "keep" => 1 });
}

#[test]
fn test_assigned_then_edited_subtree() {
    // Assign a fresh container, then keep editing it through the draft.
    let base = record! { "slot" => Value::Null };
    let next = producer()
        .run(&base, |draft| {
            draft.set("slot", record! { "x" => 1 })?;
            draft.child("slot")?.set("x", 2)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(get_at_path(&next, &path!("slot", "x")).unwrap().as_int(), Some(2));
}
