//! Keyed-map and unique-set drafting through the session facade.

use drift::{
    enable_map_set, get_at_path, map, path, record, set, DraftValue, Producer, Value,
};

fn producer() -> Producer {
    enable_map_set();
    Producer::with_auto_freeze(false)
}

// ============================================================================
// Keyed maps
// ============================================================================

#[test]
fn test_map_write_produces_new_map() {
    let base = map! { "x" => 1 };
    let next = producer()
        .run(&base, |draft| {
            draft.set("x", 2)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(next.get("x").unwrap().as_int(), Some(2));
    assert!(!next.same(&base));
    assert_eq!(base.get("x").unwrap().as_int(), Some(1));
}

#[test]
fn test_map_identical_write_keeps_identity() {
    let base = map! { "x" => 1 };
    let next = producer()
        .run(&base, |draft| {
            draft.set("x", 1)?;
            Ok(())
        })
        .unwrap();
    assert!(next.same(&base));
}

#[test]
fn test_map_nested_draft_shares_siblings() {
    let base = map! {
        "touched" => record! { "v" => 1 },
        "kept" => record! { "v" => 2 },
    };
    let next = producer()
        .run(&base, |draft| {
            draft.child("touched")?.set("v", 10)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(
        get_at_path(&next, &path!("touched", "v")).unwrap().as_int(),
        Some(10)
    );
    assert!(next.get("kept").unwrap().same(base.get("kept").unwrap()));
}

#[test]
fn test_map_remove_and_clear() {
    let p = producer();
    let base = map! { "a" => 1, "b" => 2 };

    let removed = p
        .run(&base, |draft| {
            assert!(draft.remove("a")?);
            assert!(!draft.remove("ghost")?);
            Ok(())
        })
        .unwrap();
    assert_eq!(removed, map! { "b" => 2 });

    let cleared = p
        .run(&base, |draft| {
            draft.clear()?;
            Ok(())
        })
        .unwrap();
    assert_eq!(cleared.as_map().unwrap().len(), 0);
}

#[test]
fn test_map_entries_iterate_in_order() {
    let base = map! { "a" => 1, "b" => 2 };
    producer()
        .run(&base, |draft| {
            let entries = draft.entries()?;
            let keys: Vec<_> = entries.iter().map(|(k, _)| k.clone()).collect();
            assert_eq!(keys, vec!["a".to_owned(), "b".to_owned()]);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_maps_nested_in_records() {
    let base = record! { "lookup" => map! { "x" => 1 } };
    let next = producer()
        .run(&base, |draft| {
            draft.child("lookup")?.set("y", 2)?;
            Ok(())
        })
        .unwrap();
    let lookup = next.get("lookup").unwrap().as_map().unwrap();
    assert_eq!(lookup.len(), 2);
    assert_eq!(lookup.get("y").unwrap().as_int(), Some(2));
}

// ============================================================================
// Unique sets
// ============================================================================

#[test]
fn test_set_add_preserves_insertion_order() {
    let base = set![1, 2];
    let next = producer()
        .run(&base, |draft| {
            draft.add(3)?;
            Ok(())
        })
        .unwrap();
    let members: Vec<_> = next
        .as_set()
        .unwrap()
        .iter()
        .map(|v| v.as_int().unwrap())
        .collect();
    assert_eq!(members, vec![1, 2, 3]);
}

#[test]
fn test_set_adding_existing_member_keeps_identity() {
    let base = set![1, 2];
    let next = producer()
        .run(&base, |draft| {
            assert!(!draft.add(2)?);
            Ok(())
        })
        .unwrap();
    assert!(next.same(&base));
}

#[test]
fn test_set_member_drafting_preserves_untouched_members() {
    let stable = record! { "id" => "stable" };
    let edited = record! { "id" => "edited" };
    let base = set![stable.clone(), edited.clone()];

    let next = producer()
        .run(&base, |draft| {
            for member in draft.values()? {
                if let DraftValue::Draft(d) = member {
                    if d.snapshot()?.get("id").unwrap().as_text() == Some("edited") {
                        d.set("id", "rewritten")?;
                    }
                }
            }
            Ok(())
        })
        .unwrap();

    let members: Vec<Value> = next.as_set().unwrap().iter().cloned().collect();
    assert_eq!(members.len(), 2);
    // The untouched member keeps its identity; the edited one is a new node.
    assert!(members.iter().any(|m| m.same(&stable)));
    assert!(members.iter().any(|m| m == &record! { "id" => "rewritten" }));
    assert!(!members.iter().any(|m| m.same(&edited)));
}

#[test]
fn test_set_delete_recognizes_original_after_drafting() {
    let member = record! { "id" => 1 };
    let base = set![member.clone(), 9];
    let next = producer()
        .run(&base, |draft| {
            // Materializing drafts every member; the raw original must still
            // be removable.
            let _ = draft.values()?;
            assert!(draft.delete_value(&DraftValue::Value(member.clone()))?);
            Ok(())
        })
        .unwrap();
    assert_eq!(next, set![9]);
}

#[test]
fn test_sets_nested_in_records() {
    let base = record! { "tags" => set!["a"] };
    let next = producer()
        .run(&base, |draft| {
            draft.child("tags")?.add("b")?;
            Ok(())
        })
        .unwrap();
    assert_eq!(next.get("tags").unwrap(), &set!["a", "b"]);
}
