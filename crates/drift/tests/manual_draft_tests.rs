//! Manual sessions: begin a draft, hold it across calls, finish it.

use drift::{enable_patches, get_at_path, path, record, seq, DriftError, PatchOp, Producer};

fn producer() -> Producer {
    Producer::with_auto_freeze(false)
}

#[test]
fn test_begin_and_finish() {
    let p = producer();
    let base = record! { "a" => 1, "b" => record! { "c" => 2 } };

    let draft = p.begin_draft(&base).unwrap();
    draft.set("a", 2).unwrap();
    draft.child("b").unwrap().set("c", 3).unwrap();
    let next = p.finish_draft(&draft).unwrap();

    assert_eq!(next.get("a").unwrap().as_int(), Some(2));
    assert_eq!(get_at_path(&next, &path!("b", "c")).unwrap().as_int(), Some(3));
    assert_eq!(base.get("a").unwrap().as_int(), Some(1));
}

#[test]
fn test_draft_survives_across_statements() {
    let p = producer();
    let base = record! { "log" => seq![] };
    let draft = p.begin_draft(&base).unwrap();

    let log = draft.child("log").unwrap();
    for i in 0..3 {
        log.push(i as i64).unwrap();
    }

    let next = p.finish_draft(&draft).unwrap();
    assert_eq!(next.get("log").unwrap(), &seq![0, 1, 2]);
}

#[test]
fn test_untouched_manual_draft_finishes_to_base_identity() {
    let p = producer();
    let base = record! { "a" => 1 };
    let draft = p.begin_draft(&base).unwrap();
    let next = p.finish_draft(&draft).unwrap();
    assert!(next.same(&base));
}

#[test]
fn test_double_finish_is_a_usage_error() {
    let p = producer();
    let base = record! { "a" => 1 };
    let draft = p.begin_draft(&base).unwrap();
    p.finish_draft(&draft).unwrap();

    let err = p.finish_draft(&draft).unwrap_err();
    assert!(matches!(err, DriftError::DraftAlreadyFinalized));
}

#[test]
fn test_finished_draft_is_inert() {
    let p = producer();
    let base = record! { "a" => 1 };
    let draft = p.begin_draft(&base).unwrap();
    p.finish_draft(&draft).unwrap();
    assert!(draft.get("a").is_err());
}

#[test]
fn test_finish_with_change_records() {
    enable_patches();
    let p = producer();
    let base = record! { "count" => 1 };

    let draft = p.begin_draft(&base).unwrap();
    draft.set("count", 2).unwrap();
    let (next, forward, inverse) = p.finish_draft_collecting_patches(&draft).unwrap();

    assert_eq!(next.get("count").unwrap().as_int(), Some(2));
    assert_eq!(forward.ops(), &[PatchOp::replace(path!("count"), 2)]);
    assert_eq!(inverse.ops(), &[PatchOp::replace(path!("count"), 1)]);
}

#[test]
fn test_manual_sessions_do_not_block_ordinary_runs() {
    let p = producer();
    let held = p.begin_draft(&record! { "held" => 1 }).unwrap();

    // A full session opens and closes while the manual draft is pending.
    let other = p
        .run(&record! { "x" => 1 }, |draft| {
            draft.set("x", 2)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(other.get("x").unwrap().as_int(), Some(2));

    held.set("held", 2).unwrap();
    let finished = p.finish_draft(&held).unwrap();
    assert_eq!(finished.get("held").unwrap().as_int(), Some(2));
}
