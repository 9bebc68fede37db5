//! Recipes that settle asynchronously: commit on Ok, rollback on Err.

use drift::{enable_patches, path, record, Draft, DriftError, PatchOp, Producer};

fn producer() -> Producer {
    Producer::with_auto_freeze(false)
}

#[tokio::test]
async fn test_async_recipe_commits_on_settlement() {
    let base = record! { "a" => 1, "b" => record! { "c" => 2 } };

    let next = producer()
        .run_async(&base, |draft: Draft| async move {
            draft.set("a", 2)?;
            tokio::task::yield_now().await;
            // Mutation after the suspension point still lands in this
            // session: the draft carries its scope.
            draft.child("b")?.set("c", 3)?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(next.get("a").unwrap().as_int(), Some(2));
    assert_eq!(
        drift::get_at_path(&next, &path!("b", "c")).unwrap().as_int(),
        Some(3)
    );
}

#[tokio::test]
async fn test_async_rejection_rolls_back() {
    let base = record! { "a" => 1 };
    let mut leaked: Option<Draft> = None;

    let err = producer()
        .run_async(&base, |draft: Draft| {
            leaked = Some(draft.clone());
            async move {
                draft.set("a", 99)?;
                tokio::task::yield_now().await;
                Err::<(), DriftError>(DriftError::invalid_operation("rejected"))
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DriftError::InvalidOperation { .. }));
    assert_eq!(base.get("a").unwrap().as_int(), Some(1));
    assert!(matches!(
        leaked.unwrap().get("a"),
        Err(DriftError::RevokedDraft)
    ));
}

#[tokio::test]
async fn test_async_recipe_with_change_records() {
    enable_patches();
    let base = record! { "count" => 1 };

    let (next, forward, inverse) = producer()
        .run_async_collecting_patches(&base, |draft: Draft| async move {
            tokio::task::yield_now().await;
            draft.set("count", 2)?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(next.get("count").unwrap().as_int(), Some(2));
    assert_eq!(forward.ops(), &[PatchOp::replace(path!("count"), 2)]);
    assert_eq!(inverse.ops(), &[PatchOp::replace(path!("count"), 1)]);
}

#[tokio::test]
async fn test_async_scalar_base() {
    let result = producer()
        .run_async(&drift::Value::Int(1), |draft: Draft| async move {
            let n = draft.snapshot()?.as_int().unwrap_or(0);
            Ok(drift::Value::Int(n + 1))
        })
        .await
        .unwrap();
    assert_eq!(result.as_int(), Some(2));
}
