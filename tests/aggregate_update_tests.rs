/// Aggregate update tests
///
/// End-to-end behavior of partial project updates: merge semantics,
/// all-or-nothing writes, error reporting and cancellation.
/// Run with: cargo test --test aggregate_update_tests

use async_trait::async_trait;
use docfield::{
    AggregateReader, AggregateUpdateService, CallContext, Docfield, ErrorKind, FieldPatch,
    FieldType, NewField, NewProject, Principal, ProjectDetail, ProjectPatch, StoreConfig,
    TransactionCoordinator, UpdateTally,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn field(field_id: &str, x1: f64) -> NewField {
    NewField {
        x1,
        y1: 0.0,
        x2: 20.0,
        y2: 4.0,
        page: 1,
        field_type: FieldType::Text,
        field_id: field_id.to_string(),
        value: String::new(),
    }
}

async fn app_with(config: StoreConfig) -> (Docfield, Principal, Principal) {
    let app = Docfield::open(config.bcrypt_cost(4)).await.unwrap();
    let alice = app
        .users()
        .register("Alice", "alice@example.com", "alice-password")
        .await
        .unwrap();
    let bob = app
        .users()
        .register("Bob", "bob@example.com", "bob-password")
        .await
        .unwrap();
    (app, alice, bob)
}

/// `P1` titled "Lease" with `F1{x1=0}` and `F2{x1=5}`.
async fn lease() -> (Docfield, Principal, Principal, ProjectDetail) {
    let (app, alice, bob) = app_with(StoreConfig::new()).await;
    let p1 = app
        .projects()
        .create(
            &alice,
            NewProject::new("Lease")
                .field(field("tenant", 0.0))
                .field(field("landlord", 5.0)),
        )
        .await
        .unwrap();
    (app, alice, bob, p1)
}

async fn reload(app: &Docfield, owner: &Principal, uuid: Uuid) -> ProjectDetail {
    app.projects().detail(owner, uuid).await.unwrap()
}

#[tokio::test]
async fn test_patch_changes_only_named_attributes() {
    let (app, alice, _, p1) = lease().await;
    let (f1, f2) = (p1.fields[0].clone(), p1.fields[1].clone());

    let patch = ProjectPatch::new()
        .title("Lease v2")
        .field(FieldPatch::new(f1.id).x1(10.0));
    let updated = app
        .projects()
        .update(&CallContext::new(), &alice, p1.project.uuid, &patch)
        .await
        .unwrap();

    assert_eq!(updated.project.title, "Lease v2");
    assert_eq!(updated.project.description, p1.project.description);
    assert_eq!(updated.project.created_at, p1.project.created_at);

    let f1_after = updated.field(f1.id).unwrap();
    assert_eq!(f1_after.x1, 10.0);
    assert_eq!(f1_after.x2, f1.x2);
    assert_eq!(f1_after.field_id, f1.field_id);
    assert_eq!(updated.field(f2.id).unwrap(), &f2);
}

#[tokio::test]
async fn test_constraint_violation_rolls_back_everything() {
    let (app, alice, _, p1) = lease().await;
    let (f1, f2) = (p1.fields[0].id, p1.fields[1].id);

    let patch = ProjectPatch::new()
        .title("Lease v2")
        .field(FieldPatch::new(f1).x1(1.0))
        .field(FieldPatch::new(f2).page(0));
    let err = app
        .projects()
        .update(&CallContext::new(), &alice, p1.project.uuid, &patch)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RowUpdateFailed);
    assert_eq!(
        err.db_error().and_then(|e| e.constraint_name()),
        Some("field_page_positive")
    );
    assert_eq!(reload(&app, &alice, p1.project.uuid).await, p1);
}

/// Serves a snapshot taken before the test locks the database.
struct Snapshot(ProjectDetail);

#[async_trait]
impl AggregateReader for Snapshot {
    async fn fetch_aggregate(&self, _uuid: Uuid) -> docfield::Result<Option<ProjectDetail>> {
        Ok(Some(self.0.clone()))
    }
}

#[tokio::test]
async fn test_unknown_child_fails_before_any_transaction() {
    let (app, alice, _, p1) = lease().await;
    let service = AggregateUpdateService::new(
        Arc::new(Snapshot(p1.clone())),
        TransactionCoordinator::new(app.database().clone()),
    );

    // While this transaction is open nobody else can begin one.
    let held = app.database().begin().await;
    let patch = ProjectPatch::new().title("Nope").field(FieldPatch::new(9_999).x1(1.0));
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        service.update(&CallContext::new(), &alice, p1.project.uuid, &patch),
    )
    .await
    .expect("validation must not wait for the database");
    drop(held);

    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::ValidationFailed);
    assert_eq!(reload(&app, &alice, p1.project.uuid).await, p1);
}

#[tokio::test]
async fn test_any_failing_child_leaves_aggregate_untouched() {
    for children in 1..=6usize {
        for failing in [0, children - 1] {
            let (app, alice, _) = app_with(StoreConfig::new()).await;
            let mut new = NewProject::new("Batch");
            for i in 0..children {
                new = new.field(field(&format!("f{}", i), i as f64));
            }
            let before = app.projects().create(&alice, new).await.unwrap();

            let mut patch = ProjectPatch::new().title("Changed").archived(true);
            for (i, stored) in before.fields.iter().enumerate() {
                let child = FieldPatch::new(stored.id).value(format!("v{}", i));
                // x1 beyond x2 breaks the ordering check.
                let child = if i == failing { child.x1(99.0) } else { child };
                patch = patch.field(child);
            }

            let err = app
                .projects()
                .update(&CallContext::new(), &alice, before.project.uuid, &patch)
                .await
                .unwrap_err();
            assert_eq!(
                err.kind(),
                ErrorKind::RowUpdateFailed,
                "children={} failing={}",
                children,
                failing
            );
            assert_eq!(reload(&app, &alice, before.project.uuid).await, before);
        }
    }
}

#[tokio::test]
async fn test_explicit_zero_and_empty_values_are_applied() {
    let (app, alice, _, p1) = lease().await;
    let f2 = p1.fields[1].id;
    let ctx = CallContext::new();

    let signed = ProjectPatch::new()
        .archived(true)
        .field(FieldPatch::new(f2).value("signed"));
    app.projects()
        .update(&ctx, &alice, p1.project.uuid, &signed)
        .await
        .unwrap();

    let patch = ProjectPatch::new()
        .description("")
        .archived(false)
        .field(FieldPatch::new(f2).x1(0.0).value(""));
    let updated = app.projects().update(&ctx, &alice, p1.project.uuid, &patch).await.unwrap();

    assert!(!updated.project.archived);
    assert_eq!(updated.project.description, "");
    let f2_after = updated.field(f2).unwrap();
    assert_eq!(f2_after.x1, 0.0);
    assert_eq!(f2_after.value, "");
}

#[tokio::test]
async fn test_empty_patch_is_identity() {
    let (app, alice, _, p1) = lease().await;
    let tally = app
        .projects()
        .updates()
        .update(&CallContext::new(), &alice, p1.project.uuid, &ProjectPatch::new())
        .await
        .unwrap();
    assert_eq!(tally.applied, 1);
    assert_eq!(reload(&app, &alice, p1.project.uuid).await, p1);
}

#[tokio::test]
async fn test_concurrent_failures_report_one_genuine_cause() {
    let (app, alice, _, p1) = lease().await;
    let (f1, f2) = (p1.fields[0].id, p1.fields[1].id);

    let patch = ProjectPatch::new()
        .field(FieldPatch::new(f1).page(0))
        .field(FieldPatch::new(f2).y1(50.0));
    let err = app
        .projects()
        .update(&CallContext::new(), &alice, p1.project.uuid, &patch)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RowUpdateFailed);
    let constraint = err.db_error().and_then(|e| e.constraint_name());
    assert!(
        matches!(constraint, Some("field_page_positive") | Some("field_y_ordered")),
        "unexpected cause {:?}",
        constraint
    );
    assert_eq!(reload(&app, &alice, p1.project.uuid).await, p1);
}

#[tokio::test]
async fn test_other_principal_gets_not_found() {
    let (app, alice, bob, p1) = lease().await;
    let patch = ProjectPatch::new()
        .title("Mine now")
        .field(FieldPatch::new(p1.fields[0].id).x1(3.0));

    let err = app
        .projects()
        .update(&CallContext::new(), &bob, p1.project.uuid, &patch)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let missing = app
        .projects()
        .update(&CallContext::new(), &bob, Uuid::new_v4(), &patch)
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
    assert_eq!(reload(&app, &alice, p1.project.uuid).await, p1);
}

#[tokio::test]
async fn test_commit_failure_is_reported_distinctly() {
    let (app, alice, _, p1) = lease().await;
    let (f1, f2) = (p1.fields[0].id, p1.fields[1].id);
    let ctx = CallContext::new();

    // Swapping identifiers passes: uniqueness is only checked at commit.
    let swapped = app
        .projects()
        .update(
            &ctx,
            &alice,
            p1.project.uuid,
            &ProjectPatch::new()
                .field(FieldPatch::new(f1).field_id("landlord"))
                .field(FieldPatch::new(f2).field_id("tenant")),
        )
        .await
        .unwrap();
    assert_eq!(swapped.field(f1).unwrap().field_id, "landlord");
    assert_eq!(swapped.field(f2).unwrap().field_id, "tenant");

    let err = app
        .projects()
        .update(
            &ctx,
            &alice,
            p1.project.uuid,
            &ProjectPatch::new()
                .title("Duplicate ids")
                .field(FieldPatch::new(f2).field_id("landlord")),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommitFailed);
    assert_eq!(
        err.db_error().and_then(|e| e.constraint_name()),
        Some("field_project_field_id_key")
    );
    assert_eq!(reload(&app, &alice, p1.project.uuid).await, swapped);
}

#[tokio::test]
async fn test_cancelled_call_rolls_back_and_releases_the_database() {
    let (app, alice, _, p1) = lease().await;
    let patch = ProjectPatch::new().title("Too late");

    let ctx = CallContext::new();
    ctx.cancel();
    let err = app
        .projects()
        .update(&ctx, &alice, p1.project.uuid, &patch)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    // Keep the database busy until the deadline passes.
    let held = app.database().begin().await;
    let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
    let err = app
        .projects()
        .update(&ctx, &alice, p1.project.uuid, &patch)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    drop(held);

    assert_eq!(reload(&app, &alice, p1.project.uuid).await, p1);
    app.projects()
        .update(&CallContext::new(), &alice, p1.project.uuid, &patch)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_configured_timeout_applies_to_every_update() {
    let config = StoreConfig::new().update_timeout(Duration::from_millis(50));
    let (app, alice, _) = app_with(config).await;
    let p1 = app.projects().create(&alice, NewProject::new("Lease")).await.unwrap();

    let held = app.database().begin().await;
    let err = app
        .projects()
        .update(&CallContext::new(), &alice, p1.project.uuid, &ProjectPatch::new().title("x"))
        .await
        .unwrap_err();
    drop(held);
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_large_aggregate_is_processed_in_waves() {
    let (app, alice, _) = app_with(StoreConfig::new().max_fanout(2)).await;
    let mut new = NewProject::new("Form");
    for i in 0..25 {
        new = new.field(field(&format!("box{}", i), 1.0));
    }
    let before = app.projects().create(&alice, new).await.unwrap();

    let mut patch = ProjectPatch::new().title("Form v2");
    for stored in &before.fields {
        let filled = format!("filled {}", stored.field_id);
        patch = patch.field(FieldPatch::new(stored.id).value(filled));
    }
    let tally = app
        .projects()
        .updates()
        .update(&CallContext::new(), &alice, before.project.uuid, &patch)
        .await
        .unwrap();
    assert_eq!(tally.applied, 26);
    assert_eq!(tally.failed + tally.skipped, 0);

    let after = reload(&app, &alice, before.project.uuid).await;
    assert!(after
        .fields
        .iter()
        .all(|f| f.value == format!("filled {}", f.field_id)));
}

#[tokio::test]
async fn test_concurrent_callers_are_serialized() {
    let (app, alice, _, p1) = lease().await;
    let app = Arc::new(app);

    let mut handles = vec![];
    for (i, stored) in p1.fields.iter().enumerate() {
        for round in 0..5 {
            let app = Arc::clone(&app);
            let alice = alice.clone();
            let (uuid, id) = (p1.project.uuid, stored.id);
            handles.push(tokio::spawn(async move {
                let value = format!("{}-{}", i, round);
                let patch = ProjectPatch::new().field(FieldPatch::new(id).value(value));
                app.projects()
                    .update(&CallContext::new(), &alice, uuid, &patch)
                    .await
                    .map(|_| ())
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let after = reload(&app, &alice, p1.project.uuid).await;
    assert_eq!(after.project, p1.project);
    for (i, stored) in after.fields.iter().enumerate() {
        assert!(stored.value.starts_with(&format!("{}-", i)));
    }
}

#[tokio::test]
async fn test_absent_nullable_columns_are_preserved() {
    let (app, alice, _) = app_with(StoreConfig::new()).await;
    let mut new = NewProject::new("Shared");
    new.route = Some("shared-lease".into());
    new.token = Some("t0k3n".into());
    let p1 = app.projects().create(&alice, new).await.unwrap();

    let ctx = CallContext::new();
    app.projects().visit(&ctx, &alice, p1.project.uuid).await.unwrap();
    let after = app
        .projects()
        .update(&ctx, &alice, p1.project.uuid, &ProjectPatch::new().title("Shared v2"))
        .await
        .unwrap();

    assert_eq!(after.project.route.as_deref(), Some("shared-lease"));
    assert_eq!(after.project.token.as_deref(), Some("t0k3n"));
    assert!(after.project.visited_at.is_some());
}

#[tokio::test]
async fn test_first_failure_skips_undispatched_children() {
    let (app, alice, _) = app_with(StoreConfig::new().max_fanout(1)).await;
    let mut new = NewProject::new("Form");
    for i in 0..8 {
        new = new.field(field(&format!("box{}", i), 1.0));
    }
    let before = app.projects().create(&alice, new).await.unwrap();

    // One task in flight: the parent applies, then the first child fails.
    let mut patch = ProjectPatch::new().title("Form v2");
    for (i, stored) in before.fields.iter().enumerate() {
        let child = FieldPatch::new(stored.id).value("filled");
        patch = patch.field(if i == 0 { child.page(0) } else { child });
    }
    let err = app
        .projects()
        .updates()
        .update(&CallContext::new(), &alice, before.project.uuid, &patch)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RowUpdateFailed);
    assert_eq!(
        err.tally(),
        Some(UpdateTally {
            applied: 1,
            failed: 1,
            skipped: 7,
        })
    );
    assert_eq!(reload(&app, &alice, before.project.uuid).await, before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_execution_skips_the_rest_and_rolls_back() {
    let (app, alice, _) = app_with(StoreConfig::new()).await;
    let mut new = NewProject::new("Census");
    for i in 0..4000 {
        new = new.field(field(&format!("row{}", i), 1.0));
    }
    let before = app.projects().create(&alice, new).await.unwrap();

    let mut patch = ProjectPatch::new().title("Census v2");
    for stored in &before.fields {
        patch = patch.field(FieldPatch::new(stored.id).value("counted"));
    }
    let coordinator = TransactionCoordinator::new(app.database().clone()).with_max_fanout(1);

    let ctx = CallContext::new();
    let canceller = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx.cancel();
        })
    };
    let err = coordinator
        .update_aggregate(&ctx, &alice, before.project.id, &patch)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    let tally = err.tally().expect("cancelled after the transaction opened");
    assert_eq!(tally.total(), 4001);
    assert_eq!(tally.failed, 0);
    assert!(tally.skipped > 0, "{:?}", tally);
    assert_eq!(reload(&app, &alice, before.project.uuid).await, before);
}

#[tokio::test]
async fn test_small_update_does_not_pay_for_a_large_neighbour() {
    let (app, alice, _, p1) = lease().await;
    let mut big = NewProject::new("Archive");
    for i in 0..6000 {
        big = big.field(field(&format!("cell{}", i), 1.0));
    }
    app.projects().create(&alice, big).await.unwrap();

    let ctx = CallContext::new();
    let tenant = p1.fields[0].id;
    let started = Instant::now();
    for round in 0..20 {
        let patch = ProjectPatch::new()
            .title(format!("Lease r{}", round))
            .field(FieldPatch::new(tenant).value(format!("v{}", round)));
        app.projects()
            .updates()
            .update(&ctx, &alice, p1.project.uuid, &patch)
            .await
            .unwrap();
    }
    let elapsed = started.elapsed();

    // Commit checks only the rows it wrote, so 6000 unrelated fields add
    // a scan per commit, not a pairwise comparison.
    assert!(elapsed < Duration::from_secs(2), "20 small updates took {:?}", elapsed);
    let after = reload(&app, &alice, p1.project.uuid).await;
    assert_eq!(after.project.title, "Lease r19");
    assert_eq!(after.field(tenant).unwrap().value, "v19");
}
