/// Store tests
///
/// Accounts, project CRUD and JSON patch payloads through the public client.
/// Run with: cargo test --test store_tests

use docfield::{CallContext, Docfield, ErrorKind, NewProject, ProjectPatch, StoreConfig};

async fn app() -> Docfield {
    Docfield::open(StoreConfig::new().bcrypt_cost(4).list_limit(3))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_register_authenticate_and_own_projects() {
    let app = app().await;
    app.users().register("Alice", "alice@example.com", "alice-password").await.unwrap();
    let alice = app.users().authenticate("alice@example.com", "alice-password").await.unwrap();

    let created = app.projects().create(&alice, NewProject::new("Invoice")).await.unwrap();
    let page = app.projects().list(&alice, None, None).await.unwrap();
    assert_eq!(page.projects.len(), 1);
    assert_eq!(page.projects[0].uuid, created.project.uuid);

    let err = app.users().authenticate("alice@example.com", "wrong-password").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn test_create_from_json_and_patch_from_json() {
    let app = app().await;
    let alice = app.users().register("Alice", "alice@example.com", "alice-password").await.unwrap();

    let new: NewProject = serde_json::from_str(
        r#"{
            "title": "Lease",
            "document_url": "https://files.example.com/lease.pdf",
            "fields": [
                {"x1": 0, "y1": 0, "x2": 100, "y2": 20, "page": 1,
                 "type": "TEXT", "field_id": "tenant"},
                {"x1": 0, "y1": 40, "x2": 50, "y2": 60, "page": 2,
                 "type": "IMAGE", "field_id": "signature"}
            ]
        }"#,
    )
    .unwrap();
    let created = app.projects().create(&alice, new).await.unwrap();
    let tenant = created.fields[0].id;

    let patch: ProjectPatch = serde_json::from_str(&format!(
        r#"{{"description": "signed copy", "fields": [{{"id": {}, "value": "Jane Doe"}}]}}"#,
        tenant
    ))
    .unwrap();
    let updated = app
        .projects()
        .update(&CallContext::new(), &alice, created.project.uuid, &patch)
        .await
        .unwrap();

    assert_eq!(updated.project.title, "Lease");
    assert_eq!(updated.project.description, "signed copy");
    assert_eq!(updated.field(tenant).unwrap().value, "Jane Doe");
    assert_eq!(updated.fields[1], created.fields[1]);

    let json = serde_json::to_value(&updated).unwrap();
    assert_eq!(json["fields"][1]["type"], "IMAGE");
    assert!(json.get("user_id").is_none());
}

#[tokio::test]
async fn test_list_is_paginated_and_scoped() {
    let app = app().await;
    let alice = app.users().register("Alice", "alice@example.com", "alice-password").await.unwrap();
    let bob = app.users().register("Bob", "bob@example.com", "bob-password").await.unwrap();
    for i in 0..7 {
        app.projects().create(&alice, NewProject::new(format!("doc {}", i))).await.unwrap();
    }
    app.projects().create(&bob, NewProject::new("bob's doc")).await.unwrap();

    let mut titles = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = app.projects().list(&alice, None, cursor.as_deref()).await.unwrap();
        assert!(page.projects.len() <= 3);
        titles.extend(page.projects.into_iter().map(|p| p.title));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    let expected: Vec<String> = (0..7).map(|i| format!("doc {}", i)).collect();
    assert_eq!(titles, expected);

    let big = app.projects().list(&alice, Some(1_000), None).await.unwrap();
    assert_eq!(big.projects.len(), 7);
}

#[tokio::test]
async fn test_route_must_be_unique() {
    let app = app().await;
    let alice = app.users().register("Alice", "alice@example.com", "alice-password").await.unwrap();

    let mut first = NewProject::new("A");
    first.route = Some("public-form".into());
    app.projects().create(&alice, first).await.unwrap();

    let mut second = NewProject::new("B");
    second.route = Some("public-form".into());
    let err = app.projects().create(&alice, second).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    assert_eq!(
        err.db_error().and_then(|e| e.constraint_name()),
        Some("project_route_key")
    );
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let err = Docfield::open(StoreConfig::new().max_fanout(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}
