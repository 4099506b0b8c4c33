mod support;

use axum::http::{Method, StatusCode};
use serde_json::json;
use support::*;

/// Create, update, soft-delete; then walk the version surface.
async fn seed_three_versions(app: &TestApp) {
    let (status, _h, _b) = app
        .request(Method::POST, &fhir("/Patient"), Some(minimal_patient("p1")))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let mut updated = minimal_patient("p1");
    updated["gender"] = json!("female");
    let (status, _h, _b) = app
        .request(Method::PUT, &fhir("/Patient/p1"), Some(updated))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _h, _b) = app
        .request(Method::DELETE, &fhir("/Patient/p1"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn instance_history_is_newest_first_and_marks_deletes() {
    let app = test_app();
    seed_three_versions(&app).await;

    let (status, _h, body) = app
        .request(Method::GET, &fhir("/Patient/p1/_history"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resourceType"], "Bundle");
    assert_eq!(body["type"], "history");
    assert_eq!(body["total"], 3);

    let es = entries(&body);
    assert_eq!(es.len(), 3);
    assert_eq!(es[0]["request"]["method"], "DELETE");
    assert_eq!(es[1]["request"]["method"], "PUT");
    assert_eq!(es[2]["request"]["method"], "POST");

    // The deletion entry has no resource body; the others do.
    assert!(es[0].get("resource").is_none());
    assert_eq!(es[1]["resource"]["gender"], "female");
    assert_eq!(es[2]["resource"]["gender"], "male");

    assert_eq!(es[0]["response"]["etag"], "W/\"3\"");
    assert_eq!(es[2]["response"]["etag"], "W/\"1\"");
}

#[tokio::test]
async fn vread_serves_versions_and_410s_tombstones() {
    let app = test_app();
    seed_three_versions(&app).await;

    let (status, headers, body) = app
        .request(Method::GET, &fhir("/Patient/p1/_history/1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "etag"), Some("W/\"1\""));
    assert_eq!(body["gender"], "male");

    let (status, _h, body) = app
        .request(Method::GET, &fhir("/Patient/p1/_history/2"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["gender"], "female");

    // Version 3 is the tombstone.
    let (status, _h, body) = app
        .request(Method::GET, &fhir("/Patient/p1/_history/3"), None)
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["issue"][0]["code"], "deleted");

    let (status, _h, _b) = app
        .request(Method::GET, &fhir("/Patient/p1/_history/9"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_of_unknown_resource_is_404() {
    let app = test_app();
    let (status, _h, _b) = app
        .request(Method::GET, &fhir("/Patient/ghost/_history"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_count_clips_newest_first() {
    let app = test_app();
    seed_three_versions(&app).await;

    let (_s, _h, body) = app
        .request(Method::GET, &fhir("/Patient/p1/_history?_count=2"), None)
        .await;
    let es = entries(&body);
    assert_eq!(es.len(), 2);
    assert_eq!(es[0]["request"]["method"], "DELETE");
    assert_eq!(es[1]["request"]["method"], "PUT");
    // Total still reports the full version count.
    assert_eq!(body["total"], 3);
}

#[tokio::test]
async fn type_and_system_history_merge_across_resources() {
    let app = test_app();
    app.request(Method::POST, &fhir("/Patient"), Some(minimal_patient("p1")))
        .await;
    app.request(
        Method::POST,
        &fhir("/Observation"),
        Some(observation_for("o1", "p1")),
    )
    .await;
    app.request(Method::PUT, &fhir("/Patient/p1"), Some(minimal_patient("p1")))
        .await;

    let (status, _h, body) = app
        .request(Method::GET, &fhir("/Patient/_history"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entries(&body).len(), 2, "two Patient versions");

    let (status, _h, body) = app.request(Method::GET, &fhir("/_history"), None).await;
    assert_eq!(status, StatusCode::OK);
    let es = entries(&body);
    assert_eq!(es.len(), 3, "all versions across all types");
    // Newest first across types: the Patient update is the latest write.
    assert_eq!(es[0]["request"]["method"], "PUT");

    let (status, _h, body) = app
        .request(Method::GET, &fhir("/_history?_count=1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entries(&body).len(), 1);
}

#[tokio::test]
async fn deleting_versions_and_purging() {
    let app = test_app();
    seed_three_versions(&app).await;

    // An archived version can be removed.
    let (status, _h, _b) = app
        .request(Method::DELETE, &fhir("/Patient/p1/_history/1"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _h, _b) = app
        .request(Method::GET, &fhir("/Patient/p1/_history/1"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The current version cannot be deleted directly.
    let (status, _h, body) = app
        .request(Method::DELETE, &fhir("/Patient/p1/_history/3"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["issue"][0]["code"], "conflict");

    // Purge drops the resource and every remaining version.
    let (status, _h, _b) = app
        .request(Method::DELETE, &fhir("/Patient/p1/_history"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _h, _b) = app
        .request(Method::GET, &fhir("/Patient/p1/_history"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _h, _b) = app.request(Method::GET, &fhir("/Patient/p1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
