mod support;

use axum::http::{Method, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use support::*;

fn post_entry(url: &str, resource: serde_json::Value) -> serde_json::Value {
    json!({
        "fullUrl": format!("urn:uuid:{}", url),
        "request": {"method": "POST", "url": url},
        "resource": resource
    })
}

#[tokio::test]
async fn batch_reports_per_entry_outcomes() {
    let app = test_app();

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            post_entry("Patient", minimal_patient("p1")),
            {"request": {"method": "DELETE", "url": "Patient/p9"}}
        ]
    });

    let (status, _h, body) = app.request(Method::POST, &fhir("/"), Some(bundle)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "batch-response");

    let es = entries(&body);
    assert_eq!(es.len(), 2);
    assert_eq!(es[0]["response"]["status"], "201 Created");
    assert_eq!(es[0]["response"]["location"], "Patient/p1");
    assert_eq!(es[1]["response"]["status"], "404 Not Found");
    assert_eq!(
        es[1]["response"]["outcome"]["issue"][0]["code"],
        "not-found"
    );

    // The POST succeeded even though the DELETE failed.
    let (status, _h, _b) = app.request(Method::GET, &fhir("/Patient/p1"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn transaction_fails_whole_bundle_on_missing_delete_target() {
    let app = test_app();

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            post_entry("Patient", minimal_patient("p1")),
            {"request": {"method": "DELETE", "url": "Patient/p9"}}
        ]
    });

    let (status, _h, body) = app.request(Method::POST, &fhir("/"), Some(bundle)).await;
    // Deletes run first, so the failure aborts before any write.
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resourceType"], "OperationOutcome");
    assert_eq!(body["issue"][0]["code"], "not-found");

    let (status, _h, _b) = app.request(Method::GET, &fhir("/Patient/p1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "transaction must not apply the POST");
}

#[tokio::test]
async fn transaction_orders_entries_and_succeeds() {
    let app = test_app();
    app.request(Method::POST, &fhir("/Patient"), Some(minimal_patient("gone")))
        .await;

    // Declared GET-first, but processing order is DELETE, POST, PUT, GET:
    // the GET sees the resource POSTed by the same transaction.
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {"request": {"method": "GET", "url": "Patient/p1"}},
            {"request": {"method": "PUT", "url": "Patient/p2"}, "resource": minimal_patient("p2")},
            post_entry("Patient", minimal_patient("p1")),
            {"request": {"method": "DELETE", "url": "Patient/gone"}}
        ]
    });

    let (status, _h, body) = app.request(Method::POST, &fhir("/"), Some(bundle)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "transaction-response");

    let es = entries(&body);
    // Responses come back in the original entry order.
    assert_eq!(es[0]["response"]["status"], "200 OK");
    assert_eq!(es[0]["resource"]["id"], "p1");
    assert_eq!(es[1]["response"]["status"], "201 Created");
    assert_eq!(es[2]["response"]["status"], "201 Created");
    assert_eq!(es[3]["response"]["status"], "204 No Content");
}

#[tokio::test]
async fn bundle_patch_accepts_binary_and_raw_payloads() {
    let app = test_app();
    app.request(Method::POST, &fhir("/Patient"), Some(minimal_patient("p1")))
        .await;
    app.request(Method::POST, &fhir("/Patient"), Some(minimal_patient("p2")))
        .await;

    let patch = json!([{"op": "replace", "path": "/gender", "value": "female"}]);
    let binary = json!({
        "resourceType": "Binary",
        "contentType": "application/json-patch+json",
        "data": STANDARD.encode(serde_json::to_vec(&patch).unwrap())
    });

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {"request": {"method": "PATCH", "url": "Patient/p1"}, "resource": binary},
            {"request": {"method": "PATCH", "url": "Patient/p2"}, "resource": patch}
        ]
    });

    let (status, _h, body) = app.request(Method::POST, &fhir("/"), Some(bundle)).await;
    assert_eq!(status, StatusCode::OK);
    for entry in entries(&body) {
        assert_eq!(entry["response"]["status"], "200 OK");
        assert_eq!(entry["resource"]["gender"], "female");
    }
}

#[tokio::test]
async fn bundle_rejects_unsupported_shapes() {
    let app = test_app();

    // Not a batch/transaction bundle.
    let (status, _h, _b) = app
        .request(
            Method::POST,
            &fhir("/"),
            Some(json!({"resourceType": "Bundle", "type": "searchset"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unsupported method inside a batch: per-entry 405.
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {"request": {"method": "OPTIONS", "url": "Patient/p1"}}
        ]
    });
    let (status, _h, body) = app.request(Method::POST, &fhir("/"), Some(bundle)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        entries(&body)[0]["response"]["status"],
        "405 Method Not Allowed"
    );

    // Type-level GET inside a batch is not implemented: per-entry 501.
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {"request": {"method": "GET", "url": "Patient"}}
        ]
    });
    let (_s, _h, body) = app.request(Method::POST, &fhir("/"), Some(bundle)).await;
    assert_eq!(
        entries(&body)[0]["response"]["status"],
        "501 Not Implemented"
    );

    // An entry without a request fails the whole bundle shape check.
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [{"resource": minimal_patient("p1")}]
    });
    let (status, _h, _b) = app.request(Method::POST, &fhir("/"), Some(bundle)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bundle_conditional_create_entries() {
    let app = test_app();
    app.request(
        Method::POST,
        &fhir("/Patient"),
        Some(patient_with_identifier("p1", "urn:mrn", "abc")),
    )
    .await;

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [{
            "request": {"method": "POST", "url": "Patient", "ifNoneExist": "identifier=abc"},
            "resource": patient_with_identifier("p-new", "urn:mrn", "abc")
        }]
    });
    let (status, _h, body) = app.request(Method::POST, &fhir("/"), Some(bundle)).await;
    assert_eq!(status, StatusCode::OK);
    let es = entries(&body);
    assert_eq!(es[0]["response"]["status"], "200 OK");
    assert_eq!(es[0]["resource"]["id"], "p1");
}
