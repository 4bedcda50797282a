use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;

use typed_firestore::datastore::HttpDatastore;
use typed_firestore::documents::{get_document_data, get_document_data_maybe, set_document};
use typed_firestore::{DatabaseId, Firestore, FirestoreClient};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct City {
    name: String,
    population: i64,
}

fn build_client(server: &MockServer) -> (FirestoreClient, Firestore) {
    let database_id = DatabaseId::default_database("test-project");
    let datastore = HttpDatastore::builder(database_id.clone())
        .with_emulator_host(format!("127.0.0.1:{}", server.port()))
        .build()
        .unwrap();
    let firestore = Firestore::new(database_id);
    let client = FirestoreClient::new(firestore.clone(), Arc::new(datastore));
    (client, firestore)
}

#[tokio::test]
async fn get_document_decodes_rest_payload() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/projects/test-project/databases/(default)/documents/cities/sf");
        then.status(200).json_body(json!({
            "name": "projects/test-project/databases/(default)/documents/cities/sf",
            "fields": {
                "name": { "stringValue": "San Francisco" },
                "population": { "integerValue": "860000" }
            }
        }));
    });

    let (client, firestore) = build_client(&server);
    let cities = firestore.collection("cities").unwrap();
    let city = get_document_data::<City>(&client, &cities, "sf")
        .await
        .unwrap();

    mock.assert();
    assert_eq!(
        city,
        City {
            name: "San Francisco".into(),
            population: 860_000
        }
    );
}

#[tokio::test]
async fn missing_document_maps_to_none() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/v1/projects/test-project/databases/(default)/documents/cities/atlantis");
        then.status(404).json_body(json!({
            "error": { "message": "Document not found", "status": "NOT_FOUND" }
        }));
    });

    let (client, firestore) = build_client(&server);
    let cities = firestore.collection("cities").unwrap();
    let city = get_document_data_maybe::<City>(&client, &cities, "atlantis")
        .await
        .unwrap();
    assert!(city.is_none());
}

#[tokio::test]
async fn set_document_commits_write_with_document_name() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/databases/(default)/documents:commit")
            .json_body_partial(
                r#"{
                    "writes": [{
                        "update": {
                            "name": "projects/test-project/databases/(default)/documents/cities/sf",
                            "fields": {
                                "name": { "stringValue": "San Francisco" },
                                "population": { "integerValue": "860000" }
                            }
                        }
                    }]
                }"#,
            );
        then.status(200).json_body(json!({ "writeResults": [{}] }));
    });

    let (client, firestore) = build_client(&server);
    let cities = firestore.collection("cities").unwrap();
    set_document(
        &client,
        &cities,
        "sf",
        &City {
            name: "San Francisco".into(),
            population: 860_000,
        },
        None,
    )
    .await
    .unwrap();

    mock.assert();
}

#[tokio::test]
async fn backend_errors_surface_with_mapped_codes() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/databases/(default)/documents:commit");
        then.status(403).json_body(json!({
            "error": { "message": "Missing or insufficient permissions.", "status": "PERMISSION_DENIED" }
        }));
    });

    let (client, firestore) = build_client(&server);
    let cities = firestore.collection("cities").unwrap();
    let err = set_document(
        &client,
        &cities,
        "sf",
        &City {
            name: "San Francisco".into(),
            population: 860_000,
        },
        None,
    )
    .await
    .unwrap_err();

    assert_eq!(err.code_str(), "firestore/permission-denied");
    assert!(err.message().contains("insufficient permissions"));
}

#[tokio::test]
async fn run_query_posts_structured_query() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/databases/(default)/documents:runQuery")
            .json_body_partial(
                r#"{
                    "structuredQuery": {
                        "from": [{ "collectionId": "cities" }],
                        "limit": 500
                    }
                }"#,
            );
        then.status(200).json_body(json!([
            {
                "document": {
                    "name": "projects/test-project/databases/(default)/documents/cities/sf",
                    "fields": {
                        "name": { "stringValue": "San Francisco" },
                        "population": { "integerValue": "860000" }
                    }
                }
            }
        ]));
    });

    let (client, firestore) = build_client(&server);
    let cities = firestore.collection("cities").unwrap();
    let documents =
        typed_firestore::documents::get_documents_data::<City>(&client, &cities, Vec::new())
            .await
            .unwrap();

    mock.assert();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].name, "San Francisco");
}
