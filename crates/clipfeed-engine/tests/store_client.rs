use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use clipfeed_engine::error::EngineError;
use clipfeed_engine::store::{fetch_tracks, HttpObjectStore, ObjectStore};
use clipfeed_proto::config::StoreConfig;
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Bucket {
    list_bodies: Arc<Mutex<Vec<Value>>>,
    api_keys: Arc<Mutex<Vec<String>>>,
    uploads: Arc<Mutex<Vec<(String, String, usize)>>>,
}

async fn list(
    State(bucket): State<Bucket>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if name != "snippets" {
        return Err(StatusCode::NOT_FOUND);
    }
    if let Some(key) = headers.get("apikey").and_then(|v| v.to_str().ok()) {
        bucket.api_keys.lock().unwrap().push(key.to_string());
    }
    bucket.list_bodies.lock().unwrap().push(body);
    Ok(Json(json!([
        { "name": ".emptyFolderPlaceholder", "created_at": null },
        { "name": "snippet-1700000000001.webm", "created_at": "2024-11-14T22:13:20Z" },
        { "name": "notes.txt", "created_at": "2024-11-14T22:13:21Z" },
        { "name": "snippet-1700000000002.ogg" }
    ])))
}

async fn upload(
    State(bucket): State<Bucket>,
    Path((name, object)): Path<(String, String)>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> StatusCode {
    if object.starts_with("reject") {
        return StatusCode::PAYLOAD_TOO_LARGE;
    }
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    bucket
        .uploads
        .lock()
        .unwrap()
        .push((format!("{}/{}", name, object), content_type, body.len()));
    StatusCode::OK
}

async fn serve(bucket: Bucket) -> String {
    let app = Router::new()
        .route("/storage/v1/object/list/:bucket", post(list))
        .route("/storage/v1/object/:bucket/:name", post(upload))
        .with_state(bucket);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(base_url: String, api_key: &str) -> StoreConfig {
    StoreConfig {
        base_url,
        api_key: api_key.to_string(),
        ..StoreConfig::default()
    }
}

#[tokio::test]
async fn listing_becomes_playable_tracks() {
    let bucket = Bucket::default();
    let base = serve(bucket.clone()).await;
    let store = HttpObjectStore::new(&config(base.clone(), "anon-key")).unwrap();

    let tracks = fetch_tracks(&store).await.unwrap();
    let names: Vec<_> = tracks.iter().map(|t| t.display_name.as_str()).collect();
    assert_eq!(names, vec!["snippet-1700000000001.webm", "snippet-1700000000002.ogg"]);
    assert_eq!(
        tracks[0].url,
        format!("{}/storage/v1/object/public/snippets/snippet-1700000000001.webm", base)
    );
    assert!(tracks[0].created_at.is_some());
    assert!(tracks[1].created_at.is_none());

    let bodies = bucket.list_bodies.lock().unwrap().clone();
    assert_eq!(bodies[0]["limit"], 100);
    assert_eq!(bodies[0]["sortBy"]["column"], "created_at");
    assert_eq!(bucket.api_keys.lock().unwrap().clone(), vec!["anon-key".to_string()]);
}

#[tokio::test]
async fn upload_posts_the_blob_with_its_content_type() {
    let bucket = Bucket::default();
    let base = serve(bucket.clone()).await;
    let store = HttpObjectStore::new(&config(base, "")).unwrap();

    store
        .upload("snippet-1.webm", vec![1, 2, 3, 4, 5], "audio/webm")
        .await
        .unwrap();

    let uploads = bucket.uploads.lock().unwrap().clone();
    assert_eq!(
        uploads,
        vec![("snippets/snippet-1.webm".to_string(), "audio/webm".to_string(), 5)]
    );
}

#[tokio::test]
async fn rejected_upload_surfaces_the_status() {
    let base = serve(Bucket::default()).await;
    let store = HttpObjectStore::new(&config(base, "")).unwrap();

    let err = store
        .upload("reject-me.webm", vec![0; 16], "audio/webm")
        .await
        .unwrap_err();
    match err {
        EngineError::Upload { name, reason } => {
            assert_eq!(name, "reject-me.webm");
            assert!(reason.contains("413"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn unknown_bucket_is_a_fetch_error() {
    let base = serve(Bucket::default()).await;
    let store = HttpObjectStore::new(&StoreConfig {
        bucket: "missing".into(),
        ..config(base, "")
    })
    .unwrap();

    let err = store.list().await.unwrap_err();
    assert!(matches!(err, EngineError::Fetch(_)));
}

#[tokio::test]
async fn unreachable_store_is_a_fetch_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let store = HttpObjectStore::new(&config(base, "")).unwrap();

    assert!(matches!(fetch_tracks(&store).await, Err(EngineError::Fetch(_))));
}
