use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;

use restling::api::{create_router, ApiContext};
use restling::logic::QueryEngine;
use restling::seed;
use restling::store::MemoryStore;

// Test client wrapper for making API calls
struct TestClient {
    client: Client,
    base_url: String,
}

impl TestClient {
    fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("GET failed")
    }

    async fn get_with(&self, path: &str, query: &[(&str, &str)]) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await
            .expect("GET failed")
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("POST failed")
    }

    async fn put(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .put(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("PUT failed")
    }

    async fn put_empty(&self, path: &str) -> reqwest::Response {
        self.client
            .put(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("PUT failed")
    }

    async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("DELETE failed")
    }

    async fn delete_json(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("DELETE failed")
    }
}

/// Boot the router over a fresh in-memory store on an ephemeral port.
async fn spawn_server() -> TestClient {
    let registry = Arc::new(seed::demo_registry());
    let engine = QueryEngine::new(Arc::new(MemoryStore::new()), registry, 1000);
    let app = create_router().with_state(ApiContext::new(engine));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server crashed");
    });
    TestClient::new(format!("http://{}", addr))
}

#[tokio::test]
async fn generic_rest_workflow() {
    let client = spawn_server().await;

    let resp = client.get("/health").await;
    assert!(resp.status().is_success());

    // Seed two users through the generic create endpoint.
    let resp = client
        .post(
            "/users",
            json!([
                {"firstName": "Code", "role": 1, "tags": ["a"]},
                {"firstName": "Ibnu", "role": 2, "tags": []}
            ]),
        )
        .await;
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created.as_array().unwrap().len(), 2);
    // Batch create re-fetches with every relation populated.
    assert!(created[0]["passports"].is_array());

    // Case-insensitive contains: "Code" also matches "Encoded"-style values,
    // here it matches exactly one record.
    let resp = client
        .get_with("/users", &[("where", r#"{"firstName":{"contains":"code"}}"#)])
        .await;
    let rows: Value = resp.json().await.unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["firstName"], json!("Code"));

    // OR across branches unions both result sets.
    let resp = client
        .get_with(
            "/users",
            &[(
                "where",
                r#"{"or":[{"firstName":{"contains":"Code"}},{"firstName":{"contains":"Ibnu"}}]}"#,
            )],
        )
        .await;
    let rows: Value = resp.json().await.unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 2);

    // Both between shapes produce the same result set.
    let resp = client
        .get_with("/users", &[("where", r#"{"id":{"between":[1,2]}}"#)])
        .await;
    let pair: Value = resp.json().await.unwrap();
    let resp = client
        .get_with(
            "/users",
            &[("where", r#"{"id":{"between":{"from":1,"to":2}}}"#)],
        )
        .await;
    let object: Value = resp.json().await.unwrap();
    assert_eq!(pair, object);
    assert_eq!(pair.as_array().unwrap().len(), 2);

    // Pagination.
    let resp = client.get_with("/users", &[("limit", "1")]).await;
    let rows: Value = resp.json().await.unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    let resp = client.get_with("/users", &[("skip", "2"), ("limit", "1")]).await;
    let rows: Value = resp.json().await.unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 0);

    // Aggregates over the current filter.
    let resp = client.get("/users/count").await;
    let count: u64 = resp.json().await.unwrap();
    assert_eq!(count, 2);
    let resp = client.get("/users/sum/id").await;
    let sum: Value = resp.json().await.unwrap();
    assert_eq!(sum, json!({"sum": 3.0}));
    let resp = client.get("/users/avg/id").await;
    let avg: Value = resp.json().await.unwrap();
    assert_eq!(avg, json!({"avg": 1.5}));

    // Wildcard populate returns every declared relation; unknown populate
    // names are ignored.
    let resp = client.get_with("/users/1", &[("populate", "*")]).await;
    let user: Value = resp.json().await.unwrap();
    assert!(user["passports"].is_array());
    assert!(user["badges"].is_array());
    let resp = client.get_with("/users/1", &[("populate", "ghosts")]).await;
    assert!(resp.status().is_success());

    // Attribute metadata marks relations as collections.
    let resp = client.get("/users/schema").await;
    let schema: Value = resp.json().await.unwrap();
    assert_eq!(schema["passports"]["collection"], json!("passports"));
    assert_eq!(schema["firstName"]["type"], json!("text"));

    // Diffed update: identical payload is a no-op error, changed payload
    // comes back fully populated.
    let resp = client.put("/users/1", json!({"firstName": "Code"})).await;
    assert_eq!(resp.status(), 400);
    let resp = client.put("/users/1", json!({"firstName": "Coder"})).await;
    assert!(resp.status().is_success());
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["firstName"], json!("Coder"));
    assert!(updated["passports"].is_array());

    // Update by query hits exactly the resolved id set.
    let resp = client
        .put(
            "/users",
            json!({"query": {"role": {">": 1}}, "update": {"active": false}}),
        )
        .await;
    let rows: Value = resp.json().await.unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["active"], json!(false));

    // Seek finds an existing record or creates a new one.
    let resp = client
        .post(
            "/users/seek",
            json!({"criteria": {"firstName": "Coder"}, "initialValues": {"firstName": "Coder"}}),
        )
        .await;
    let found: Value = resp.json().await.unwrap();
    assert_eq!(found["id"], json!(1));
    let resp = client
        .post(
            "/users/seek",
            json!({"criteria": {"firstName": "Nobody"}, "initialValues": {"firstName": "Nobody"}}),
        )
        .await;
    let made: Value = resp.json().await.unwrap();
    assert_eq!(made["firstName"], json!("Nobody"));
    let resp = client.get("/users/count").await;
    let count: u64 = resp.json().await.unwrap();
    assert_eq!(count, 3);

    // Destroy one returns the pre-delete snapshot; destroy by query removes
    // the rest.
    let resp = client.delete("/users/3").await;
    let snapshot: Value = resp.json().await.unwrap();
    assert_eq!(snapshot["firstName"], json!("Nobody"));
    let resp = client.delete_json("/users", json!({})).await;
    let removed: Value = resp.json().await.unwrap();
    assert_eq!(removed.as_array().unwrap().len(), 2);
    let resp = client.get("/users/count").await;
    let count: u64 = resp.json().await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn collection_mutation_endpoints() {
    let client = spawn_server().await;
    client
        .post("/users", json!({"firstName": "Owner", "badges": []}))
        .await;
    client.post("/passports", json!({"token": "t-1"})).await;
    client.post("/badges", json!({"name": "gold", "level": 3})).await;

    // One-to-many: attach, duplicate no-op, detach, absent no-op.
    let resp = client.put_empty("/users/1/passports/1").await;
    let member: Value = resp.json().await.unwrap();
    assert_eq!(member["user"], json!(1));
    let resp = client.put_empty("/users/1/passports/1").await;
    let noop: Value = resp.json().await.unwrap();
    assert!(noop.is_null());
    let resp = client.delete("/users/1/passports/1").await;
    let detached: Value = resp.json().await.unwrap();
    assert!(detached["user"].is_null());
    let resp = client.delete("/users/1/passports/1").await;
    let noop: Value = resp.json().await.unwrap();
    assert!(noop.is_null());

    // Array-backed: membership lives on the owner's id-array column.
    let resp = client.put_empty("/users/1/badges/1").await;
    let member: Value = resp.json().await.unwrap();
    assert_eq!(member["name"], json!("gold"));
    let resp = client.get_with("/users/1", &[("populate", "badges")]).await;
    let owner: Value = resp.json().await.unwrap();
    assert_eq!(owner["badges"].as_array().unwrap().len(), 1);
    let resp = client.delete("/users/1/badges/1").await;
    let removed: Value = resp.json().await.unwrap();
    assert_eq!(removed["name"], json!("gold"));
    let resp = client.get("/users/1").await;
    let owner: Value = resp.json().await.unwrap();
    assert_eq!(owner["badges"], json!([]));
}

#[tokio::test]
async fn streaming_endpoints() {
    let client = spawn_server().await;
    client
        .post(
            "/users",
            json!([
                {"firstName": "A", "role": 1},
                {"firstName": "B", "role": 2},
                {"firstName": "C", "role": 3}
            ]),
        )
        .await;

    // Row stream: one JSON object per line.
    let resp = client.get("/users/stream").await;
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body = resp.text().await.unwrap();
    let lines: Vec<&str> = body.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 3);
    for line in &lines {
        let row: Value = serde_json::from_str(line).unwrap();
        assert!(row.is_object());
    }

    // Row stream ignores pagination but honors the filter.
    let resp = client
        .get_with("/users/stream", &[("where", r#"{"role":{">":1}}"#), ("limit", "1")])
        .await;
    let body = resp.text().await.unwrap();
    assert_eq!(body.lines().filter(|l| !l.is_empty()).count(), 2);

    // Batch stream: one JSON array per line, sized by the path parameter.
    let resp = client.get("/users/stream-batch/1").await;
    let body = resp.text().await.unwrap();
    let lines: Vec<&str> = body.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 3);
    for line in &lines {
        let batch: Value = serde_json::from_str(line).unwrap();
        assert_eq!(batch.as_array().unwrap().len(), 1);
    }

    // A batch larger than the result set yields a single chunk; the default
    // batch size is 10.
    let resp = client.get("/users/stream-batch").await;
    let body = resp.text().await.unwrap();
    let lines: Vec<&str> = body.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 1);
    let batch: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(batch.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn validation_and_error_mapping() {
    let client = spawn_server().await;

    // Unknown entity.
    let resp = client.get("/ghosts").await;
    assert_eq!(resp.status(), 404);

    // Malformed pagination keeps its actionable message.
    let resp = client.get_with("/users", &[("limit", "lots")]).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("limit"));

    // Unknown filter column is a client error.
    let resp = client
        .get_with("/users", &[("where", r#"{"ghost": 1}"#)])
        .await;
    assert_eq!(resp.status(), 400);

    // Malformed between arity is a client error.
    let resp = client
        .get_with("/users", &[("where", r#"{"id":{"between":[1,2,3]}}"#)])
        .await;
    assert_eq!(resp.status(), 400);

    // Invalid path id.
    let resp = client.get("/users/not-an-id").await;
    assert_eq!(resp.status(), 400);

    // Missing record.
    let resp = client.get("/users/99").await;
    assert_eq!(resp.status(), 404);
}
