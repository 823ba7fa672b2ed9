use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};

use sluice_api::app::services::AppServices;
use sluice_auth::{Hs256JwtValidator, JwtClaims, AUTH_CLIENT_AUDIENCE};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let services = Arc::new(AppServices::in_memory());
        let jwt = Arc::new(Hs256JwtValidator::new(JWT_SECRET));
        let app = sluice_api::app::build_app(services, jwt, Duration::from_secs(30));
        Self::serve(app).await
    }

    async fn serve(app: axum::Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}/api/v1", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt_with(secret: &str, audience: &str, expires_in: ChronoDuration) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: Some("tester".to_string()),
        aud: Some(audience.to_string()),
        exp: Some((now + expires_in).timestamp()),
        iat: Some(now.timestamp()),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn mint_jwt() -> String {
    mint_jwt_with(JWT_SECRET, AUTH_CLIENT_AUDIENCE, ChronoDuration::minutes(10))
}

struct Api {
    srv: TestServer,
    client: reqwest::Client,
    token: String,
}

impl Api {
    async fn start() -> Self {
        Self {
            srv: TestServer::spawn().await,
            client: reqwest::Client::new(),
            token: mint_jwt(),
        }
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(self.srv.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .unwrap();
        read(res).await
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(self.srv.url(path))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .unwrap();
        read(res).await
    }

    async fn put(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = self.client.put(self.srv.url(path)).bearer_auth(&self.token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        read(req.send().await.unwrap()).await
    }

    async fn delete(&self, path: &str) -> StatusCode {
        self.client
            .delete(self.srv.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .unwrap()
            .status()
    }

    async fn create_user(&self, name: &str) {
        let (status, _) = self.post("/auth/users", json!({ "username": name })).await;
        assert_eq!(status, StatusCode::CREATED, "creating user {name}");
    }

    async fn create_group(&self, name: &str) {
        let (status, _) = self.post("/auth/groups", json!({ "id": name })).await;
        assert_eq!(status, StatusCode::CREATED, "creating group {name}");
    }

    async fn create_policy(&self, name: &str) {
        let (status, _) = self
            .post(
                "/auth/policies",
                json!({
                    "name": name,
                    "statement": [{"effect": "allow", "resource": "*", "action": ["fs:Read*"]}]
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "creating policy {name}");
    }
}

async fn read(res: reqwest::Response) -> (StatusCode, Value) {
    let status = res.status();
    let bytes = res.bytes().await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn names(body: &Value, field: &str) -> Vec<String> {
    body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r[field].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn healthcheck_needs_no_token() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/healthcheck")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn protected_endpoints_reject_missing_or_bad_tokens() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/auth/users")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let bad_tokens = [
        mint_jwt_with("other-secret", AUTH_CLIENT_AUDIENCE, ChronoDuration::minutes(10)),
        mint_jwt_with(JWT_SECRET, "someone-else", ChronoDuration::minutes(10)),
        mint_jwt_with(JWT_SECRET, AUTH_CLIENT_AUDIENCE, ChronoDuration::minutes(-10)),
        "not-a-jwt".to_string(),
    ];
    for token in bad_tokens {
        let res = client
            .get(srv.url("/auth/users"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn version_is_reported() {
    let api = Api::start().await;
    let (status, body) = api.get("/config/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn user_lifecycle() {
    let api = Api::start().await;

    let (status, body) = api
        .post(
            "/auth/users",
            json!({ "username": "alice", "email": "alice@example.com", "friendlyName": "Alice" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["friendly_name"], "Alice");
    assert!(body["creation_date"].as_i64().unwrap() > 0);

    let (status, body) = api.post("/auth/users", json!({ "username": "alice" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("alice"));

    let (status, body) = api.get("/auth/users/alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "alice@example.com");

    assert_eq!(api.delete("/auth/users/alice").await, StatusCode::NO_CONTENT);
    let (status, _) = api.get("/auth/users/alice").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(api.delete("/auth/users/alice").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_pages_by_cursor() {
    let api = Api::start().await;
    for n in 1..=5 {
        api.create_policy(&format!("p{n}")).await;
    }

    let (status, body) = api.get("/auth/policies?amount=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body, "name"), ["p1", "p2"]);
    assert_eq!(
        body["pagination"],
        json!({ "has_more": true, "max_per_page": 1000, "next_offset": "p2", "results": 2 })
    );

    let (_, body) = api.get("/auth/policies?amount=2&after=p2").await;
    assert_eq!(names(&body, "name"), ["p3", "p4"]);
    assert_eq!(body["pagination"]["next_offset"], "p4");

    let (_, body) = api.get("/auth/policies?amount=2&after=p4").await;
    assert_eq!(names(&body, "name"), ["p5"]);
    assert_eq!(body["pagination"]["has_more"], false);
    assert_eq!(body["pagination"]["next_offset"], "");

    let (status, _) = api.get("/auth/policies?amount=-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn prefix_and_cursor_compose() {
    let api = Api::start().await;
    for name in ["alice", "alicia", "allen", "bob"] {
        api.create_user(name).await;
    }

    let (_, body) = api.get("/auth/users?prefix=al&after=alice").await;
    assert_eq!(names(&body, "username"), ["alicia", "allen"]);
    assert_eq!(body["pagination"]["has_more"], false);
}

#[tokio::test]
async fn effective_policies_union_direct_and_group_grants() {
    let api = Api::start().await;
    api.create_user("alice").await;
    api.create_group("devs").await;
    for policy in ["direct-only", "shared", "group-only"] {
        api.create_policy(policy).await;
    }

    for path in [
        "/auth/groups/devs/members/alice",
        "/auth/users/alice/policies/direct-only",
        "/auth/users/alice/policies/shared",
        "/auth/groups/devs/policies/shared",
        "/auth/groups/devs/policies/group-only",
    ] {
        let (status, _) = api.put(path, None).await;
        assert_eq!(status, StatusCode::CREATED, "{path}");
    }

    let (_, body) = api.get("/auth/users/alice/policies").await;
    assert_eq!(names(&body, "name"), ["direct-only", "shared"]);

    let (_, body) = api.get("/auth/users/alice/policies?effective=true").await;
    assert_eq!(names(&body, "name"), ["direct-only", "group-only", "shared"]);
    assert_eq!(body["pagination"]["results"], 3);

    let (_, body) = api.get("/auth/users/ghost/policies?effective=true").await;
    assert_eq!(body["pagination"]["results"], 0);
}

#[tokio::test]
async fn memberships_are_idempotent_and_cleared_on_delete() {
    let api = Api::start().await;
    api.create_user("alice").await;
    api.create_group("devs").await;

    for _ in 0..2 {
        let (status, _) = api.put("/auth/groups/devs/members/alice", None).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, body) = api.get("/auth/groups/devs/members").await;
    assert_eq!(names(&body, "username"), ["alice"]);

    let (_, body) = api.get("/auth/users/alice/groups").await;
    assert_eq!(names(&body, "id"), ["devs"]);

    let (status, _) = api.put("/auth/groups/devs/members/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(api.delete("/auth/groups/devs").await, StatusCode::NO_CONTENT);
    let (_, body) = api.get("/auth/users/alice/groups").await;
    assert_eq!(body["pagination"]["results"], 0);
}

#[tokio::test]
async fn attaching_a_group_policy_twice_lists_it_once() {
    let api = Api::start().await;
    api.create_group("devs").await;
    api.create_policy("read").await;

    for _ in 0..2 {
        let (status, _) = api.put("/auth/groups/devs/policies/read", None).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = api.get("/auth/groups/devs/policies").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body, "name"), ["read"]);
    assert_eq!(body["pagination"]["results"], 1);
    assert_eq!(body["pagination"]["has_more"], false);
}

#[tokio::test]
async fn removing_a_member_detaches_inherited_policies() {
    let api = Api::start().await;
    api.create_user("alice").await;
    api.create_group("devs").await;
    api.create_policy("read").await;
    api.put("/auth/groups/devs/members/alice", None).await;
    api.put("/auth/groups/devs/policies/read", None).await;

    assert_eq!(api.delete("/auth/groups/devs/members/alice").await, StatusCode::NO_CONTENT);
    assert_eq!(api.delete("/auth/groups/devs/members/alice").await, StatusCode::NO_CONTENT);

    let (_, body) = api.get("/auth/users/alice/policies?effective=true").await;
    assert_eq!(body["pagination"]["results"], 0);
}

#[tokio::test]
async fn policy_document_can_be_replaced() {
    let api = Api::start().await;
    api.create_policy("repo-access").await;

    let (status, body) = api
        .put(
            "/auth/policies/repo-access",
            Some(json!({
                "statement": [
                    {"effect": "deny", "resource": "arn:lakefs:fs:::repository/secret", "action": ["fs:*"]},
                    {"effect": "allow", "resource": "*", "action": ["fs:List*", "fs:Read*"]}
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statement"][0]["effect"], "deny");
    assert_eq!(body["statement"][1]["action"], json!(["fs:List*", "fs:Read*"]));

    let (_, body) = api.get("/auth/policies/repo-access").await;
    assert_eq!(body["statement"].as_array().unwrap().len(), 2);

    let (status, _) = api
        .put(
            "/auth/policies/repo-access",
            Some(json!({ "name": "other", "statement": [{"effect": "allow", "resource": "*", "action": ["fs:*"]}] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = api
        .put(
            "/auth/policies/missing",
            Some(json!({ "statement": [{"effect": "allow", "resource": "*", "action": ["fs:*"]}] })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn credentials_hide_secrets_outside_creation_and_lookup() {
    let api = Api::start().await;
    api.create_user("alice").await;
    api.create_user("bob").await;

    let (_, body) = api.get("/auth/users/alice/credentials").await;
    assert_eq!(
        body["pagination"],
        json!({ "has_more": false, "max_per_page": 1000, "next_offset": "", "results": 0 })
    );

    let (status, created) = api.post("/auth/users/alice/credentials", json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    let key = created["access_key_id"].as_str().unwrap().to_string();
    let secret = created["secret_access_key"].as_str().unwrap().to_string();
    assert!(key.starts_with("AKIAJ"));
    assert_eq!(secret.len(), 40);
    assert_eq!(created["user_name"], "alice");

    let (_, body) = api.get("/auth/users/alice/credentials").await;
    assert_eq!(names(&body, "access_key_id"), [key.clone()]);
    assert!(body["results"][0].get("secret_access_key").is_none());

    let (status, body) = api.get(&format!("/auth/users/alice/credentials/{key}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("secret_access_key").is_none());

    let (status, _) = api.get(&format!("/auth/users/bob/credentials/{key}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = api.get(&format!("/auth/credentials/{key}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["secret_access_key"], secret);
    assert_eq!(body["user_name"], "alice");

    assert_eq!(
        api.delete(&format!("/auth/users/bob/credentials/{key}")).await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        api.delete(&format!("/auth/users/alice/credentials/{key}")).await,
        StatusCode::NO_CONTENT
    );
    let (status, _) = api.get(&format!("/auth/credentials/{key}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn imported_credentials_keep_their_keys() {
    let api = Api::start().await;
    api.create_user("alice").await;

    let (status, body) = api
        .post(
            "/auth/users/alice/credentials?access_key=AKIAJIMPORTED00000Q&secret_key=imported-secret",
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["access_key_id"], "AKIAJIMPORTED00000Q");
    assert_eq!(body["secret_access_key"], "imported-secret");

    let (status, _) = api
        .post("/auth/users/alice/credentials?access_key=AKIAJIMPORTED00000Q&secret_key=again", json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = api
        .post("/auth/users/alice/credentials?access_key=AKIAJLONELY", json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleting_a_user_removes_its_credentials() {
    let api = Api::start().await;
    api.create_user("alice").await;
    let (_, created) = api.post("/auth/users/alice/credentials", json!({})).await;
    let key = created["access_key_id"].as_str().unwrap().to_string();

    assert_eq!(api.delete("/auth/users/alice").await, StatusCode::NO_CONTENT);
    let (status, _) = api.get(&format!("/auth/credentials/{key}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn slow_handlers_time_out_as_unavailable() {
    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(5)).await;
        "late"
    }

    let app = axum::Router::new().nest(
        "/api/v1",
        axum::Router::new()
            .route("/slow", axum::routing::get(slow))
            .layer(axum::middleware::from_fn_with_state(
                Duration::from_millis(50),
                sluice_api::middleware::enforce_timeout,
            )),
    );
    let srv = TestServer::serve(app).await;

    let res = reqwest::get(srv.url("/slow")).await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("deadline"));
}
