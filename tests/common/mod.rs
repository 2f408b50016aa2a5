//! Common test utilities

#![allow(dead_code)]

use serde_json::{json, Value};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use linkgate::allocator::Allocator;
use linkgate::coordinator::{ClientConfig, CoordinatorClient};
use linkgate::handler::{HandlerSettings, RequestContext, RequestHandler};
use linkgate::identity::{IdentityVerifier, StaticResolver};
use linkgate::models::Site;
use linkgate::storage::{LinkStore, StoreSettings};

pub const GOOGLEBOT_UA: &str =
    "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";
pub const GOOGLE_IP: &str = "66.249.66.1";
pub const GOOGLE_HOST: &str = "crawl-66-249-66-1.googlebot.com";
pub const ROUTER_PATH: &str = "/router";

/// Resolver that verifies [`GOOGLE_IP`] as Googlebot
pub fn google_resolver() -> StaticResolver {
    let ip: IpAddr = GOOGLE_IP.parse().unwrap();
    StaticResolver::new().with_pair(ip, GOOGLE_HOST)
}

pub fn site() -> Site {
    Site::parse("example.com").unwrap()
}

/// Request from a verified Googlebot
pub fn googlebot_request() -> RequestContext {
    RequestContext::new(GOOGLEBOT_UA, GOOGLE_IP, "www.example.com")
        .with_https(true)
        .with_request_uri("/post")
}

pub fn router_url(server: &MockServer) -> String {
    format!("{}{ROUTER_PATH}", server.uri())
}

/// Coordinator answer carrying links with the given ids
pub fn queue_body(ids: &[u64]) -> Value {
    let items: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "id": id, "url": format!("https://l{id}.example/"), "anchor": format!("Link {id}") }))
        .collect();
    json!({ "status": true, "items": items })
}

pub fn ok_body() -> Value {
    json!({ "status": true })
}

pub fn failure_body(code: &str) -> Value {
    json!({ "status": false, "code": code })
}

/// Serve `ids` for every `getqueue` call
pub async fn mount_queue(server: &MockServer, ids: &[u64]) {
    Mock::given(method("POST"))
        .and(path(ROUTER_PATH))
        .and(query_param("act", "getqueue"))
        .respond_with(ResponseTemplate::new(200).set_body_json(queue_body(ids)))
        .mount(server)
        .await;
}

pub fn client(server: &MockServer) -> CoordinatorClient {
    CoordinatorClient::new(ClientConfig::new(router_url(server))).unwrap()
}

/// Handler wired to the mock coordinator and an in-memory resolver
pub fn handler(
    server: &MockServer,
    data_dir: &Path,
    settings: HandlerSettings,
    always_show_something: bool,
) -> (RequestHandler, Arc<LinkStore>) {
    let store = Arc::new(LinkStore::open(data_dir, StoreSettings::default()).unwrap());
    let client = Arc::new(client(server).with_ledger(store.clone()));
    let verifier = IdentityVerifier::new(Arc::new(google_resolver()));
    let allocator = Allocator::new(store.clone(), client.clone())
        .with_always_show_something(always_show_something);

    (
        RequestHandler::new(verifier, allocator, client, settings),
        store,
    )
}
