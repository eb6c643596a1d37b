//! End-to-end reconciliation through the public API.
//!
//! Feeds are served by a local HTTP mock, the device is a mocked RouterOS
//! REST API and the routing registry is an in-memory fake.

use addrsync::alerts::{AlertLevel, Notice, NotificationSink};
use addrsync::config::{ApiConfig, FetchConfig, SecureString};
use addrsync::device::{AddressListDevice, ApiDevice};
use addrsync::feeds::Asn;
use addrsync::fetcher::HttpFetcher;
use addrsync::reconciler::{Reconciler, RunOutcome, SyncJob};
use addrsync::registry::{LookupError, OriginRegistry, RouteObject};
use addrsync::SyncError;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Registry answering from a fixed table
struct StaticRegistry {
    routes: Vec<(u64, RouteObject)>,
}

#[async_trait]
impl OriginRegistry for StaticRegistry {
    async fn origin_routes(&self, asn: Asn) -> Result<Vec<RouteObject>, LookupError> {
        let routes: Vec<RouteObject> = self
            .routes
            .iter()
            .filter(|(n, _)| *n == asn.number())
            .map(|(_, r)| r.clone())
            .collect();
        if routes.is_empty() {
            return Err(LookupError::UnknownAsn(asn));
        }
        Ok(routes)
    }
}

#[derive(Default)]
struct RecordingSink {
    notices: Mutex<Vec<Notice>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

fn registry() -> StaticRegistry {
    StaticRegistry {
        routes: vec![
            (13335, RouteObject::new("1.1.1.0/24", "Cloudflare")),
            (13335, RouteObject::new("104.16.0.0/13", "Proxy-registered route object")),
        ],
    }
}

fn reconciler() -> Reconciler {
    let fetcher = HttpFetcher::new(&FetchConfig {
        timeout_secs: 5,
        max_retries: 1,
        max_body_bytes: 1024 * 1024,
    })
    .unwrap();
    Reconciler::new(Box::new(fetcher), Box::new(registry()))
}

async fn api_device(server: &MockServer) -> ApiDevice {
    Mock::given(method("GET"))
        .and(path("/rest/system/identity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "R1"})))
        .mount(server)
        .await;
    let config = ApiConfig {
        url: Some(server.uri()),
        username: "sync".to_string(),
        password: SecureString::from("s3cret"),
        timeout_secs: 5,
        ..ApiConfig::default()
    };
    ApiDevice::connect("ignored", &config).await.unwrap()
}

#[tokio::test]
async fn test_full_run_against_rest_device() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feeds/level1.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("# level1\n8.8.8.0/25\n8.8.8.128/25\n10.1.1.1\n"),
        )
        .mount(&server)
        .await;

    let device = api_device(&server).await;

    // Id lookup for the removal; mounted first so it wins over the listing
    Mock::given(method("GET"))
        .and(path("/rest/ip/firewall/address-list"))
        .and(query_param("address", "8.8.8.8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {".id": "*1", "list": "blocklist", "address": "8.8.8.8", "comment": "feed"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/ip/firewall/address-list"))
        .and(query_param("list", "blocklist"))
        .and(query_param("comment", "feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {".id": "*1", "list": "blocklist", "address": "8.8.8.8", "comment": "feed"},
            {".id": "*2", "list": "blocklist", "address": "1.1.1.0/24", "comment": "feed"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/ip/firewall/address-list/*1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/rest/ip/firewall/address-list"))
        .and(body_json(json!({"list": "blocklist", "address": "8.8.8.0/24", "comment": "feed"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({".id": "*3"})))
        .expect(1)
        .mount(&server)
        .await;

    let job = SyncJob::new(
        "blocklist",
        "feed",
        format!("{}/feeds/level1.txt,AS13335", server.uri()),
    );
    let sink = RecordingSink::default();
    let outcome = reconciler().run(&device, &job, false, &sink).await.unwrap();

    let RunOutcome::Applied(report) = outcome else {
        panic!("expected changes to be applied");
    };
    let added: Vec<String> = report.added.iter().map(|e| e.to_string()).collect();
    let removed: Vec<String> = report.removed.iter().map(|e| e.to_string()).collect();
    assert_eq!(added, vec!["8.8.8.0/24"]);
    assert_eq!(removed, vec!["8.8.8.8"]);
    assert!(report.failed.is_empty());

    let notices = sink.notices.lock().unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, AlertLevel::Info);
    device.close().await.unwrap();
}

#[tokio::test]
async fn test_unroutable_feed_aborts_without_reading_device() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feeds/private.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("10.0.0.0/8\n192.168.1.1\n"))
        .mount(&server)
        .await;
    let device = api_device(&server).await;
    Mock::given(path("/rest/ip/firewall/address-list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let job = SyncJob::new("blocklist", "feed", format!("{}/feeds/private.txt", server.uri()));
    let sink = RecordingSink::default();
    let result = reconciler().run(&device, &job, false, &sink).await;

    assert!(matches!(result, Err(SyncError::Fetch(_))));
    let notices = sink.notices.lock().unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, AlertLevel::Error);
    assert!(notices[0].title.starts_with("Feed Fetch Failed"));
}

#[tokio::test]
async fn test_unknown_asn_aborts() {
    let server = MockServer::start().await;
    let device = api_device(&server).await;
    Mock::given(path("/rest/ip/firewall/address-list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let job = SyncJob::new("blocklist", "feed", "AS64512");
    let result = reconciler()
        .run(&device, &job, false, &RecordingSink::default())
        .await;
    assert!(matches!(
        result,
        Err(SyncError::Lookup(LookupError::UnknownAsn(_)))
    ));
}

#[tokio::test]
async fn test_dry_run_reads_but_never_writes() {
    let server = MockServer::start().await;
    let device = api_device(&server).await;
    Mock::given(method("GET"))
        .and(path("/rest/ip/firewall/address-list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {".id": "*7", "list": "blocklist", "address": "4.4.4.4", "comment": "feed"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let job = SyncJob::new("blocklist", "feed", "AS13335");
    let outcome = reconciler()
        .run(&device, &job, true, &RecordingSink::default())
        .await
        .unwrap();

    let RunOutcome::Planned(delta) = outcome else {
        panic!("expected a planned delta");
    };
    assert_eq!(delta.to_add.len(), 1);
    assert_eq!(delta.to_remove.len(), 1);
}
