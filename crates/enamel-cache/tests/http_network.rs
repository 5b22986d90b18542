//! Engine over a real HTTP network

use enamel_cache::{BucketKind, CachePolicyEngine, CacheStorage, EngineConfig, Request};
use reqwest::StatusCode;
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_http_cache_first_and_errors() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("enamel_cache=debug")
        .with_test_writer()
        .try_init();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/css/site.css"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/css")
                .set_body_string("body{margin:0}"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/services"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let origin = format!("{}/", server.uri());
    let config = EngineConfig::default().with_origin(origin.clone());
    let engine =
        CachePolicyEngine::with_http(config, Arc::new(CacheStorage::in_memory())).unwrap();
    engine.activate().await;

    let base = Url::parse(&origin).unwrap();
    let css = Request::get(base.join("/css/site.css").unwrap());
    for _ in 0..2 {
        let response = engine.handle_fetch(&css).await.into_response().unwrap();
        assert_eq!(response.text(), "body{margin:0}");
        assert_eq!(response.headers["content-type"], "text/css");
    }

    let api = Request::get(base.join("/api/services").unwrap());
    let response = engine.handle_fetch(&api).await.into_response().unwrap();
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(engine.bucket_store(BucketKind::Api).is_empty().await);

    let stats = engine.stats();
    assert_eq!(stats.network_fetches, 2);
    assert_eq!(stats.network_failures, 0);
    assert_eq!(stats.cache_hits, 1);
}

#[tokio::test]
async fn test_http_unreachable_falls_back_offline() {
    let server = MockServer::start().await;
    let origin = format!("{}/", server.uri());
    drop(server);

    let config = EngineConfig::default().with_origin(origin.clone());
    let engine =
        CachePolicyEngine::with_http(config, Arc::new(CacheStorage::in_memory())).unwrap();
    engine.activate().await;

    let request = Request::navigate(Url::parse(&origin).unwrap().join("/en/").unwrap());
    let response = engine.handle_fetch(&request).await.into_response().unwrap();
    assert!(response.text().contains(enamel_cache::OFFLINE_HEADING));
    assert_eq!(engine.stats().network_failures, 1);
}
