//! HTTP adapter tests against a local mockito server.

use ai_lib_fanout::backend::HttpBackend;
use ai_lib_fanout::resilience::RetryPolicy;
use ai_lib_fanout::types::BackendFormat;
use ai_lib_fanout::{
    Backend, BackendConfig, ErrorCode, Orchestrator, OrchestratorOptions, Request,
};
use std::sync::Arc;
use std::time::Duration;

fn chat_config(name: &str, server: &mockito::ServerGuard) -> BackendConfig {
    BackendConfig::new(name)
        .with_endpoint(format!("{}/v1/chat/completions", server.url()))
        .with_model("gpt-x")
}

fn quick_options(retries: u32) -> OrchestratorOptions {
    OrchestratorOptions::default()
        .with_retries(retries)
        .with_timeout(Duration::from_secs(5))
        .with_backoff(
            RetryPolicy::new()
                .with_base_delay(Duration::from_millis(5))
                .with_max_delay(Duration::from_millis(20))
                .with_jitter(Duration::ZERO),
        )
}

#[tokio::test]
async fn test_chat_success_reads_text_usage_and_model() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "model": "gpt-x",
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"model":"gpt-x-0613","choices":[{"message":{"content":"hi there"}}],
               "usage":{"prompt_tokens":3,"completion_tokens":2}}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let backend = HttpBackend::new(chat_config("cloud", &server)).unwrap();
    let resp = backend.execute(&Request::new("Hello")).await.unwrap();
    assert_eq!(resp.text, "hi there");
    assert_eq!(resp.model.as_deref(), Some("gpt-x-0613"));
    assert_eq!(resp.usage.map(|u| u.total_tokens), Some(5));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_completion_format_reads_response_field() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/generate")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "prompt": "Why is the sky blue?",
            "stream": false
        })))
        .with_status(200)
        .with_body(r#"{"response":"Rayleigh scattering","done":true}"#)
        .create_async()
        .await;

    let cfg = BackendConfig::new("local")
        .with_endpoint(format!("{}/api/generate", server.url()))
        .with_format(BackendFormat::Completion);
    let backend = HttpBackend::new(cfg).unwrap();
    let resp = backend
        .execute(&Request::new("Why is the sky blue?"))
        .await
        .unwrap();
    assert_eq!(resp.text, "Rayleigh scattering");
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(429)
        .with_header("retry-after", "2")
        .with_body(r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#)
        .create_async()
        .await;

    let backend = HttpBackend::new(chat_config("cloud", &server)).unwrap();
    let err = backend.execute(&Request::new("Hello")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RateLimited);
    assert_eq!(err.retry_after_ms(), Some(2_000));
    assert!(err.is_retryable());
    assert!(err.to_string().contains("HTTP 429"));
}

#[tokio::test]
async fn test_orchestrator_retries_transient_http_failures() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(503)
        .with_body("upstream overloaded")
        .expect(2)
        .create_async()
        .await;

    let orchestrator = Orchestrator::new(quick_options(1)).unwrap();
    let backends: Vec<Arc<dyn Backend>> =
        vec![Arc::new(HttpBackend::new(chat_config("cloud", &server)).unwrap())];
    let agg = orchestrator
        .run(&Request::new("Hello"), &backends)
        .await
        .unwrap();

    let slot = agg.get("cloud", 0).unwrap();
    assert!(!slot.success);
    assert_eq!(slot.attempts, 2);
    assert_eq!(slot.error_code(), Some(ErrorCode::Overloaded));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_orchestrator_does_not_retry_auth_failures() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(401)
        .with_body(r#"{"error":{"code":"invalid_api_key","message":"bad key"}}"#)
        .expect(1)
        .create_async()
        .await;

    let orchestrator = Orchestrator::new(quick_options(3)).unwrap();
    let agg = orchestrator
        .run_configs(&Request::new("Hello"), vec![chat_config("cloud", &server)])
        .await
        .unwrap();

    let slot = agg.get("cloud", 0).unwrap();
    assert_eq!(slot.attempts, 1);
    assert_eq!(slot.error_code(), Some(ErrorCode::Authentication));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_mixed_http_fleet_aggregates_in_config_order() {
    let mut server = mockito::Server::new_async().await;
    let _ok = server
        .mock("POST", "/good")
        .with_status(200)
        .with_body(r#"{"choices":[{"message":{"content":"fine"}}]}"#)
        .create_async()
        .await;
    let _bad = server
        .mock("POST", "/bad")
        .with_status(400)
        .with_body(r#"{"error":{"message":"nope"}}"#)
        .create_async()
        .await;

    let configs = vec![
        BackendConfig::new("bad").with_endpoint(format!("{}/bad", server.url())),
        BackendConfig::new("good").with_endpoint(format!("{}/good", server.url())),
    ];
    let orchestrator = Orchestrator::new(quick_options(1)).unwrap();
    let agg = orchestrator
        .run_configs(&Request::new("Hello"), configs)
        .await
        .unwrap();

    let names: Vec<&str> = agg.results().iter().map(|r| r.backend.as_str()).collect();
    assert_eq!(names, vec!["bad", "good"]);
    assert_eq!(agg.succeeded(), 1);
    assert_eq!(agg.failed(), 1);
    assert_eq!(agg.get("good", 0).unwrap().text(), Some("fine"));
    assert_eq!(
        agg.get("bad", 0).unwrap().error_code(),
        Some(ErrorCode::InvalidRequest)
    );
}

#[tokio::test]
async fn test_reachability_probe() {
    let server = mockito::Server::new_async().await;
    // no mock registered: mockito answers 501, which still proves the host is up
    let up = HttpBackend::new(chat_config("up", &server)).unwrap();
    assert!(up.is_available().await);

    let down = HttpBackend::new(
        BackendConfig::new("down").with_endpoint("http://127.0.0.1:9/v1/chat/completions"),
    )
    .unwrap();
    assert!(!down.is_available().await);
}
