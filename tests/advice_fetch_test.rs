use career_compass::advice::{COULD_NOT_CONNECT_MESSAGE, TROUBLE_PROCESSING_MESSAGE};
use career_compass::{AdviceClient, AdviceError, AdvisorConfig};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GENERATE_PATH: &str = "/v1beta/models/gemini-test:generateContent";

fn client_for(server: &MockServer, api_key: Option<&str>) -> AdviceClient {
    AdviceClient::new(AdvisorConfig {
        api_url: format!("{}/v1beta", server.uri()),
        model: "gemini-test".to_string(),
        api_key: api_key.map(str::to_string),
        request_timeout: None,
    })
    .unwrap()
}

fn answers() -> Vec<String> {
    vec![
        "Job Risk".to_string(),
        "A few weeks".to_string(),
        "Yes, please".to_string(),
    ]
}

fn candidate(text: &str) -> serde_json::Value {
    json!({
        "candidates": [
            { "content": { "role": "model", "parts": [ { "text": text } ] } }
        ]
    })
}

#[test_log::test(tokio::test)]
async fn test_request_body_carries_joined_query() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(body_partial_json(json!({
            "contents": [ { "parts": [ { "text": "Job Risk, A few weeks, Yes, please" } ] } ],
            "tools": [ { "google_search": {} } ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let advice = client_for(&server, None).fetch_advice(&answers()).await.unwrap();
    assert_eq!(advice, "ok");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let instruction = body["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
    assert!(instruction.contains("1. Job Risk"));
    assert!(instruction.contains("3. Yes, please"));
}

#[test_log::test(tokio::test)]
async fn test_api_key_is_sent_as_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "secret-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate("keyed")))
        .expect(1)
        .mount(&server)
        .await;

    let advice = client_for(&server, Some("secret-key"))
        .fetch_advice(&answers())
        .await
        .unwrap();
    assert_eq!(advice, "keyed");
}

#[test_log::test(tokio::test)]
async fn test_success_text_is_returned_verbatim() {
    let server = MockServer::start().await;
    let text = "**Don't panic.**\n\n1. Learn one AI tool.\n2. Talk to your manager.\n";
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate(text)))
        .mount(&server)
        .await;

    let advice = client_for(&server, None).fetch_advice(&answers()).await.unwrap();
    assert_eq!(advice, text);
}

#[test_log::test(tokio::test)]
async fn test_server_error_maps_to_connect_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server, None)
        .fetch_advice(&answers())
        .await
        .unwrap_err();
    assert!(matches!(err, AdviceError::Status(500)));
    assert_eq!(err.fallback_message(), COULD_NOT_CONNECT_MESSAGE);
}

#[test_log::test(tokio::test)]
async fn test_empty_candidates_map_to_processing_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let err = client_for(&server, None)
        .fetch_advice(&answers())
        .await
        .unwrap_err();
    assert!(matches!(err, AdviceError::Malformed));
    assert_eq!(err.fallback_message(), TROUBLE_PROCESSING_MESSAGE);
}

#[test_log::test(tokio::test)]
async fn test_non_json_success_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server, None)
        .fetch_advice(&answers())
        .await
        .unwrap_err();
    assert!(matches!(err, AdviceError::Malformed));
}

#[test_log::test(tokio::test)]
async fn test_transport_failure_maps_to_connect_fallback() {
    // Nothing listens on port 9 of localhost.
    let client = AdviceClient::new(AdvisorConfig {
        api_url: "http://127.0.0.1:9/v1beta".to_string(),
        model: "gemini-test".to_string(),
        api_key: None,
        request_timeout: Some(Duration::from_secs(5)),
    })
    .unwrap();

    let err = client.fetch_advice(&answers()).await.unwrap_err();
    assert!(matches!(err, AdviceError::Transport(_)));
    assert_eq!(err.fallback_message(), COULD_NOT_CONNECT_MESSAGE);
}

#[test_log::test(tokio::test)]
async fn test_configured_timeout_is_enforced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(candidate("too late"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = AdviceClient::new(AdvisorConfig {
        api_url: format!("{}/v1beta", server.uri()),
        model: "gemini-test".to_string(),
        api_key: None,
        request_timeout: Some(Duration::from_millis(200)),
    })
    .unwrap();

    let err = client.fetch_advice(&answers()).await.unwrap_err();
    assert!(matches!(err, AdviceError::Transport(_)));
}

#[test_log::test(tokio::test)]
async fn test_exactly_one_request_per_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let _ = client_for(&server, None).fetch_advice(&answers()).await;
    // The expectation above is verified when the server drops.
}
