//! Classifier behavior against a mocked chat-completion upstream.
//!
//! Covers the closed intent set, the result cache, the retry policy, and
//! the keyword-heuristic fallback when the upstream degrades.

use serde_json::json;
use walkie_types::Intent;
use walkie_voice::{ClassifierConfig, IntentAnalyzer, IntentClassifier, VoiceError};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn classifier_for(server: &MockServer) -> IntentClassifier {
    IntentClassifier::new(ClassifierConfig::new(server.uri(), "test-model", ""))
        .expect("classifier should build")
}

fn chat_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    })
}

fn channels() -> Vec<String> {
    vec!["canal-1".to_string(), "canal-2".to_string()]
}

#[tokio::test]
async fn classifies_a_connect_command() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "test-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
            r#"{"is_command": true, "intent": "request_channel_connect", "reply": "", "channels": ["canal-2"], "state": "sin_canal"}"#,
        )))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let result = classifier
        .analyze("conéctame al canal 2", &channels(), "sin_canal", "")
        .await
        .expect("analysis should succeed");

    assert!(result.is_command);
    assert_eq!(result.intent, Intent::RequestChannelConnect);
    assert_eq!(result.channels, vec!["canal-2"]);
}

#[tokio::test]
async fn second_identical_request_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
            r#"{"is_command": true, "intent": "request_channel_list", "reply": "", "state": "sin_canal"}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let first = classifier
        .analyze("dame la lista de canales", &channels(), "sin_canal", "")
        .await
        .expect("first call should succeed");
    let second = classifier
        .analyze("dame la lista de canales", &channels(), "sin_canal", "")
        .await
        .expect("second call should hit the cache");

    assert_eq!(first, second);
    // The mock's expect(1) verifies the upstream saw exactly one request.
}

#[tokio::test]
async fn different_state_misses_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
            r#"{"is_command": false, "intent": "conversation", "reply": "hola", "state": ""}"#,
        )))
        .expect(2)
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    classifier
        .analyze("hola equipo", &channels(), "sin_canal", "")
        .await
        .expect("first call");
    classifier
        .analyze("hola equipo", &channels(), "canal-1", "")
        .await
        .expect("second call with different state");
}

#[tokio::test]
async fn fenced_model_output_is_accepted() {
    let server = MockServer::start().await;
    let fenced = "```json\n{\"is_command\": true, \"intent\": \"request_channel_disconnect\", \"reply\": \"\", \"state\": \"canal-1\"}\n```";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(fenced)))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let result = classifier
        .analyze("salir del canal ahora mismo", &channels(), "canal-1", "")
        .await
        .expect("analysis should succeed");
    assert_eq!(result.intent, Intent::RequestChannelDisconnect);
}

#[tokio::test]
async fn intent_outside_the_closed_set_becomes_conversation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
            r#"{"is_command": true, "intent": "request_current_channel", "reply": "", "state": "canal-1"}"#,
        )))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let result = classifier
        .analyze("en qué canal estoy", &channels(), "canal-1", "")
        .await
        .expect("analysis should succeed");
    assert_eq!(result.intent, Intent::Conversation);
    assert!(!result.is_command);
}

#[tokio::test]
async fn upstream_conversation_is_overridden_by_heuristic_command() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
            r#"{"is_command": false, "intent": "conversation", "reply": "conéctame al canal 2", "state": "sin_canal"}"#,
        )))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let result = classifier
        .analyze("conéctame al canal 2", &channels(), "sin_canal", "")
        .await
        .expect("analysis should succeed");

    assert!(result.is_command);
    assert_eq!(result.intent, Intent::RequestChannelConnect);
    assert_eq!(result.channels, vec!["canal-2"]);
}

#[tokio::test]
async fn failing_upstream_retries_then_uses_heuristic() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let result = classifier
        .analyze("desconéctame del canal", &channels(), "canal-1", "")
        .await
        .expect("heuristic should rescue the classification");

    assert!(result.is_command);
    assert_eq!(result.intent, Intent::RequestChannelDisconnect);
}

#[tokio::test]
async fn failing_upstream_with_negative_heuristic_surfaces_the_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let err = classifier
        .analyze("hola equipo", &channels(), "canal-1", "")
        .await
        .expect_err("no heuristic match, the upstream error propagates");
    assert!(matches!(err, VoiceError::Classifier(_)));
}

#[tokio::test]
async fn heuristic_rescue_is_cached_for_the_next_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let first = classifier
        .analyze("salir del canal", &channels(), "canal-1", "")
        .await
        .expect("heuristic rescue");
    let second = classifier
        .analyze("salir del canal", &channels(), "canal-1", "")
        .await
        .expect("cache hit, no further upstream traffic");
    assert_eq!(first, second);
}

#[tokio::test]
async fn empty_transcript_is_rejected_without_calling_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("{}")))
        .expect(0)
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let err = classifier
        .analyze("   ", &channels(), "sin_canal", "")
        .await
        .expect_err("blank transcripts never reach the model");
    assert!(matches!(err, VoiceError::EmptyTranscript));
}

#[tokio::test]
async fn empty_choices_are_an_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let err = classifier
        .analyze("buenas tardes a todos", &channels(), "sin_canal", "")
        .await
        .expect_err("empty responses cannot classify");
    assert!(matches!(err, VoiceError::EmptyResponse));
}
