use std::time::Duration;

use narrator_engine::{
    FailureKind, OpenAiSpeech, ProviderFault, SpeechRequest, SpeechSettings, SpeechSynthesizer,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> OpenAiSpeech {
    OpenAiSpeech::new(SpeechSettings {
        base_url: server.uri(),
        ..SpeechSettings::default()
    })
    .unwrap()
}

fn request() -> SpeechRequest {
    SpeechRequest {
        api_key: "test-key".to_string(),
        model: "tts-1".to_string(),
        voice: "alloy".to_string(),
        text: "Hello there.".to_string(),
    }
}

#[tokio::test]
async fn posts_the_expected_request_and_returns_audio() {
    let server = MockServer::start().await;
    let samples: Vec<u8> = (0u8..200).collect();
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_json(json!({
            "model": "tts-1",
            "input": "Hello there.",
            "voice": "alloy",
            "response_format": "pcm",
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(samples.clone(), "application/octet-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let audio = client_for(&server).synthesize(&request()).await.unwrap();
    assert_eq!(audio.as_ref(), samples.as_slice());
}

#[tokio::test]
async fn maps_provider_statuses_to_faults() {
    let cases = [
        (401, ProviderFault::Auth),
        (403, ProviderFault::Auth),
        (429, ProviderFault::RateLimited),
        (400, ProviderFault::BadRequest),
        (500, ProviderFault::Server),
        (503, ProviderFault::Server),
    ];
    for (status, fault) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(status).set_body_string("{\"error\":\"boom\"}"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .synthesize(&request())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Provider(fault), "status {status}");
    }
}

#[tokio::test]
async fn empty_success_body_is_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .synthesize(&request())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Provider(ProviderFault::Server));
}

#[tokio::test]
async fn oversized_audio_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 64], "application/octet-stream"))
        .mount(&server)
        .await;

    let client = OpenAiSpeech::new(SpeechSettings {
        base_url: server.uri(),
        max_audio_bytes: 16,
        ..SpeechSettings::default()
    })
    .unwrap();

    let err = client.synthesize(&request()).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Provider(ProviderFault::Server));
}

#[tokio::test]
async fn unreachable_provider_is_a_network_error() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let client = OpenAiSpeech::new(SpeechSettings {
        base_url: uri,
        connect_timeout: Duration::from_millis(200),
        request_timeout: Duration::from_millis(500),
        ..SpeechSettings::default()
    })
    .unwrap();

    let err = client.synthesize(&request()).await.unwrap_err();
    assert!(
        matches!(err.kind, FailureKind::Network | FailureKind::Timeout),
        "got {:?}",
        err.kind
    );
}
