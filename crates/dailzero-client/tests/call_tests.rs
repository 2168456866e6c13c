//! Integration tests for the call engine
//!
//! These run fully offline: network-facing paths talk to canned one-shot
//! TCP responders and no audio hardware is required.
//!
//! Run with: cargo test -p dailzero-client --test call_tests

use dailzero_client::call::{
    CallConfig, CallEvent, CallManager, CallOptions, CallSession, EventReducer,
};
use dailzero_client::error::CallError;
use dailzero_client::network::BackendClient;
use dailzero_protocol::{CallState, Role};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_test::{assert_err, assert_ok};

/// Serve exactly one canned HTTP response on a random local port
async fn one_shot_http(status: &'static str, body: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn end_call_is_a_no_op_without_a_call() {
    let (manager, mut events) = CallManager::new(CallConfig::default());

    manager.end_call().await;
    manager.end_call().await;
    manager.end_call().await;

    assert_eq!(manager.state(), CallState::Idle);
    assert!(!manager.is_recording());
    assert_eq!(manager.input_level(), 0.0);
    assert!(manager.conversation().is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn provider_frames_fold_into_an_ordered_conversation() {
    let mut reducer = EventReducer::new();
    let mut session = CallSession::new();
    session.begin();

    // Raw frames as the provider sends them, extra fields included
    let frames = [
        r#"{"type":"input_audio_buffer.speech_started","event_id":"evt_1"}"#,
        r#"{"type":"input_audio_buffer.speech_stopped","event_id":"evt_2"}"#,
        r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"What are your hours?","item_id":"item_1"}"#,
        r#"{"type":"response.audio_transcript.delta","delta":"We're open ","response_id":"resp_1"}"#,
        r#"{"type":"output_audio_buffer.started","response_id":"resp_1"}"#,
        r#"{"type":"response.audio_transcript.delta","delta":"9 to 5, ","response_id":"resp_1"}"#,
        r#"{"type":"response.audio_transcript.delta","delta":"Monday through Friday.","response_id":"resp_1"}"#,
        r#"{"type":"response.audio_transcript.done","transcript":"We're open 9 to 5, Monday through Friday.","response_id":"resp_1"}"#,
        r#"{"type":"output_audio_buffer.stopped","response_id":"resp_1"}"#,
        r#"{"type":"response.done","response":{"id":"resp_1","status":"completed"}}"#,
    ];

    let mut events = Vec::new();
    for frame in frames {
        for effect in reducer.apply(frame) {
            if let Some(event) = session.apply(effect) {
                events.push(event);
            }
        }
    }

    let transcript = session.live();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[0].text, "What are your hours?");
    assert_eq!(transcript[1].role, Role::Ai);
    assert_eq!(transcript[1].text, "We're open 9 to 5, Monday through Friday.");
    assert_eq!(session.state(), CallState::Listening);

    let states: Vec<CallState> = events
        .iter()
        .filter_map(|event| match event {
            CallEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            CallState::Listening,
            CallState::Processing,
            CallState::Speaking,
            CallState::Listening,
        ]
    );

    let conversation = session.finish();
    assert_eq!(conversation.len(), 2);
    assert_eq!(session.state(), CallState::Idle);
}

#[tokio::test]
async fn backend_rejection_surfaces_status_and_details() {
    let base = one_shot_http("500 Internal Server Error", r#"{"details":"quota exceeded"}"#).await;
    let backend = BackendClient::new(base);

    let err = assert_err!(backend.fetch_token("gpt-4o-realtime-preview", None).await);
    match err {
        CallError::Credential { status, details } => {
            assert_eq!(status, 500);
            assert!(details.contains("quota exceeded"), "details: {}", details);
        }
        other => panic!("expected credential error, got {:?}", other),
    }
}

#[tokio::test]
async fn token_response_parses_greeting_and_applied_config() {
    let base = one_shot_http(
        "200 OK",
        r#"{"token":"ek_test_123","firstMessage":"Hi, thanks for calling!","usedConfig":true,"applied":{"voice":"marin","transcriptionModel":"whisper-1"}}"#,
    )
    .await;
    let backend = BackendClient::new(base);

    let response = assert_ok!(backend.fetch_token("gpt-4o-realtime-preview", Some("biz_1")).await);
    assert_eq!(response.token, "ek_test_123");
    assert_eq!(
        response.first_message.as_deref(),
        Some("Hi, thanks for calling!")
    );
    assert_eq!(response.used_config, Some(true));
    let applied = response.applied.expect("applied config");
    assert_eq!(applied.voice.as_deref(), Some("marin"));
    assert_eq!(applied.transcription_model.as_deref(), Some("whisper-1"));
}

#[tokio::test]
async fn blank_token_is_rejected() {
    let base = one_shot_http("200 OK", r#"{"token":""}"#).await;
    let backend = BackendClient::new(base);

    let err = assert_err!(backend.fetch_token("gpt-4o-realtime-preview", None).await);
    assert!(matches!(err, CallError::MissingCredential), "got {:?}", err);
}

#[tokio::test]
async fn start_call_with_unknown_device_fails_into_error_state() {
    let config = CallConfig {
        input_device: Some("no-such-device".to_string()),
        ..CallConfig::default()
    };
    let (manager, mut events) = CallManager::new(config);

    let err = assert_err!(manager.start_call(CallOptions::default()).await);
    assert!(matches!(err, CallError::Device(_)), "got {:?}", err);
    assert_eq!(manager.state(), CallState::Error);
    assert!(
        manager
            .logs()
            .iter()
            .any(|log| log.message.starts_with("Call failed"))
    );

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CallEvent::StateChanged(state) = event {
            seen.push(state);
        }
    }
    assert_eq!(seen.first(), Some(&CallState::Connecting));
    assert_eq!(seen.last(), Some(&CallState::Error));

    // Cleanup after a failed start is the caller's call
    manager.end_call().await;
    assert_eq!(manager.state(), CallState::Idle);
    assert!(!manager.is_recording());
    assert_eq!(manager.input_level(), 0.0);
}
