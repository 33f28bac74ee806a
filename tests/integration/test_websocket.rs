//! WebSocket event stream tests.
//!
//! Each test runs a real server, connects one or more clients to `/ws`, and
//! drives the HTTP API to check which events reach them.

mod common;

use std::time::Duration;

use common::{quiz_reply, spawn_server, TestServer};
use futures::{SinkExt, StreamExt};
use medprep_core::{LessonStore, ScriptedCompletion, ServiceError, StudyEvent};
use reqwest::Client;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the server's WebSocket endpoint and consumes the `connected`
/// greeting.
async fn connect_client(server: &TestServer) -> (WsClient, StudyEvent) {
    let (mut ws, _) = connect_async(server.ws_url())
        .await
        .expect("Failed to connect WebSocket");
    let greeting = receive_event(&mut ws).await;
    (ws, greeting)
}

/// Receives the next study event, answering pings along the way.
async fn receive_event(ws: &mut WsClient) -> StudyEvent {
    let timeout = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<StudyEvent>(&text)
                        .expect("Failed to parse event");
                }
                Some(Ok(Message::Ping(data))) => {
                    ws.send(Message::Pong(data)).await.expect("Failed to pong");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket closed unexpectedly"),
            }
        }
    });
    timeout.await.expect("Timeout waiting for event")
}

/// Skips events until one named `name` arrives.
async fn receive_named(ws: &mut WsClient, name: &str) -> StudyEvent {
    for _ in 0..20 {
        let event = receive_event(ws).await;
        if event.event_name() == name {
            return event;
        }
    }
    panic!("no {name} event received");
}

#[tokio::test]
async fn test_connected_event_carries_stats() {
    let mut lessons = LessonStore::with_default_catalog(4);
    lessons.set_progress("lesson-1", 100);
    let server = spawn_server("ws-connect", lessons, ScriptedCompletion::default(), |_| {}).await;

    let (_ws, greeting) = connect_client(&server).await;

    match greeting {
        StudyEvent::Connected(payload) => {
            assert_eq!(payload.stats.total, 4);
            assert_eq!(payload.stats.mastered, 1);
            assert_eq!(payload.stats.global_percentage, 25);
        }
        other => panic!("Expected connected, got {}", other.event_name()),
    }
}

#[tokio::test]
async fn test_progress_change_is_broadcast() {
    let server = spawn_server(
        "ws-progress",
        LessonStore::with_default_catalog(3),
        ScriptedCompletion::default(),
        |_| {},
    )
    .await;
    let (mut ws, _) = connect_client(&server).await;

    Client::new()
        .post(server.url("/api/lessons/lesson-2/progress"))
        .json(&json!({ "progress": 55 }))
        .send()
        .await
        .expect("POST failed");

    match receive_named(&mut ws, "lesson_updated").await {
        StudyEvent::LessonUpdated(payload) => {
            assert_eq!(payload.lesson.id, "lesson-2");
            assert_eq!(payload.lesson.progress, 55);
        }
        other => panic!("Expected lesson_updated, got {}", other.event_name()),
    }
}

#[tokio::test]
async fn test_tutor_reply_and_failure_events() {
    let service = ScriptedCompletion::from_results([
        Ok("Le souffle systolique est...".to_string()),
        Err(ServiceError::Timeout { timeout_secs: 30 }),
    ]);
    let server = spawn_server("ws-tutor", LessonStore::with_default_catalog(3), service, |_| {}).await;
    let (mut ws, _) = connect_client(&server).await;
    let client = Client::new();
    let url = server.url("/api/lessons/lesson-1/tutor");

    client
        .post(&url)
        .json(&json!({ "message": "Souffle ?" }))
        .send()
        .await
        .expect("POST failed");

    match receive_named(&mut ws, "tutor_reply").await {
        StudyEvent::TutorReply(payload) => {
            assert_eq!(payload.lesson_id, "lesson-1");
            assert_eq!(payload.turn.text, "Le souffle systolique est...");
        }
        other => panic!("Expected tutor_reply, got {}", other.event_name()),
    }

    client
        .post(&url)
        .json(&json!({ "message": "Et ensuite ?" }))
        .send()
        .await
        .expect("POST failed");

    match receive_named(&mut ws, "error").await {
        StudyEvent::Error(payload) => {
            assert_eq!(payload.lesson_id, "lesson-1");
            assert!(!payload.message.is_empty());
        }
        other => panic!("Expected error, got {}", other.event_name()),
    }
}

#[tokio::test]
async fn test_quiz_events_reach_every_client() {
    let replies: Vec<String> = (1..=3).map(|n| quiz_reply(n, 'C')).collect();
    let server = spawn_server(
        "ws-quiz",
        LessonStore::with_default_catalog(3),
        ScriptedCompletion::new(replies),
        |config| config.quiz.default_count = 3,
    )
    .await;
    let (mut first, _) = connect_client(&server).await;
    let (mut second, _) = connect_client(&server).await;
    let client = Client::new();
    let base = server.url("/api/lessons/lesson-3/quiz");

    client
        .post(&base)
        .json(&json!({}))
        .send()
        .await
        .expect("POST failed");

    for ws in [&mut first, &mut second] {
        match receive_named(ws, "quiz_question").await {
            StudyEvent::QuizQuestion(payload) => {
                assert_eq!(payload.index, 1);
                assert_eq!(payload.count, 3);
            }
            other => panic!("Expected quiz_question, got {}", other.event_name()),
        }
    }

    for _ in 0..3 {
        client
            .post(format!("{base}/answer"))
            .json(&json!({ "choice": "C" }))
            .send()
            .await
            .expect("POST failed");
        client
            .post(format!("{base}/next"))
            .send()
            .await
            .expect("POST failed");
    }

    for ws in [&mut first, &mut second] {
        match receive_named(ws, "quiz_finished").await {
            StudyEvent::QuizFinished(summary) => {
                assert_eq!(summary.lesson_id, "lesson-3");
                assert_eq!(summary.correct, 3);
                assert_eq!(summary.score_percent, 100);
            }
            other => panic!("Expected quiz_finished, got {}", other.event_name()),
        }
    }
}

#[tokio::test]
async fn test_viewer_progress_is_broadcast() {
    let server = spawn_server(
        "ws-viewer",
        LessonStore::with_default_catalog(2),
        ScriptedCompletion::default(),
        |_| {},
    )
    .await;
    let (mut ws, _) = connect_client(&server).await;
    let client = Client::new();

    client
        .put(server.url("/api/lessons/lesson-1/document/text"))
        .json(&json!({ "content": "Sémiologie cardiaque" }))
        .send()
        .await
        .expect("PUT failed");
    client
        .post(server.url("/api/lessons/lesson-1/viewer/open"))
        .send()
        .await
        .expect("POST failed");

    let mut last_status = None;
    for _ in 0..10 {
        if let StudyEvent::ViewerUpdated(payload) = receive_named(&mut ws, "viewer_updated").await {
            assert_eq!(payload.lesson_id, "lesson-1");
            last_status = Some(payload.status);
            if payload.status == medprep_document::ViewStatus::Ready {
                assert_eq!(payload.pages_rendered, 1);
                break;
            }
        }
    }
    assert_eq!(last_status, Some(medprep_document::ViewStatus::Ready));
}

#[tokio::test]
async fn test_client_disconnect_does_not_affect_others() {
    let server = spawn_server(
        "ws-disconnect",
        LessonStore::with_default_catalog(2),
        ScriptedCompletion::default(),
        |_| {},
    )
    .await;
    let (mut leaving, _) = connect_client(&server).await;
    let (mut staying, _) = connect_client(&server).await;

    leaving.close(None).await.expect("Failed to close");
    tokio::time::sleep(Duration::from_millis(50)).await;

    Client::new()
        .post(server.url("/api/lessons/lesson-1/reset"))
        .send()
        .await
        .expect("POST failed");

    assert_eq!(
        receive_named(&mut staying, "lesson_updated").await.event_name(),
        "lesson_updated"
    );
}

#[tokio::test]
async fn test_lesson_scoped_stream_skips_other_lessons() {
    let service = ScriptedCompletion::new(["Réponse néphro", "Réponse cardio"]);
    let server = spawn_server("ws-scoped", LessonStore::with_default_catalog(3), service, |_| {}).await;
    let (mut scoped, _) = connect_async(format!("{}?lesson=lesson-1", server.ws_url()))
        .await
        .expect("Failed to connect WebSocket");
    receive_named(&mut scoped, "connected").await;
    let (mut everything, _) = connect_client(&server).await;
    let client = Client::new();

    for lesson in ["lesson-2", "lesson-1"] {
        let response = client
            .post(server.url(&format!("/api/lessons/{lesson}/tutor")))
            .json(&json!({ "message": "Question ?" }))
            .send()
            .await
            .expect("POST failed");
        assert!(response.status().is_success());
    }

    match receive_named(&mut scoped, "tutor_reply").await {
        StudyEvent::TutorReply(payload) => {
            assert_eq!(payload.lesson_id, "lesson-1");
            assert_eq!(payload.turn.text, "Réponse cardio");
        }
        other => panic!("Expected tutor_reply, got {}", other.event_name()),
    }

    let first = receive_named(&mut everything, "tutor_reply").await;
    assert_eq!(first.lesson_id(), Some("lesson-2"));
    let second = receive_named(&mut everything, "tutor_reply").await;
    assert_eq!(second.lesson_id(), Some("lesson-1"));
}

#[tokio::test]
async fn test_stream_for_unknown_lesson_is_refused() {
    let server = spawn_server(
        "ws-unknown",
        LessonStore::with_default_catalog(2),
        ScriptedCompletion::default(),
        |_| {},
    )
    .await;

    let result = connect_async(format!("{}?lesson=lesson-99", server.ws_url())).await;
    match result {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("Expected HTTP refusal, got {other}"),
        Ok(_) => panic!("Stream for unknown lesson was accepted"),
    }
}
