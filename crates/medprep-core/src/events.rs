//! Study events pushed to WebSocket clients.
//!
//! Every state change the API makes is mirrored as a [`StudyEvent`] so a
//! browser client can follow along without polling. Events are JSON objects
//! with `event` and `payload` fields.
//!
//! # Example
//!
//! ```no_run
//! use medprep_core::events::{EventBroadcaster, StudyEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(StudyEvent::error("lesson-1", "Service indisponible"));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {}", event.event_name());
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use medprep_document::{DocumentView, ViewStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::{AppState, ErrorResponse};
use crate::lesson::{Lesson, LessonStats};
use crate::parser::DiagnosisVerdict;
use crate::session::{ChatTurn, QuizSummary};

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// Catalog statistics at connection time.
    pub stats: LessonStats,
}

/// Payload for the `lesson_updated` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonUpdatedPayload {
    /// The lesson after the change.
    pub lesson: Lesson,
}

/// Payload for the `viewer_updated` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerUpdatedPayload {
    /// Lesson whose viewer changed.
    pub lesson_id: String,
    /// Viewer status.
    pub status: ViewStatus,
    /// Load progress, when known.
    pub progress: Option<f64>,
    /// Pages rendered so far.
    pub pages_rendered: u32,
    /// Total pages, once known.
    pub total_pages: Option<u32>,
    /// Display scale.
    pub display_scale: f64,
}

/// Payload for the `tutor_reply` and `patient_reply` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    /// Lesson the conversation belongs to.
    pub lesson_id: String,
    /// The turn that was appended.
    pub turn: ChatTurn,
}

/// Payload for the `quiz_question` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestionPayload {
    /// Lesson the quiz is about.
    pub lesson_id: String,
    /// 1-based question number.
    pub index: u32,
    /// Planned number of questions.
    pub count: u32,
}

/// Payload for the `diagnosis_evaluated` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisPayload {
    /// Lesson the case belongs to.
    pub lesson_id: String,
    /// The verdict.
    pub verdict: DiagnosisVerdict,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Lesson the failure is scoped to.
    pub lesson_id: String,
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events broadcast to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum StudyEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// A lesson's progress or document changed.
    LessonUpdated(LessonUpdatedPayload),
    /// A document viewer moved on.
    ViewerUpdated(ViewerUpdatedPayload),
    /// The tutor answered.
    TutorReply(ReplyPayload),
    /// A quiz question is ready.
    QuizQuestion(QuizQuestionPayload),
    /// A quiz ended.
    QuizFinished(QuizSummary),
    /// The simulated patient answered.
    PatientReply(ReplyPayload),
    /// A diagnosis was evaluated.
    DiagnosisEvaluated(DiagnosisPayload),
    /// An exchange failed.
    Error(ErrorPayload),
}

impl StudyEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(stats: LessonStats) -> Self {
        Self::Connected(ConnectedPayload { stats })
    }

    /// Creates a `LessonUpdated` event.
    #[must_use]
    pub const fn lesson_updated(lesson: Lesson) -> Self {
        Self::LessonUpdated(LessonUpdatedPayload { lesson })
    }

    /// Creates a `ViewerUpdated` event from a view.
    #[must_use]
    pub fn viewer_updated(lesson_id: impl Into<String>, view: &DocumentView) -> Self {
        Self::ViewerUpdated(ViewerUpdatedPayload {
            lesson_id: lesson_id.into(),
            status: view.status,
            progress: view.progress,
            pages_rendered: view.pages_rendered,
            total_pages: view.total_pages,
            display_scale: view.display_scale,
        })
    }

    /// Creates a `TutorReply` event.
    #[must_use]
    pub fn tutor_reply(lesson_id: impl Into<String>, turn: ChatTurn) -> Self {
        Self::TutorReply(ReplyPayload {
            lesson_id: lesson_id.into(),
            turn,
        })
    }

    /// Creates a `QuizQuestion` event.
    #[must_use]
    pub fn quiz_question(lesson_id: impl Into<String>, index: u32, count: u32) -> Self {
        Self::QuizQuestion(QuizQuestionPayload {
            lesson_id: lesson_id.into(),
            index,
            count,
        })
    }

    /// Creates a `QuizFinished` event.
    #[must_use]
    pub const fn quiz_finished(summary: QuizSummary) -> Self {
        Self::QuizFinished(summary)
    }

    /// Creates a `PatientReply` event.
    #[must_use]
    pub fn patient_reply(lesson_id: impl Into<String>, turn: ChatTurn) -> Self {
        Self::PatientReply(ReplyPayload {
            lesson_id: lesson_id.into(),
            turn,
        })
    }

    /// Creates a `DiagnosisEvaluated` event.
    #[must_use]
    pub fn diagnosis_evaluated(lesson_id: impl Into<String>, verdict: DiagnosisVerdict) -> Self {
        Self::DiagnosisEvaluated(DiagnosisPayload {
            lesson_id: lesson_id.into(),
            verdict,
        })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(lesson_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            lesson_id: lesson_id.into(),
            message: message.into(),
        })
    }

    /// Lesson the event concerns. `connected` concerns none.
    #[must_use]
    pub fn lesson_id(&self) -> Option<&str> {
        match self {
            Self::Connected(_) => None,
            Self::LessonUpdated(p) => Some(p.lesson.id.as_str()),
            Self::ViewerUpdated(p) => Some(p.lesson_id.as_str()),
            Self::TutorReply(p) | Self::PatientReply(p) => Some(p.lesson_id.as_str()),
            Self::QuizQuestion(p) => Some(p.lesson_id.as_str()),
            Self::QuizFinished(summary) => Some(summary.lesson_id.as_str()),
            Self::DiagnosisEvaluated(p) => Some(p.lesson_id.as_str()),
            Self::Error(p) => Some(p.lesson_id.as_str()),
        }
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::LessonUpdated(_) => "lesson_updated",
            Self::ViewerUpdated(_) => "viewer_updated",
            Self::TutorReply(_) => "tutor_reply",
            Self::QuizQuestion(_) => "quiz_question",
            Self::QuizFinished(_) => "quiz_finished",
            Self::PatientReply(_) => "patient_reply",
            Self::DiagnosisEvaluated(_) => "diagnosis_evaluated",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Fans study events out to every connected client.
///
/// Events are not kept for clients that connect later.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<StudyEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls behind gets a `Lagged` error and misses events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StudyEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning how many subscribers will see it.
    pub fn send(&self, event: StudyEvent) -> usize {
        // Err only means nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// Event Filter
// ============================================================================

/// Query parameters of `GET /ws`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamParams {
    /// Lesson the client is studying, if any.
    pub lesson: Option<String>,
}

/// Decides which events a client is sent.
///
/// `connected` and `lesson_updated` keep the catalog in sync and always pass.
/// Viewer and session events pass when the client follows their lesson or
/// follows no lesson at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    lesson: Option<String>,
}

impl EventFilter {
    /// A filter that lets everything through.
    #[must_use]
    pub const fn all() -> Self {
        Self { lesson: None }
    }

    /// A filter following one lesson.
    #[must_use]
    pub fn lesson(lesson_id: impl Into<String>) -> Self {
        Self {
            lesson: Some(lesson_id.into()),
        }
    }

    /// The followed lesson.
    #[must_use]
    pub fn followed_lesson(&self) -> Option<&str> {
        self.lesson.as_deref()
    }

    /// Whether `event` should reach the client.
    #[must_use]
    pub fn accepts(&self, event: &StudyEvent) -> bool {
        match (self.lesson.as_deref(), event) {
            (None, _) | (_, StudyEvent::Connected(_) | StudyEvent::LessonUpdated(_)) => true,
            (Some(wanted), event) => event.lesson_id() == Some(wanted),
        }
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Heartbeat period.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Unanswered pings tolerated before the client is dropped.
const MAX_MISSED_PONGS: u8 = 3;

/// Handler for `GET /ws`.
///
/// `?lesson=<id>` narrows the stream to one lesson. An unknown lesson is
/// refused before the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let filter = match params.lesson {
        Some(id) => {
            if !state.lessons.lock().await.contains(&id) {
                debug!(lesson = %id, "Event stream refused, unknown lesson");
                let body = Json(ErrorResponse {
                    error: format!("Lesson not found: '{id}'"),
                });
                return (StatusCode::NOT_FOUND, body).into_response();
            }
            EventFilter::lesson(id)
        }
        None => EventFilter::all(),
    };

    debug!(lesson = ?filter.followed_lesson(), "Event stream requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

/// What the socket loop does after a client frame.
enum ClientFrame {
    Ignore,
    Pong,
    Reply(Message),
    Leave(&'static str),
}

impl ClientFrame {
    fn classify(frame: Option<Result<Message, axum::Error>>) -> Self {
        match frame {
            Some(Ok(Message::Pong(_))) => Self::Pong,
            Some(Ok(Message::Ping(data))) => Self::Reply(Message::Pong(data)),
            Some(Ok(Message::Text(_) | Message::Binary(_))) => Self::Ignore,
            Some(Ok(Message::Close(_))) => Self::Leave("closed by client"),
            Some(Err(e)) => {
                debug!(error = %e, "Event stream read failed");
                Self::Leave("read error")
            }
            None => Self::Leave("stream ended"),
        }
    }
}

fn encode(event: &StudyEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            warn!(event = event.event_name(), error = %e, "Failed to encode study event");
            None
        }
    }
}

/// Greets the client with catalog stats, then forwards the events `filter`
/// accepts until the client leaves or stops answering pings.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, filter: EventFilter) {
    let (mut sender, mut receiver) = socket.split();
    let lesson = filter.followed_lesson().unwrap_or("*").to_string();

    // Subscribe before reading stats so nothing slips between the two
    let mut events = state.broadcaster.subscribe();
    let stats = state.lessons.lock().await.stats();
    let Some(greeting) = encode(&StudyEvent::connected(stats)) else {
        return;
    };
    if sender.send(greeting).await.is_err() {
        debug!(lesson = %lesson, "Client left before the greeting");
        return;
    }
    info!(lesson = %lesson, "Study client connected");

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    let mut missed_pongs = 0u8;
    let mut forwarded = 0u64;

    let reason = loop {
        tokio::select! {
            frame = receiver.next() => match ClientFrame::classify(frame) {
                ClientFrame::Ignore => {}
                ClientFrame::Pong => missed_pongs = 0,
                ClientFrame::Reply(reply) => {
                    if sender.send(reply).await.is_err() {
                        break "write failed";
                    }
                }
                ClientFrame::Leave(reason) => break reason,
            },

            received = events.recv() => match received {
                Ok(event) if filter.accepts(&event) => {
                    let Some(message) = encode(&event) else { continue };
                    if sender.send(message).await.is_err() {
                        break "write failed";
                    }
                    forwarded += 1;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(lesson = %lesson, missed, "Study client fell behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break "server shutting down",
            },

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break "write failed";
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    break "heartbeat timeout";
                }
            }
        }
    };

    info!(lesson = %lesson, reason, forwarded, "Study client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
