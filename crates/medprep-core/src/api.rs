//! HTTP API for the study backend.
//!
//! Lessons, document viewers and the three interactive sessions are exposed
//! per lesson under `/api/lessons/:id`. Session handlers use the two-phase
//! controller methods, so no lock is held while the completion service is
//! working. A failed exchange is not an HTTP error: the handler answers with
//! the session snapshot, whose `lastError` carries the message.
//!
//! # Endpoints
//!
//! - `GET /api/lessons`, `GET /api/lessons/:id`, `GET /api/stats`
//! - `POST /api/lessons/:id/progress`, `POST /api/lessons/:id/reset`
//! - `POST /api/lessons/:id/document` (multipart), `PUT /api/lessons/:id/document/text`
//! - `POST /api/lessons/:id/viewer/open`, `GET|DELETE /api/lessons/:id/viewer`,
//!   `POST /api/lessons/:id/viewer/zoom`
//! - `GET|POST|DELETE /api/lessons/:id/tutor`
//! - `POST|GET|DELETE /api/lessons/:id/quiz`, `POST .../quiz/answer`,
//!   `POST .../quiz/next`, `POST .../quiz/retry`
//! - `POST|GET|DELETE /api/lessons/:id/case`, `POST .../case/ask`,
//!   `POST .../case/diagnosis`
//! - `POST /api/lessons/:id/evaluation`
//! - `GET /ws` and static files under `/uploads`
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use medprep_core::{create_router, AppState, Config, HttpCompletionClient, LessonStore};
//!
//! # async fn example() {
//! let config = Config::default();
//! let lessons = LessonStore::with_default_catalog(config.catalog.lesson_count);
//! let completion = Arc::new(HttpCompletionClient::from_config(&config.completion));
//! let router = create_router(AppState::new(config, lessons, completion));
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use medprep_document::{
    DocumentHandle, DocumentRenderer, DocumentView, HttpTransport, PdfDecoder, RenderEvent, RenderTask,
    RendererConfig, ZoomDirection,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::completion::CompletionService;
use crate::config::Config;
use crate::error::{ServiceError, SessionError, UploadError};
use crate::events::{ws_handler, EventBroadcaster, StudyEvent};
use crate::lesson::{Lesson, LessonStats, LessonStore};
use crate::session::{
    evaluate_progress, next_generation, AnswerFeedback, MedicalCase, PendingExchange,
    ProgressEvaluation, QuizRunner, QuizSettings, QuizStep, QuizSummary, TutorChat,
};
use crate::upload::{PdfUpload, StoredUpload, UploadStore, UPLOAD_ROUTE};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /api/lessons/:id/progress`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressRequest {
    /// New progress percentage. Values above 100 are clamped.
    pub progress: u8,
}

/// Request body for `PUT /api/lessons/:id/document/text`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentRequest {
    /// Inline lesson text.
    pub content: String,
}

/// Request body for `POST /api/lessons/:id/viewer/zoom`.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoomRequest {
    /// Which way to zoom.
    pub direction: ZoomDirection,
}

/// Request body for `POST /api/lessons/:id/tutor`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRequest {
    /// The learner's question.
    pub message: String,
}

/// Request body for `POST /api/lessons/:id/quiz`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuizStartRequest {
    /// Number of questions; the configured default when absent.
    #[serde(default)]
    pub count: Option<u32>,
    /// Difficulty percentage; the configured default when absent.
    #[serde(default)]
    pub difficulty: Option<u8>,
}

/// Request body for `POST /api/lessons/:id/quiz/answer`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerRequest {
    /// Chosen letter, A to D.
    pub choice: String,
}

/// Request body for `POST /api/lessons/:id/case/ask`.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionRequest {
    /// The clinician's question.
    pub question: String,
}

/// Request body for `POST /api/lessons/:id/case/diagnosis`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosisRequest {
    /// The proposed diagnosis.
    pub diagnosis: String,
}

/// Response body for quiz actions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuizResponse {
    /// The quiz continues.
    Active {
        /// Quiz snapshot.
        quiz: QuizRunner,
    },
    /// The quiz is over and has been cleared.
    Finished {
        /// Final tally.
        summary: QuizSummary,
    },
}

/// Response body for a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    /// The lesson with its new document.
    pub lesson: Lesson,
    /// Where the file was stored.
    pub upload: StoredUpload,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Document viewer for one lesson.
///
/// Each viewer renders through its own fork of the shared renderer, so
/// opening one lesson's document never cancels another's. Forks count
/// generations from zero, so `instance` tells a recreated viewer apart from
/// the one a render job was started for.
#[derive(Debug)]
pub struct LessonViewer {
    instance: u64,
    renderer: DocumentRenderer,
    view: DocumentView,
}

impl LessonViewer {
    fn new(renderer: DocumentRenderer) -> Self {
        Self {
            instance: next_generation(),
            renderer,
            view: DocumentView::new(),
        }
    }

    /// Supersedes the current render job and follows `handle` instead.
    fn open(&mut self, handle: DocumentHandle) -> RenderTask {
        let task = self.renderer.open(handle);
        self.view.begin(task.generation());
        task
    }
}

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// All lessons.
    pub lessons: Arc<Mutex<LessonStore>>,
    /// Tutor conversations by lesson id.
    pub tutors: Arc<Mutex<HashMap<String, TutorChat>>>,
    /// Running quizzes by lesson id.
    pub quizzes: Arc<Mutex<HashMap<String, QuizRunner>>>,
    /// Medical cases by lesson id.
    pub cases: Arc<Mutex<HashMap<String, MedicalCase>>>,
    /// Document viewers by lesson id.
    pub viewers: Arc<Mutex<HashMap<String, LessonViewer>>>,
    /// Renderer that per-lesson viewers are forked from.
    pub renderer: DocumentRenderer,
    /// Completion service shared by every session.
    pub completion: Arc<dyn CompletionService>,
    /// Upload storage.
    pub uploads: UploadStore,
    /// Event fan-out to WebSocket clients.
    pub broadcaster: EventBroadcaster,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("renderer", &self.renderer)
            .field("uploads", &self.uploads)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates the state for `config`.
    ///
    /// Documents are fetched over HTTP, with `/uploads/...` locators resolved
    /// against the public base URL.
    #[must_use]
    pub fn new(config: Config, lessons: LessonStore, completion: Arc<dyn CompletionService>) -> Self {
        let transport = HttpTransport::new().with_base_url(config.public_base_url());
        let renderer = DocumentRenderer::new(
            Arc::new(transport),
            Arc::new(PdfDecoder),
            RendererConfig {
                viewport_width: config.viewer.viewport_width,
                margin: config.viewer.margin,
                ..RendererConfig::default()
            },
        );
        let uploads = UploadStore::new(&config.server.upload_dir, config.server.max_upload_mb);

        Self {
            config,
            lessons: Arc::new(Mutex::new(lessons)),
            tutors: Arc::default(),
            quizzes: Arc::default(),
            cases: Arc::default(),
            viewers: Arc::default(),
            renderer,
            completion,
            uploads,
            broadcaster: EventBroadcaster::default(),
        }
    }

    /// Replaces the document renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: DocumentRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    async fn lesson(&self, id: &str) -> Result<Lesson, ApiError> {
        self.lessons
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::LessonNotFound(id.to_string()))
    }

    /// Broadcasts the current state of a lesson.
    async fn announce_lesson(&self, id: &str) -> Result<Lesson, ApiError> {
        let lesson = self.lesson(id).await?;
        self.broadcaster
            .send(StudyEvent::lesson_updated(lesson.clone()));
        Ok(lesson)
    }

    /// Lets an exchange failure through as `None`, after broadcasting it.
    fn absorb<T>(&self, lesson_id: &str, result: Result<T, SessionError>) -> Result<Option<T>, ApiError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(SessionError::Exchange(err)) => {
                self.broadcaster
                    .send(StudyEvent::error(lesson_id, err.to_string()));
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// No lesson has this id.
    LessonNotFound(String),
    /// The lesson has no session of this kind.
    NoSession {
        kind: &'static str,
        lesson_id: String,
    },
    /// The lesson has neither a PDF nor inline content.
    NoDocument(String),
    /// A session refused the action.
    Session(SessionError),
    /// An upload was rejected.
    Upload(UploadError),
    /// The multipart body could not be read.
    Multipart(MultipartError),
    /// A one-shot completion call failed.
    Service(ServiceError),
}

impl ApiError {
    fn no_session(kind: &'static str, lesson_id: &str) -> Self {
        Self::NoSession {
            kind,
            lesson_id: lesson_id.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::LessonNotFound(_) | Self::NoSession { .. } | Self::NoDocument(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Session(err) => match err {
                SessionError::EmptyInput
                | SessionError::InvalidQuizConfig { .. }
                | SessionError::UnknownChoice { .. } => StatusCode::BAD_REQUEST,
                SessionError::Exchange(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::CONFLICT,
            },
            Self::Upload(err) => match err {
                UploadError::InvalidType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                UploadError::UnknownLesson { .. } => StatusCode::NOT_FOUND,
                UploadError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
            Self::Multipart(err) => err.status(),
            Self::Service(err) => match err {
                ServiceError::NotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ServiceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            Self::LessonNotFound(id) => format!("Lesson not found: '{id}'"),
            Self::NoSession { kind, lesson_id } => {
                format!("No {kind} session for lesson '{lesson_id}'")
            }
            Self::NoDocument(id) => format!("Lesson '{id}' has no document"),
            Self::Session(err) => err.to_string(),
            Self::Upload(err) => err.to_string(),
            Self::Multipart(err) => err.body_text(),
            Self::Service(err) => err.to_string(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        Self::Upload(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::Multipart(err)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = %status, error = %self.message(), "Request failed");
        } else {
            debug!(status = %status, error = %self.message(), "Request rejected");
        }
        let body = Json(ErrorResponse {
            error: self.message(),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all endpoints.
///
/// Adds permissive CORS for the browser client, request tracing, a body
/// limit on the upload route sized from the configured upload limit, and a
/// static file service for stored uploads.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Leave room for multipart framing so oversized files reach validation
    let upload_limit =
        usize::try_from(state.config.server.max_upload_bytes()).unwrap_or(usize::MAX);
    let upload_limit = upload_limit.saturating_add(1024 * 1024);
    let upload_dir = state.uploads.dir().to_path_buf();

    let lesson_routes = Router::new()
        .route("/", get(handle_get_lesson))
        .route("/progress", post(handle_set_progress))
        .route("/reset", post(handle_reset))
        .route(
            "/document",
            post(handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/document/text", put(handle_set_content))
        .route("/viewer", get(handle_get_viewer).delete(handle_close_viewer))
        .route("/viewer/open", post(handle_open_viewer))
        .route("/viewer/zoom", post(handle_zoom))
        .route(
            "/tutor",
            get(handle_get_tutor)
                .post(handle_tutor_message)
                .delete(handle_discard_tutor),
        )
        .route(
            "/quiz",
            post(handle_start_quiz)
                .get(handle_get_quiz)
                .delete(handle_discard_quiz),
        )
        .route("/quiz/answer", post(handle_quiz_answer))
        .route("/quiz/next", post(handle_quiz_next))
        .route("/quiz/retry", post(handle_quiz_retry))
        .route(
            "/case",
            post(handle_start_case)
                .get(handle_get_case)
                .delete(handle_discard_case),
        )
        .route("/case/ask", post(handle_case_question))
        .route("/case/diagnosis", post(handle_case_diagnosis))
        .route("/evaluation", post(handle_evaluation));

    let api_routes = Router::new()
        .route("/lessons", get(handle_list_lessons))
        .route("/stats", get(handle_stats))
        .nest("/lessons/:id", lesson_routes);

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .nest_service(UPLOAD_ROUTE, ServeDir::new(upload_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Lesson Handlers
// ============================================================================

async fn handle_list_lessons(State(state): State<Arc<AppState>>) -> Json<Vec<Lesson>> {
    Json(state.lessons.lock().await.snapshot())
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> Json<LessonStats> {
    Json(state.lessons.lock().await.stats())
}

async fn handle_get_lesson(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Lesson>, ApiError> {
    state.lesson(&id).await.map(Json)
}

async fn handle_set_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ProgressRequest>,
) -> Result<Json<Lesson>, ApiError> {
    if !state.lessons.lock().await.set_progress(&id, request.progress) {
        return Err(ApiError::LessonNotFound(id));
    }
    info!(lesson = %id, progress = request.progress, "Progress updated");
    state.announce_lesson(&id).await.map(Json)
}

async fn handle_reset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Lesson>, ApiError> {
    if !state.lessons.lock().await.reset_progress(&id) {
        return Err(ApiError::LessonNotFound(id));
    }
    info!(lesson = %id, "Progress reset");
    state.announce_lesson(&id).await.map(Json)
}

async fn handle_set_content(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ContentRequest>,
) -> Result<Json<Lesson>, ApiError> {
    if !state.lessons.lock().await.set_content(&id, request.content) {
        return Err(ApiError::LessonNotFound(id));
    }
    let lesson = state.announce_lesson(&id).await?;
    refresh_viewer(&state, &lesson).await;
    Ok(Json(lesson))
}

/// Handler for `POST /api/lessons/:id/document`.
///
/// Reads the `file` field, validates and stores it, then attaches the stored
/// locator to the lesson. The lesson is left alone when anything fails.
async fn handle_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    if !state.lessons.lock().await.contains(&id) {
        return Err(UploadError::UnknownLesson { id }.into());
    }

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        upload = Some(PdfUpload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
        break;
    }
    let upload = upload.ok_or(UploadError::NoFile)?;

    let stored = state.uploads.save(&id, &upload).await?;
    state
        .lessons
        .lock()
        .await
        .attach_document(&id, &stored.locator);
    let lesson = state.announce_lesson(&id).await?;
    refresh_viewer(&state, &lesson).await;

    Ok(Json(UploadResponse {
        lesson,
        upload: stored,
    }))
}

// ============================================================================
// Viewer Handlers
// ============================================================================

/// Handler for `POST /api/lessons/:id/viewer/open`.
///
/// Starts rendering the lesson document and returns the fresh view. Pages
/// arrive in the background; poll `GET .../viewer` or follow `/ws`.
async fn handle_open_viewer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentView>, ApiError> {
    let handle = state
        .lesson(&id)
        .await?
        .document_handle()
        .ok_or_else(|| ApiError::NoDocument(id.clone()))?;

    let (instance, task, view) = {
        let mut viewers = state.viewers.lock().await;
        let viewer = viewers
            .entry(id.clone())
            .or_insert_with(|| LessonViewer::new(state.renderer.fork()));
        let task = viewer.open(handle);
        (viewer.instance, task, viewer.view.clone())
    };

    info!(lesson = %id, generation = task.generation(), "Document viewer opened");
    state
        .broadcaster
        .send(StudyEvent::viewer_updated(&id, &view));
    tokio::spawn(pump_render(Arc::clone(&state), id, instance, task));

    Ok(Json(view))
}

/// Points an open viewer at the lesson's current document.
///
/// Called whenever the document changes. The running job is cancelled and
/// its remaining pages are dropped, so the view never mixes two documents.
/// Lessons nobody is viewing are left alone.
async fn refresh_viewer(state: &Arc<AppState>, lesson: &Lesson) {
    let mut viewers = state.viewers.lock().await;
    let Some(viewer) = viewers.get_mut(&lesson.id) else {
        return;
    };

    match lesson.document_handle() {
        Some(handle) => {
            let task = viewer.open(handle);
            info!(
                lesson = %lesson.id,
                generation = task.generation(),
                "Viewer switched to new document"
            );
            tokio::spawn(pump_render(
                Arc::clone(state),
                lesson.id.clone(),
                viewer.instance,
                task,
            ));
        }
        None => {
            viewer.renderer.cancel();
            viewer.view = DocumentView::new();
        }
    }
    state
        .broadcaster
        .send(StudyEvent::viewer_updated(&lesson.id, &viewer.view));
}

/// Feeds render updates into the lesson's view until the job ends or the
/// viewer stops following it.
async fn pump_render(state: Arc<AppState>, lesson_id: String, instance: u64, mut task: RenderTask) {
    while let Some(update) = task.next().await {
        let mut viewers = state.viewers.lock().await;
        let Some(viewer) = viewers.get_mut(&lesson_id).filter(|v| v.instance == instance) else {
            debug!(lesson = %lesson_id, "Viewer closed, render dropped");
            break;
        };
        if !viewer.view.apply(&update) {
            debug!(lesson = %lesson_id, generation = update.generation, "Render superseded");
            break;
        }
        if !matches!(update.event, RenderEvent::Progress { .. }) {
            state
                .broadcaster
                .send(StudyEvent::viewer_updated(&lesson_id, &viewer.view));
        }
    }
}

async fn handle_get_viewer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentView>, ApiError> {
    state
        .viewers
        .lock()
        .await
        .get(&id)
        .map(|viewer| Json(viewer.view.clone()))
        .ok_or_else(|| ApiError::no_session("viewer", &id))
}

/// Handler for `DELETE /api/lessons/:id/viewer`.
///
/// Cancels any running render and forgets the view.
async fn handle_close_viewer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let viewer = state
        .viewers
        .lock()
        .await
        .remove(&id)
        .ok_or_else(|| ApiError::no_session("viewer", &id))?;
    let generation = viewer.renderer.cancel();
    info!(lesson = %id, generation, "Document viewer closed");
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_zoom(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ZoomRequest>,
) -> Result<Json<DocumentView>, ApiError> {
    let mut viewers = state.viewers.lock().await;
    let viewer = viewers
        .get_mut(&id)
        .ok_or_else(|| ApiError::no_session("viewer", &id))?;
    let scale = viewer.view.zoom(request.direction);
    debug!(lesson = %id, scale, "Zoom changed");

    state
        .broadcaster
        .send(StudyEvent::viewer_updated(&id, &viewer.view));
    Ok(Json(viewer.view.clone()))
}

// ============================================================================
// Tutor Handlers
// ============================================================================

/// Handler for `GET /api/lessons/:id/tutor`.
///
/// A lesson without a conversation gets an empty one.
async fn handle_get_tutor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TutorChat>, ApiError> {
    let lesson = state.lesson(&id).await?;
    let tutors = state.tutors.lock().await;
    Ok(Json(tutors.get(&id).cloned().unwrap_or_else(|| {
        TutorChat::new(&lesson.id, &lesson.title)
    })))
}

async fn handle_tutor_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<TutorChat>, ApiError> {
    let lesson = state.lesson(&id).await?;
    let pending = state
        .tutors
        .lock()
        .await
        .entry(id.clone())
        .or_insert_with(|| TutorChat::new(&lesson.id, &lesson.title))
        .begin_message(&request.message)?;

    let result = state.completion.complete(&pending.prompt).await;

    let mut tutors = state.tutors.lock().await;
    let chat = tutors.get_mut(&id).ok_or(SessionError::Stale)?;
    let reply = chat.complete_message(pending.ticket, result);
    if let Some(turn) = state.absorb(&id, reply)? {
        state.broadcaster.send(StudyEvent::tutor_reply(&id, turn));
    }
    Ok(Json(chat.clone()))
}

async fn handle_discard_tutor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    if let Some(mut chat) = state.tutors.lock().await.remove(&id) {
        chat.cancel();
        info!(lesson = %id, "Tutor conversation discarded");
    }
    StatusCode::NO_CONTENT
}

// ============================================================================
// Quiz Handlers
// ============================================================================

/// Handler for `POST /api/lessons/:id/quiz`.
///
/// Replaces any running quiz and generates the first question.
async fn handle_start_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<QuizStartRequest>,
) -> Result<Json<QuizResponse>, ApiError> {
    let lesson = state.lesson(&id).await?;
    let defaults = QuizSettings::from_defaults(&state.config.quiz);
    let settings = QuizSettings {
        count: request.count.unwrap_or(defaults.count),
        difficulty: request.difficulty.unwrap_or(defaults.difficulty),
    };

    let mut runner = QuizRunner::new(&lesson.id, &lesson.title, settings, &state.config.quiz)?;
    let pending = match runner.begin_next()? {
        QuizStep::Generate(pending) => pending,
        QuizStep::Finished(summary) => return Ok(Json(QuizResponse::Finished { summary })),
    };

    info!(lesson = %id, count = settings.count, difficulty = settings.difficulty, "Quiz started");
    state.quizzes.lock().await.insert(id.clone(), runner);
    settle_quiz(&state, &id, pending).await
}

async fn handle_get_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QuizResponse>, ApiError> {
    state
        .quizzes
        .lock()
        .await
        .get(&id)
        .map(|quiz| Json(QuizResponse::Active { quiz: quiz.clone() }))
        .ok_or_else(|| ApiError::no_session("quiz", &id))
}

async fn handle_quiz_answer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<AnswerFeedback>, ApiError> {
    let choice = single_letter(&request.choice)?;
    let mut quizzes = state.quizzes.lock().await;
    let runner = quizzes
        .get_mut(&id)
        .ok_or_else(|| ApiError::no_session("quiz", &id))?;
    Ok(Json(runner.answer(choice)?))
}

/// Handler for `POST /api/lessons/:id/quiz/next`.
///
/// After the last question this ends the quiz, records the attempt on the
/// lesson and clears the session.
async fn handle_quiz_next(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QuizResponse>, ApiError> {
    let step = {
        let mut quizzes = state.quizzes.lock().await;
        let runner = quizzes
            .get_mut(&id)
            .ok_or_else(|| ApiError::no_session("quiz", &id))?;
        let step = runner.begin_next()?;
        if matches!(step, QuizStep::Finished(_)) {
            quizzes.remove(&id);
        }
        step
    };

    match step {
        QuizStep::Generate(pending) => settle_quiz(&state, &id, pending).await,
        QuizStep::Finished(summary) => {
            state
                .lessons
                .lock()
                .await
                .record_quiz_attempt(&id, summary.score_percent, Utc::now());
            state
                .broadcaster
                .send(StudyEvent::quiz_finished(summary.clone()));
            state.announce_lesson(&id).await?;
            Ok(Json(QuizResponse::Finished { summary }))
        }
    }
}

async fn handle_quiz_retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QuizResponse>, ApiError> {
    let pending = state
        .quizzes
        .lock()
        .await
        .get_mut(&id)
        .ok_or_else(|| ApiError::no_session("quiz", &id))?
        .retry()?;
    settle_quiz(&state, &id, pending).await
}

async fn handle_discard_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    if state.quizzes.lock().await.remove(&id).is_some() {
        info!(lesson = %id, "Quiz discarded");
    }
    StatusCode::NO_CONTENT
}

/// Runs a quiz exchange and applies its result.
async fn settle_quiz(
    state: &AppState,
    id: &str,
    pending: PendingExchange,
) -> Result<Json<QuizResponse>, ApiError> {
    let result = state.completion.complete(&pending.prompt).await;

    let mut quizzes = state.quizzes.lock().await;
    let runner = quizzes.get_mut(id).ok_or(SessionError::Stale)?;
    let outcome = runner.complete_item(pending.ticket, result).map(|_| ());
    if state.absorb(id, outcome)?.is_some() {
        state.broadcaster.send(StudyEvent::quiz_question(
            id,
            runner.index(),
            runner.settings().count,
        ));
    }
    Ok(Json(QuizResponse::Active {
        quiz: runner.clone(),
    }))
}

fn single_letter(raw: &str) -> Result<char, SessionError> {
    let mut chars = raw.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) => Ok(letter.to_ascii_uppercase()),
        _ => Err(SessionError::UnknownChoice {
            choice: raw.to_string(),
        }),
    }
}

// ============================================================================
// Case Handlers
// ============================================================================

/// Handler for `POST /api/lessons/:id/case`.
///
/// Replaces any existing case and generates the presentation.
async fn handle_start_case(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MedicalCase>, ApiError> {
    let lesson = state.lesson(&id).await?;
    let mut case = MedicalCase::new(&lesson.id, &lesson.title);
    let pending = case.begin_start()?;
    state.cases.lock().await.insert(id.clone(), case);
    info!(lesson = %id, "Medical case started");

    let result = state.completion.complete(&pending.prompt).await;

    let mut cases = state.cases.lock().await;
    let case = cases.get_mut(&id).ok_or(SessionError::Stale)?;
    let outcome = case.complete_start(pending.ticket, result).map(|_| ());
    state.absorb(&id, outcome)?;
    Ok(Json(case.clone()))
}

async fn handle_get_case(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MedicalCase>, ApiError> {
    state
        .cases
        .lock()
        .await
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::no_session("case", &id))
}

async fn handle_case_question(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<QuestionRequest>,
) -> Result<Json<MedicalCase>, ApiError> {
    let pending = state
        .cases
        .lock()
        .await
        .get_mut(&id)
        .ok_or_else(|| ApiError::no_session("case", &id))?
        .begin_question(&request.question)?;

    let result = state.completion.complete(&pending.prompt).await;

    let mut cases = state.cases.lock().await;
    let case = cases.get_mut(&id).ok_or(SessionError::Stale)?;
    let reply = case.complete_question(pending.ticket, result);
    if let Some(turn) = state.absorb(&id, reply)? {
        state.broadcaster.send(StudyEvent::patient_reply(&id, turn));
    }
    Ok(Json(case.clone()))
}

async fn handle_case_diagnosis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<DiagnosisRequest>,
) -> Result<Json<MedicalCase>, ApiError> {
    let pending = state
        .cases
        .lock()
        .await
        .get_mut(&id)
        .ok_or_else(|| ApiError::no_session("case", &id))?
        .begin_diagnosis(&request.diagnosis)?;

    let result = state.completion.complete(&pending.prompt).await;

    let mut cases = state.cases.lock().await;
    let case = cases.get_mut(&id).ok_or(SessionError::Stale)?;
    let verdict = case.complete_diagnosis(pending.ticket, result).cloned();
    if let Some(verdict) = state.absorb(&id, verdict)? {
        state
            .broadcaster
            .send(StudyEvent::diagnosis_evaluated(&id, verdict));
    }
    Ok(Json(case.clone()))
}

async fn handle_discard_case(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    if let Some(mut case) = state.cases.lock().await.remove(&id) {
        case.cancel();
        info!(lesson = %id, "Medical case discarded");
    }
    StatusCode::NO_CONTENT
}

// ============================================================================
// Evaluation Handler
// ============================================================================

async fn handle_evaluation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProgressEvaluation>, ApiError> {
    let lesson = state.lesson(&id).await?;
    let evaluation = evaluate_progress(state.completion.as_ref(), &lesson).await?;
    Ok(Json(evaluation))
}

// ============================================================================
// Tests
// ============================================================================
