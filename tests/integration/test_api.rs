//! End-to-end tests of the HTTP API over a real socket.

mod common;

use common::{eventually, quiz_reply, sample_pdf, spawn_server};
use medprep_core::{LessonStore, ScriptedCompletion, ServiceError};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

async fn get_json(client: &Client, url: &str) -> (StatusCode, Value) {
    let response = client.get(url).send().await.expect("GET failed");
    let status = response.status();
    (status, response.json().await.unwrap_or(Value::Null))
}

async fn post_json(client: &Client, url: &str, body: Value) -> (StatusCode, Value) {
    let response = client
        .post(url)
        .json(&body)
        .send()
        .await
        .expect("POST failed");
    let status = response.status();
    (status, response.json().await.unwrap_or(Value::Null))
}

async fn post_empty(client: &Client, url: &str) -> (StatusCode, Value) {
    let response = client.post(url).send().await.expect("POST failed");
    let status = response.status();
    (status, response.json().await.unwrap_or(Value::Null))
}

fn pdf_form(bytes: Vec<u8>, mime: &str) -> Form {
    let part = Part::bytes(bytes)
        .file_name("cours.pdf")
        .mime_str(mime)
        .expect("valid mime");
    Form::new().part("file", part)
}

#[tokio::test]
async fn test_catalog_and_stats() {
    let server = spawn_server(
        "catalog",
        LessonStore::with_default_catalog(10),
        ScriptedCompletion::default(),
        |_| {},
    )
    .await;
    let client = Client::new();

    let (status, lessons) = get_json(&client, &server.url("/api/lessons")).await;
    assert_eq!(status, StatusCode::OK);
    let lessons = lessons.as_array().expect("lesson array");
    assert_eq!(lessons.len(), 10);
    assert_eq!(lessons[0]["id"], "lesson-1");
    assert_eq!(lessons[9]["id"], "lesson-10");

    post_json(
        &client,
        &server.url("/api/lessons/lesson-1/progress"),
        json!({ "progress": 80 }),
    )
    .await;
    post_json(
        &client,
        &server.url("/api/lessons/lesson-2/progress"),
        json!({ "progress": 40 }),
    )
    .await;

    let (_, stats) = get_json(&client, &server.url("/api/stats")).await;
    assert_eq!(stats["total"], 10);
    assert_eq!(stats["mastered"], 1);
    assert_eq!(stats["inProgress"], 1);
    assert_eq!(stats["notStarted"], 8);
    assert_eq!(stats["globalPercentage"], 12);
}

#[tokio::test]
async fn test_tutor_conversation_keeps_history() {
    let service = ScriptedCompletion::new([
        "La systole est la phase de contraction.",
        "La diastole est la phase de remplissage.",
    ]);
    let server = spawn_server("tutor", LessonStore::with_default_catalog(3), service, |_| {}).await;
    let client = Client::new();
    let url = server.url("/api/lessons/lesson-1/tutor");

    post_json(&client, &url, json!({ "message": "Systole ?" })).await;
    let (status, chat) = post_json(&client, &url, json!({ "message": "Et la diastole ?" })).await;

    assert_eq!(status, StatusCode::OK);
    let turns = chat["turns"].as_array().expect("turns");
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0]["role"], "asker");
    assert_eq!(turns[3]["text"], "La diastole est la phase de remplissage.");

    let response = client.delete(&url).send().await.expect("DELETE failed");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let (status, _) = get_json(&client, &url).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_quiz_with_wrong_answers_scores_partially() {
    let replies: Vec<String> = (1..=5).map(|n| quiz_reply(n, 'B')).collect();
    let server = spawn_server(
        "quiz",
        LessonStore::with_default_catalog(3),
        ScriptedCompletion::new(replies),
        |_| {},
    )
    .await;
    let client = Client::new();
    let base = server.url("/api/lessons/lesson-2/quiz");

    let (status, body) = post_json(&client, &base, json!({ "count": 5 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["quiz"]["index"], 1);
    assert_eq!(body["quiz"]["current"]["choices"].as_array().expect("choices").len(), 4);

    let mut last = Value::Null;
    for n in 1..=5 {
        let choice = if n <= 2 { "B" } else { "D" };
        let (_, feedback) =
            post_json(&client, &format!("{base}/answer"), json!({ "choice": choice })).await;
        assert_eq!(feedback["correct"], n <= 2);
        assert_eq!(feedback["correctChoice"], "B");

        let (_, second) =
            post_json(&client, &format!("{base}/answer"), json!({ "choice": "A" })).await;
        assert!(second["error"].is_string(), "second answer must be rejected");

        (_, last) = post_empty(&client, &format!("{base}/next")).await;
    }

    assert_eq!(last["status"], "finished");
    assert_eq!(last["summary"]["correct"], 2);
    assert_eq!(last["summary"]["scorePercent"], 40);

    let (_, lesson) = get_json(&client, &server.url("/api/lessons/lesson-2")).await;
    assert_eq!(lesson["quizzesTaken"], 1);
    assert_eq!(lesson["progress"], 40);
    assert!(lesson["lastAttempt"].is_string());
}

#[tokio::test]
async fn test_quiz_answer_must_be_a_letter() {
    let server = spawn_server(
        "quiz-letter",
        LessonStore::with_default_catalog(3),
        ScriptedCompletion::new([quiz_reply(1, 'A')]),
        |_| {},
    )
    .await;
    let client = Client::new();
    let base = server.url("/api/lessons/lesson-1/quiz");

    post_json(&client, &base, json!({})).await;
    let (status, _) =
        post_json(&client, &format!("{base}/answer"), json!({ "choice": "Z" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) =
        post_json(&client, &format!("{base}/answer"), json!({ "choice": "AB" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_case_with_incorrect_diagnosis() {
    let service = ScriptedCompletion::new([
        "Patiente de 60 ans, dyspnée brutale.",
        "VERDICT: INCORRECT\nEXPLICATION: Il s'agissait d'une embolie pulmonaire.",
    ]);
    let server = spawn_server("case", LessonStore::with_default_catalog(3), service, |_| {}).await;
    let client = Client::new();
    let base = server.url("/api/lessons/lesson-3/case");

    let (status, case) = post_empty(&client, &base).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(case["narrative"], "Patiente de 60 ans, dyspnée brutale.");

    let (status, case) = post_json(
        &client,
        &format!("{base}/diagnosis"),
        json!({ "diagnosis": "Pneumopathie" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(case["verdict"]["isCorrect"], false);
    assert_eq!(
        case["verdict"]["explanation"],
        "Il s'agissait d'une embolie pulmonaire."
    );

    let (status, _) = post_json(
        &client,
        &format!("{base}/diagnosis"),
        json!({ "diagnosis": "Embolie" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_uploaded_pdf_renders_in_viewer() {
    let server = spawn_server(
        "viewer",
        LessonStore::with_default_catalog(5),
        ScriptedCompletion::default(),
        |_| {},
    )
    .await;
    let client = Client::new();
    let pdf = sample_pdf(&["Insuffisance cardiaque", "Traitement", "Surveillance"]);

    let response = client
        .post(server.url("/api/lessons/lesson-5/document"))
        .multipart(pdf_form(pdf, "application/pdf"))
        .send()
        .await
        .expect("upload failed");
    assert_eq!(response.status(), StatusCode::OK);
    let upload: Value = response.json().await.expect("upload json");
    assert_eq!(upload["lesson"]["pdfUrl"], "/uploads/lesson-5.pdf");

    let served = client
        .get(server.url("/uploads/lesson-5.pdf"))
        .send()
        .await
        .expect("fetch upload");
    assert_eq!(served.status(), StatusCode::OK);

    let (status, view) = post_empty(&client, &server.url("/api/lessons/lesson-5/viewer/open")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "loading");

    let viewer_url = server.url("/api/lessons/lesson-5/viewer");
    let view = eventually(|| {
        let client = client.clone();
        let url = viewer_url.clone();
        async move {
            let (_, view) = get_json(&client, &url).await;
            (view["status"] == "ready" || view["status"] == "failed").then_some(view)
        }
    })
    .await;

    assert_eq!(view["status"], "ready", "viewer failed: {}", view["failure"]);
    assert_eq!(view["totalPages"], 3);
    assert_eq!(view["pagesRendered"], 3);
    let pages = view["pages"].as_array().expect("pages");
    let numbers: Vec<_> = pages.iter().map(|p| p["pageNumber"].clone()).collect();
    assert_eq!(numbers, vec![json!(1), json!(2), json!(3)]);
    assert_eq!(pages[0]["surface"], "Insuffisance cardiaque");
    assert_eq!(pages[2]["surface"], "Surveillance");
}

#[tokio::test]
async fn test_upload_during_render_switches_viewer() {
    let server = spawn_server(
        "viewer-switch",
        LessonStore::with_default_catalog(3),
        ScriptedCompletion::default(),
        |_| {},
    )
    .await;
    let client = Client::new();
    let document_url = server.url("/api/lessons/lesson-2/document");
    let viewer_url = server.url("/api/lessons/lesson-2/viewer");

    let old_titles: Vec<String> = (1..=40).map(|n| format!("Ancien {n}")).collect();
    let old_pages: Vec<&str> = old_titles.iter().map(String::as_str).collect();
    client
        .post(&document_url)
        .multipart(pdf_form(sample_pdf(&old_pages), "application/pdf"))
        .send()
        .await
        .expect("upload failed");
    let (status, _) = post_empty(&client, &server.url("/api/lessons/lesson-2/viewer/open")).await;
    assert_eq!(status, StatusCode::OK);

    let response = client
        .post(&document_url)
        .multipart(pdf_form(
            sample_pdf(&["Nouveau 1", "Nouveau 2"]),
            "application/pdf",
        ))
        .send()
        .await
        .expect("upload failed");
    assert_eq!(response.status(), StatusCode::OK);

    let view = eventually(|| {
        let client = client.clone();
        let url = viewer_url.clone();
        async move {
            let (_, view) = get_json(&client, &url).await;
            (view["status"] == "ready" || view["status"] == "failed").then_some(view)
        }
    })
    .await;
    assert_eq!(view["status"], "ready", "viewer failed: {}", view["failure"]);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let (_, settled) = get_json(&client, &viewer_url).await;
    assert_eq!(settled["generation"], view["generation"]);
    assert_eq!(settled["totalPages"], 2);
    let surfaces: Vec<_> = settled["pages"]
        .as_array()
        .expect("pages")
        .iter()
        .map(|p| p["surface"].clone())
        .collect();
    assert_eq!(surfaces, vec![json!("Nouveau 1"), json!("Nouveau 2")]);

    let closed = client.delete(&viewer_url).send().await.expect("DELETE failed");
    assert_eq!(closed.status(), StatusCode::NO_CONTENT);
    let (status, _) = get_json(&client, &viewer_url).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_viewer_reports_unreadable_document() {
    let server = spawn_server(
        "viewer-bad",
        LessonStore::with_default_catalog(2),
        ScriptedCompletion::default(),
        |_| {},
    )
    .await;
    let client = Client::new();

    let response = client
        .post(server.url("/api/lessons/lesson-1/document"))
        .multipart(pdf_form(b"%PDF-1.4 truncated".to_vec(), "application/pdf"))
        .send()
        .await
        .expect("upload failed");
    assert_eq!(response.status(), StatusCode::OK);

    post_empty(&client, &server.url("/api/lessons/lesson-1/viewer/open")).await;

    let viewer_url = server.url("/api/lessons/lesson-1/viewer");
    let view = eventually(|| {
        let client = client.clone();
        let url = viewer_url.clone();
        async move {
            let (_, view) = get_json(&client, &url).await;
            (view["status"] == "failed").then_some(view)
        }
    })
    .await;

    assert!(view["failure"]["message"].is_string());
    assert!(view["failure"]["fallbackUrl"]
        .as_str()
        .expect("fallback url")
        .ends_with("/uploads/lesson-1.pdf"));
}

#[tokio::test]
async fn test_upload_rejections() {
    let server = spawn_server(
        "upload-limits",
        LessonStore::with_default_catalog(2),
        ScriptedCompletion::default(),
        |config| config.server.max_upload_mb = 1,
    )
    .await;
    let client = Client::new();
    let url = server.url("/api/lessons/lesson-1/document");

    let response = client
        .post(&url)
        .multipart(pdf_form(b"GIF89a".to_vec(), "image/gif"))
        .send()
        .await
        .expect("upload failed");
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let mut oversized = b"%PDF-1.4\n".to_vec();
    oversized.resize(1024 * 1024 + 10, b' ');
    let response = client
        .post(&url)
        .multipart(pdf_form(oversized, "application/pdf"))
        .send()
        .await
        .expect("upload failed");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let (_, lesson) = get_json(&client, &server.url("/api/lessons/lesson-1")).await;
    assert_eq!(lesson["pdfUrl"], Value::Null);
}

#[tokio::test]
async fn test_inline_content_replaces_pdf_until_next_upload() {
    let server = spawn_server(
        "content",
        LessonStore::with_default_catalog(2),
        ScriptedCompletion::default(),
        |_| {},
    )
    .await;
    let client = Client::new();

    let response = client
        .put(server.url("/api/lessons/lesson-2/document/text"))
        .json(&json!({ "content": "Résumé du cours" }))
        .send()
        .await
        .expect("PUT failed");
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .post(server.url("/api/lessons/lesson-2/document"))
        .multipart(pdf_form(sample_pdf(&["Page"]), "application/pdf"))
        .send()
        .await
        .expect("upload failed");
    let upload: Value = response.json().await.expect("upload json");
    assert_eq!(upload["lesson"]["content"], Value::Null);
    assert_eq!(upload["lesson"]["pdfUrl"], "/uploads/lesson-2.pdf");
}

#[tokio::test]
async fn test_evaluation_reports_service_errors() {
    let service = ScriptedCompletion::from_results([
        Ok("Progression régulière, continuez.".to_string()),
        Err(ServiceError::Timeout { timeout_secs: 30 }),
    ]);
    let server = spawn_server("evaluation", LessonStore::with_default_catalog(2), service, |_| {}).await;
    let client = Client::new();
    let url = server.url("/api/lessons/lesson-1/evaluation");

    let (status, body) = post_empty(&client, &url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "Progression régulière, continuez.");

    let (status, body) = post_empty(&client, &url).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(body["error"].is_string());
}
