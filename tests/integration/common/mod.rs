//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use medprep_core::{create_router, AppState, Config, LessonStore, ScriptedCompletion};

/// A running test server.
pub struct TestServer {
    pub addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        let _ = std::fs::remove_dir_all(&self.upload_dir);
    }
}

/// Binds an ephemeral port and serves `lessons` with scripted completions.
///
/// The public base URL points at the bound address so the viewer can fetch
/// uploads from the server itself.
pub async fn spawn_server(
    name: &str,
    lessons: LessonStore,
    completion: ScriptedCompletion,
    configure: impl FnOnce(&mut Config),
) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let upload_dir = std::env::temp_dir().join(format!(
        "medprep-it-{name}-{}-{}",
        std::process::id(),
        addr.port()
    ));

    let mut config = Config::default();
    config.server.public_base_url = Some(format!("http://{addr}"));
    config.server.upload_dir = upload_dir.display().to_string();
    configure(&mut config);

    let router = create_router(AppState::new(config, lessons, Arc::new(completion)));
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    TestServer {
        addr,
        upload_dir,
        handle,
    }
}

/// A well-formed quiz reply whose right answer is `correct`.
pub fn quiz_reply(n: u32, correct: char) -> String {
    format!(
        "QUESTION: Question {n} ?\nA) un\nB) deux\nC) trois\nD) quatre\n\
         CORRECT: {correct}\nEXPLANATION: Explication {n}."
    )
}

/// Polls `check` until it returns `Some` or five seconds pass.
pub async fn eventually<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for _ in 0..250 {
        if let Some(value) = check().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within 5s");
}

/// Builds a PDF whose pages each show one line of text.
pub fn sample_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = i64::try_from(kids.len()).expect("page count");
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save pdf");
    bytes
}
