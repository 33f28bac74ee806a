//! MedPrep CLI
//!
//! Main entry point: serves the study API, writes progress reports, and
//! asks the tutor one-off questions from the terminal.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use medprep_core::{
    create_router, AppState, Config, HttpCompletionClient, Lesson, LessonStore, TutorChat,
};
use medprep_report::{json::JsonGenerator, LessonEntry, MarkdownGenerator, ProgressReport};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// MedPrep - Medical Exam Study Backend
///
/// Serves lessons, an AI tutor, generated quizzes and simulated clinical
/// cases over HTTP and WebSocket.
#[derive(Parser, Debug)]
#[command(name = "medprep")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: medprep.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP and WebSocket API
    Serve {
        /// Port for the HTTP API server
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Directory uploaded PDFs are stored in
        #[arg(long, value_name = "DIR")]
        upload_dir: Option<String>,

        /// Lesson catalog file replacing the built-in catalog
        #[arg(long, value_name = "FILE")]
        catalog: Option<String>,
    },

    /// Write Markdown and JSON progress reports
    Report {
        /// Output directory for reports
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output_dir: String,

        /// Report title
        #[arg(short, long, default_value = "MedPrep")]
        title: String,

        /// Fetch live progress from a running server instead of the catalog
        #[arg(long, value_name = "URL")]
        server: Option<String>,
    },

    /// Ask the tutor a single question about a lesson
    Ask {
        /// Lesson id, e.g. lesson-3
        lesson: String,

        /// The question
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!(config = ?args.config, "Config file");

    let result = match load_config(args.config.as_deref()) {
        Ok(config) => run(args.command, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(command: Command, mut config: Config) -> anyhow::Result<()> {
    match command {
        Command::Serve {
            port,
            host,
            upload_dir,
            catalog,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(dir) = upload_dir {
                config.server.upload_dir = dir;
            }
            if catalog.is_some() {
                config.catalog.file = catalog;
            }
            // Re-validate after overrides
            config.validate()?;
            serve(config).await
        }
        Command::Report {
            output_dir,
            title,
            server,
        } => {
            let lessons = match server {
                Some(url) => fetch_lessons(&url).await?,
                None => LessonStore::from_config(&config.catalog)?.snapshot(),
            };
            write_reports(&lessons, &title, Path::new(&output_dir))
        }
        Command::Ask { lesson, question } => ask(&config, &lesson, &question.join(" ")).await,
    }
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

// ============================================================================
// serve
// ============================================================================

async fn serve(config: Config) -> anyhow::Result<()> {
    print_config(&config);

    let lessons = LessonStore::from_config(&config.catalog)?;
    println!("Lessons loaded: {}", lessons.len());

    let completion = HttpCompletionClient::from_config(&config.completion);
    if !completion.enabled() {
        println!(
            "Warning: {} is not set; tutor, quiz and case features will report an error",
            config.completion.api_key_env
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| {
            anyhow::anyhow!(
                "Invalid listen address '{}:{}': {e}\n\nSuggestion: Use an IP address for --host",
                config.server.host,
                config.server.port
            )
        })?;

    let router = create_router(AppState::new(config, lessons, Arc::new(completion)));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!("MedPrep API running on http://{addr}");
    println!("Press Ctrl+C to stop");
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, shutting down");
            }
        })
        .await?;

    Ok(())
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Listen: {}:{}", config.server.host, config.server.port);
    println!("  Public URL: {}", config.public_base_url());
    println!("  Upload directory: {}", config.server.upload_dir);
    println!("  Completion provider: {:?}", config.completion.provider);
    println!("  Model: {}", config.completion.model);
    match &config.catalog.file {
        Some(file) => println!("  Catalog: {file}"),
        None => println!("  Catalog: built-in ({} lessons)", config.catalog.lesson_count),
    }
}

// ============================================================================
// report
// ============================================================================

/// Reads the lesson list from a running server.
async fn fetch_lessons(base_url: &str) -> anyhow::Result<Vec<Lesson>> {
    let url = format!("{}/api/lessons", base_url.trim_end_matches('/'));
    tracing::debug!(%url, "Fetching lessons");

    let response = reqwest::get(&url).await.map_err(|e| {
        anyhow::anyhow!("Failed to reach {url}: {e}\n\nSuggestion: Check that `medprep serve` is running")
    })?;
    if !response.status().is_success() {
        anyhow::bail!("{url} answered with status {}", response.status());
    }
    Ok(response.json().await?)
}

fn lesson_entry(lesson: &Lesson) -> LessonEntry {
    LessonEntry::new(&lesson.id, &lesson.title, &lesson.theme)
        .with_progress(lesson.progress)
        .with_quizzes(lesson.quizzes_taken, lesson.last_attempt)
        .with_document(lesson.document_handle().is_some())
}

/// Writes `medprep-report.md` and `medprep-report.json` to `output_dir`.
fn write_reports(lessons: &[Lesson], title: &str, output_dir: &Path) -> anyhow::Result<()> {
    println!("Generating reports...");

    let report = ProgressReport::builder()
        .title(title)
        .lessons(lessons.iter().map(lesson_entry).collect())
        .build()?;

    std::fs::create_dir_all(output_dir)?;

    let md_path = output_dir.join("medprep-report.md");
    std::fs::write(&md_path, MarkdownGenerator::new(&report).generate())?;
    println!("  Markdown report: {}", md_path.display());

    let json_path: PathBuf = output_dir.join("medprep-report.json");
    JsonGenerator::new(&report).write_to_file(&json_path, true)?;
    println!("  JSON report: {}", json_path.display());

    let summary = report.summary;
    println!();
    println!(
        "Overall progress: {}% ({} mastered, {} in progress, {} not started)",
        summary.global_percentage, summary.mastered, summary.in_progress, summary.not_started
    );

    Ok(())
}

// ============================================================================
// ask
// ============================================================================

async fn ask(config: &Config, lesson_id: &str, question: &str) -> anyhow::Result<()> {
    let lessons = LessonStore::from_config(&config.catalog)?;
    let lesson = lessons.get(lesson_id).ok_or_else(|| {
        anyhow::anyhow!(
            "Lesson not found: '{lesson_id}'\n\nSuggestion: Lesson ids look like lesson-1 .. lesson-{}",
            lessons.len()
        )
    })?;

    let service = HttpCompletionClient::from_config(&config.completion);
    let mut chat = TutorChat::new(&lesson.id, &lesson.title);
    let turn = chat.send(&service, question).await?;

    println!("{}", turn.text);
    Ok(())
}
