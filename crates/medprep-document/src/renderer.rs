//! Incremental, cancellable document rendering.
//!
//! [`DocumentRenderer::open`] hands back a [`RenderTask`] that yields
//! [`RenderUpdate`]s as bytes arrive and pages are produced. Pages are
//! rendered strictly in order, one at a time. Opening another document bumps
//! the renderer's generation, and the previous job stops at its next check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::decoder::{DecodedDocument, DocumentDecoder};
use crate::transport::DocumentTransport;
use crate::{DocumentHandle, LoadError, LoadFailure, PageFragment, PAGE_MARGIN_PX};

/// Something that happened while rendering one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderEvent {
    /// Bytes received so far. Only emitted when the total is known.
    Progress {
        /// Bytes received.
        loaded: u64,
        /// Announced size.
        total: u64,
        /// `loaded / total`, capped at 1.
        fraction: f64,
    },
    /// The document was decoded.
    Metadata {
        /// Number of pages.
        page_count: u32,
        /// Scale every page is rendered at.
        scale: f64,
    },
    /// A page finished rendering.
    Page(PageFragment),
    /// Page counter after each page.
    PagesRendered {
        /// Pages rendered so far.
        rendered: u32,
        /// Total pages.
        total: u32,
    },
    /// All pages were rendered.
    Finished,
    /// Loading or decoding failed.
    Failed(LoadFailure),
}

impl RenderEvent {
    /// Returns true for events after which nothing else is sent.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed(_))
    }
}

/// A [`RenderEvent`] tagged with the generation that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderUpdate {
    /// Generation id of the render job.
    pub generation: u64,
    /// What happened.
    pub event: RenderEvent,
}

/// Receiving side of one render job.
///
/// Dropping the task cancels the job at its next page boundary.
#[derive(Debug)]
pub struct RenderTask {
    generation: u64,
    receiver: mpsc::Receiver<RenderUpdate>,
}

impl RenderTask {
    /// Generation id of this job.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for the next update. Returns `None` once the job has ended.
    pub async fn next(&mut self) -> Option<RenderUpdate> {
        self.receiver.recv().await
    }

    /// Drains every remaining update.
    pub async fn collect(mut self) -> Vec<RenderUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = self.next().await {
            updates.push(update);
        }
        updates
    }
}

/// Renderer settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererConfig {
    /// Width of the area pages are fitted into, in pixels.
    pub viewport_width: f64,
    /// Space reserved around the page, in pixels.
    pub margin: f64,
    /// Buffered updates per job before the job waits for the consumer.
    pub channel_capacity: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            viewport_width: 848.0,
            margin: PAGE_MARGIN_PX,
            channel_capacity: 32,
        }
    }
}

impl RendererConfig {
    /// Width available to a page after the margin.
    #[must_use]
    pub fn content_width(&self) -> f64 {
        (self.viewport_width - self.margin).max(1.0)
    }

    /// Scale that fits a page of `native_width` into the viewport.
    #[must_use]
    pub fn fit_scale(&self, native_width: f64) -> f64 {
        self.content_width() / native_width
    }
}

/// Renders document handles into page fragments.
///
/// Cloning is cheap; clones share the generation counter, so opening a
/// document through any clone supersedes work started by the others.
#[derive(Clone)]
pub struct DocumentRenderer {
    transport: Arc<dyn DocumentTransport>,
    decoder: Arc<dyn DocumentDecoder>,
    config: RendererConfig,
    generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for DocumentRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRenderer")
            .field("config", &self.config)
            .field("generation", &self.current_generation())
            .finish_non_exhaustive()
    }
}

impl DocumentRenderer {
    /// Creates a renderer.
    #[must_use]
    pub fn new(
        transport: Arc<dyn DocumentTransport>,
        decoder: Arc<dyn DocumentDecoder>,
        config: RendererConfig,
    ) -> Self {
        Self {
            transport,
            decoder,
            config,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A renderer with the same transport and decoder but its own generation
    /// counter, so documents opened through it never supersede this one's.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.decoder),
            self.config,
        )
    }

    /// The renderer settings.
    #[must_use]
    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Generation id of the most recently opened document.
    #[must_use]
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cancels whatever is rendering without opening anything new.
    pub fn cancel(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Starts rendering `handle`, superseding any earlier job.
    ///
    /// Inline text is turned into a single fragment immediately. URL handles
    /// are fetched and rendered on a spawned task, so this must be called
    /// from within a Tokio runtime.
    #[instrument(skip(self, handle), fields(inline = handle.is_inline()))]
    pub fn open(&self, handle: DocumentHandle) -> RenderTask {
        let generation = self.cancel();
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(4));

        match handle {
            DocumentHandle::Inline(text) => {
                let fragment = PageFragment {
                    page_number: 1,
                    width: to_pixels(self.config.content_width()),
                    height: 0,
                    scale: 1.0,
                    surface: text,
                };
                let events = [
                    RenderEvent::Metadata {
                        page_count: 1,
                        scale: 1.0,
                    },
                    RenderEvent::Page(fragment),
                    RenderEvent::PagesRendered {
                        rendered: 1,
                        total: 1,
                    },
                    RenderEvent::Finished,
                ];
                for event in events {
                    // Capacity is at least four, so this cannot fill up.
                    let _ = sender.try_send(RenderUpdate { generation, event });
                }
                debug!(generation, "Inline document rendered");
            }
            DocumentHandle::Url(locator) => {
                let job = RenderJob {
                    transport: Arc::clone(&self.transport),
                    decoder: Arc::clone(&self.decoder),
                    config: self.config,
                    current: Arc::clone(&self.generation),
                    generation,
                    sender,
                };
                tokio::spawn(job.run(locator));
            }
        }

        RenderTask {
            generation,
            receiver,
        }
    }
}

/// Why a job stopped before finishing.
enum Stop {
    Superseded,
    Failed(LoadError),
}

impl From<LoadError> for Stop {
    fn from(error: LoadError) -> Self {
        Self::Failed(error)
    }
}

struct RenderJob {
    transport: Arc<dyn DocumentTransport>,
    decoder: Arc<dyn DocumentDecoder>,
    config: RendererConfig,
    current: Arc<AtomicU64>,
    generation: u64,
    sender: mpsc::Sender<RenderUpdate>,
}

impl RenderJob {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation && !self.sender.is_closed()
    }

    async fn emit(&self, event: RenderEvent) -> Result<(), Stop> {
        if !self.is_current() {
            return Err(Stop::Superseded);
        }
        self.sender
            .send(RenderUpdate {
                generation: self.generation,
                event,
            })
            .await
            .map_err(|_| Stop::Superseded)
    }

    async fn run(self, locator: String) {
        match self.render(&locator).await {
            Ok(pages) => {
                if self.emit(RenderEvent::Finished).await.is_ok() {
                    info!(generation = self.generation, pages, "Document rendered");
                }
            }
            Err(Stop::Superseded) => {
                debug!(generation = self.generation, "Render superseded");
            }
            Err(Stop::Failed(error)) => {
                warn!(generation = self.generation, error = %error, "Document failed to load");
                let failure = LoadFailure::from_error(&error, &DocumentHandle::Url(locator));
                let _ = self.emit(RenderEvent::Failed(failure)).await;
            }
        }
    }

    async fn render(&self, locator: &str) -> Result<u32, Stop> {
        let bytes = self.fetch(locator).await?;
        let document = self.decode(bytes).await?;

        let page_count = document.page_count();
        if page_count == 0 {
            return Err(LoadError::EmptyDocument.into());
        }

        let (first_width, _) = document.page_size(1)?;
        if first_width <= 0.0 {
            return Err(LoadError::decode("first page has zero width").into());
        }
        let scale = self.config.fit_scale(first_width);
        self.emit(RenderEvent::Metadata { page_count, scale }).await?;

        for page_number in 1..=page_count {
            if !self.is_current() {
                return Err(Stop::Superseded);
            }

            let fragment = render_page(document.as_ref(), page_number, scale)?;
            self.emit(RenderEvent::Page(fragment)).await?;
            self.emit(RenderEvent::PagesRendered {
                rendered: page_number,
                total: page_count,
            })
            .await?;

            tokio::task::yield_now().await;
        }

        Ok(page_count)
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, Stop> {
        let mut body = self.transport.fetch(locator).await?;
        let mut bytes = Vec::with_capacity(
            body.total
                .and_then(|total| usize::try_from(total).ok())
                .unwrap_or_default(),
        );

        while let Some(chunk) = body.chunks.next().await {
            if !self.is_current() {
                return Err(Stop::Superseded);
            }
            bytes.extend_from_slice(&chunk?);

            if let Some(total) = body.total {
                let loaded = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
                #[allow(clippy::cast_precision_loss)]
                let fraction = (loaded as f64 / total as f64).min(1.0);
                self.emit(RenderEvent::Progress {
                    loaded,
                    total,
                    fraction,
                })
                .await?;
            }
        }

        Ok(bytes)
    }

    async fn decode(&self, bytes: Vec<u8>) -> Result<Box<dyn DecodedDocument>, Stop> {
        let decoder = Arc::clone(&self.decoder);
        let document = tokio::task::spawn_blocking(move || decoder.decode(&bytes))
            .await
            .map_err(|e| LoadError::decode(format!("decoder task failed: {e}")))??;
        Ok(document)
    }
}

fn render_page(
    document: &dyn DecodedDocument,
    page_number: u32,
    scale: f64,
) -> Result<PageFragment, LoadError> {
    let (width, height) = document.page_size(page_number)?;
    let surface = document.page_text(page_number).unwrap_or_else(|e| {
        warn!(page = page_number, error = %e, "Page has no extractable text");
        String::new()
    });

    Ok(PageFragment {
        page_number,
        width: to_pixels(width * scale),
        height: to_pixels(height * scale),
        scale,
        surface: surface.trim().to_string(),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_pixels(value: f64) -> u32 {
    value.round().clamp(0.0, f64::from(u32::MAX)) as u32
}
