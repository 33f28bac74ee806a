//! MedPrep Document Rendering
//!
//! Turns a lesson document handle (a remote PDF locator or inline text) into
//! an ordered sequence of page fragments, reporting progress as it goes.
//!
//! Rendering is incremental and cancellable: every call to
//! [`DocumentRenderer::open`] starts a new generation, and work belonging to an
//! older generation stops at the next page boundary. Consumers feed updates
//! into a [`DocumentView`], which discards anything that is not from the
//! generation it is currently showing.

pub mod decoder;
pub mod renderer;
pub mod transport;
pub mod view;

pub use decoder::{DecodedDocument, DocumentDecoder, PdfDecoder};
pub use renderer::{DocumentRenderer, RenderEvent, RenderTask, RenderUpdate, RendererConfig};
pub use transport::{ByteStream, DocumentTransport, HttpTransport, MemoryTransport};
pub use view::{step_zoom, DocumentView, ZoomDirection};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Horizontal space reserved around a page when fitting it to the viewport.
pub const PAGE_MARGIN_PX: f64 = 48.0;

/// Smallest display scale reachable through zooming.
pub const MIN_ZOOM: f64 = 0.5;

/// Largest display scale reachable through zooming.
pub const MAX_ZOOM: f64 = 2.0;

/// Increment applied by a single zoom step.
pub const ZOOM_STEP: f64 = 0.1;

/// Message shown to the learner when a document cannot be displayed.
pub const LOAD_FAILURE_MESSAGE: &str = "Failed to load PDF. Please try again.";

/// Errors that can occur while fetching or decoding a document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    /// The transport could not reach the document.
    #[error("document unreachable at {url}: {message}")]
    Unreachable {
        /// Locator that was requested.
        url: String,
        /// Underlying transport message.
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("document request to {url} failed with status {status}")]
    HttpStatus {
        /// Locator that was requested.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The bytes are not a format the decoder understands.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The bytes looked like a PDF but could not be decoded.
    #[error("failed to decode document: {0}")]
    Decode(String),

    /// The document decoded successfully but contains no pages.
    #[error("document contains no pages")]
    EmptyDocument,
}

impl LoadError {
    /// Creates an unreachable error for the given locator.
    #[must_use]
    pub fn unreachable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Returns true if retrying the same locator might succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::UnsupportedFormat(_) | Self::Decode(_) | Self::EmptyDocument => false,
        }
    }
}

/// User-facing description of a failed load.
///
/// Carries a displayable message and, when the document came from a URL, a
/// direct link the learner can open instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadFailure {
    /// Message suitable for display.
    pub message: String,
    /// Technical detail for logs and diagnostics.
    pub detail: String,
    /// Direct link to the original document, if there is one.
    pub fallback_url: Option<String>,
}

impl LoadFailure {
    /// Builds the user-facing failure for an error on the given handle.
    #[must_use]
    pub fn from_error(error: &LoadError, handle: &DocumentHandle) -> Self {
        Self {
            message: LOAD_FAILURE_MESSAGE.to_string(),
            detail: error.to_string(),
            fallback_url: handle.fallback_url().map(str::to_string),
        }
    }
}

/// Where a lesson document lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DocumentHandle {
    /// Remote (or server-relative) locator of a PDF.
    Url(String),
    /// Text shown directly, without decoding.
    Inline(String),
}

impl DocumentHandle {
    /// Creates a URL handle.
    #[must_use]
    pub fn url(locator: impl Into<String>) -> Self {
        Self::Url(locator.into())
    }

    /// Creates an inline-text handle.
    #[must_use]
    pub fn inline(text: impl Into<String>) -> Self {
        Self::Inline(text.into())
    }

    /// Returns true for inline text.
    #[must_use]
    pub const fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }

    /// The link offered when rendering fails.
    #[must_use]
    pub fn fallback_url(&self) -> Option<&str> {
        match self {
            Self::Url(url) => Some(url),
            Self::Inline(_) => None,
        }
    }
}

/// One rendered page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFragment {
    /// 1-based page number.
    pub page_number: u32,
    /// Width in pixels at the render scale.
    pub width: u32,
    /// Height in pixels at the render scale.
    pub height: u32,
    /// Scale the page was rendered at.
    pub scale: f64,
    /// Rendered page content.
    pub surface: String,
}

/// Lifecycle of a document view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewStatus {
    /// Nothing has been opened.
    #[default]
    Idle,
    /// Bytes are being fetched.
    Loading,
    /// Pages are being produced.
    Rendering,
    /// Every page has been rendered.
    Ready,
    /// Loading or decoding failed.
    Failed,
}

impl std::fmt::Display for ViewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Rendering => write!(f, "rendering"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
