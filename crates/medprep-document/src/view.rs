//! Per-lesson viewer state.
//!
//! A [`DocumentView`] follows exactly one render generation at a time. Updates
//! from any other generation are dropped, so swapping documents mid-render can
//! never mix pages from two handles.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::renderer::{RenderEvent, RenderUpdate};
use crate::{LoadFailure, PageFragment, ViewStatus, MAX_ZOOM, MIN_ZOOM, ZOOM_STEP};

/// Zoom direction requested by the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoomDirection {
    /// Enlarge.
    In,
    /// Shrink.
    Out,
}

/// Viewer state for one lesson document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    /// Generation currently displayed.
    pub generation: Option<u64>,
    /// Lifecycle status.
    pub status: ViewStatus,
    /// Load progress in `[0, 1]`, when the size is known.
    pub progress: Option<f64>,
    /// Pages rendered so far.
    pub pages_rendered: u32,
    /// Total pages, once decoded.
    pub total_pages: Option<u32>,
    /// Scale pages were rendered at.
    pub render_scale: Option<f64>,
    /// Scale the learner is viewing at.
    pub display_scale: f64,
    /// Rendered pages, in page order.
    pub pages: Vec<PageFragment>,
    /// Failure details, when loading failed.
    pub failure: Option<LoadFailure>,
}

impl DocumentView {
    /// Creates an idle view.
    #[must_use]
    pub fn new() -> Self {
        Self {
            display_scale: 1.0,
            ..Self::default()
        }
    }

    /// Resets the view to follow `generation`.
    pub fn begin(&mut self, generation: u64) {
        *self = Self {
            generation: Some(generation),
            status: ViewStatus::Loading,
            ..Self::new()
        };
    }

    /// Returns true once every page is rendered.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == ViewStatus::Ready
    }

    /// Applies an update, returning false if it was ignored.
    pub fn apply(&mut self, update: &RenderUpdate) -> bool {
        if self.generation != Some(update.generation) {
            debug!(
                update = update.generation,
                current = ?self.generation,
                "Dropping stale render update"
            );
            return false;
        }

        match &update.event {
            RenderEvent::Progress { fraction, .. } => {
                self.progress = Some(*fraction);
            }
            RenderEvent::Metadata { page_count, scale } => {
                self.status = ViewStatus::Rendering;
                self.total_pages = Some(*page_count);
                self.render_scale = Some(*scale);
                self.display_scale = *scale;
            }
            RenderEvent::Page(fragment) => {
                let expected = u32::try_from(self.pages.len() + 1).unwrap_or(u32::MAX);
                if fragment.page_number != expected {
                    return false;
                }
                self.pages.push(fragment.clone());
            }
            RenderEvent::PagesRendered { rendered, .. } => {
                self.pages_rendered = *rendered;
            }
            RenderEvent::Finished => {
                self.status = ViewStatus::Ready;
            }
            RenderEvent::Failed(failure) => {
                self.status = ViewStatus::Failed;
                self.failure = Some(failure.clone());
            }
        }
        true
    }

    /// Steps the display scale, keeping it within the zoom bounds.
    ///
    /// Rendered pages keep their render scale; only the display scale moves.
    pub fn zoom(&mut self, direction: ZoomDirection) -> f64 {
        self.display_scale = step_zoom(self.display_scale, direction);
        self.display_scale
    }
}

/// Applies one zoom step to `scale`.
#[must_use]
pub fn step_zoom(scale: f64, direction: ZoomDirection) -> f64 {
    let next = match direction {
        ZoomDirection::In => (scale + ZOOM_STEP).min(MAX_ZOOM),
        ZoomDirection::Out => (scale - ZOOM_STEP).max(MIN_ZOOM),
    };
    (next * 1000.0).round() / 1000.0
}
