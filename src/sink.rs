//! Output streams of the fetch stage.
//!
//! Two parallel streams leave the stage: fetched content and per-URL
//! status. Either side can be disabled; emitting to a disabled stream is a
//! no-op so callers never branch on sink configuration.

use crate::datum::{FetchedDatum, StatusDatum};

/// Cloneable handle for emitting stage output.
#[derive(Clone)]
pub struct OutputSink {
    content_tx: Option<flume::Sender<FetchedDatum>>,
    status_tx: Option<flume::Sender<StatusDatum>>,
}

impl OutputSink {
    /// Both streams enabled.
    pub fn channels() -> (
        Self,
        flume::Receiver<FetchedDatum>,
        flume::Receiver<StatusDatum>,
    ) {
        let (content_tx, content_rx) = flume::unbounded();
        let (status_tx, status_rx) = flume::unbounded();
        (
            Self {
                content_tx: Some(content_tx),
                status_tx: Some(status_tx),
            },
            content_rx,
            status_rx,
        )
    }

    /// Status stream only; content records are discarded.
    pub fn status_only() -> (Self, flume::Receiver<StatusDatum>) {
        let (status_tx, status_rx) = flume::unbounded();
        (
            Self {
                content_tx: None,
                status_tx: Some(status_tx),
            },
            status_rx,
        )
    }

    /// Discards everything. Used by dry runs that only want counters.
    pub fn disabled() -> Self {
        Self {
            content_tx: None,
            status_tx: None,
        }
    }

    pub fn content(&self, datum: FetchedDatum) {
        if let Some(tx) = &self.content_tx {
            if tx.send(datum).is_err() {
                tracing::warn!("content receiver dropped, discarding fetched datum");
            }
        }
    }

    pub fn status(&self, datum: StatusDatum) {
        if let Some(tx) = &self.status_tx {
            if tx.send(datum).is_err() {
                tracing::warn!("status receiver dropped, discarding status datum");
            }
        }
    }
}
