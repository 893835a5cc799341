//! Progress and log event bus
//!
//! Pipelines and steps publish through an [`Emitter`]; a presentation layer
//! drains the matching receiver on its own task. Delivery is in emission
//! order. An emitter without a receiver ([`Emitter::noop`]) is valid and only
//! mirrors log events to `tracing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default channel capacity
pub const DEFAULT_CAPACITY: usize = 256;

/// Severity of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Success,
}

/// Progress through a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step_index: usize,
    pub total_steps: usize,
    /// In `[0, 1]`
    pub fraction_complete: f64,
    pub message: String,
    /// Set on the last event of a run
    pub terminal: bool,
}

/// A log line produced by a pipeline or a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Anything sent over the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Progress(ProgressEvent),
    Log(LogEvent),
}

/// Receiving half of the bus
pub type EventReceiver = mpsc::Receiver<Event>;

/// Create a bus with the given buffer size
pub fn channel(capacity: usize) -> (Emitter, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Emitter { tx: Some(tx) }, rx)
}

/// Sending half of the bus. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Emitter {
    tx: Option<mpsc::Sender<Event>>,
}

impl Emitter {
    /// An emitter nobody listens to
    pub fn noop() -> Self {
        Self { tx: None }
    }

    async fn send(&self, event: Event) {
        if let Some(tx) = &self.tx {
            // Blocks while the buffer is full; a dropped receiver is not an error
            if tx.send(event).await.is_err() {
                debug!("Event receiver dropped, discarding event");
            }
        }
    }

    /// Publish progress
    pub async fn progress(
        &self,
        step_index: usize,
        total_steps: usize,
        message: impl Into<String>,
        terminal: bool,
    ) {
        let fraction_complete = if total_steps == 0 {
            1.0
        } else {
            (step_index as f64 / total_steps as f64).clamp(0.0, 1.0)
        };
        self.send(Event::Progress(ProgressEvent {
            step_index,
            total_steps,
            fraction_complete,
            message: message.into(),
            terminal,
        }))
        .await;
    }

    /// Publish a log line
    pub async fn log(&self, level: Severity, message: impl Into<String>) {
        let message = message.into();
        match level {
            Severity::Debug => debug!("{}", message),
            Severity::Info | Severity::Success => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
        self.send(Event::Log(LogEvent {
            level,
            message,
            timestamp: Utc::now(),
        }))
        .await;
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.log(Severity::Debug, message).await
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(Severity::Info, message).await
    }

    pub async fn warning(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message).await
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message).await
    }

    pub async fn success(&self, message: impl Into<String>) {
        self.log(Severity::Success, message).await
    }
}
