// ABOUTME: Fixup lifecycle events and the ordered event delivery loop.
// ABOUTME: Events are queued without blocking copy work and fully drained before fixup returns.

use super::progress::{Progress, ProgressSnapshot};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixupEventType {
    CopyImageStart,
    CopyImageEnd,
    Progress,
}

impl fmt::Display for FixupEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FixupEventType::CopyImageStart => "copy-image-start",
            FixupEventType::CopyImageEnd => "copy-image-end",
            FixupEventType::Progress => "progress",
        };
        f.write_str(name)
    }
}

/// A progress or lifecycle notification for one image.
#[derive(Debug, Clone, Serialize)]
pub struct FixupEvent {
    pub source_image: String,
    pub destination_ref: String,
    pub event_type: FixupEventType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub progress: ProgressSnapshot,
}

/// Listener invoked for every event, in production order.
pub type EventCallback = Arc<dyn Fn(FixupEvent) + Send + Sync>;

/// Spawn the delivery loop. It ends once every sender has been dropped.
pub(crate) fn spawn_event_loop(
    callback: EventCallback,
) -> (mpsc::UnboundedSender<FixupEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<FixupEvent>();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            callback(event);
        }
    });
    (tx, handle)
}

/// Emits events for a single image, each carrying a fresh progress snapshot.
#[derive(Clone)]
pub struct EventNotifier {
    events: mpsc::UnboundedSender<FixupEvent>,
    source_image: String,
    destination_ref: String,
    progress: Arc<Progress>,
}

impl EventNotifier {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<FixupEvent>,
        source_image: impl Into<String>,
        destination_ref: impl Into<String>,
    ) -> Self {
        Self {
            events,
            source_image: source_image.into(),
            destination_ref: destination_ref.into(),
            progress: Progress::new(),
        }
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    pub fn notify(
        &self,
        event_type: FixupEventType,
        message: impl Into<String>,
        error: Option<&dyn std::error::Error>,
    ) {
        let event = FixupEvent {
            source_image: self.source_image.clone(),
            destination_ref: self.destination_ref.clone(),
            event_type,
            message: message.into(),
            error: error.map(ToString::to_string),
            progress: self.progress.snapshot(),
        };
        // The receiver only goes away after fixup returns.
        let _ = self.events.send(event);
    }

    pub fn report_progress(&self, error: Option<&dyn std::error::Error>) {
        self.notify(FixupEventType::Progress, "", error);
    }
}
