// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Renders fixup events and results in normal, quiet (CI), or JSON lines mode.

use cnab_oci::remotes::{FixupEvent, FixupEventType};
use serde::Serialize;
use std::time::Instant;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Listener that renders fixup events in this mode.
    ///
    /// Events go to stderr so a bundle written to stdout stays parseable.
    pub fn event_printer(&self) -> impl Fn(FixupEvent) + Send + Sync + 'static {
        let mode = self.mode;
        move |event| {
            if let Some(line) = render_event(mode, &event) {
                eprintln!("{line}");
            }
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => {
                // Print only the essential result
                println!("{message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "success",
                    message,
                    duration_secs: if self.start_time.is_some() {
                        Some(self.elapsed_secs())
                    } else {
                        None
                    },
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{json}");
                }
            }
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message,
                    duration_secs: if self.start_time.is_some() {
                        Some(self.elapsed_secs())
                    } else {
                        None
                    },
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct JsonFixupEvent<'a> {
    event: &'a str,
    #[serde(flatten)]
    details: &'a FixupEvent,
}

fn render_event(mode: OutputMode, event: &FixupEvent) -> Option<String> {
    match mode {
        OutputMode::Quiet => None,
        OutputMode::Json => serde_json::to_string(&JsonFixupEvent {
            event: "fixup",
            details: event,
        })
        .ok(),
        OutputMode::Normal => match event.event_type {
            FixupEventType::CopyImageStart => Some(format!(
                "  → {} => {}",
                event.source_image, event.destination_ref
            )),
            FixupEventType::Progress => {
                let (done, total) = event.progress.counts();
                let failed = event
                    .progress
                    .nodes()
                    .into_iter()
                    .find_map(|n| n.error.as_deref().map(|e| (n.descriptor.digest.clone(), e.to_string())));
                match failed {
                    Some((digest, error)) => Some(format!("    ✗ {digest}: {error}")),
                    None => Some(format!("    {done}/{total} descriptors")),
                }
            }
            FixupEventType::CopyImageEnd => match &event.error {
                Some(error) => Some(format!("  ✗ {}: {error}", event.source_image)),
                None if event.message.is_empty() => Some(format!("  ✓ {}", event.source_image)),
                None => Some(format!("  ✓ {}", event.message)),
            },
        },
    }
}
