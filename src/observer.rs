use std::fmt;

use tracing::info;

use crate::images::{ImageMime, SkipReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scrape,
    Extract,
    Analyze,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Scrape => "scrape",
            Stage::Extract => "extract",
            Stage::Analyze => "analyze",
        })
    }
}

/// Checkpoints reported while a run progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StageStarted(Stage),
    StageCompleted(Stage),
    ImageAccepted { reference: String, mime: ImageMime },
    ImageSkipped { reference: String, reason: SkipReason },
}

/// Receives pipeline events. Must not block; it is called inline.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Default observer: forwards every event to `tracing`.
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StageStarted(stage) => info!(%stage, "stage started"),
            PipelineEvent::StageCompleted(stage) => info!(%stage, "stage completed"),
            PipelineEvent::ImageAccepted { reference, mime } => {
                info!(%reference, %mime, "image accepted")
            }
            PipelineEvent::ImageSkipped { reference, reason } => {
                info!(%reference, %reason, "image skipped")
            }
        }
    }
}
