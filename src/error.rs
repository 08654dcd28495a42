use std::time::Duration;

use crate::llm::GenerationError;
use crate::observer::Stage;
use crate::scrape::ScrapeError;

/// Failures that abort a pipeline run. Per-image problems never get here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("scrape failed: {0}")]
    Scrape(#[from] ScrapeError),
    #[error("{stage} generation failed: {source}")]
    Generation {
        stage: Stage,
        #[source]
        source: GenerationError,
    },
    #[error("run cancelled")]
    Cancelled,
    #[error("run exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}
