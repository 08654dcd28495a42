//! The scrape -> extract -> analyze chain.
//!
//! Each stage finishes before the next one starts and only adds to the run
//! record. Any stage failure ends the run; nothing is retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::content::{build_analysis_content, build_extraction_content, excerpt};
use crate::error::PipelineError;
use crate::images::ImageResolver;
use crate::llm::{generate_record, StructuredGenerator};
use crate::models::{AnalysisRecord, ApartmentRecord, ScrapedDocument};
use crate::observer::{PipelineEvent, PipelineObserver, Stage, TracingObserver};
use crate::schema::{analysis_schema, apartment_schema};
use crate::scrape::Scraper;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub include_images: bool,
    pub skip_analysis: bool,
    pub max_images: usize,
    pub excerpt_chars: usize,
    pub run_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            include_images: true,
            skip_analysis: false,
            max_images: 6,
            excerpt_chars: 6000,
            run_timeout: None,
        }
    }
}

impl From<&Config> for PipelineOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            include_images: cfg.include_images,
            skip_analysis: cfg.skip_analysis,
            max_images: cfg.max_images,
            excerpt_chars: cfg.excerpt_chars,
            run_timeout: cfg.run_timeout,
        }
    }
}

/// Per-run overrides of the configured options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunFlags {
    pub include_images: Option<bool>,
    pub skip_analysis: Option<bool>,
    pub max_images: Option<usize>,
}

/// Everything a run produced, in stage order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub url: String,
    pub markdown: String,
    pub image_references: Vec<String>,
    pub apartment: ApartmentRecord,
    pub images_attached: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisRecord>,
}

pub struct Pipeline {
    scraper: Arc<dyn Scraper>,
    generator: Arc<dyn StructuredGenerator>,
    resolver: ImageResolver,
    observer: Arc<dyn PipelineObserver>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        scraper: Arc<dyn Scraper>,
        generator: Arc<dyn StructuredGenerator>,
        resolver: ImageResolver,
        options: PipelineOptions,
    ) -> Self {
        Self {
            scraper,
            generator,
            resolver,
            observer: Arc::new(TracingObserver),
            options,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn scraper(&self) -> &Arc<dyn Scraper> {
        &self.scraper
    }

    pub async fn run(&self, url: &str, flags: RunFlags) -> Result<PipelineRun, PipelineError> {
        self.run_with_cancel(url, flags, CancellationToken::new()).await
    }

    /// Run all stages, stopping early if `cancel` fires or the configured
    /// deadline passes.
    pub async fn run_with_cancel(
        &self,
        url: &str,
        flags: RunFlags,
        cancel: CancellationToken,
    ) -> Result<PipelineRun, PipelineError> {
        info!(url, "pipeline run started");

        let stages = self.run_stages(url, flags, &cancel);
        let result = match self.options.run_timeout {
            Some(limit) => match tokio::time::timeout(limit, stages).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    Err(PipelineError::DeadlineExceeded(limit))
                }
            },
            None => stages.await,
        };

        match &result {
            Ok(run) => info!(
                url,
                images_attached = run.images_attached,
                analyzed = run.analysis.is_some(),
                "pipeline run finished"
            ),
            Err(e) => warn!(url, error = %e, "pipeline run failed"),
        }
        result
    }

    async fn run_stages(
        &self,
        url: &str,
        flags: RunFlags,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun, PipelineError> {
        let include_images = flags.include_images.unwrap_or(self.options.include_images);
        let skip_analysis = flags.skip_analysis.unwrap_or(self.options.skip_analysis);
        let max_images = flags.max_images.unwrap_or(self.options.max_images);

        let document = self
            .stage(Stage::Scrape, cancel, async {
                self.scraper.scrape(url).await.map_err(PipelineError::from)
            })
            .await?;

        let apartment = self
            .stage(Stage::Extract, cancel, self.extract(&document))
            .await?;

        let (analysis, images_attached) = if skip_analysis {
            (None, 0)
        } else {
            let max = if include_images { max_images } else { 0 };
            let (analysis, attached) = self
                .stage(Stage::Analyze, cancel, self.analyze(&document, &apartment, max))
                .await?;
            (Some(analysis), attached)
        };

        Ok(PipelineRun {
            url: document.url,
            markdown: document.markdown,
            image_references: document.image_references,
            apartment,
            images_attached,
            analysis,
        })
    }

    async fn stage<T>(
        &self,
        stage: Stage,
        cancel: &CancellationToken,
        work: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        self.observer.on_event(&PipelineEvent::StageStarted(stage));
        let output = tokio::select! {
            result = work => result?,
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };
        self.observer.on_event(&PipelineEvent::StageCompleted(stage));
        Ok(output)
    }

    async fn extract(&self, document: &ScrapedDocument) -> Result<ApartmentRecord, PipelineError> {
        let parts = build_extraction_content(&document.markdown, &document.url);
        generate_record(self.generator.as_ref(), &apartment_schema(), &parts)
            .await
            .map_err(|source| PipelineError::Generation {
                stage: Stage::Extract,
                source,
            })
    }

    async fn analyze(
        &self,
        document: &ScrapedDocument,
        apartment: &ApartmentRecord,
        max_images: usize,
    ) -> Result<(AnalysisRecord, usize), PipelineError> {
        let images = self
            .resolver
            .resolve_images(&document.image_references, max_images, self.observer.as_ref())
            .await;

        let text = excerpt(&document.markdown, self.options.excerpt_chars);
        let parts = build_analysis_content(apartment, text, &images, max_images);
        let attached = parts.len() - 1;

        let analysis = generate_record(self.generator.as_ref(), &analysis_schema(), &parts)
            .await
            .map_err(|source| PipelineError::Generation {
                stage: Stage::Analyze,
                source,
            })?;

        Ok((analysis, attached))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Part;
    use crate::llm::GenerationError;
    use crate::testing::{
        analysis_json, MockGenerator, MockImageFetcher, MockScraper, RecordingObserver,
    };
    use serde_json::json;

    fn document() -> ScrapedDocument {
        ScrapedDocument {
            url: "https://example.com/listing/1".into(),
            markdown: "# Sunny studio\n\n38 m², 2nd floor, 52 000 EUR".into(),
            image_references: vec![
                "https://example.com/1.jpg".into(),
                "https://example.com/2.png".into(),
                "data:image/jpg;base64,AAAA".into(),
            ],
        }
    }

    fn fetcher() -> Arc<MockImageFetcher> {
        Arc::new(
            MockImageFetcher::new()
                .with_image("https://example.com/1.jpg", 200, Some("image/jpeg"), 8000)
                .with_image("https://example.com/2.png", 200, Some("image/png"), 8000),
        )
    }

    fn pipeline(
        scraper: MockScraper,
        generator: Arc<MockGenerator>,
        observer: Arc<RecordingObserver>,
        options: PipelineOptions,
    ) -> Pipeline {
        Pipeline::new(
            Arc::new(scraper),
            generator,
            ImageResolver::new(fetcher()),
            options,
        )
        .with_observer(observer)
    }

    fn generator() -> Arc<MockGenerator> {
        Arc::new(
            MockGenerator::new()
                .with_response("ApartmentExtraction", json!({"title": "Sunny studio", "areaSqm": 38}))
                .with_response("ApartmentAnalysis", analysis_json()),
        )
    }

    #[tokio::test]
    async fn test_full_run() {
        let generator = generator();
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = pipeline(
            MockScraper::new(document()),
            generator.clone(),
            observer.clone(),
            PipelineOptions {
                max_images: 2,
                ..Default::default()
            },
        );

        let run = pipeline
            .run("https://example.com/listing/1", RunFlags::default())
            .await
            .unwrap();

        assert_eq!(run.apartment.title, "Sunny studio");
        assert_eq!(run.apartment.area_sqm, Some(38.0));
        assert_eq!(run.images_attached, 2);
        assert_eq!(
            run.analysis.unwrap().summary_and_recommendation,
            "Consider with caveats."
        );

        assert_eq!(
            observer.stages(),
            vec![
                PipelineEvent::StageStarted(Stage::Scrape),
                PipelineEvent::StageCompleted(Stage::Scrape),
                PipelineEvent::StageStarted(Stage::Extract),
                PipelineEvent::StageCompleted(Stage::Extract),
                PipelineEvent::StageStarted(Stage::Analyze),
                PipelineEvent::StageCompleted(Stage::Analyze),
            ]
        );

        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].schema, "ApartmentExtraction");
        assert!(matches!(&calls[0].parts[0], Part::Text(t) if t.contains("52 000 EUR")));
        assert_eq!(calls[1].schema, "ApartmentAnalysis");
        assert_eq!(calls[1].parts.len(), 3);
        assert!(matches!(&calls[1].parts[0], Part::Text(t) if t.contains("\"areaSqm\": 38.0")));
    }

    #[tokio::test]
    async fn test_skip_analysis_stops_after_extraction() {
        let generator = generator();
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = pipeline(
            MockScraper::new(document()),
            generator.clone(),
            observer.clone(),
            PipelineOptions::default(),
        );

        let run = pipeline
            .run(
                "https://example.com/listing/1",
                RunFlags {
                    skip_analysis: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(run.analysis.is_none());
        assert_eq!(generator.calls().len(), 1);
        assert!(!observer
            .stages()
            .contains(&PipelineEvent::StageStarted(Stage::Analyze)));
    }

    #[tokio::test]
    async fn test_without_images_sends_text_only() {
        let generator = generator();
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = pipeline(
            MockScraper::new(document()),
            generator.clone(),
            observer.clone(),
            PipelineOptions {
                include_images: false,
                ..Default::default()
            },
        );

        let run = pipeline
            .run("https://example.com/listing/1", RunFlags::default())
            .await
            .unwrap();

        assert_eq!(run.images_attached, 0);
        assert_eq!(generator.calls()[1].parts.len(), 1);
        assert!(observer.images().is_empty());
    }

    #[tokio::test]
    async fn test_scrape_failure_aborts_run() {
        let generator = generator();
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = pipeline(
            MockScraper::failing("blocked by provider"),
            generator.clone(),
            observer.clone(),
            PipelineOptions::default(),
        );

        let err = pipeline
            .run("https://example.com/listing/1", RunFlags::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Scrape(_)));
        assert!(generator.calls().is_empty());
        assert_eq!(
            observer.stages(),
            vec![PipelineEvent::StageStarted(Stage::Scrape)]
        );
    }

    #[tokio::test]
    async fn test_extraction_schema_mismatch_is_fatal() {
        let generator = Arc::new(
            MockGenerator::new().with_response("ApartmentExtraction", json!({"price": 1000})),
        );
        let pipeline = pipeline(
            MockScraper::new(document()),
            generator,
            Arc::new(RecordingObserver::new()),
            PipelineOptions::default(),
        );

        let err = pipeline
            .run("https://example.com/listing/1", RunFlags::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Generation {
                stage: Stage::Extract,
                source: GenerationError::Parse(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_analysis_provider_error_is_fatal() {
        let generator = Arc::new(
            MockGenerator::new().with_response("ApartmentExtraction", json!({"title": "Flat"})),
        );
        let pipeline = pipeline(
            MockScraper::new(document()),
            generator,
            Arc::new(RecordingObserver::new()),
            PipelineOptions::default(),
        );

        let err = pipeline
            .run("https://example.com/listing/1", RunFlags::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Generation {
                stage: Stage::Analyze,
                source: GenerationError::Api { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let generator = generator();
        let pipeline = pipeline(
            MockScraper::new(document()),
            generator.clone(),
            Arc::new(RecordingObserver::new()),
            PipelineOptions::default(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline
            .run_with_cancel("https://example.com/listing/1", RunFlags::default(), cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert!(generator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let pipeline = pipeline(
            MockScraper::new(document()).with_delay(Duration::from_millis(500)),
            generator(),
            Arc::new(RecordingObserver::new()),
            PipelineOptions {
                run_timeout: Some(Duration::from_millis(20)),
                ..Default::default()
            },
        );

        let err = pipeline
            .run("https://example.com/listing/1", RunFlags::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::DeadlineExceeded(_)));
    }
}
