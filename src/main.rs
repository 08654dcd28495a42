use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;

mod config;
mod content;
mod error;
mod images;
mod llm;
mod models;
mod observer;
mod pipeline;
mod report;
mod schema;
mod scrape;
#[cfg(test)]
mod testing;

use config::Config;
use error::PipelineError;
use images::{HttpImageFetcher, ImageResolver};
use llm::OpenAiGenerator;
use models::{AnalyzeRequest, ScrapeRequest, ScrapeResponse};
use pipeline::{Pipeline, PipelineOptions, RunFlags};
use scrape::{FirecrawlScraper, HtmlScraper, ScrapeError, Scraper};

#[derive(Parser)]
#[command(name = "broker-ai-api", about = "Scrape an apartment listing and have Broker AI analyze it")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Analyze one listing and print the result
    Analyze {
        /// Listing URL; defaults to LISTING_URL
        url: Option<String>,
        /// Do not attach listing photos to the analysis
        #[arg(long)]
        no_images: bool,
        /// Stop after extracting the apartment attributes
        #[arg(long)]
        skip_analysis: bool,
        /// Print the run as JSON instead of a text report
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    default_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env()?;
    let pipeline = Arc::new(build_pipeline(&cfg)?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pipeline, &cfg).await,
        Command::Analyze {
            url,
            no_images,
            skip_analysis,
            json,
        } => {
            let url = url.unwrap_or_else(|| cfg.listing_url.clone());
            let flags = RunFlags {
                include_images: no_images.then_some(false),
                skip_analysis: skip_analysis.then_some(true),
                max_images: None,
            };
            analyze_once(&pipeline, &url, flags, json).await
        }
    }
}

fn build_pipeline(cfg: &Config) -> anyhow::Result<Pipeline> {
    let scraper: Arc<dyn Scraper> = match &cfg.firecrawl_api_key {
        Some(key) => {
            tracing::info!("using Firecrawl scraper");
            Arc::new(FirecrawlScraper::new(key.clone()).with_base_url(cfg.firecrawl_base_url.clone()))
        }
        None => Arc::new(HtmlScraper::new(cfg.insecure_ssl)?),
    };

    let generator = OpenAiGenerator::new(cfg.llm_api_key.clone())
        .with_base_url(cfg.llm_base_url.clone())
        .with_model(cfg.llm_model.clone())
        .with_temperature(cfg.llm_temperature);

    let fetcher = HttpImageFetcher::new(cfg.image_fetch_timeout, cfg.insecure_ssl)?;
    let resolver = ImageResolver::new(Arc::new(fetcher))
        .with_timeout(cfg.image_fetch_timeout)
        .with_min_bytes(cfg.min_image_bytes);

    Ok(Pipeline::new(
        scraper,
        Arc::new(generator),
        resolver,
        PipelineOptions::from(cfg),
    ))
}

async fn analyze_once(pipeline: &Pipeline, url: &str, flags: RunFlags, as_json: bool) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    // Failures propagate to main, which reports them and exits non-zero.
    let run = pipeline.run_with_cancel(url, flags, cancel).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print!("{}", report::render_report(&run));
    }
    Ok(())
}

async fn serve(pipeline: Arc<Pipeline>, cfg: &Config) -> anyhow::Result<()> {
    let state = AppState {
        pipeline,
        default_url: cfg.listing_url.clone(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/scrape", post(scrape_endpoint))
        .route("/analyze", post(analyze_endpoint))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn scrape_endpoint(State(state): State<AppState>, Json(req): Json<ScrapeRequest>) -> Response {
    match state.pipeline.scraper().scrape(&req.url).await {
        Ok(document) => {
            let response = ScrapeResponse {
                markdown: document.markdown,
                source_url: document.url,
                images: document.image_references,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => error_response(&PipelineError::Scrape(e)),
    }
}

async fn analyze_endpoint(State(state): State<AppState>, Json(req): Json<AnalyzeRequest>) -> Response {
    let url = req.url.unwrap_or_else(|| state.default_url.clone());
    let flags = RunFlags {
        include_images: req.include_images,
        skip_analysis: req.skip_analysis,
        max_images: req.max_images.map(content::clamp_max_images),
    };

    match state.pipeline.run(&url, flags).await {
        Ok(run) => (StatusCode::OK, Json(run)).into_response(),
        Err(e) => error_response(&e),
    }
}

fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::Scrape(ScrapeError::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
        PipelineError::Scrape(ScrapeError::NotHtml) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Scrape(_) | PipelineError::Generation { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &PipelineError) -> Response {
    (status_for(error), Json(json!({"detail": error.to_string()}))).into_response()
}
