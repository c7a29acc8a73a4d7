use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use precario::api::{build_router, ApiContext};
use precario::config::{self, Settings};
use precario::db::sqlite::open_database;
use precario::pipeline::llm::{LlmClient, OllamaClient, ReasoningService};
use precario::pipeline::ocr::OllamaVisionOcr;
use precario::pipeline::render::PdfiumRenderer;
use precario::pipeline::runner::PipelineEngines;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let settings = Settings::from_env();

    if let Err(e) = std::fs::create_dir_all(settings.documents_dir()) {
        tracing::error!(error = %e, "Cannot create data directory");
        std::process::exit(1);
    }

    // Opening the database also runs pending migrations
    if let Err(e) = open_database(&settings.database_path()) {
        tracing::error!(error = %e, path = %settings.database_path().display(), "Database setup failed");
        std::process::exit(1);
    }

    let renderer = match PdfiumRenderer::new() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::error!(error = %e, "PDFium library not found, cannot render PDFs");
            std::process::exit(1);
        }
    };

    // Blocking reqwest clients must be built before the async runtime starts
    let ollama = Arc::new(OllamaClient::new(&settings.ollama_url, 300));
    let reasoning = resolve_reasoning(ollama.clone(), &settings);
    let ocr = Arc::new(OllamaVisionOcr::new(ollama, settings.vision_model.clone()));

    let engines = PipelineEngines {
        renderer,
        ocr,
        reasoning: Arc::new(reasoning),
    };
    let ctx = ApiContext::new(
        settings.database_path(),
        settings.documents_dir(),
        engines,
    );

    let runtime = tokio::runtime::Runtime::new().expect("Failed to start async runtime");
    runtime.block_on(async {
        let app = build_router(ctx);
        let listener = match tokio::net::TcpListener::bind(&settings.bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, addr = %settings.bind_addr, "Cannot bind");
                std::process::exit(1);
            }
        };
        tracing::info!(addr = %settings.bind_addr, "Listening");
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Server error");
        }
    });
}

/// Probe Ollama for the configured reasoning model. An unreachable or
/// missing model does not stop the server; uploads fail with a clear
/// reason and the health endpoint reports the outage.
fn resolve_reasoning(client: Arc<OllamaClient>, settings: &Settings) -> ReasoningService {
    match client.is_model_available(&settings.reasoning_model) {
        Ok(true) => {
            tracing::info!(model = %settings.reasoning_model, "Reasoning model ready");
            ReasoningService::Available {
                client,
                model: settings.reasoning_model.clone(),
            }
        }
        Ok(false) => {
            tracing::warn!(model = %settings.reasoning_model, "Reasoning model not pulled");
            ReasoningService::Unavailable {
                reason: format!(
                    "Model {} not available (pull it with `ollama pull {}`)",
                    settings.reasoning_model, settings.reasoning_model
                ),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, url = %settings.ollama_url, "Ollama unreachable");
            ReasoningService::Unavailable {
                reason: format!("Ollama unreachable at {}: {e}", settings.ollama_url),
            }
        }
    }
}
