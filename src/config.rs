use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Precario";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chat model for extraction and classification
pub const DEFAULT_REASONING_MODEL: &str = "qwen2.5:14b";
/// Default vision model for page OCR
pub const DEFAULT_VISION_MODEL: &str = "llama3.2-vision:11b";
/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address the HTTP server binds to (`PRECARIO_BIND`)
    pub bind_addr: String,
    /// Ollama base URL (`PRECARIO_OLLAMA_URL`)
    pub ollama_url: String,
    /// Chat model for extraction and classification (`PRECARIO_REASONING_MODEL`)
    pub reasoning_model: String,
    /// Vision model for page OCR (`PRECARIO_VISION_MODEL`)
    pub vision_model: String,
    /// Data directory override (`PRECARIO_DATA_DIR`)
    pub data_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("PRECARIO_BIND").unwrap_or_else(|_| "127.0.0.1:8742".into()),
            ollama_url: std::env::var("PRECARIO_OLLAMA_URL")
                .unwrap_or_else(|_| DEFAULT_OLLAMA_URL.into()),
            reasoning_model: std::env::var("PRECARIO_REASONING_MODEL")
                .unwrap_or_else(|_| DEFAULT_REASONING_MODEL.into()),
            vision_model: std::env::var("PRECARIO_VISION_MODEL")
                .unwrap_or_else(|_| DEFAULT_VISION_MODEL.into()),
            data_dir: std::env::var("PRECARIO_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| app_data_dir()),
        }
    }

    /// Directory where uploaded PDFs are stored
    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir.join("documents")
    }

    /// SQLite database path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("precario.db")
    }
}

/// Get the application data directory
/// ~/Precario/ on all platforms (kept user-visible so reviewers can find
/// the stored PDFs)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Precario")
}
