//! Shared request context for API handlers.

use std::path::PathBuf;

use rusqlite::Connection;

use crate::api::error::ApiError;
use crate::db::sqlite::open_database;
use crate::pipeline::runner::PipelineEngines;

/// Handler state: where the database and document store live, plus the
/// engine bundle for pipeline runs. Cheap to clone (paths + Arcs).
#[derive(Clone)]
pub struct ApiContext {
    pub db_path: PathBuf,
    pub documents_dir: PathBuf,
    pub engines: PipelineEngines,
}

impl ApiContext {
    pub fn new(db_path: PathBuf, documents_dir: PathBuf, engines: PipelineEngines) -> Self {
        Self {
            db_path,
            documents_dir,
            engines,
        }
    }

    /// Open a connection for this request. SQLite in WAL mode handles the
    /// concurrent short-lived connections this produces.
    pub fn open_db(&self) -> Result<Connection, ApiError> {
        open_database(&self.db_path).map_err(|e| ApiError::Internal(format!("Database: {e}")))
    }
}
