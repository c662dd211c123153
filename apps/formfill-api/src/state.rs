//! Application state for the form-fill API

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use formfill_core::{
    FormFillError, FormStore, FormatConverter, SofficeConverter, Template, TemplateId,
    TemplateSnapshot,
};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::db;
use crate::error::ApiError;

/// Runtime settings resolved from the command line and environment
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub database_url: String,
    pub soffice: PathBuf,
    pub retention_days: Option<i64>,
}

impl Config {
    /// Defaults rooted at `data_dir`, or the platform data directory
    pub fn new(data_dir: Option<PathBuf>, database_url: Option<String>) -> Self {
        let data_dir = data_dir.unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("formfill")
        });
        let database_url = database_url
            .unwrap_or_else(|| format!("sqlite:{}/formfill.db?mode=rwc", data_dir.display()));
        Self {
            data_dir,
            database_url,
            soffice: PathBuf::from("soffice"),
            retention_days: None,
        }
    }
}

pub struct AppState {
    pub store: FormStore,
    pub db: SqlitePool,
    pub upload_dir: PathBuf,
    pub converter: Arc<dyn FormatConverter>,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self> {
        let upload_dir = config.data_dir.join("uploads");
        std::fs::create_dir_all(&upload_dir)
            .with_context(|| format!("creating upload directory {}", upload_dir.display()))?;

        tracing::info!("Connecting to database: {}", config.database_url);

        // In-memory SQLite gives every connection its own database
        let max_connections = if config.database_url.contains(":memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&config.database_url)
            .await?;

        db::run_migrations(&pool).await?;

        let state = Self {
            store: FormStore::new(),
            db: pool,
            upload_dir,
            converter: Arc::new(SofficeConverter::new(config.soffice.clone())),
        };
        state.load().await?;

        if let Some(days) = config.retention_days {
            state.purge_older_than(Duration::days(days)).await?;
        }

        Ok(state)
    }

    /// Restore every saved template into the store
    async fn load(&self) -> Result<()> {
        let snapshots = db::load_snapshots(&self.db).await?;
        let total = snapshots.len();
        for snapshot in snapshots {
            let id = snapshot.template.id;
            self.store
                .restore(snapshot)
                .with_context(|| format!("restoring template {}", id))?;
        }
        tracing::info!("Loaded {} templates", total);
        Ok(())
    }

    /// Write the current state of a template to the database. Templates
    /// deleted in the meantime stay deleted.
    pub async fn persist(&self, template_id: TemplateId) -> Result<(), ApiError> {
        if let Some(snapshot) = self.snapshot_if_present(template_id)? {
            db::save_snapshot(&self.db, &snapshot).await?;
        }
        Ok(())
    }

    /// First write of a freshly uploaded template
    pub async fn persist_new(&self, template_id: TemplateId) -> Result<(), ApiError> {
        if let Some(snapshot) = self.snapshot_if_present(template_id)? {
            db::insert_snapshot(&self.db, &snapshot).await?;
        }
        Ok(())
    }

    fn snapshot_if_present(
        &self,
        template_id: TemplateId,
    ) -> Result<Option<TemplateSnapshot>, ApiError> {
        match self.store.snapshot(template_id) {
            Ok(snapshot) => Ok(Some(snapshot)),
            // Deleted while this request was finishing
            Err(FormFillError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Path for a newly uploaded document
    pub fn new_upload_path(&self) -> PathBuf {
        self.upload_dir.join(format!("{}.pdf", Uuid::new_v4()))
    }

    /// Delete a template's records and its stored file. A file that is
    /// already gone is logged and skipped.
    pub async fn remove_template(&self, id: TemplateId) -> Result<Template, ApiError> {
        let template = self.store.delete_template(id)?;
        db::delete_template(&self.db, id).await?;
        remove_file_best_effort(&template.file_path).await;
        Ok(template)
    }

    async fn purge_older_than(&self, age: Duration) -> Result<()> {
        let expired = self.store.templates_older_than(Utc::now() - age);
        for id in &expired {
            self.remove_template(*id).await?;
        }
        if !expired.is_empty() {
            tracing::info!("Purged {} expired templates", expired.len());
        }
        Ok(())
    }
}

/// Remove a stored file, logging instead of failing when it cannot be removed
pub async fn remove_file_best_effort(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("Could not remove template file {}: {}", path.display(), e);
    }
}

/// Get platform-specific data directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}
