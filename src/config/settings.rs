//! Derived filesystem paths and database location.

use std::fs;
use std::path::PathBuf;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "pqracquire.db";

/// Object store subdirectory name.
const OBJECTS_SUBDIR: &str = "objects";

/// Attachment staging subdirectory name.
const STAGING_SUBDIR: &str = "staging";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    /// Set via PQR_DATABASE_URL or config.
    pub database_url: Option<String>,
    /// Root of the filesystem object store.
    pub objects_dir: PathBuf,
    /// Attachment downloads land here before upload.
    pub staging_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        // ~/Documents/pqr, falling back to home, then CWD
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pqr");

        let mut settings = Self::with_data_dir(data_dir);
        settings.database_url = std::env::var("PQR_DATABASE_URL")
            .ok()
            .filter(|s| !s.is_empty());
        settings
    }
}

impl Settings {
    /// Create settings rooted at `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            objects_dir: data_dir.join(OBJECTS_SUBDIR),
            staging_dir: data_dir.join(STAGING_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
        }
    }

    /// Re-root every derived directory under a new data dir.
    pub fn set_data_dir(&mut self, data_dir: PathBuf) {
        self.objects_dir = data_dir.join(OBJECTS_SUBDIR);
        self.staging_dir = data_dir.join(STAGING_SUBDIR);
        self.data_dir = data_dir;
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Full path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        match self.database_url.as_deref() {
            Some(url) => PathBuf::from(
                url.strip_prefix("sqlite://")
                    .or_else(|| url.strip_prefix("sqlite:"))
                    .unwrap_or(url),
            ),
            None => self.data_dir.join(&self.database_filename),
        }
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for (label, dir) in [
            ("data", &self.data_dir),
            ("object store", &self.objects_dir),
            ("staging", &self.staging_dir),
        ] {
            tracing::debug!("Ensuring {} directory {}", label, dir.display());
            fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create {} directory '{}': {}",
                        label,
                        dir.display(),
                        e
                    ),
                )
            })?;
        }
        Ok(())
    }
}
