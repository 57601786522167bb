//! Where permission rows come from
//!
//! In production the rows live in the backend's `feature_permissions` table;
//! the crate only needs something that can hand them over and take edits back.

use super::catalog::CatalogDocument;
use super::FeaturePermission;
use crate::error::Result;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Backing store for permission rows
pub trait PermissionSource: Send + Sync {
    /// Fetch every row, active or not
    fn fetch_rows(&self) -> Result<Vec<FeaturePermission>>;

    /// Replace the stored rows with `rows`
    fn store_rows(&self, rows: &[FeaturePermission]) -> Result<()>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

impl<T: PermissionSource + ?Sized> PermissionSource for Arc<T> {
    fn fetch_rows(&self) -> Result<Vec<FeaturePermission>> {
        (**self).fetch_rows()
    }

    fn store_rows(&self, rows: &[FeaturePermission]) -> Result<()> {
        (**self).store_rows(rows)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// In-memory rows, used for tests and for callers that fetch rows themselves
#[derive(Debug, Default)]
pub struct StaticSource {
    rows: RwLock<Vec<FeaturePermission>>,
}

impl StaticSource {
    pub fn new(rows: Vec<FeaturePermission>) -> Self {
        StaticSource {
            rows: RwLock::new(rows),
        }
    }

    /// Swap the rows, as if another admin session edited the table
    pub fn replace(&self, rows: Vec<FeaturePermission>) {
        *self.rows.write() = rows;
    }
}

impl PermissionSource for StaticSource {
    fn fetch_rows(&self) -> Result<Vec<FeaturePermission>> {
        Ok(self.rows.read().clone())
    }

    fn store_rows(&self, rows: &[FeaturePermission]) -> Result<()> {
        *self.rows.write() = rows.to_vec();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("static ({} rows)", self.rows.read().len())
    }
}

/// Catalog document on disk, JSON or TOML depending on the file extension
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileSource {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_toml(&self) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"))
    }
}

impl PermissionSource for FileSource {
    fn fetch_rows(&self) -> Result<Vec<FeaturePermission>> {
        let text = std::fs::read_to_string(&self.path)?;
        let document = if self.is_toml() {
            CatalogDocument::from_toml(&text)?
        } else {
            CatalogDocument::from_json(&text)?
        };
        debug!(
            "Read {} permission rows from {:?}",
            document.features.len(),
            self.path
        );
        Ok(document.features)
    }

    fn store_rows(&self, rows: &[FeaturePermission]) -> Result<()> {
        let document = CatalogDocument::new(rows.to_vec());
        let text = if self.is_toml() {
            document.to_toml()?
        } else {
            document.to_json()?
        };
        std::fs::write(&self.path, text)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {:?}", self.path)
    }
}
