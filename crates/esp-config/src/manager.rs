//! Cached access to configuration documents
//!
//! A [`DocumentManager`] owns the path of one YAML document, loads it on
//! first use and keeps the validated result until [`DocumentManager::reload`]
//! is called. A failed reload keeps the previous document.

use crate::error::{ConfigError, TemplateError};
use crate::loader::YamlLoader;
use crate::model::{FullConfig, TemplateConfig};
use crate::validate::{validate_config, validate_templates};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// A YAML document with its own validation rules
pub trait Document: DeserializeOwned + Serialize + Send + Sync + 'static {
    type Error: From<ConfigError> + std::error::Error;

    fn validate(&self) -> Result<(), Self::Error>;
}

impl Document for FullConfig {
    type Error = ConfigError;

    fn validate(&self) -> Result<(), ConfigError> {
        validate_config(self).map_err(|errors| ConfigError::Validation { errors })
    }
}

impl Document for TemplateConfig {
    type Error = TemplateError;

    fn validate(&self) -> Result<(), TemplateError> {
        validate_templates(self).map_err(|errors| TemplateError::Validation { errors })
    }
}

/// Loads, caches and reloads one document
pub struct DocumentManager<T: Document> {
    path: RwLock<PathBuf>,
    cached: RwLock<Option<Arc<T>>>,
}

/// Manager for `config.yaml`
pub type ConfigManager = DocumentManager<FullConfig>;

/// Manager for `templates.yaml`
pub type TemplateManager = DocumentManager<TemplateConfig>;

impl<T: Document> DocumentManager<T> {
    /// Manager for `path`; nothing is read until first use
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: RwLock::new(path.into()),
            cached: RwLock::new(None),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Point the manager at `path` and load it
    ///
    /// On failure the manager keeps the new path but no cached document.
    pub fn init(&self, path: impl Into<PathBuf>) -> Result<Arc<T>, T::Error> {
        *self.path.write().unwrap_or_else(PoisonError::into_inner) = path.into();
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.reload()
    }

    /// The cached document, loading it on first call
    pub fn get(&self) -> Result<Arc<T>, T::Error> {
        if let Some(doc) = self
            .cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(doc.clone());
        }
        self.reload()
    }

    /// Re-read the document from disk
    pub fn reload(&self) -> Result<Arc<T>, T::Error> {
        let path = self.path();
        match load_document::<T>(&path) {
            Ok(doc) => {
                let doc = Arc::new(doc);
                *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(doc.clone());
                info!("Loaded {:?}", path);
                Ok(doc)
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to load document");
                Err(e)
            }
        }
    }

    /// The cached document as plain JSON data
    pub fn as_value(&self) -> Result<serde_json::Value, T::Error> {
        let doc = self.get()?;
        serde_json::to_value(&*doc).map_err(|e| ConfigError::from(e).into())
    }

    pub fn is_loaded(&self) -> bool {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

fn load_document<T: Document>(path: &Path) -> Result<T, T::Error> {
    if !path.is_file() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        }
        .into());
    }

    let value = YamlLoader::new(".").load_file(path)?;
    debug!("Parsed {:?}", path);

    let doc: T = serde_yaml::from_value(value).map_err(|source| ConfigError::Invalid {
        path: path.to_path_buf(),
        source,
    })?;
    doc.validate()?;
    Ok(doc)
}
