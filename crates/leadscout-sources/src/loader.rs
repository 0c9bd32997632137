//! Source definition loading from TOML files.
//!
//! This module handles loading source definitions from the `source-definitions/` directory.

use crate::{
    definition::SourceDefinition,
    error::{Result, SourceError},
};
use leadscout_core::SourceId;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Loader for source definitions from TOML files.
pub struct SourceLoader {
    definitions_dir: PathBuf,
}

impl SourceLoader {
    /// Create a new loader with the given definitions directory.
    ///
    /// # Errors
    /// Returns error if the directory doesn't exist.
    pub fn new(definitions_dir: impl Into<PathBuf>) -> Result<Self> {
        let definitions_dir = definitions_dir.into();

        if !definitions_dir.is_dir() {
            return Err(SourceError::DirectoryNotFound {
                path: definitions_dir.display().to_string(),
            });
        }

        Ok(Self { definitions_dir })
    }

    /// Create a loader using the default definitions directory.
    ///
    /// Looks for `source-definitions/` next to the workspace `Cargo.toml`,
    /// then relative to the current directory.
    pub fn with_default_dir() -> Result<Self> {
        let mut current_dir = std::env::current_dir()?;

        loop {
            let cargo_toml = current_dir.join("Cargo.toml");
            if let Ok(contents) = std::fs::read_to_string(&cargo_toml) {
                if contents.contains("[workspace]") {
                    return Self::new(current_dir.join("source-definitions"));
                }
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Self::new(PathBuf::from("source-definitions"))
    }

    /// Directory this loader reads from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.definitions_dir
    }

    /// Load a single source definition by ID.
    ///
    /// # Errors
    /// Returns error if the definition file doesn't exist, can't be read, or is invalid.
    pub fn load(&self, source_id: &SourceId) -> Result<SourceDefinition> {
        let filename = format!("{}.toml", source_id.as_str());
        let path = Self::find_file(&self.definitions_dir, &filename)?.ok_or_else(|| {
            SourceError::NotFound {
                source_id: source_id.to_string(),
            }
        })?;

        let definition = Self::load_from_path(&path)?;
        definition.validate()?;

        debug!(
            source_id = %source_id,
            name = %definition.name(),
            kind = %definition.kind(),
            "loaded source definition"
        );

        Ok(definition)
    }

    /// Load all source definitions from the definitions directory.
    ///
    /// Invalid definitions are logged as warnings and skipped.
    pub fn load_all(&self) -> Result<Vec<SourceDefinition>> {
        let mut definitions = Vec::new();

        Self::walk(&self.definitions_dir, &mut definitions)?;
        definitions.sort_by(|a, b| a.id().cmp(b.id()));

        info!(
            count = definitions.len(),
            dir = %self.definitions_dir.display(),
            "loaded source definitions"
        );

        Ok(definitions)
    }

    fn walk(dir: &Path, definitions: &mut Vec<SourceDefinition>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                Self::walk(&path, definitions)?;
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some("toml") {
                continue;
            }

            match Self::load_from_path(&path) {
                Ok(definition) => {
                    if let Err(e) = definition.validate() {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "skipping invalid source definition"
                        );
                        continue;
                    }
                    if definitions.iter().any(|d| d.id() == definition.id()) {
                        warn!(
                            path = %path.display(),
                            source_id = %definition.id(),
                            "skipping duplicate source definition"
                        );
                        continue;
                    }
                    definitions.push(definition);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load source definition"
                    );
                }
            }
        }

        Ok(())
    }

    fn find_file(dir: &Path, filename: &str) -> Result<Option<PathBuf>> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                if let Some(found) = Self::find_file(&path, filename)? {
                    return Ok(Some(found));
                }
            } else if path.file_name().and_then(|s| s.to_str()) == Some(filename) {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    fn load_from_path(path: &Path) -> Result<SourceDefinition> {
        let contents = std::fs::read_to_string(path).map_err(|e| SourceError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        toml::from_str(&contents).map_err(|e| SourceError::ParseError {
            path: path.display().to_string(),
            source: e,
        })
    }
}
