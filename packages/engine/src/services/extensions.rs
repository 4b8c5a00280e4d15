// packages/engine/src/services/extensions.rs
//! Extension discovery service
//!
//! Scans configured directories for `*.extension.yaml` manifests:
//!
//! ```yaml
//! name: junit-report
//! extension_point: ResultWriter
//! path: ./libjunit_report.so
//! enabled: true
//! ```

use crate::services::context::Service;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SERVICE_NAME: &str = "ExtensionService";
const MANIFEST_SUFFIX: &str = ".extension.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub name: String,
    pub extension_point: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Manifest file this entry was read from
    #[serde(skip)]
    pub source: PathBuf,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Default)]
pub struct ExtensionService {
    directories: Vec<PathBuf>,
    extensions: Vec<ExtensionManifest>,
}

impl ExtensionService {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self {
            directories,
            extensions: Vec::new(),
        }
    }

    /// Every manifest found, enabled or not
    pub fn extensions(&self) -> &[ExtensionManifest] {
        &self.extensions
    }

    /// Enabled extensions for one extension point
    pub fn extensions_for<'a>(&'a self, point: &'a str) -> impl Iterator<Item = &'a ExtensionManifest> + 'a {
        self.extensions
            .iter()
            .filter(move |ext| ext.enabled && ext.extension_point == point)
    }

    fn scan(directory: &Path) -> Result<Vec<ExtensionManifest>> {
        let entries = std::fs::read_dir(directory).map_err(|e| {
            EngineError::ServiceFailed(
                SERVICE_NAME.to_string(),
                format!("cannot read extension directory {}: {}", directory.display(), e),
            )
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX))
            })
            .collect();
        files.sort();

        let mut manifests = Vec::with_capacity(files.len());
        for file in files {
            let text = std::fs::read_to_string(&file)?;
            let mut manifest: ExtensionManifest = serde_yaml::from_str(&text)?;
            if let Some(path) = manifest.path.take() {
                manifest.path = Some(if path.is_relative() { directory.join(path) } else { path });
            }
            manifest.source = file;
            debug!(name = %manifest.name, point = %manifest.extension_point, "Found extension");
            manifests.push(manifest);
        }
        Ok(manifests)
    }
}

impl Service for ExtensionService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn start(&mut self) -> Result<()> {
        let mut found = Vec::new();
        for directory in &self.directories {
            found.extend(Self::scan(directory)?);
        }
        info!(count = found.len(), "Extensions loaded");
        self.extensions = found;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.extensions.clear();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, text: &str) {
        std::fs::write(dir.join(file), text).unwrap();
    }

    #[test]
    fn test_loads_manifests_by_suffix() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.extension.yaml", "name: b\nextension_point: ResultWriter\npath: libb.so\n");
        write(dir.path(), "a.extension.yaml", "name: a\nextension_point: ResultWriter\nenabled: false\n");
        write(dir.path(), "notes.yaml", "name: ignored\nextension_point: X\n");

        let mut service = ExtensionService::new(vec![dir.path().to_path_buf()]);
        service.start().unwrap();

        let names: Vec<&str> = service.extensions().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let enabled: Vec<&str> = service.extensions_for("ResultWriter").map(|e| e.name.as_str()).collect();
        assert_eq!(enabled, vec!["b"]);
        assert_eq!(service.extensions()[1].path, Some(dir.path().join("libb.so")));
    }

    #[test]
    fn test_missing_directory_fails_start() {
        let mut service = ExtensionService::new(vec![PathBuf::from("/nonexistent/agency-extensions")]);
        assert!(service.start().is_err());
    }

    #[test]
    fn test_bad_manifest_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.extension.yaml", "name: [unclosed\n");
        let mut service = ExtensionService::new(vec![dir.path().to_path_buf()]);
        assert!(matches!(service.start(), Err(EngineError::Manifest(_))));
    }

    #[test]
    fn test_stop_clears() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.extension.yaml", "name: a\nextension_point: P\n");
        let mut service = ExtensionService::new(vec![dir.path().to_path_buf()]);
        service.start().unwrap();
        service.stop().unwrap();
        assert!(service.extensions().is_empty());
    }
}
