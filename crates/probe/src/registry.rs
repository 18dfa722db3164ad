//! File-Backed Source Registry

use crate::error::RegistryError;
use crate::source::Source;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{error, info};

/// The configured sources, persisted as a JSON array
pub struct SourceRegistry {
    path: PathBuf,
    sources: RwLock<Vec<Source>>,
}

impl SourceRegistry {
    /// Load the registry from `path`, seeding it with `defaults` if the file
    /// does not exist yet
    pub async fn load(path: impl AsRef<Path>, defaults: Vec<Source>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();

        let sources = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<Vec<Source>>(&raw).map_err(|e| {
                error!(file = %path.display(), error = %e, "Failed to parse sources file");
                file_error(&path, e)
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(file = %path.display(), count = defaults.len(), "Sources file not found, writing defaults");
                write_file(&path, &defaults).await?;
                defaults
            }
            Err(e) => return Err(file_error(&path, e)),
        };

        info!(count = sources.len(), "Loaded sources");
        Ok(Self {
            path,
            sources: RwLock::new(sources),
        })
    }

    /// Add a source; names are unique
    pub async fn add(&self, source: Source) -> Result<(), RegistryError> {
        if source.name.trim().is_empty() || source.chain.trim().is_empty() {
            return Err(RegistryError::Incomplete);
        }

        let mut sources = self.sources.write().await;
        if sources.iter().any(|s| s.name == source.name) {
            return Err(RegistryError::Duplicate(source.name));
        }

        let mut updated = sources.clone();
        updated.push(source.clone());
        write_file(&self.path, &updated).await?;
        *sources = updated;

        info!(name = %source.name, chain = %source.chain, "Source added");
        Ok(())
    }

    /// Remove a source by name
    pub async fn remove(&self, name: &str) -> Result<Source, RegistryError> {
        let mut sources = self.sources.write().await;
        let position = sources
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let mut updated = sources.clone();
        let removed = updated.remove(position);
        write_file(&self.path, &updated).await?;
        *sources = updated;

        info!(name, "Source removed");
        Ok(removed)
    }

    /// Sources that should be probed
    pub async fn active(&self) -> Vec<Source> {
        self.sources
            .read()
            .await
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect()
    }

    /// Every source, active or not
    pub async fn all(&self) -> Vec<Source> {
        self.sources.read().await.clone()
    }
}

async fn write_file(path: &Path, sources: &[Source]) -> Result<(), RegistryError> {
    let body = serde_json::to_string_pretty(sources).map_err(|e| file_error(path, e))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| file_error(path, e))?;
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|e| file_error(path, e))
}

fn file_error(path: &Path, err: impl std::fmt::Display) -> RegistryError {
    RegistryError::File {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn defaults() -> Vec<Source> {
        vec![
            Source::gateway("Gnosis Registry", "gnosis", "GmDw6a"),
            Source::gateway("Base Registry", "base", "Baqj7b"),
        ]
    }

    #[tokio::test]
    async fn test_seeds_defaults_when_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");

        let registry = SourceRegistry::load(&path, defaults()).await.unwrap();
        assert_eq!(registry.active().await.len(), 2);
        assert!(path.exists());

        // Reload reads the file, not the defaults
        let reloaded = SourceRegistry::load(&path, Vec::new()).await.unwrap();
        assert_eq!(reloaded.all().await, defaults());
    }

    #[tokio::test]
    async fn test_add_and_remove_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        let registry = SourceRegistry::load(&path, defaults()).await.unwrap();

        registry
            .add(Source::url("Mode Registry", "mode", "https://mode.example/q"))
            .await
            .unwrap();
        registry.remove("Base Registry").await.unwrap();

        let reloaded = SourceRegistry::load(&path, Vec::new()).await.unwrap();
        let names: Vec<String> = reloaded.all().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Gnosis Registry", "Mode Registry"]);
    }

    #[tokio::test]
    async fn test_rejects_duplicates_and_unknown() {
        let dir = TempDir::new().unwrap();
        let registry = SourceRegistry::load(dir.path().join("s.json"), defaults())
            .await
            .unwrap();

        let dup = registry.add(Source::gateway("Base Registry", "base", "x")).await;
        assert!(matches!(dup, Err(RegistryError::Duplicate(_))));

        let incomplete = registry.add(Source::gateway("", "base", "x")).await;
        assert!(matches!(incomplete, Err(RegistryError::Incomplete)));

        let missing = registry.remove("Nope").await;
        assert!(matches!(missing, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_inactive_filtered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        let mut sources = defaults();
        sources[0].active = false;

        let registry = SourceRegistry::load(&path, sources).await.unwrap();
        let active: Vec<String> = registry.active().await.into_iter().map(|s| s.name).collect();
        assert_eq!(active, vec!["Base Registry"]);
        assert_eq!(registry.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let result = SourceRegistry::load(&path, defaults()).await;
        assert!(matches!(result, Err(RegistryError::File { .. })));
    }
}
