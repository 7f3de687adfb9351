//! Scrape target directory.

use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type DirectoryResult<T> = Result<T, TargetError>;

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("failed to read target directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON target directory {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid TOML target directory {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unsupported target directory format: {0}")]
    UnsupportedFormat(PathBuf),
}

/// One scrape unit (a municipality).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub population: Option<u64>,
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

impl Target {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            slug: None,
            population: None,
        }
    }

    pub fn with_population(mut self, population: u64) -> Self {
        self.population = Some(population);
        self
    }

    /// URL identifier: explicit slug, else the lowercased name with spaces as `-`.
    pub fn slug(&self) -> String {
        self.slug
            .clone()
            .unwrap_or_else(|| self.name.trim().to_lowercase().replace(' ', "-"))
    }
}

/// Which targets a run should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
    /// Case-insensitive names.
    Names(Vec<String>),
    All,
    /// The N most populous targets.
    TopByPopulation(usize),
}

impl Default for TargetSelection {
    fn default() -> Self {
        TargetSelection::TopByPopulation(50)
    }
}

#[derive(Deserialize)]
struct TomlDirectory {
    #[serde(default)]
    targets: Vec<Target>,
}

#[derive(Debug, Clone, Default)]
pub struct TargetDirectory {
    targets: Vec<Target>,
}

impl TargetDirectory {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    /// Load a `.json` array or a `.toml` file of `[[targets]]` tables.
    pub fn load(path: impl AsRef<Path>) -> DirectoryResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| TargetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let targets = match extension.as_deref() {
            Some("json") => serde_json::from_str(&contents).map_err(|source| TargetError::Json {
                path: path.to_path_buf(),
                source,
            })?,
            Some("toml") => {
                toml::from_str::<TomlDirectory>(&contents)
                    .map_err(|source| TargetError::Toml {
                        path: path.to_path_buf(),
                        source,
                    })?
                    .targets
            }
            _ => return Err(TargetError::UnsupportedFormat(path.to_path_buf())),
        };
        let directory = Self { targets };
        log::info!("loaded {} targets from {}", directory.len(), path.display());
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Apply `selection`, then truncate to `limit`.
    pub fn select(&self, selection: &TargetSelection, limit: Option<usize>) -> Vec<Target> {
        let mut selected: Vec<Target> = match selection {
            TargetSelection::All => self.targets.clone(),
            TargetSelection::Names(names) => {
                let wanted: Vec<String> = names
                    .iter()
                    .map(|name| name.trim().to_lowercase())
                    .filter(|name| !name.is_empty())
                    .collect();
                let selected: Vec<Target> = self
                    .targets
                    .iter()
                    .filter(|target| wanted.contains(&target.name.to_lowercase()))
                    .cloned()
                    .collect();
                for name in &wanted {
                    if !selected.iter().any(|target| &target.name.to_lowercase() == name) {
                        log::warn!("target `{name}` not found in directory");
                    }
                }
                selected
            }
            TargetSelection::TopByPopulation(count) => {
                let mut ranked = self.targets.clone();
                ranked.sort_by(|a, b| b.population.unwrap_or(0).cmp(&a.population.unwrap_or(0)));
                ranked.truncate(*count);
                ranked
            }
        };
        if let Some(limit) = limit {
            selected.truncate(limit);
            log::info!("limited to {limit} targets");
        }
        selected
    }
}
