use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "fortress.toml";

pub const DEFAULT_IMPLICIT_LIBRARIES: [&str; 2] = ["FortressLibrary", "FortressBuiltin"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid thread count `{value}` from {source_name}; expected a positive integer")]
    InvalidThreadCount { value: String, source_name: String },
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: Option<String>,
    pub path: Vec<PathBuf>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub threads: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LinkerConfig {
    pub implicit_libraries: Vec<String>,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            implicit_libraries: DEFAULT_IMPLICIT_LIBRARIES
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl LinkerConfig {
    pub fn without_implicit_libraries() -> Self {
        Self {
            implicit_libraries: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FortressConfig {
    pub project: ProjectConfig,
    pub runtime: RuntimeConfig,
    pub linker: LinkerConfig,
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

impl FortressConfig {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|error| ManifestError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        let mut config = Self::parse(&content).map_err(|message| ManifestError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        config.root = path.parent().map(|p| p.to_path_buf());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|error| error.to_string())
    }

    /// Walks up from `start` looking for `fortress.toml`; defaults when absent.
    pub fn discover(start: &Path) -> Result<Self, ManifestError> {
        match find_manifest(start) {
            Some(path) => Self::load(&path),
            None => Ok(Self {
                root: Some(start.to_path_buf()),
                ..Self::default()
            }),
        }
    }

    /// Source directories, resolved against the manifest directory.
    pub fn search_path(&self) -> Vec<PathBuf> {
        let root = self.root.clone().unwrap_or_else(|| PathBuf::from("."));
        if self.project.path.is_empty() {
            return vec![root];
        }
        self.project
            .path
            .iter()
            .map(|dir| {
                if dir.is_absolute() {
                    dir.clone()
                } else {
                    root.join(dir)
                }
            })
            .collect()
    }
}

pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    let mut current = if start.is_dir() {
        start.to_path_buf()
    } else {
        start
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    };
    loop {
        let candidate = current.join(MANIFEST_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }
    None
}
