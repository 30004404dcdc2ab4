use crate::language::{
    ast::{CompilationUnit, UnitKind},
    errors::SyntaxError,
    parser::parse_unit,
};
use crate::project::{library, manifest::FortressConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const COMPONENT_EXTENSION: &str = "fss";
pub const API_EXTENSION: &str = "fsi";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("no {} named `{name}` on the search path", kind_label(.kind))]
    NotFound { kind: UnitKind, name: String },
    #[error("failed to read {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("syntax errors in `{name}`")]
    Syntax {
        name: String,
        path: Option<PathBuf>,
        text: Arc<str>,
        errors: Vec<SyntaxError>,
    },
    #[error("`{name}` is declared as {} but was requested as {}", kind_label(.found), kind_label(.expected))]
    KindMismatch {
        name: String,
        expected: UnitKind,
        found: UnitKind,
    },
}

pub fn kind_label(kind: &UnitKind) -> &'static str {
    match kind {
        UnitKind::Component => "component",
        UnitKind::Api => "API",
    }
}

/// Source of parsed compilation units for the linker.
pub trait Repository: Send + Sync {
    fn get_component(&self, name: &str) -> Result<Arc<CompilationUnit>, RepositoryError>;
    fn get_api(&self, name: &str) -> Result<Arc<CompilationUnit>, RepositoryError>;
    /// Drops a cached component, and its same-named API when `also_api` is set.
    fn delete_component(&self, name: &str, also_api: bool);
}

fn parse_checked(
    name: &str,
    kind: UnitKind,
    path: Option<PathBuf>,
    text: &str,
) -> Result<CompilationUnit, RepositoryError> {
    let unit = parse_unit(path.clone(), text).map_err(|errs| RepositoryError::Syntax {
        name: name.to_string(),
        path,
        text: Arc::from(text),
        errors: errs.errors,
    })?;
    if unit.kind != kind {
        return Err(RepositoryError::KindMismatch {
            name: name.to_string(),
            expected: kind,
            found: unit.kind,
        });
    }
    Ok(unit)
}

fn load_embedded(name: &str, kind: UnitKind) -> Option<Result<CompilationUnit, RepositoryError>> {
    library::embedded(name, kind).map(|unit| {
        parse_checked(name, kind, Some(PathBuf::from(unit.file)), unit.source)
    })
}

type UnitCache = RwLock<HashMap<(UnitKind, String), Arc<CompilationUnit>>>;

/// Reads `Name.fss` / `Name.fsi` from a list of source directories.
/// Dots in qualified names become directory separators.
pub struct FileRepository {
    search_path: Vec<PathBuf>,
    cache: UnitCache,
}

impl FileRepository {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self {
            search_path,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &FortressConfig) -> Self {
        Self::new(config.search_path())
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    fn locate(&self, name: &str, kind: UnitKind) -> Option<PathBuf> {
        let extension = match kind {
            UnitKind::Component => COMPONENT_EXTENSION,
            UnitKind::Api => API_EXTENSION,
        };
        let relative = relative_path(name, extension);
        self.search_path
            .iter()
            .map(|dir| dir.join(&relative))
            .find(|candidate| candidate.is_file())
    }

    fn fetch(&self, name: &str, kind: UnitKind) -> Result<Arc<CompilationUnit>, RepositoryError> {
        let key = (kind, name.to_string());
        if let Some(unit) = self.cache.read().get(&key) {
            return Ok(unit.clone());
        }
        let unit = match self.locate(name, kind) {
            Some(path) => {
                debug!(name, path = %path.display(), "reading unit");
                let text = fs::read_to_string(&path).map_err(|error| RepositoryError::Io {
                    path: path.clone(),
                    error,
                })?;
                parse_checked(name, kind, Some(path), &text)?
            }
            None => match load_embedded(name, kind) {
                Some(unit) => unit?,
                None => {
                    return Err(RepositoryError::NotFound {
                        kind,
                        name: name.to_string(),
                    })
                }
            },
        };
        let unit = Arc::new(unit);
        self.cache.write().insert(key, unit.clone());
        Ok(unit)
    }
}

fn relative_path(name: &str, extension: &str) -> PathBuf {
    let mut path: PathBuf = name.split('.').collect();
    path.set_extension(extension);
    path
}

impl Repository for FileRepository {
    fn get_component(&self, name: &str) -> Result<Arc<CompilationUnit>, RepositoryError> {
        self.fetch(name, UnitKind::Component)
    }

    fn get_api(&self, name: &str) -> Result<Arc<CompilationUnit>, RepositoryError> {
        self.fetch(name, UnitKind::Api)
    }

    fn delete_component(&self, name: &str, also_api: bool) {
        let mut cache = self.cache.write();
        cache.remove(&(UnitKind::Component, name.to_string()));
        if also_api {
            cache.remove(&(UnitKind::Api, name.to_string()));
        }
    }
}

/// Units held in memory, keyed by their declared name. Counts fetches so
/// callers can observe how often the linker asked for each unit.
#[derive(Default)]
pub struct MemoryRepository {
    units: RwLock<HashMap<(UnitKind, String), Arc<CompilationUnit>>>,
    fetches: RwLock<HashMap<String, usize>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `source` and stores it under the unit's own name.
    pub fn add(&self, source: &str) -> Result<Arc<CompilationUnit>, RepositoryError> {
        let unit = parse_unit(None, source).map_err(|errs| RepositoryError::Syntax {
            name: "<memory>".into(),
            path: None,
            text: Arc::from(source),
            errors: errs.errors,
        })?;
        let unit = Arc::new(unit);
        self.units
            .write()
            .insert((unit.kind, unit.name.clone()), unit.clone());
        Ok(unit)
    }

    pub fn fetches(&self, name: &str) -> usize {
        self.fetches.read().get(name).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.read().values().sum()
    }

    fn fetch(&self, name: &str, kind: UnitKind) -> Result<Arc<CompilationUnit>, RepositoryError> {
        *self.fetches.write().entry(name.to_string()).or_insert(0) += 1;
        let key = (kind, name.to_string());
        if let Some(unit) = self.units.read().get(&key) {
            return Ok(unit.clone());
        }
        let other = match kind {
            UnitKind::Component => UnitKind::Api,
            UnitKind::Api => UnitKind::Component,
        };
        if self.units.read().contains_key(&(other, name.to_string())) && library::embedded(name, kind).is_none() {
            return Err(RepositoryError::KindMismatch {
                name: name.to_string(),
                expected: kind,
                found: other,
            });
        }
        match load_embedded(name, kind) {
            Some(unit) => {
                let unit = Arc::new(unit?);
                self.units.write().insert(key, unit.clone());
                Ok(unit)
            }
            None => Err(RepositoryError::NotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }
}

impl Repository for MemoryRepository {
    fn get_component(&self, name: &str) -> Result<Arc<CompilationUnit>, RepositoryError> {
        self.fetch(name, UnitKind::Component)
    }

    fn get_api(&self, name: &str) -> Result<Arc<CompilationUnit>, RepositoryError> {
        self.fetch(name, UnitKind::Api)
    }

    fn delete_component(&self, name: &str, also_api: bool) {
        let mut units = self.units.write();
        units.remove(&(UnitKind::Component, name.to_string()));
        if also_api {
            units.remove(&(UnitKind::Api, name.to_string()));
        }
    }
}

pub fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_repository_maps_qualified_names_to_paths() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("geo");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(
            nested.join("Shapes.fsi"),
            "api geo.Shapes\nfn area(r);\nend\n",
        )
        .expect("write api");
        fs::write(
            nested.join("Shapes.fss"),
            "component geo.Shapes\nexport geo.Shapes;\nfn area(r) = r * r * 3;\nend\n",
        )
        .expect("write component");

        let repo = FileRepository::new(vec![dir.path().to_path_buf()]);
        let api = repo.get_api("geo.Shapes").expect("api");
        assert!(api.is_api());
        let component = repo.get_component("geo.Shapes").expect("component");
        assert!(component.is_component());
        assert!(Arc::ptr_eq(
            &component,
            &repo.get_component("geo.Shapes").expect("cached")
        ));

        repo.delete_component("geo.Shapes", false);
        let reread = repo.get_component("geo.Shapes").expect("reread");
        assert!(!Arc::ptr_eq(&component, &reread));
    }

    #[test]
    fn file_repository_falls_back_to_standard_library() {
        let dir = tempdir().expect("tempdir");
        let repo = FileRepository::new(vec![dir.path().to_path_buf()]);
        let builtin = repo.get_api("FortressBuiltin").expect("builtin");
        assert!(builtin.native);
        assert!(matches!(
            repo.get_component("Missing"),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn syntax_errors_keep_source_text() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("Broken.fss"), "component Broken\nlet = 1;\nend\n")
            .expect("write");
        let repo = FileRepository::new(vec![dir.path().to_path_buf()]);
        match repo.get_component("Broken") {
            Err(RepositoryError::Syntax { text, errors, .. }) => {
                assert!(text.contains("let = 1"));
                assert!(!errors.is_empty());
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("expected syntax error"),
        }
    }

    #[test]
    fn memory_repository_counts_fetches_and_checks_kinds() {
        let repo = MemoryRepository::new();
        repo.add("component Main\nend").expect("add");
        repo.get_component("Main").expect("component");
        repo.get_component("Main").expect("component again");
        assert_eq!(repo.fetches("Main"), 2);
        assert!(matches!(
            repo.get_api("Main"),
            Err(RepositoryError::KindMismatch { .. })
        ));
        assert!(repo.get_api("FortressLibrary").is_ok());
    }
}
