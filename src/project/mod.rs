pub mod library;
pub mod manifest;
pub mod repository;

pub use manifest::{find_manifest, ConfigError, FortressConfig, ManifestError};
pub use repository::{FileRepository, MemoryRepository, Repository, RepositoryError};
