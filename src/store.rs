use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::Serialize;
use serde_json::Value;
use tempfile::Builder;

use crate::error::BelError;
use crate::identity::Identity;
use crate::persist::GraphStore;
use crate::statement::Nanopub;

/// Project-local nanopub store plus the shared Content Service document cache.
///
/// Layout:
/// - `.reactome-bel/nanopubs/<ab>/<identity>.json`, one document per nanopub
/// - `~/.cache/reactome-bel/documents/<id>.json`, raw Content Service responses
#[derive(Debug, Clone)]
pub struct FileStore {
    project_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl FileStore {
    pub fn new() -> Result<Self, BelError> {
        let cwd = std::env::current_dir().map_err(|err| BelError::Filesystem(err.to_string()))?;
        let project_root = Utf8PathBuf::from_path_buf(cwd.join(".reactome-bel"))
            .map_err(|_| BelError::Filesystem("invalid project path".to_string()))?;

        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("reactome-bel"))
                    .ok()
            })
            .ok_or_else(|| {
                BelError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self {
            project_root,
            cache_root,
        })
    }

    pub fn new_with_paths(project_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            project_root,
            cache_root,
        }
    }

    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn nanopub_dir(&self) -> Utf8PathBuf {
        self.project_root.join("nanopubs")
    }

    pub fn nanopub_path(&self, identity: &Identity) -> Utf8PathBuf {
        let hex = identity.to_hex();
        self.nanopub_dir()
            .join(&hex[..2])
            .join(format!("{hex}.json"))
    }

    pub fn document_path(&self, id: &str) -> Utf8PathBuf {
        self.cache_root.join("documents").join(format!("{id}.json"))
    }

    pub fn ensure_project_root(&self) -> Result<(), BelError> {
        fs::create_dir_all(self.project_root.as_std_path())
            .map_err(|err| BelError::Filesystem(err.to_string()))
    }

    pub fn ensure_cache_root(&self) -> Result<(), BelError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| BelError::Filesystem(err.to_string()))
    }

    pub fn clear_project(&self) -> Result<(), BelError> {
        if self.project_root.as_std_path().exists() {
            fs::remove_dir_all(self.project_root.as_std_path())
                .map_err(|err| BelError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn read_document(&self, id: &str) -> Result<Option<Value>, BelError> {
        let path = self.document_path(id);
        let content = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BelError::Filesystem(err.to_string())),
        };
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "ignoring corrupt cached document");
                Ok(None)
            }
        }
    }

    pub fn write_document(&self, id: &str, document: &Value) -> Result<(), BelError> {
        Self::write_json_atomic(&self.document_path(id), document)
    }

    pub fn write_json_atomic<T: Serialize + ?Sized>(
        path: &Utf8Path,
        value: &T,
    ) -> Result<(), BelError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| BelError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), BelError> {
        let parent = path
            .parent()
            .ok_or_else(|| BelError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| BelError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("reactome-bel")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| BelError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| BelError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| BelError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Every stored nanopub, ordered by identity.
    pub fn list_nanopubs(&self) -> Result<Vec<Nanopub>, BelError> {
        let root = self.nanopub_dir();
        if !root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for path in walk_dir(root.as_std_path())? {
            if path.is_file() && path.extension().map(|ext| ext == "json").unwrap_or(false) {
                let content = fs::read_to_string(&path)
                    .map_err(|err| BelError::Filesystem(err.to_string()))?;
                let nanopub: Nanopub = serde_json::from_str(&content)
                    .map_err(|err| BelError::Filesystem(format!("{}: {err}", path.display())))?;
                entries.push(nanopub);
            }
        }
        entries.sort_by(|left, right| left.identity.cmp(&right.identity));
        Ok(entries)
    }
}

impl GraphStore for FileStore {
    fn fetch(&self, identity: &Identity) -> Result<Option<Nanopub>, BelError> {
        let path = self.nanopub_path(identity);
        let content = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BelError::StoreUnavailable(format!("{path}: {err}"))),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|err| BelError::StoreRejected {
                identity: identity.to_string(),
                message: format!("corrupt record at {path}: {err}"),
            })
    }

    fn write(&self, nanopub: &Nanopub) -> Result<(), BelError> {
        let path = self.nanopub_path(&nanopub.identity);
        Self::write_json_atomic(&path, nanopub).map_err(|err| match err {
            BelError::Filesystem(message) => BelError::StoreUnavailable(message),
            other => other,
        })
    }

    fn len(&self) -> Result<usize, BelError> {
        let root = self.nanopub_dir();
        if !root.as_std_path().exists() {
            return Ok(0);
        }
        let count = walk_dir(root.as_std_path())?
            .into_iter()
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .count();
        Ok(count)
    }
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, BelError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| BelError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| BelError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}
