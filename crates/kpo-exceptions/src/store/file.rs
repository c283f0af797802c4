// file.rs - JSON-file backed object store.
//
// Each object is stored as `<root>/<kind>.<group>/<namespace>/<name>.json`
// (cluster-scoped objects use `_cluster` as namespace directory). This keeps
// objects isolated and easy to inspect by hand, and lets repeated
// `kpo reconcile` runs observe what earlier runs wrote.
//
// The version token is a counter kept in the object itself; an update must
// carry the token of the file it replaces. Namespace and name become path
// segments, so keys that could leave the root are rejected.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Fetched, ResourceStore, StoreError};
use crate::meta::{ObjectKey, Resource};

const CLUSTER_SCOPE_DIR: &str = "_cluster";

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Every stored object of kind `K`. Unreadable files are skipped.
    pub fn list<K: Resource>(&self) -> Result<Vec<K>, StoreError> {
        let kind_dir = self.root.join(K::qualified_kind());
        if !kind_dir.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for namespace_dir in read_dir(&kind_dir)? {
            if !namespace_dir.is_dir() {
                continue;
            }
            for path in read_dir(&namespace_dir)? {
                if path.extension().is_some_and(|ext| ext == "json") {
                    if let Ok(object) = read_object::<K>(&path) {
                        objects.push(object);
                    }
                }
            }
        }
        objects.sort_by_key(|o: &K| o.key());
        Ok(objects)
    }

    fn object_file<K: Resource>(&self, key: &ObjectKey) -> Result<PathBuf, StoreError> {
        let namespace = if key.is_cluster_scoped() {
            CLUSTER_SCOPE_DIR
        } else {
            key.namespace.as_str()
        };
        if !is_safe_segment(namespace) || !is_safe_segment(&key.name) {
            return Err(StoreError::InvalidKey {
                kind: K::KIND,
                key: key.clone(),
            });
        }
        Ok(self
            .root
            .join(K::qualified_kind())
            .join(namespace)
            .join(format!("{}.json", key.name)))
    }

    fn write_object<K: Resource>(&self, path: &Path, object: &K) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        // Readers see either the old file or the new one.
        let staging = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(object)?;
        fs::write(&staging, json).map_err(|source| StoreError::Io {
            path: staging.display().to_string(),
            source,
        })?;
        fs::rename(&staging, path).map_err(|source| {
            let _ = fs::remove_file(&staging);
            StoreError::Io {
                path: path.display().to_string(),
                source,
            }
        })
    }
}

/// A single directory or file name component: no separators, not `.` or `..`.
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\'])
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        paths.push(entry.path());
    }
    Ok(paths)
}

fn read_object<K: Resource>(path: &Path) -> Result<K, StoreError> {
    let json = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&json)?)
}

fn next_version(current: Option<&str>) -> String {
    let n = current.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    (n + 1).to_string()
}

#[async_trait]
impl<K: Resource> ResourceStore<K> for FileStore {
    async fn fetch(&self, key: &ObjectKey) -> Fetched<K> {
        let path = match self.object_file::<K>(key) {
            Ok(path) => path,
            Err(e) => return Fetched::Failed(e),
        };
        if !path.exists() {
            return Fetched::Absent;
        }
        match read_object(&path) {
            Ok(object) => Fetched::Found(object),
            Err(e) => Fetched::Failed(e),
        }
    }

    async fn create(&self, mut object: K) -> Result<K, StoreError> {
        let key = object.key();
        let path = self.object_file::<K>(&key)?;
        if path.exists() {
            return Err(StoreError::AlreadyExists { kind: K::KIND, key });
        }

        let meta = object.meta_mut();
        if meta.uid.is_none() {
            meta.uid = Some(Uuid::new_v4().to_string());
        }
        meta.resource_version = Some(next_version(None));
        self.write_object(&path, &object)?;
        Ok(object)
    }

    async fn update(&self, mut object: K) -> Result<K, StoreError> {
        let key = object.key();
        let path = self.object_file::<K>(&key)?;
        if !path.exists() {
            return Err(StoreError::NotFound { kind: K::KIND, key });
        }

        let current: K = read_object(&path)?;
        let stored = current.meta().resource_version.clone();
        let sent = object.meta().resource_version.clone();
        if sent != stored {
            return Err(StoreError::Conflict {
                kind: K::KIND,
                key,
                sent,
                stored,
            });
        }

        object.meta_mut().resource_version = Some(next_version(stored.as_deref()));
        self.write_object(&path, &object)?;
        Ok(object)
    }
}
