// Data service emulated on top of a directory of JSON files

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;

use super::{
    Backend, FetchError, Method, Resource,
    emulation::{self, ResourceMap},
};
use crate::errors::PitwallError;

/// File-based implementation of the data service.
///
/// Every resource lives in its own `<key>.json` file below the data
/// directory. A missing file is reported as [`FetchError::NotFound`].
pub struct FileBackend {
    data_dir: PathBuf,
    /// Serializes mutations so read-modify-write sequences don't interleave
    write_lock: Mutex<()>,
}

struct DirectoryMap<'a> {
    root: &'a Path,
}

impl FileBackend {
    /// Create a backend rooted at `data_dir`, creating the directory if needed.
    pub fn new(data_dir: PathBuf) -> Result<Self, PitwallError> {
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir).map_err(|e| PitwallError::DataDirIOError { source: e })?;
        }
        Ok(Self {
            data_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Default data directory under the platform's application data folder.
    pub fn default_data_dir() -> Result<PathBuf, PitwallError> {
        let app_data_dir = dirs::data_dir().ok_or(PitwallError::NoConfigDir)?;
        Ok(app_data_dir.join("pitwall").join("data"))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn map(&self) -> DirectoryMap<'_> {
        DirectoryMap {
            root: &self.data_dir,
        }
    }
}

impl DirectoryMap<'_> {
    /// Normalize each key segment for consistent file naming
    fn normalize_segment(segment: &str) -> String {
        segment
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.to_path_buf();
        let segments: Vec<String> = key.split('/').map(Self::normalize_segment).collect();
        if let Some((last, parents)) = segments.split_last() {
            for parent in parents {
                path.push(parent);
            }
            path.push(format!("{last}.json"));
        }
        path
    }
}

impl ResourceMap for DirectoryMap<'_> {
    fn get(&self, key: &str) -> Result<Option<Value>, FetchError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| FetchError::failed(format!("Failed to read {path:?}: {e}")))?;
        if content.is_empty() {
            warn!("Empty resource file {:?}, treating as missing", path);
            return Ok(None);
        }
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| FetchError::failed(format!("Failed to parse JSON in {path:?}: {e}")))
    }

    fn put(&mut self, key: &str, value: Value) -> Result<(), FetchError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent)
                .map_err(|e| FetchError::failed(format!("Failed to create {parent:?}: {e}")))?;
        }
        let content = serde_json::to_string_pretty(&value)
            .map_err(|e| FetchError::failed(e.to_string()))?;
        debug!("Writing resource {} to {:?}", key, path);
        fs::write(&path, content)
            .map_err(|e| FetchError::failed(format!("Failed to write {path:?}: {e}")))
    }

    fn remove(&mut self, key: &str) -> Result<bool, FetchError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .map(|_| true)
            .map_err(|e| FetchError::failed(format!("Failed to delete {path:?}: {e}")))
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn fetch(&self, resource: &Resource) -> Result<Value, FetchError> {
        emulation::fetch(&self.map(), resource)
    }

    async fn mutate(
        &self,
        method: Method,
        resource: &Resource,
        body: Value,
    ) -> Result<Value, FetchError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| FetchError::failed("data directory lock poisoned"))?;
        emulation::mutate(&mut self.map(), method, resource, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_key_to_path_mapping() {
        let temp_dir = TempDir::new().unwrap();
        let map = DirectoryMap {
            root: temp_dir.path(),
        };
        assert_eq!(map.path_for("sessions"), temp_dir.path().join("sessions.json"));
        assert_eq!(
            map.path_for("milestones/Laguna Seca"),
            temp_dir.path().join("milestones").join("laguna_seca.json")
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path().to_path_buf()).unwrap();

        let result = backend.fetch(&Resource::Report(SessionId::from("abc"))).await;
        assert_eq!(result, Err(FetchError::NotFound));
    }

    #[tokio::test]
    async fn test_put_then_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path().join("nested")).unwrap();
        let resource = Resource::Session(SessionId::from("s0001"));

        backend
            .mutate(Method::Put, &resource, json!({"track_name": "Spa"}))
            .await
            .unwrap();
        let value = backend.fetch(&resource).await.unwrap();
        assert_eq!(value["track_name"], json!("Spa"));

        backend
            .mutate(Method::Delete, &resource, Value::Null)
            .await
            .unwrap();
        assert_eq!(backend.fetch(&resource).await, Err(FetchError::NotFound));
    }

    #[tokio::test]
    async fn test_corrupted_file_is_a_failure_not_absence() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(temp_dir.path().join("reports")).unwrap();
        fs::write(temp_dir.path().join("reports").join("abc.json"), "{not json").unwrap();

        let result = backend.fetch(&Resource::Report(SessionId::from("abc"))).await;
        assert!(matches!(result, Err(FetchError::Failed { .. })));
    }
}
