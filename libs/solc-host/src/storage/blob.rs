use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("storage I/O failed: {0}")]
  Io(#[from] std::io::Error),
  #[error("stored data is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),
}

/// String values addressed by key.
pub trait BlobStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
  fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
  fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
  values: Mutex<HashMap<String, String>>,
}

impl MemoryBlobStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl BlobStore for MemoryBlobStore {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(values.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
    values.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
    values.remove(key);
    Ok(())
  }
}

/// One `<key>.json` file per key under `root`.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
  root: PathBuf,
}

impl DirBlobStore {
  pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
    let root = root.into();
    fs::create_dir_all(&root)?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn path_for(&self, key: &str) -> PathBuf {
    let file_name: String = key
      .chars()
      .map(|c| {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
          c
        } else {
          '_'
        }
      })
      .collect();
    self.root.join(format!("{file_name}.json"))
  }
}

impl BlobStore for DirBlobStore {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(self.path_for(key)) {
      Ok(value) => Ok(Some(value)),
      Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
      Err(err) => Err(err.into()),
    }
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    fs::write(self.path_for(key), value)?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    match fs::remove_file(self.path_for(key)) {
      Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
      _ => Ok(()),
    }
  }
}
