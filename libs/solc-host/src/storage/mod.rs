//! Per-user contract projects kept in a key/value blob store.
//!
//! All projects of one user live under a single key as a JSON object keyed by
//! project id. The key is scoped by the connected wallet address, if any.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod blob;

pub use blob::{BlobStore, DirBlobStore, MemoryBlobStore, StorageError};

pub const STORAGE_KEY: &str = "blockscout_contract_editor_projects";
pub const DEFAULT_FILE_NAME: &str = "contract.sol";
pub const DEFAULT_FILE_CONTENT: &str = "// SPDX-License-Identifier: MIT\npragma solidity ^0.8.0;\n\ncontract MyContract {\n    // Your code here\n}\n";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractFile {
  pub id: String,
  pub name: String,
  pub content: String,
  pub last_modified: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractProject {
  pub id: String,
  pub name: String,
  pub files: Vec<ContractFile>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub active_file_id: Option<String>,
  pub created_at: i64,
  pub last_modified: i64,
}

impl ContractProject {
  /// Sources keyed by file name, ready for compilation.
  pub fn sources(&self) -> BTreeMap<String, String> {
    self
      .files
      .iter()
      .map(|file| (file.name.clone(), file.content.clone()))
      .collect()
  }
}

#[derive(Clone, Debug, Default)]
pub struct ProjectUpdate {
  pub name: Option<String>,
  pub files: Option<Vec<ContractFile>>,
  pub active_file_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct FileUpdate {
  pub name: Option<String>,
  pub content: Option<String>,
}

type Projects = BTreeMap<String, ContractProject>;
type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

fn now_millis() -> i64 {
  chrono::Utc::now().timestamp_millis()
}

fn new_id() -> String {
  Uuid::new_v4().to_string()
}

pub struct ContractStorage<S: BlobStore> {
  store: S,
  wallet: Option<String>,
  clock: Clock,
}

impl<S: BlobStore> ContractStorage<S> {
  pub fn new(store: S) -> Self {
    Self::with_clock(store, now_millis)
  }

  pub fn with_clock(store: S, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
    Self {
      store,
      wallet: None,
      clock: Box::new(clock),
    }
  }

  pub fn wallet_address(&self) -> Option<&str> {
    self.wallet.as_deref()
  }

  /// Scope storage to `address`. Disconnecting (`None`) falls back to the
  /// anonymous key; the wallet's projects stay stored for its next connection.
  pub fn set_wallet_address(&mut self, address: Option<&str>) {
    self.wallet = address
      .map(str::trim)
      .filter(|address| !address.is_empty())
      .map(str::to_lowercase);
  }

  pub fn storage_key(&self) -> String {
    match &self.wallet {
      Some(wallet) => format!("{STORAGE_KEY}_{wallet}"),
      None => STORAGE_KEY.to_string(),
    }
  }

  /// Remove the connected wallet's projects. No-op without a wallet.
  pub fn clear_user_data(&self) {
    if self.wallet.is_none() {
      return;
    }
    if let Err(err) = self.store.remove(&self.storage_key()) {
      log::warn!("failed to clear contract projects: {err}");
    }
  }

  fn load(&self) -> Projects {
    let raw = match self.store.get(&self.storage_key()) {
      Ok(Some(raw)) => raw,
      Ok(None) => return Projects::new(),
      Err(err) => {
        log::warn!("failed to read contract projects: {err}");
        return Projects::new();
      }
    };
    serde_json::from_str(&raw).unwrap_or_else(|err| {
      log::warn!("discarding unreadable contract projects: {err}");
      Projects::new()
    })
  }

  fn save(&self, projects: &Projects) {
    let result = serde_json::to_string(projects)
      .map_err(StorageError::from)
      .and_then(|raw| self.store.set(&self.storage_key(), &raw));
    if let Err(err) = result {
      log::warn!("failed to save contract projects: {err}");
    }
  }

  pub fn create_project(&self, name: &str) -> ContractProject {
    let now = (self.clock)();
    let project = ContractProject {
      id: new_id(),
      name: name.to_string(),
      files: vec![ContractFile {
        id: new_id(),
        name: DEFAULT_FILE_NAME.to_string(),
        content: DEFAULT_FILE_CONTENT.to_string(),
        last_modified: now,
      }],
      active_file_id: None,
      created_at: now,
      last_modified: now,
    };

    let mut projects = self.load();
    projects.insert(project.id.clone(), project.clone());
    self.save(&projects);
    project
  }

  pub fn get_project(&self, project_id: &str) -> Option<ContractProject> {
    self.load().remove(project_id)
  }

  /// Every project, most recently modified first.
  pub fn all_projects(&self) -> Vec<ContractProject> {
    let mut projects: Vec<ContractProject> = self.load().into_values().collect();
    projects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
    projects
  }

  pub fn update_project(&self, project_id: &str, update: ProjectUpdate) -> bool {
    let mut projects = self.load();
    let Some(project) = projects.get_mut(project_id) else {
      return false;
    };
    if let Some(name) = update.name {
      project.name = name;
    }
    if let Some(files) = update.files {
      project.files = files;
    }
    if let Some(active_file_id) = update.active_file_id {
      project.active_file_id = Some(active_file_id);
    }
    project.last_modified = (self.clock)();
    self.save(&projects);
    true
  }

  pub fn delete_project(&self, project_id: &str) -> bool {
    let mut projects = self.load();
    let removed = projects.remove(project_id).is_some();
    self.save(&projects);
    removed
  }

  pub fn add_file(&self, project_id: &str, name: &str, content: &str) -> Option<ContractFile> {
    let mut projects = self.load();
    let project = projects.get_mut(project_id)?;
    let now = (self.clock)();
    let file = ContractFile {
      id: new_id(),
      name: name.to_string(),
      content: content.to_string(),
      last_modified: now,
    };
    project.files.push(file.clone());
    project.last_modified = now;
    self.save(&projects);
    Some(file)
  }

  pub fn update_file(&self, project_id: &str, file_id: &str, update: FileUpdate) -> bool {
    let mut projects = self.load();
    let Some(project) = projects.get_mut(project_id) else {
      return false;
    };
    let Some(file) = project.files.iter_mut().find(|file| file.id == file_id) else {
      return false;
    };

    let now = (self.clock)();
    if let Some(name) = update.name {
      file.name = name;
    }
    if let Some(content) = update.content {
      file.content = content;
    }
    file.last_modified = now;
    project.last_modified = now;
    self.save(&projects);
    true
  }

  pub fn delete_file(&self, project_id: &str, file_id: &str) -> bool {
    let mut projects = self.load();
    let Some(project) = projects.get_mut(project_id) else {
      return false;
    };
    project.files.retain(|file| file.id != file_id);
    project.last_modified = (self.clock)();
    self.save(&projects);
    true
  }

  /// Pretty-printed JSON of one project.
  pub fn export_project(&self, project_id: &str) -> Option<String> {
    let project = self.get_project(project_id)?;
    match serde_json::to_string_pretty(&project) {
      Ok(json) => Some(json),
      Err(err) => {
        log::warn!("failed to export project {project_id}: {err}");
        None
      }
    }
  }

  /// Store an exported project under a fresh id. `None` when `json` is not a project.
  pub fn import_project(&self, json: &str) -> Option<ContractProject> {
    let mut project: ContractProject = match serde_json::from_str(json) {
      Ok(project) => project,
      Err(err) => {
        log::debug!("rejecting project import: {err}");
        return None;
      }
    };
    project.id = new_id();
    project.last_modified = (self.clock)();

    let mut projects = self.load();
    projects.insert(project.id.clone(), project.clone());
    self.save(&projects);
    Some(project)
  }
}
