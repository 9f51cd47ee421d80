//! The YAML node store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use drift_core::{NodeState, ServiceMap};
use driftgrid_provider::{ProviderError, ProviderResult};
use serde::{Deserialize, Serialize};

/// One persisted node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub state: NodeState,
    #[serde(default)]
    pub services: ServiceMap,
    pub env: String,
    pub env_def_name: String,
    /// Free-form settings written by configurators.
    #[serde(default)]
    pub settings: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDoc {
    #[serde(default)]
    nodes: BTreeMap<String, NodeRecord>,
}

/// Handle to the store file. Reads are always fresh; every mutation
/// rewrites the whole document.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn nodes(&self) -> ProviderResult<BTreeMap<String, NodeRecord>> {
        Ok(self.load()?.nodes)
    }

    pub fn node(&self, id: &str) -> ProviderResult<NodeRecord> {
        self.load()?
            .nodes
            .remove(id)
            .ok_or_else(|| ProviderError::Lookup(id.to_string()))
    }

    pub fn insert(&self, id: &str, record: NodeRecord) -> ProviderResult<()> {
        let mut doc = self.load()?;
        doc.nodes.insert(id.to_string(), record);
        self.save(&doc)
    }

    /// Mutate one node in place. Fails with `Lookup` when the identity
    /// is unknown.
    pub fn update(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut NodeRecord),
    ) -> ProviderResult<()> {
        let mut doc = self.load()?;
        let record = doc
            .nodes
            .get_mut(id)
            .ok_or_else(|| ProviderError::Lookup(id.to_string()))?;
        mutate(record);
        self.save(&doc)
    }

    fn load(&self) -> ProviderResult<StoreDoc> {
        if !self.path.exists() {
            return Ok(StoreDoc::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    fn save(&self, doc: &StoreDoc) -> ProviderResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_yaml::to_string(doc)?)?;
        Ok(())
    }
}
