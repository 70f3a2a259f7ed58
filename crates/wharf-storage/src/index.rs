//! The global package index document (`.wharf-db.json`).
//!
//! One JSON file at the storage root recording every known package name,
//! plus the token table for backends that persist tokens. Writes go through
//! a temp file and rename so a crash never leaves a torn index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{ErrorContext, Result};
use crate::Token;

pub(crate) const INDEX_FILENAME: &str = ".wharf-db.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct IndexFile {
    #[serde(default)]
    pub list: Vec<String>,

    #[serde(default)]
    pub tokens: BTreeMap<String, Vec<Token>>,
}

impl IndexFile {
    /// Loads the index, treating a missing file as empty.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(IndexFile::default()),
            Err(err) => Err(err).with_context(|| format!("reading index {}", path.display())),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let tmp = tmp_path(path);
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("writing index temp {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("publishing index {}", path.display()))
    }

    pub fn insert(&mut self, name: &str) -> bool {
        match self.list.binary_search_by(|probe| probe.as_str().cmp(name)) {
            Ok(_) => false,
            Err(at) => {
                self.list.insert(at, name.to_string());
                true
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.list.binary_search_by(|probe| probe.as_str().cmp(name)) {
            Ok(at) => {
                self.list.remove(at);
                true
            }
            Err(_) => false,
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".tmp-{}", wharf_utils::unique_suffix()));
    PathBuf::from(tmp)
}
