use std::{
    fs,
    path::{Path, PathBuf},
};

use engine::{CategoryBinding, RateLimitRecord};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::Result;

/// Saved data of one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerState {
    pub categories: Option<CategoryBinding>,
}

/// JSON files kept between runs under the state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn calls_path(&self) -> PathBuf {
        self.root.join("api").join("calls.json")
    }

    fn owner_path(&self, name: &str) -> PathBuf {
        self.root.join("owners").join(format!("{name}.json"))
    }

    pub fn load_rate_limit(&self) -> Result<Option<RateLimitRecord>> {
        load(&self.calls_path())
    }

    pub fn save_rate_limit(&self, record: &RateLimitRecord) -> Result<()> {
        save(&self.calls_path(), record)
    }

    pub fn load_owner(&self, name: &str) -> Result<OwnerState> {
        Ok(load(&self.owner_path(name))?.unwrap_or_default())
    }

    pub fn save_owner(&self, name: &str, state: &OwnerState) -> Result<()> {
        save(&self.owner_path(name), state)
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_string_pretty(value)?;
    fs::write(path, payload)?;
    Ok(())
}
