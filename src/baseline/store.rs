//! Versioned baseline persistence
//!
//! One directory per environment holds numbered `baseline-vNNNN.json`
//! records plus a `latest.json` pointer. Records are immutable once written;
//! a new capture gets the next version and the pointer is replaced by a
//! write-to-temp-then-rename so readers never observe a torn pointer.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::baseline::BaselineRecord;
use crate::error::{MailstormError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct LatestPointer {
    version: u64,
    file: String,
}

/// Filesystem store for baseline records
pub struct BaselineStore {
    root: PathBuf,
}

impl BaselineStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn env_dir(&self, environment: &str) -> PathBuf {
        self.root.join(environment)
    }

    /// Persist a record under the next version for its environment and
    /// repoint `latest` at it. Returns the record with its version assigned.
    pub fn save(&self, mut record: BaselineRecord) -> Result<BaselineRecord> {
        let dir = self.env_dir(&record.environment);
        fs::create_dir_all(&dir).map_err(|e| store_error("create environment directory", e))?;

        record.version = self.next_version(&record.environment)?;
        let file_name = format!("baseline-v{:04}.json", record.version);
        let path = dir.join(&file_name);

        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| store_error("serialize baseline record", e))?;
        fs::write(&path, json).map_err(|e| store_error("write baseline record", e))?;

        // standalone threshold definition, consumable by later runs without
        // loading the whole record
        let thresholds_json = serde_json::to_string_pretty(&record.thresholds)
            .map_err(|e| store_error("serialize threshold set", e))?;
        let thresholds_path = dir.join(format!("thresholds-v{:04}.json", record.version));
        fs::write(&thresholds_path, thresholds_json)
            .map_err(|e| store_error("write threshold set", e))?;

        let pointer = LatestPointer {
            version: record.version,
            file: file_name,
        };
        let pointer_json = serde_json::to_string_pretty(&pointer)
            .map_err(|e| store_error("serialize latest pointer", e))?;
        let tmp = dir.join("latest.json.tmp");
        fs::write(&tmp, pointer_json).map_err(|e| store_error("write latest pointer", e))?;
        fs::rename(&tmp, dir.join("latest.json"))
            .map_err(|e| store_error("replace latest pointer", e))?;

        info!(
            environment = %record.environment,
            version = record.version,
            path = %path.display(),
            "baseline persisted"
        );
        Ok(record)
    }

    /// Next unused version number for an environment, starting at 1
    fn next_version(&self, environment: &str) -> Result<u64> {
        let dir = self.env_dir(environment);
        let mut max_version = 0u64;
        if dir.exists() {
            let entries =
                fs::read_dir(&dir).map_err(|e| store_error("scan environment directory", e))?;
            for entry in entries.flatten() {
                if let Some(version) = parse_version(&entry.path()) {
                    max_version = max_version.max(version);
                }
            }
        }
        Ok(max_version + 1)
    }

    /// Load the record the `latest` pointer names, if any exists
    pub fn latest(&self, environment: &str) -> Result<Option<BaselineRecord>> {
        let pointer_path = self.env_dir(environment).join("latest.json");
        if !pointer_path.exists() {
            return Ok(None);
        }
        let raw =
            fs::read_to_string(&pointer_path).map_err(|e| store_error("read latest pointer", e))?;
        let pointer: LatestPointer =
            serde_json::from_str(&raw).map_err(|e| store_error("parse latest pointer", e))?;
        let record = self.load_file(&self.env_dir(environment).join(pointer.file))?;
        Ok(Some(record))
    }

    /// Load one specific version
    pub fn load_version(&self, environment: &str, version: u64) -> Result<BaselineRecord> {
        let path = self
            .env_dir(environment)
            .join(format!("baseline-v{version:04}.json"));
        self.load_file(&path)
    }

    fn load_file(&self, path: &Path) -> Result<BaselineRecord> {
        let raw = fs::read_to_string(path).map_err(|e| store_error("read baseline record", e))?;
        serde_json::from_str(&raw).map_err(|e| store_error("parse baseline record", e))
    }
}

fn parse_version(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("baseline-v")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

fn store_error(action: &str, err: impl std::error::Error + Send + Sync + 'static) -> MailstormError {
    MailstormError::BaselineError {
        message: format!("failed to {action}: {err}"),
        source: Some(Box::new(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!(
            parse_version(Path::new("/x/baseline-v0003.json")),
            Some(3)
        );
        assert_eq!(parse_version(Path::new("/x/latest.json")), None);
        assert_eq!(parse_version(Path::new("/x/baseline-vabc.json")), None);
    }
}
