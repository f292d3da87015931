use crate::layout::StateLayout;
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use strata_schema::{ActivationMode, EnvName, RecipeId, ShortId};
use tempfile::NamedTempFile;

/// Progress of a provisioning run through the fixed stage sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionState {
    Pending,
    SystemUpdated,
    EnvironmentMaterialized,
    Provisioned,
    Failed,
}

impl std::fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionState::Pending => write!(f, "pending"),
            ProvisionState::SystemUpdated => write!(f, "system-updated"),
            ProvisionState::EnvironmentMaterialized => write!(f, "environment-materialized"),
            ProvisionState::Provisioned => write!(f, "provisioned"),
            ProvisionState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Succeeded => write!(f, "succeeded"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: String,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildRecord {
    pub recipe_id: RecipeId,
    pub short_id: ShortId,
    pub env_name: EnvName,
    pub base_image: String,
    pub activation: ActivationMode,
    pub backend: String,
    pub state: ProvisionState,
    pub stages: Vec<StageOutcome>,
    pub run_count: u32,
    pub created_at: String,
    pub updated_at: String,
    /// blake3 checksum for integrity verification. `None` for hand-written records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl BuildRecord {
    /// Compute the checksum over the record content (excluding the checksum field itself).
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

pub struct RecordStore {
    layout: StateLayout,
}

impl RecordStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    pub fn put(&self, record: &BuildRecord) -> Result<(), StoreError> {
        let dest = self.layout.record_path(&record.recipe_id);

        let mut with_checksum = record.clone();
        with_checksum.checksum = Some(with_checksum.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;

        let dir = self.layout.records_dir();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        Ok(())
    }

    pub fn get(&self, recipe_id: &str) -> Result<BuildRecord, StoreError> {
        let path = self.layout.record_path(recipe_id);
        if !path.exists() {
            return Err(StoreError::RecordNotFound(recipe_id.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        let record: BuildRecord = serde_json::from_str(&content)?;

        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    id: recipe_id.to_owned(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(record)
    }

    pub fn exists(&self, recipe_id: &str) -> bool {
        self.layout.record_path(recipe_id).exists()
    }

    pub fn remove(&self, recipe_id: &str) -> Result<(), StoreError> {
        let path = self.layout.record_path(recipe_id);
        if !path.exists() {
            return Err(StoreError::RecordNotFound(recipe_id.to_owned()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<BuildRecord>, StoreError> {
        let dir = self.layout.records_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            match self.get(id) {
                Ok(record) => results.push(record),
                Err(e) => {
                    tracing::warn!("skipping corrupted build record '{id}': {e}");
                }
            }
        }
        results.sort_by(|a, b| a.recipe_id.cmp(&b.recipe_id));
        Ok(results)
    }

    /// Resolve a full id, a short id, a unique prefix, or an environment name.
    pub fn resolve(&self, input: &str) -> Result<BuildRecord, StoreError> {
        if self.exists(input) {
            return self.get(input);
        }
        let records = self.list()?;
        let matches: Vec<&BuildRecord> = records
            .iter()
            .filter(|r| r.recipe_id.starts_with(input) || r.env_name == input)
            .collect();
        match matches.as_slice() {
            [] => Err(StoreError::RecordNotFound(input.to_owned())),
            [one] => Ok((*one).clone()),
            many => Err(StoreError::AmbiguousPrefix {
                prefix: input.to_owned(),
                count: many.len(),
            }),
        }
    }
}
