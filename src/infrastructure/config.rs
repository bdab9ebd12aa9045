//! Configuration for the reconciliation engine
//!
//! Serde-backed config structs with sensible defaults plus JSON file
//! load/save helpers. Missing files are materialized with defaults so an
//! operator always has a file to edit.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::domain::disposition::DispositionCatalog;
use crate::domain::index::IndexKeyPolicy;

use super::fetch_client::FetchPolicy;

/// Platform field codes of the custom target entity. These are
/// portal-specific; the defaults are the codes this engine was first
/// deployed against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldCodes {
    pub telephony_call_id: String,
    pub crm_activity_id: String,
    pub dedup_key: String,
    pub user_id: String,
    pub user_name: String,
    pub call_direction: String,
    pub phone_number: String,
    pub call_status_code: String,
    pub call_start_dt: String,
    pub call_duration: String,
    pub answered: String,
    pub disposition: String,
    pub disposition_raw: String,
    pub entity_type: String,
    pub entity_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub synced_at: String,
}

impl Default for FieldCodes {
    fn default() -> Self {
        Self {
            telephony_call_id: "ufCrm12_1769103594".to_string(),
            crm_activity_id: "ufCrm12_1769103691".to_string(),
            dedup_key: "ufCrm12_1769103795".to_string(),
            user_id: "ufCrm12_1769103861".to_string(),
            user_name: "ufCrm12_1769103932".to_string(),
            call_direction: "ufCrm12_1769103994".to_string(),
            phone_number: "ufCrm12_1769104069".to_string(),
            call_status_code: "ufCrm12_1769104141".to_string(),
            call_start_dt: "ufCrm12_1769104245".to_string(),
            call_duration: "ufCrm12_1769104293".to_string(),
            answered: "ufCrm12_1769104391".to_string(),
            disposition: "ufCrm12_1769104508".to_string(),
            disposition_raw: "ufCrm12_1769104556".to_string(),
            entity_type: "ufCrm12_1769104880".to_string(),
            entity_id: "ufCrm12_1769104915".to_string(),
            created_at: "ufCrm12_1769104953".to_string(),
            updated_at: "ufCrm12_1769104996".to_string(),
            synced_at: "ufCrm12_1769105024".to_string(),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Custom entity type holding the reconciled records.
    pub entity_type_id: u64,

    pub field_codes: FieldCodes,

    /// Symmetric match window in minutes. Values below 1 are clamped.
    pub match_window_min: i64,

    pub fetch: FetchPolicy,

    /// What the activity index buckets on.
    pub index_key: IndexKeyPolicy,

    /// Fixed disposition catalog scanned when the prefix marker is absent.
    pub dispositions: Vec<String>,

    /// Literal marker that introduces an explicit disposition in activity
    /// result text.
    pub result_prefix: String,

    /// Propagate the resolved disposition back onto the source activity.
    pub write_disposition_to_activity: bool,

    /// Write-back goes into DESCRIPTION (prepended) instead of RESULT.
    pub prepend_to_description: bool,

    /// Re-fetch written records and log a field comparison.
    pub verify_saves: bool,

    /// Emit a progress event every N processed items.
    pub progress_every: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            entity_type_id: 1068,
            field_codes: FieldCodes::default(),
            match_window_min: 3,
            fetch: FetchPolicy::default(),
            index_key: IndexKeyPolicy::default(),
            dispositions: [
                "REUNIÃO AGENDADA",
                "FALEI COM SECRETÁRIA",
                "FOLLOW-UP",
                "RETORNO POR E-MAIL",
                "NÃO TEM INTERESSE",
                "NÃO FAZ LOCAÇÃO",
                "CAIXA POSTAL",
                "CHAMADA OCUPADA",
                "DESLIGOU",
                "CHAMADA PERDIDA",
                "NÚMERO INCORRETO",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            result_prefix: "[DISPOSITION]".to_string(),
            write_disposition_to_activity: true,
            prepend_to_description: false,
            verify_saves: false,
            progress_every: 10,
        }
    }
}

impl SyncConfig {
    pub fn window_minutes(&self) -> i64 {
        self.match_window_min.max(1)
    }

    pub fn window_ms(&self) -> i64 {
        self.window_minutes() * 60_000
    }

    pub fn catalog(&self) -> DispositionCatalog {
        DispositionCatalog::new(&self.result_prefix, &self.dispositions)
    }

    /// Loads config from `path`, writing (and returning) the defaults when
    /// the file does not exist yet.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path).await?;
            info!("wrote default configuration to {}", path.display());
            return Ok(config);
        }

        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create config directory {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, text)
            .await
            .with_context(|| format!("failed to write config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.entity_type_id, 1068);
        assert_eq!(config.match_window_min, 3);
        assert_eq!(config.dispositions.len(), 11);
        assert_eq!(config.fetch.page_timeout_ms, 120_000);
        assert_eq!(config.index_key, IndexKeyPolicy::OwnerUser);
    }

    #[test]
    fn window_is_clamped_to_one_minute() {
        let config = SyncConfig { match_window_min: 0, ..Default::default() };
        assert_eq!(config.window_ms(), 60_000);
        let negative = SyncConfig { match_window_min: -5, ..Default::default() };
        assert_eq!(negative.window_ms(), 60_000);
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"match_window_min": 5}"#).unwrap();
        assert_eq!(config.match_window_min, 5);
        assert_eq!(config.entity_type_id, 1068);
        assert_eq!(config.fetch.max_retries, 3);
    }

    #[tokio::test]
    async fn missing_file_is_materialized_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("callsync.json");
        let config = SyncConfig::load_or_default(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.entity_type_id, 1068);

        // Round trip through the file we just wrote.
        let reloaded = SyncConfig::load_or_default(&path).await.unwrap();
        assert_eq!(reloaded.dispositions, config.dispositions);
    }
}
