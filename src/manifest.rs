//! The deployment manifest: the durable record of a successful run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::ManifestError;
use crate::phases::DeploymentRecord;
use crate::plan::Chain;
use crate::types::{ClassHash, ContractAddress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEntry {
    pub address: ContractAddress,
    pub class_hash: ClassHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub network: String,
    pub timestamp: DateTime<Utc>,
    pub contracts: BTreeMap<String, ContractEntry>,
    pub external_addresses: BTreeMap<String, ContractAddress>,
}

impl Manifest {
    pub fn new(
        chain: Chain,
        deployments: &[DeploymentRecord],
        external: &BTreeMap<String, ContractAddress>,
    ) -> Self {
        let contracts = deployments
            .iter()
            .map(|d| {
                (
                    d.name.clone(),
                    ContractEntry {
                        address: d.address,
                        class_hash: d.class_hash,
                    },
                )
            })
            .collect();
        Self {
            network: chain.to_string(),
            timestamp: Utc::now(),
            contracts,
            external_addresses: external.clone(),
        }
    }
}

pub struct ManifestWriter {
    path: PathBuf,
}

impl ManifestWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the manifest via a temp file in the same directory and a rename,
    /// so readers see either the previous file or the complete new one.
    pub async fn write(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        let mut body = serde_json::to_vec_pretty(manifest).map_err(ManifestError::Serialize)?;
        body.push(b'\n');

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| self.write_error(source))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "manifest".to_string());
        let temp_path = dir.join(format!(".{file_name}.tmp"));

        if let Err(source) = write_synced(&temp_path, &body).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(self.write_error(source));
        }
        if let Err(source) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(self.write_error(source));
        }

        tracing::info!(path = %self.path.display(), contracts = manifest.contracts.len(), "manifest written");
        Ok(())
    }

    fn write_error(&self, source: std::io::Error) -> ManifestError {
        ManifestError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

/// Write `body` and flush it to disk before the file is renamed into place.
async fn write_synced(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(body).await?;
    file.sync_all().await
}
