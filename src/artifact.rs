//! Compiled contract artifacts on disk.
//!
//! The build output directory holds two files per contract:
//! `{package}_{name}.contract_class.json` (the Sierra class that gets
//! declared) and `{package}_{name}.compiled_contract_class.json` (the CASM
//! the sequencer executes). Both hashes are computed here, once, the way the
//! network computes them.

use starknet::core::types::contract::{CompiledClass, SierraClass};
use std::path::{Path, PathBuf};

use crate::errors::ArtifactError;
use crate::types::{ClassHash, Felt};

const CONTRACT_CLASS_SUFFIX: &str = "contract_class.json";
const COMPILED_CLASS_SUFFIX: &str = "compiled_contract_class.json";

/// A contract's compiled code in both representations. Loaded once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub contract_class: Vec<u8>,
    pub compiled_class: Vec<u8>,
    /// Sierra class hash; what the network knows the class by.
    pub class_hash: ClassHash,
    /// CASM hash committed to by the declare transaction.
    pub compiled_class_hash: Felt,
}

pub struct ArtifactStore {
    dir: PathBuf,
    package: String,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, package: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            package: package.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn contract_class_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}.{}", self.package, name, CONTRACT_CLASS_SUFFIX))
    }

    pub fn compiled_class_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}.{}", self.package, name, COMPILED_CLASS_SUFFIX))
    }

    pub fn load(&self, name: &str) -> Result<Artifact, ArtifactError> {
        let contract_path = self.contract_class_path(name);
        let compiled_path = self.compiled_class_path(name);
        let contract_class = read_json_bytes(&contract_path)?;
        let compiled_class = read_json_bytes(&compiled_path)?;

        let class_hash = sierra_class_hash(&contract_path, &contract_class)?;
        let compiled_class_hash = casm_class_hash(&compiled_path, &compiled_class)?;
        tracing::debug!(
            contract = name,
            class_hash = %class_hash,
            compiled_class_hash = %compiled_class_hash,
            contract_class_bytes = contract_class.len(),
            "loaded artifact"
        );
        Ok(Artifact {
            name: name.to_string(),
            contract_class,
            compiled_class,
            class_hash,
            compiled_class_hash,
        })
    }

    /// Load every named artifact, stopping at the first missing or broken one.
    pub fn load_all<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<Artifact>, ArtifactError> {
        names.into_iter().map(|name| self.load(name)).collect()
    }
}

/// Read a file and check it parses as JSON.
fn read_json_bytes(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::Missing {
            path: path.to_path_buf(),
        });
    }
    let bytes = std::fs::read(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice::<serde::de::IgnoredAny>(&bytes).map_err(|source| {
        ArtifactError::InvalidJson {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(bytes)
}

fn invalid_class(path: &Path, reason: impl ToString) -> ArtifactError {
    ArtifactError::InvalidClass {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Hash of the flattened Sierra class, as used by `starknet_getClass`.
fn sierra_class_hash(path: &Path, bytes: &[u8]) -> Result<ClassHash, ArtifactError> {
    let class: SierraClass =
        serde_json::from_slice(bytes).map_err(|e| invalid_class(path, e))?;
    let flattened = class.flatten().map_err(|e| invalid_class(path, e))?;
    Ok(ClassHash(flattened.class_hash().into()))
}

fn casm_class_hash(path: &Path, bytes: &[u8]) -> Result<Felt, ArtifactError> {
    let class: CompiledClass =
        serde_json::from_slice(bytes).map_err(|e| invalid_class(path, e))?;
    let hash = class.class_hash().map_err(|e| invalid_class(path, e))?;
    Ok(hash.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sierra(program: &[&str]) -> String {
        let program: Vec<String> = program.iter().map(|f| format!("\"{f}\"")).collect();
        format!(
            r#"{{"sierra_program":[{}],"sierra_program_debug_info":{{"type_names":[],"libfunc_names":[],"user_func_names":[]}},"contract_class_version":"0.1.0","entry_points_by_type":{{"EXTERNAL":[],"L1_HANDLER":[],"CONSTRUCTOR":[]}},"abi":[]}}"#,
            program.join(",")
        )
    }

    const CASM: &str = r#"{"prime":"0x800000000000011000000000000000000000000000000000000000000000001","compiler_version":"2.6.3","bytecode":["0x1"],"bytecode_segment_lengths":[1],"hints":[],"pythonic_hints":[],"entry_points_by_type":{"EXTERNAL":[],"L1_HANDLER":[],"CONSTRUCTOR":[]}}"#;

    fn write_artifact(dir: &Path, name: &str, contract_class: &str) {
        fs::write(
            dir.join(format!("btcvault_{name}.contract_class.json")),
            contract_class,
        )
        .unwrap();
        fs::write(
            dir.join(format!("btcvault_{name}.compiled_contract_class.json")),
            CASM,
        )
        .unwrap();
    }

    #[test]
    fn test_paths_follow_package_prefix_convention() {
        let store = ArtifactStore::new("/build/dev", "btcvault");
        assert_eq!(
            store.contract_class_path("Router"),
            PathBuf::from("/build/dev/btcvault_Router.contract_class.json")
        );
        assert_eq!(
            store.compiled_class_path("Router"),
            PathBuf::from("/build/dev/btcvault_Router.compiled_contract_class.json")
        );
    }

    #[test]
    fn test_load_reads_both_representations() {
        let dir = tempdir().unwrap();
        let class = sierra(&["0x1", "0x2"]);
        write_artifact(dir.path(), "BTCVault", &class);
        let store = ArtifactStore::new(dir.path(), "btcvault");

        let artifact = store.load("BTCVault").unwrap();
        assert_eq!(artifact.name, "BTCVault");
        assert_eq!(artifact.contract_class, class.as_bytes());
        assert_eq!(artifact.compiled_class, CASM.as_bytes());
        assert!(!artifact.class_hash.felt().is_zero());
        assert!(!artifact.compiled_class_hash.is_zero());
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "btcvault");
        match store.load("Router") {
            Err(ArtifactError::Missing { path }) => {
                assert!(path.ends_with("btcvault_Router.contract_class.json"));
            }
            other => panic!("Expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn test_load_rejects_non_json() {
        let dir = tempdir().unwrap();
        write_artifact(dir.path(), "Router", "<!DOCTYPE html>");
        let store = ArtifactStore::new(dir.path(), "btcvault");
        assert!(matches!(
            store.load("Router"),
            Err(ArtifactError::InvalidJson { .. })
        ));
    }

    #[test]
    fn test_load_rejects_json_that_is_not_a_sierra_class() {
        let dir = tempdir().unwrap();
        write_artifact(dir.path(), "Router", r#"{"bytecode":["0x1"]}"#);
        let store = ArtifactStore::new(dir.path(), "btcvault");
        match store.load("Router") {
            Err(ArtifactError::InvalidClass { path, .. }) => {
                assert!(path.ends_with("btcvault_Router.contract_class.json"));
            }
            other => panic!("Expected InvalidClass, got {other:?}"),
        }
    }

    #[test]
    fn test_class_hash_is_the_flattened_sierra_hash() {
        let dir = tempdir().unwrap();
        let class = sierra(&["0x1", "0x2"]);
        write_artifact(dir.path(), "A", &class);
        let store = ArtifactStore::new(dir.path(), "btcvault");

        let expected: SierraClass = serde_json::from_str(&class).unwrap();
        let expected = expected.flatten().unwrap().class_hash();
        assert_eq!(
            store.load("A").unwrap().class_hash,
            ClassHash(expected.into())
        );
    }

    #[test]
    fn test_class_hash_ignores_formatting_but_tracks_the_program() {
        let dir = tempdir().unwrap();
        let class = sierra(&["0x1", "0x2"]);
        let reformatted = serde_json::to_string_pretty(
            &serde_json::from_str::<serde_json::Value>(&class).unwrap(),
        )
        .unwrap();
        write_artifact(dir.path(), "A", &class);
        write_artifact(dir.path(), "B", &reformatted);
        write_artifact(dir.path(), "C", &sierra(&["0x1", "0x3"]));
        let store = ArtifactStore::new(dir.path(), "btcvault");
        let all = store.load_all(["A", "B", "C"]).unwrap();
        assert_eq!(all[0].class_hash, all[1].class_hash);
        assert_ne!(all[0].class_hash, all[2].class_hash);
    }

    #[test]
    fn test_load_all_stops_at_first_failure() {
        let dir = tempdir().unwrap();
        write_artifact(dir.path(), "A", &sierra(&["0x1"]));
        let store = ArtifactStore::new(dir.path(), "btcvault");
        assert!(store.load_all(["A", "Missing"]).is_err());
    }
}
