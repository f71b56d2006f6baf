use anyhow::{Context, Result, anyhow, bail};
use std::path::PathBuf;

use crate::plan::Chain;
use crate::signer::Secret;
use crate::types::ContractAddress;

pub const ENV_DEPLOYER_ADDRESS: &str = "DEPLOYER_ADDRESS";
pub const ENV_DEPLOYER_PRIVATE_KEY: &str = "DEPLOYER_PRIVATE_KEY";
pub const ENV_RPC_URL: &str = "RPC_URL";

pub const DEFAULT_ARTIFACTS_DIR: &str = "packages/snfoundry/contracts/target/dev";
pub const DEFAULT_PACKAGE: &str = "btcvault";
pub const DEFAULT_STATE_DIR: &str = ".stark-provision";

/// Signer credentials and endpoint, read from the environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub address: ContractAddress,
    pub secret: Secret,
    pub rpc_url: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through `lookup`, so callers other than the process
    /// environment can supply them.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
                _ => Err(anyhow!("{key} is not set")),
            }
        };

        let address_raw = required(ENV_DEPLOYER_ADDRESS)?;
        let address: ContractAddress = address_raw
            .parse()
            .with_context(|| format!("{ENV_DEPLOYER_ADDRESS} is not a valid address"))?;
        let secret = Secret::new(required(ENV_DEPLOYER_PRIVATE_KEY)?);
        secret
            .scalar()
            .with_context(|| format!("{ENV_DEPLOYER_PRIVATE_KEY} is not a valid private key"))?;
        let rpc_url = required(ENV_RPC_URL)?;
        if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
            bail!("{ENV_RPC_URL} must be an http(s) URL, got {rpc_url}");
        }

        Ok(Self {
            address,
            secret,
            rpc_url,
        })
    }
}

/// Runtime configuration for a provisioning run.
#[derive(Debug, Clone)]
pub struct Config {
    pub chain: Chain,
    pub artifacts_dir: PathBuf,
    pub package: String,
    pub output: PathBuf,
    pub state_dir: PathBuf,
    pub verbose: bool,
    pub credentials: Credentials,
}

impl Config {
    pub fn new(
        chain: Chain,
        artifacts_dir: Option<PathBuf>,
        package: Option<String>,
        output: Option<PathBuf>,
        state_dir: Option<PathBuf>,
        verbose: bool,
        credentials: Credentials,
    ) -> Self {
        Self {
            chain,
            artifacts_dir: artifacts_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACTS_DIR)),
            package: package.unwrap_or_else(|| DEFAULT_PACKAGE.to_string()),
            output: output.unwrap_or_else(|| default_manifest_path(chain)),
            state_dir: state_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            verbose,
            credentials,
        }
    }
}

pub fn default_manifest_path(chain: Chain) -> PathBuf {
    PathBuf::from(format!("deployment-{chain}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn complete() -> HashMap<String, String> {
        env(&[
            (ENV_DEPLOYER_ADDRESS, "0x0123abc"),
            (ENV_DEPLOYER_PRIVATE_KEY, "0x5ec2e7"),
            (ENV_RPC_URL, "https://starknet-mainnet.example/rpc"),
        ])
    }

    #[test]
    fn reads_all_three_variables() {
        let vars = complete();
        let creds = Credentials::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(creds.address.to_string(), "0x123abc");
        assert_eq!(creds.secret.expose(), "0x5ec2e7");
        assert_eq!(creds.rpc_url, "https://starknet-mainnet.example/rpc");
    }

    #[test]
    fn missing_variable_is_named() {
        let mut vars = complete();
        vars.remove(ENV_DEPLOYER_PRIVATE_KEY);
        let err = Credentials::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains(ENV_DEPLOYER_PRIVATE_KEY));
    }

    #[test]
    fn blank_variable_counts_as_missing() {
        let mut vars = complete();
        vars.insert(ENV_RPC_URL.to_string(), "   ".to_string());
        let err = Credentials::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains(ENV_RPC_URL));
    }

    #[test]
    fn malformed_address_is_rejected() {
        let mut vars = complete();
        vars.insert(ENV_DEPLOYER_ADDRESS.to_string(), "deployer".to_string());
        let err = Credentials::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(format!("{err:#}").contains(ENV_DEPLOYER_ADDRESS));
    }

    #[test]
    fn secret_is_not_debug_printed() {
        let vars = complete();
        let creds = Credentials::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert!(!format!("{creds:?}").contains("5ec2e7"));
    }

    #[test]
    fn private_key_must_be_a_field_element() {
        let mut vars = complete();
        vars.insert(ENV_DEPLOYER_PRIVATE_KEY.to_string(), "hunter2".to_string());
        let err = Credentials::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        let rendered = format!("{err:#}");
        assert!(rendered.contains(ENV_DEPLOYER_PRIVATE_KEY));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn defaults_follow_the_chain() {
        let vars = complete();
        let creds = Credentials::from_lookup(|k| vars.get(k).cloned()).unwrap();
        let config = Config::new(Chain::Sepolia, None, None, None, None, false, creds);
        assert_eq!(config.output, PathBuf::from("deployment-sepolia.json"));
        assert_eq!(config.artifacts_dir, PathBuf::from(DEFAULT_ARTIFACTS_DIR));
        assert_eq!(config.package, "btcvault");
        assert_eq!(config.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
    }
}
