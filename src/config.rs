/// Runtime configuration.
///
/// The library takes these values at construction time and never reads the
/// environment itself. [`load`] and [`load_from_str`] are for composition
/// roots such as the `otp-vault` binary.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. The TOML file, when given
/// 3. `OTP_VAULT_*` environment variables
use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::chain::ethereum::EthereumConfig;
use crate::chain::ConfirmationPolicy;
use crate::crypto::kdf::PBKDF2_ITERATIONS;
use crate::error::{Result, VaultError};
use crate::storage::ipfs::IpfsConfig;

/// Target network for the pointer contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    Mainnet,
    #[default]
    Sepolia,
    Base,
    BaseSepolia,
}

impl Network {
    pub fn chain_id(self) -> u64 {
        match self {
            Network::Mainnet => 1,
            Network::Sepolia => 11_155_111,
            Network::Base => 8_453,
            Network::BaseSepolia => 84_532,
        }
    }
}

/// Backoff for store fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> std::time::Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        std::time::Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub network: Network,
    pub store: IpfsConfig,
    pub chain: EthereumConfig,
    pub confirmation: ConfirmationPolicy,
    pub retry: RetryConfig,
    pub kdf_iterations: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            store: IpfsConfig::default(),
            chain: EthereumConfig::default(),
            confirmation: ConfirmationPolicy::default(),
            retry: RetryConfig::default(),
            kdf_iterations: PBKDF2_ITERATIONS,
        }
    }
}

fn config_error(e: figment::Error) -> VaultError {
    VaultError::Config(e.to_string())
}

fn base() -> Figment {
    Figment::new().merge(Serialized::defaults(VaultConfig::default()))
}

const SECTIONS: [&str; 4] = ["store", "chain", "confirmation", "retry"];

/// Map a prefix-stripped variable name to a key path. Section prefixes are
/// matched explicitly so underscore-containing keys survive:
/// `STORE_BEARER_TOKEN` becomes `store.bearer_token`. Figment hands the name
/// over in its original case.
fn env_key(name: &str) -> String {
    let key = name.to_ascii_lowercase();
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key
}

fn env_provider() -> Env {
    Env::prefixed("OTP_VAULT_").map(|key| env_key(key.as_str()).into())
}

/// Load configuration from an optional TOML file plus environment overrides.
pub fn load(path: Option<&Path>) -> Result<VaultConfig> {
    let mut figment = base();
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(env_provider()).extract().map_err(config_error)
}

/// Load configuration from TOML text only.
pub fn load_from_str(toml_content: &str) -> Result<VaultConfig> {
    base()
        .merge(Toml::string(toml_content))
        .extract()
        .map_err(config_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = load_from_str("").unwrap();
        assert_eq!(config.network, Network::Sepolia);
        assert_eq!(config.kdf_iterations, 100_000);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.network.chain_id(), 11_155_111);
    }

    #[test]
    fn test_toml_overrides() {
        let config = load_from_str(
            r#"
            network = "base-sepolia"
            kdf_iterations = 1000

            [store]
            bearer_token = "jwt"

            [chain]
            contract_address = "0x00000000000000000000000000000000000000aa"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.network, Network::BaseSepolia);
        assert_eq!(config.network.chain_id(), 84_532);
        assert_eq!(config.kdf_iterations, 1000);
        assert_eq!(config.store.bearer_token, "jwt");
        assert_eq!(
            config.chain.contract_address,
            "0x00000000000000000000000000000000000000aa"
        );
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
    }

    #[test]
    fn test_env_key_mapping() {
        assert_eq!(env_key("STORE_BEARER_TOKEN"), "store.bearer_token");
        assert_eq!(env_key("KDF_ITERATIONS"), "kdf_iterations");
        assert_eq!(env_key("CONFIRMATION_POLL_INTERVAL_MS"), "confirmation.poll_interval_ms");
        assert_eq!(env_key("retry_max_attempts"), "retry.max_attempts");
        assert_eq!(env_key("NETWORK"), "network");
        assert_eq!(env_key("STOREFRONT"), "storefront");
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "vault.toml",
                r#"
                kdf_iterations = 1000

                [store]
                bearer_token = "from-file"
                "#,
            )?;
            jail.set_env("OTP_VAULT_STORE_BEARER_TOKEN", "from-env");
            jail.set_env("OTP_VAULT_KDF_ITERATIONS", "2000");
            jail.set_env("OTP_VAULT_NETWORK", "base");

            let config = load(Some(Path::new("vault.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.store.bearer_token, "from-env");
            assert_eq!(config.kdf_iterations, 2000);
            assert_eq!(config.network, Network::Base);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_network_rejected() {
        assert!(matches!(
            load_from_str(r#"network = "ropsten""#),
            Err(VaultError::Config(_))
        ));
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryConfig {
            max_attempts: 4,
            base_delay_ms: 100,
        };
        assert_eq!(retry.delay_for(1).as_millis(), 100);
        assert_eq!(retry.delay_for(2).as_millis(), 200);
        assert_eq!(retry.delay_for(3).as_millis(), 400);
    }
}
