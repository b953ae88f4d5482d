//! Client configuration: typed struct, TOML loading, construction-time
//! validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use arus_common::constants::{NUMBER_OF_CONNECTIONS, PUBLIC_KEY_LENGTH};
use arus_common::identity;

use crate::error::ClientError;

fn default_connection_timeout_ms() -> u64 {
    3_000
}

fn default_reconnect_timeout_ms() -> u64 {
    100
}

fn default_sync_interval_ms() -> u64 {
    500
}

fn default_sync_delay_ms() -> u64 {
    1_000
}

/// Everything a [`crate::Client`] needs at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// 55 lowercase latin letters. The identity's root secret.
    pub seed: String,

    /// Identity sub-derivation index.
    #[serde(default)]
    pub index: u32,

    /// Exactly three initial peer addresses (host or host:port).
    pub peers: Vec<String>,

    /// Verifies computer-state snapshots. All-zero keys are rejected.
    #[serde(with = "hex_key")]
    pub admin_public_key: [u8; PUBLIC_KEY_LENGTH],

    /// Per-socket connect deadline.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Delay before reopening a closed socket.
    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,

    /// Committee-state poll period.
    #[serde(default = "default_sync_interval_ms")]
    pub computer_state_sync_interval_ms: u64,

    /// Additional grace before a desync is declared.
    #[serde(default = "default_sync_delay_ms")]
    pub computer_state_sync_delay_ms: u64,

    /// On-disk location of this identity's encrypted ledger.
    pub database_path: PathBuf,
}

impl ClientConfig {
    /// Load from a TOML file. Missing optional durations take defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ClientError::IllegalArgument {
                field: "config",
                reason: e.to_string(),
            }
        })?;
        let cfg: Self = toml::from_str(&raw).map_err(|e| ClientError::IllegalArgument {
            field: "config",
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Construction-time checks. A zero admin key or a wrong peer count is
    /// refused here, not at first use.
    pub fn validate(&self) -> Result<(), ClientError> {
        identity::seed_bytes(&self.seed)?;

        if self.peers.len() != NUMBER_OF_CONNECTIONS {
            return Err(ClientError::IllegalArgument {
                field: "peers",
                reason: format!(
                    "expected exactly {} peers, found {}",
                    NUMBER_OF_CONNECTIONS,
                    self.peers.len()
                ),
            });
        }
        if self.peers.iter().any(|p| p.is_empty()) {
            return Err(ClientError::IllegalArgument {
                field: "peers",
                reason: "empty peer address".to_string(),
            });
        }

        if self.admin_public_key.iter().all(|&b| b == 0) {
            return Err(ClientError::IllegalArgument {
                field: "admin_public_key",
                reason: "must not be all zero".to_string(),
            });
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(ClientError::IllegalArgument {
                field: "database_path",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn computer_state_sync_interval(&self) -> Duration {
        Duration::from_millis(self.computer_state_sync_interval_ms)
    }

    pub fn computer_state_sync_delay(&self) -> Duration {
        Duration::from_millis(self.computer_state_sync_delay_ms)
    }
}

/// Hex (de)serialization for the admin key so TOML files stay readable.
mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(de)?;
        let bytes = hex::decode(&raw).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("admin public key must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ClientConfig {
        ClientConfig {
            seed: "a".repeat(55),
            index: 0,
            peers: vec![
                "10.0.0.1".to_string(),
                "10.0.0.2".to_string(),
                "10.0.0.3".to_string(),
            ],
            admin_public_key: [9u8; 32],
            connection_timeout_ms: default_connection_timeout_ms(),
            reconnect_timeout_ms: default_reconnect_timeout_ms(),
            computer_state_sync_interval_ms: default_sync_interval_ms(),
            computer_state_sync_delay_ms: default_sync_delay_ms(),
            database_path: PathBuf::from("/tmp/arus-test"),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_zero_admin_key_rejected() {
        let mut cfg = valid_config();
        cfg.admin_public_key = [0u8; 32];
        assert!(matches!(
            cfg.validate(),
            Err(ClientError::IllegalArgument {
                field: "admin_public_key",
                ..
            })
        ));
    }

    #[test]
    fn test_wrong_peer_count_rejected() {
        let mut cfg = valid_config();
        cfg.peers.pop();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_seed_rejected() {
        let mut cfg = valid_config();
        cfg.seed = "Too Short".to_string();
        assert!(matches!(cfg.validate(), Err(ClientError::Identity(_))));
    }

    #[test]
    fn test_toml_roundtrip() {
        let cfg = valid_config();
        let raw = toml::to_string(&cfg).unwrap();
        let parsed: ClientConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.admin_public_key, cfg.admin_public_key);
        assert_eq!(parsed.peers, cfg.peers);
    }

    #[test]
    fn test_toml_defaults_apply() {
        let raw = format!(
            "seed = \"{}\"\npeers = [\"a\", \"b\", \"c\"]\nadmin_public_key = \"{}\"\ndatabase_path = \"/tmp/x\"\n",
            "a".repeat(55),
            hex::encode([9u8; 32]),
        );
        let parsed: ClientConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.connection_timeout_ms, 3_000);
        assert_eq!(parsed.reconnect_timeout_ms, 100);
        assert_eq!(parsed.computer_state_sync_interval_ms, 500);
    }
}
