//! Node configuration and key files.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokenchain_core::{Address, ChainId, CryptoError, Keypair};

pub const CONFIG_FILE: &str = "config.json";
pub const KEYS_DIR: &str = "keys";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid key material: {0}")]
    Key(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let text = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(io_err)
}

/// Chain parameters, written by `init` to `<data_dir>/config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    /// Authority address, `0x`-prefixed hex.
    pub authority: String,
    /// Name of the authority's key file under `keys/`.
    pub authority_key: String,
    pub transaction_fee: u64,
    /// Leading zero hex digits required of every block hash after genesis.
    pub difficulty: u16,
    /// Credited to the authority at genesis.
    pub initial_supply: u64,
    /// Pub/sub channel carrying chain-head notifications.
    pub state_channel: String,
}

impl ChainConfig {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE)
    }

    pub fn load(data_dir: &Path) -> Result<Self> {
        let config: Self = read_json(&Self::path(data_dir))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        self.validate()?;
        write_json(&Self::path(data_dir), self)
    }

    pub fn authority_address(&self) -> Result<Address> {
        Ok(Address::from_hex(&self.authority)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.authority_address()?;
        if self.authority_key.trim().is_empty() {
            return Err(ConfigError::Invalid("authority_key is empty".into()));
        }
        if self.state_channel.trim().is_empty() {
            return Err(ConfigError::Invalid("state_channel is empty".into()));
        }
        if self.difficulty > 64 {
            return Err(ConfigError::Invalid(format!(
                "difficulty {} exceeds 64 hex digits",
                self.difficulty
            )));
        }
        Ok(())
    }
}

/// A keypair as stored in `keys/<name>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFile {
    pub address: String,
    pub public_key: String,
    pub private_key: String,
}

impl KeyFile {
    pub fn path(data_dir: &Path, name: &str) -> PathBuf {
        data_dir.join(KEYS_DIR).join(format!("{}.json", name))
    }

    pub fn from_keypair(keypair: &Keypair) -> Self {
        Self {
            address: keypair.address().to_hex(),
            public_key: hex::encode(keypair.public_key.to_bytes()),
            private_key: hex::encode(keypair.private_key()),
        }
    }

    pub fn load(data_dir: &Path, name: &str) -> Result<Self> {
        read_json(&Self::path(data_dir, name))
    }

    pub fn save(&self, data_dir: &Path, name: &str) -> Result<PathBuf> {
        let path = Self::path(data_dir, name);
        write_json(&path, self)?;
        Ok(path)
    }

    /// Rebuild the keypair, checking it against the recorded address.
    pub fn keypair(&self) -> Result<Keypair> {
        let bytes = hex::decode(self.private_key.trim_start_matches("0x"))
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        let keypair = Keypair::from_private_key(&bytes)?;

        if keypair.address() != Address::from_hex(&self.address)? {
            return Err(ConfigError::Invalid(format!(
                "key file address {} does not match its private key",
                self.address
            )));
        }
        Ok(keypair)
    }
}

/// Load `keys/<name>.json` and rebuild its keypair.
pub fn load_keypair(data_dir: &Path, name: &str) -> Result<Keypair> {
    KeyFile::load(data_dir, name)?.keypair()
}

/// Names of every key file under `keys/`, sorted.
pub fn list_key_names(data_dir: &Path) -> Result<Vec<String>> {
    let dir = data_dir.join(KEYS_DIR);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(&dir).map_err(|source| ConfigError::Io {
        path: dir.clone(),
        source,
    })?;

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(authority: &Keypair) -> ChainConfig {
        ChainConfig {
            chain_id: 1,
            authority: authority.address().to_hex(),
            authority_key: "authority".into(),
            transaction_fee: 1,
            difficulty: 1,
            initial_supply: 1_000_000,
            state_channel: "chain-state".into(),
        }
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let kp = Keypair::generate();

        config(&kp).save(dir.path()).unwrap();
        let loaded = ChainConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config(&kp));
        assert_eq!(loaded.authority_address().unwrap(), kp.address());
    }

    #[test]
    fn test_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ChainConfig::load(dir.path()),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config(&Keypair::generate());
        bad.authority = "not-an-address".into();
        assert!(bad.validate().is_err());

        let mut bad = config(&Keypair::generate());
        bad.state_channel = " ".into();
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_key_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let kp = Keypair::generate();

        KeyFile::from_keypair(&kp).save(dir.path(), "alice").unwrap();
        let loaded = load_keypair(dir.path(), "alice").unwrap();
        assert_eq!(loaded.address(), kp.address());
        assert_eq!(list_key_names(dir.path()).unwrap(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_key_file_address_mismatch() {
        let mut file = KeyFile::from_keypair(&Keypair::generate());
        file.address = Keypair::generate().address().to_hex();
        assert!(matches!(file.keypair(), Err(ConfigError::Invalid(_))));
    }
}
