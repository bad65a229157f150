//! Encryption settings and per-file keys.
//!
//! Both can be loaded from an ini document:
//!
//! ```ini
//! [encryption]
//! block_size = 4096
//! object_size_kb = 128
//! cipher = aes-256-ctr
//! hash = sha256
//!
//! [keys]
//! file_key = 000102...
//! sign_key = 0a0b0c...
//! ```
//!
//! The `[encryption]` section and all its entries are optional.

use ini::Properties;
use snafu::{ResultExt, Snafu};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::crypto::{CipherAlgorithm, SignHash};

#[derive(Snafu, Debug)]
pub enum ConfigError {
    #[snafu(display("Could not parse encryption config at line {} column {}: {}", line, col, msg))]
    Parse {
        line: usize,
        col: usize,
        msg: String,
    },
    #[snafu(display("Missing {}.{} in encryption config", section, key))]
    Missing {
        section: &'static str,
        key: &'static str,
    },
    #[snafu(display("Invalid value {:?} for {}: {}", value, key, reason))]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[snafu(display("Could not decode {}: {}", key, source))]
    Hex {
        key: &'static str,
        source: hex::FromHexError,
    },
    #[snafu(display("Could not read encryption config: {}", source))]
    Io { source: std::io::Error },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EncryptionOptions {
    /// Bytes per encryption block.
    pub block_size: u32,
    /// Bytes per storage object, in KiB.
    pub object_size_kb: u32,
    pub cipher: CipherAlgorithm,
    pub hash: SignHash,
}

impl Default for EncryptionOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            object_size_kb: 128,
            cipher: CipherAlgorithm::default(),
            hash: SignHash::default(),
        }
    }
}

impl EncryptionOptions {
    pub fn object_size_bytes(&self) -> u64 {
        self.object_size_kb as u64 * 1024
    }
}

/// Key material of one file.
#[derive(Clone, Eq, PartialEq)]
pub struct FileKeys {
    pub enc_key: Vec<u8>,
    pub sign_key: Vec<u8>,
}

impl fmt::Debug for FileKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileKeys")
            .field("enc_key", &"<redacted>")
            .field("sign_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    pub options: EncryptionOptions,
    pub keys: FileKeys,
}

fn parse_value<T: FromStr>(
    props: Option<&Properties>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match props.and_then(|p| p.get(key)) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| {
            ConfigError::InvalidValue {
                key,
                value: value.to_string(),
                reason: e.to_string(),
            }
        }),
    }
}

fn parse_key(props: &Properties, key: &'static str) -> Result<Vec<u8>, ConfigError> {
    let value = props.get(key).ok_or(ConfigError::Missing {
        section: "keys",
        key,
    })?;
    hex::decode(value.trim()).context(HexSnafu { key })
}

impl EncryptionConfig {
    pub fn load_ini(contents: &str) -> Result<Self, ConfigError> {
        let ini = ini::Ini::load_from_str_noescape(contents).map_err(|e| ConfigError::Parse {
            line: e.line,
            col: e.col,
            msg: e.msg,
        })?;

        let defaults = EncryptionOptions::default();
        let encryption = ini.section(Some("encryption"));
        let options = EncryptionOptions {
            block_size: parse_value(encryption, "block_size", defaults.block_size)?,
            object_size_kb: parse_value(encryption, "object_size_kb", defaults.object_size_kb)?,
            cipher: parse_value::<CipherAlgorithm>(encryption, "cipher", defaults.cipher)?,
            hash: parse_value::<SignHash>(encryption, "hash", defaults.hash)?,
        };
        if options.block_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "block_size",
                value: "0".to_string(),
                reason: "must not be zero".to_string(),
            });
        }
        if options.object_size_bytes() % options.block_size as u64 != 0 {
            return Err(ConfigError::InvalidValue {
                key: "object_size_kb",
                value: options.object_size_kb.to_string(),
                reason: format!("must be a multiple of the {} byte block size", options.block_size),
            });
        }

        let keys = ini.section(Some("keys")).ok_or(ConfigError::Missing {
            section: "keys",
            key: "file_key",
        })?;
        let keys = FileKeys {
            enc_key: parse_key(keys, "file_key")?,
            sign_key: parse_key(keys, "sign_key")?,
        };

        Ok(Self { options, keys })
    }

    pub fn load_ini_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(IoSnafu)?;
        Self::load_ini(&contents)
    }
}
