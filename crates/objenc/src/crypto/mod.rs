use aes::{Aes128, Aes256};
use cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use snafu::Snafu;
use std::fmt;
use std::str::FromStr;

mod signer;

pub use signer::{SignHash, Signer};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

pub const CTR_IV_SIZE: usize = 0x10;

#[derive(Snafu, Debug)]
pub enum CryptoError {
    /// Crypto: {algorithm} needs a {expected} byte key, got {actual} bytes
    InvalidKeyLength {
        algorithm: String,
        expected: usize,
        actual: usize,
    },
    /// Crypto: expected a {expected} byte IV, got {actual} bytes
    InvalidIvLength { expected: usize, actual: usize },
    /// Crypto: unknown cipher {name}
    UnknownCipher { name: String },
    /// Crypto: unknown signing hash {name}
    UnknownHash { name: String },
    /// Crypto: the signing key must not be empty
    EmptySigningKey {},
}

/// Length-preserving symmetric algorithms usable for encryption blocks.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum CipherAlgorithm {
    Aes128Ctr,
    #[default]
    Aes256Ctr,
}

impl CipherAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            CipherAlgorithm::Aes128Ctr => "aes-128-ctr",
            CipherAlgorithm::Aes256Ctr => "aes-256-ctr",
        }
    }

    pub fn key_size(self) -> usize {
        match self {
            CipherAlgorithm::Aes128Ctr => 0x10,
            CipherAlgorithm::Aes256Ctr => 0x20,
        }
    }

    pub fn iv_size(self) -> usize {
        CTR_IV_SIZE
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes-128-ctr" => Ok(CipherAlgorithm::Aes128Ctr),
            "aes-256-ctr" => Ok(CipherAlgorithm::Aes256Ctr),
            _ => Err(CryptoError::UnknownCipher { name: s.to_string() }),
        }
    }
}

/// A cipher bound to the encryption key of one file.
///
/// Every [`FileCipher::encrypt`] call draws a fresh random IV, which the caller has to store
/// alongside the ciphertext.
#[derive(Clone)]
pub struct FileCipher {
    algorithm: CipherAlgorithm,
    key: Vec<u8>,
}

impl fmt::Debug for FileCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCipher")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl FileCipher {
    pub fn new(algorithm: CipherAlgorithm, key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != algorithm.key_size() {
            return Err(CryptoError::InvalidKeyLength {
                algorithm: algorithm.to_string(),
                expected: algorithm.key_size(),
                actual: key.len(),
            });
        }
        Ok(Self {
            algorithm,
            key: key.to_vec(),
        })
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub fn iv_size(&self) -> usize {
        self.algorithm.iv_size()
    }

    /// Encrypts `plaintext` into `ciphertext` (same length) and returns the IV used.
    pub fn encrypt(&self, plaintext: &[u8], ciphertext: &mut [u8]) -> Result<Vec<u8>, CryptoError> {
        assert_eq!(
            plaintext.len(),
            ciphertext.len(),
            "ciphertext buffer must match the plaintext length"
        );
        let mut iv = vec![0; self.iv_size()];
        rand::rng().fill_bytes(&mut iv);

        ciphertext.copy_from_slice(plaintext);
        self.apply_keystream(&iv, ciphertext)?;
        Ok(iv)
    }

    pub fn decrypt(
        &self,
        iv: &[u8],
        ciphertext: &[u8],
        plaintext: &mut [u8],
    ) -> Result<(), CryptoError> {
        assert_eq!(
            plaintext.len(),
            ciphertext.len(),
            "plaintext buffer must match the ciphertext length"
        );
        plaintext.copy_from_slice(ciphertext);
        self.apply_keystream(iv, plaintext)
    }

    fn apply_keystream(&self, iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError> {
        if iv.len() != self.iv_size() {
            return Err(CryptoError::InvalidIvLength {
                expected: self.iv_size(),
                actual: iv.len(),
            });
        }
        let invalid_key = || CryptoError::InvalidKeyLength {
            algorithm: self.algorithm.to_string(),
            expected: self.algorithm.key_size(),
            actual: self.key.len(),
        };
        match self.algorithm {
            CipherAlgorithm::Aes128Ctr => Aes128Ctr::new_from_slices(&self.key, iv)
                .map_err(|_| invalid_key())?
                .apply_keystream(data),
            CipherAlgorithm::Aes256Ctr => Aes256Ctr::new_from_slices(&self.key, iv)
                .map_err(|_| invalid_key())?
                .apply_keystream(data),
        }
        Ok(())
    }
}
