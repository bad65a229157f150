use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

use super::CryptoError;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Hash function the metadata signature is computed with.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum SignHash {
    #[default]
    Sha256,
    Sha512,
}

impl SignHash {
    pub fn name(self) -> &'static str {
        match self {
            SignHash::Sha256 => "sha256",
            SignHash::Sha512 => "sha512",
        }
    }

    pub fn signature_size(self) -> usize {
        match self {
            SignHash::Sha256 => 0x20,
            SignHash::Sha512 => 0x40,
        }
    }
}

impl fmt::Display for SignHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignHash {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(SignHash::Sha256),
            "sha512" => Ok(SignHash::Sha512),
            _ => Err(CryptoError::UnknownHash { name: s.to_string() }),
        }
    }
}

/// Keyed signer authenticating the persisted integrity metadata of a file.
#[derive(Clone)]
pub struct Signer {
    hash: SignHash,
    key: Vec<u8>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

fn keyed<M: Mac + KeyInit>(key: &[u8], message: &[u8]) -> Result<M, CryptoError> {
    let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| CryptoError::EmptySigningKey {})?;
    mac.update(message);
    Ok(mac)
}

impl Signer {
    pub fn new(hash: SignHash, key: &[u8]) -> Result<Self, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::EmptySigningKey {});
        }
        Ok(Self {
            hash,
            key: key.to_vec(),
        })
    }

    pub fn hash(&self) -> SignHash {
        self.hash
    }

    pub fn signature_size(&self) -> usize {
        self.hash.signature_size()
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(match self.hash {
            SignHash::Sha256 => keyed::<HmacSha256>(&self.key, message)?
                .finalize()
                .into_bytes()
                .to_vec(),
            SignHash::Sha512 => keyed::<HmacSha512>(&self.key, message)?
                .finalize()
                .into_bytes()
                .to_vec(),
        })
    }

    /// Checks `signature` in constant time.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        Ok(match self.hash {
            SignHash::Sha256 => keyed::<HmacSha256>(&self.key, message)?
                .verify_slice(signature)
                .is_ok(),
            SignHash::Sha512 => keyed::<HmacSha512>(&self.key, message)?
                .verify_slice(signature)
                .is_ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verifies_and_detects_tampering() {
        for hash in [SignHash::Sha256, SignHash::Sha512] {
            let signer = Signer::new(hash, b"file sign key").unwrap();
            let signature = signer.sign(b"leaf table").unwrap();
            assert_eq!(signature.len(), hash.signature_size());

            assert!(signer.verify(b"leaf table", &signature).unwrap());
            assert!(!signer.verify(b"leaf tablE", &signature).unwrap());

            let other = Signer::new(hash, b"another key").unwrap();
            assert!(!other.verify(b"leaf table", &signature).unwrap());
        }
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            Signer::new(SignHash::Sha256, b""),
            Err(CryptoError::EmptySigningKey {})
        ));
    }

    #[test]
    fn hash_names() {
        assert_eq!("SHA-512".parse::<SignHash>().unwrap(), SignHash::Sha512);
        assert_eq!(SignHash::Sha256.to_string(), "sha256");
        assert!("md5".parse::<SignHash>().is_err());
    }
}
