//! RSA PKCS#1 v1.5 payload encryption.
//!
//! A single RSA operation can only carry `key_size - 11` bytes, so payloads
//! are split into blocks of that size and each block is encrypted on its
//! own. The ciphertext is the concatenation of `key_size`-byte blocks, which
//! lets [`PayloadDecryptor`] split it back without any framing.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::{Path, PathBuf};

const PKCS1_V15_OVERHEAD: usize = 11;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("failed to read key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no supported PEM block found (expected {expected})")]
    UnsupportedPem { expected: &'static str },

    #[error("invalid certificate: {0}")]
    Certificate(String),

    #[error("invalid key: {0}")]
    Key(String),

    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("ciphertext length {len} is not a multiple of the {block}-byte key size")]
    Misaligned { len: usize, block: usize },
}

fn read_pem(path: &Path) -> Result<String, CipherError> {
    std::fs::read_to_string(path).map_err(|source| CipherError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Encrypts outgoing payloads with the collector's public key.
#[derive(Debug, Clone)]
pub struct PayloadEncryptor {
    key: RsaPublicKey,
}

impl PayloadEncryptor {
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    pub fn from_pem_file(path: &Path) -> Result<Self, CipherError> {
        Self::from_pem(&read_pem(path)?)
    }

    /// Accepts `PUBLIC KEY`, `RSA PUBLIC KEY` or an X.509 `CERTIFICATE` block.
    pub fn from_pem(pem: &str) -> Result<Self, CipherError> {
        let key = if pem.contains("BEGIN CERTIFICATE") {
            let (_, block) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
                .map_err(|e| CipherError::Certificate(format!("{e:?}")))?;
            let cert = block
                .parse_x509()
                .map_err(|e| CipherError::Certificate(format!("{e:?}")))?;
            RsaPublicKey::from_public_key_der(cert.public_key().raw)
                .map_err(|e| CipherError::Key(e.to_string()))?
        } else if pem.contains("BEGIN RSA PUBLIC KEY") {
            RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| CipherError::Key(e.to_string()))?
        } else if pem.contains("BEGIN PUBLIC KEY") {
            RsaPublicKey::from_public_key_pem(pem).map_err(|e| CipherError::Key(e.to_string()))?
        } else {
            return Err(CipherError::UnsupportedPem {
                expected: "PUBLIC KEY, RSA PUBLIC KEY or CERTIFICATE",
            });
        };
        Ok(Self { key })
    }

    pub fn key_size(&self) -> usize {
        self.key.size()
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        let block = self.key.size().saturating_sub(PKCS1_V15_OVERHEAD).max(1);
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(data.len().div_ceil(block) * self.key.size());
        for chunk in data.chunks(block) {
            out.extend(self.key.encrypt(&mut rng, Pkcs1v15Encrypt, chunk)?);
        }
        Ok(out)
    }
}

/// Decrypts incoming payloads with the collector's private key.
#[derive(Debug, Clone)]
pub struct PayloadDecryptor {
    key: RsaPrivateKey,
}

impl PayloadDecryptor {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    pub fn from_pem_file(path: &Path) -> Result<Self, CipherError> {
        Self::from_pem(&read_pem(path)?)
    }

    /// Accepts `PRIVATE KEY` (PKCS#8) or `RSA PRIVATE KEY` (PKCS#1) blocks.
    pub fn from_pem(pem: &str) -> Result<Self, CipherError> {
        let key = if pem.contains("BEGIN RSA PRIVATE KEY") {
            RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| CipherError::Key(e.to_string()))?
        } else if pem.contains("BEGIN PRIVATE KEY") {
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| CipherError::Key(e.to_string()))?
        } else {
            return Err(CipherError::UnsupportedPem {
                expected: "PRIVATE KEY or RSA PRIVATE KEY",
            });
        };
        Ok(Self { key })
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        let block = self.key.size();
        if data.len() % block != 0 {
            return Err(CipherError::Misaligned {
                len: data.len(),
                block,
            });
        }
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(block) {
            out.extend(self.key.decrypt(Pkcs1v15Encrypt, chunk)?);
        }
        Ok(out)
    }
}
