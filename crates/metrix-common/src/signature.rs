use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs payloads with HMAC-SHA256 under a shared secret.
///
/// An empty or missing secret yields a disabled signer: [`HashSigner::sign`]
/// returns `None` and callers skip the signature header.
///
/// # Examples
///
/// ```
/// use metrix_common::signature::HashSigner;
///
/// let signer = HashSigner::new(Some("secret"));
/// let sig = signer.sign(b"payload").unwrap();
/// assert!(signer.verify(b"payload", &sig));
/// assert!(!HashSigner::new(None).is_enabled());
/// ```
#[derive(Clone, Default)]
pub struct HashSigner {
    key: Option<Vec<u8>>,
}

impl HashSigner {
    pub fn new(key: Option<&str>) -> Self {
        Self {
            key: key
                .filter(|k| !k.is_empty())
                .map(|k| k.as_bytes().to_vec()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    fn mac(&self, body: &[u8]) -> Option<HmacSha256> {
        let key = self.key.as_deref()?;
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        mac.update(body);
        Some(mac)
    }

    /// Hex-encoded HMAC-SHA256 of `body`, or `None` when no key is configured.
    pub fn sign(&self, body: &[u8]) -> Option<String> {
        self.mac(body)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a hex signature against `body`.
    ///
    /// Always `false` for a disabled signer or a malformed hex string.
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        match self.mac(body) {
            Some(mac) => mac.verify_slice(&expected).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for HashSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashSigner")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
