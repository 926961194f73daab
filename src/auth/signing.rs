//! Keyed HMAC-SHA256 hashing for passwords, API keys and signed tokens.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hashes values with HMAC-SHA256 under a server-side secret.
///
/// Stored hashes cannot be verified or forged without the secret.
#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
}

impl Signer {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self, value: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(value.as_bytes());
        mac
    }

    /// Returns the 64-character lowercase hex MAC of `value`.
    pub fn sign_hex(&self, value: &str) -> String {
        hex::encode(self.mac(value).finalize().into_bytes())
    }

    /// Constant-time check of a hex MAC produced by [`sign_hex`](Self::sign_hex).
    pub fn verify_hex(&self, value: &str, signature: &str) -> bool {
        match hex::decode(signature) {
            Ok(bytes) => self.mac(value).verify_slice(&bytes).is_ok(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer(***)")
    }
}
