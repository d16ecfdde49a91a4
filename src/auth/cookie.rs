//! Signed and encrypted cookie values.
//!
//! A value is serialized to JSON, encrypted with AES-256-GCM, then the string
//! `name|timestamp|ciphertext` is authenticated with HMAC-SHA256. The cookie
//! carries `timestamp|ciphertext|mac`, base64 encoded.

use core::fmt;
use std::time::Duration;

use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce, aead::Aead};
use base64::{Engine, engine::general_purpose::URL_SAFE};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Serialize, de::DeserializeOwned};
use sha2::Sha256;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const MIN_AUTH_KEY_LEN: usize = 32;
const ENCRYPTION_KEY_LEN: usize = 32;

/// Default lifetime of a cookie value.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum InvalidKey {
    #[error("authentication key must be at least {MIN_AUTH_KEY_LEN} bytes, got {0}")]
    AuthKeyTooShort(usize),
    #[error("encryption key must be exactly {ENCRYPTION_KEY_LEN} bytes, got {0}")]
    EncryptionKeyLength(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum FailToEncodeCookie {
    #[error("Cannot serialize cookie value: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Cannot encrypt cookie value")]
    Encrypt,
}

#[derive(Debug, thiserror::Error)]
pub enum FailToDecodeCookie {
    #[error("Cookie value is not valid base64")]
    Encoding,
    #[error("Cookie value is malformed")]
    Malformed,
    #[error("Cookie signature does not match")]
    Signature,
    #[error("Cookie has expired")]
    Expired,
    #[error("Cookie timestamp is in the future")]
    FromFuture,
    #[error("Cannot decrypt cookie value")]
    Decrypt,
    #[error("Cannot deserialize cookie value: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// Codec for authenticated, encrypted cookie values.
#[derive(Clone)]
pub struct SecureCookie {
    keyed_mac: HmacSha256,
    encryption_key: [u8; ENCRYPTION_KEY_LEN],
    max_age: Duration,
}

impl fmt::Debug for SecureCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureCookie")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl SecureCookie {
    /// Create a codec from an authentication key (at least 32 bytes) and an
    /// encryption key (exactly 32 bytes).
    ///
    /// # Errors
    /// Returns [`InvalidKey`] if a key has the wrong length.
    pub fn new(auth_key: &[u8], encryption_key: &[u8]) -> Result<Self, InvalidKey> {
        if auth_key.len() < MIN_AUTH_KEY_LEN {
            return Err(InvalidKey::AuthKeyTooShort(auth_key.len()));
        }
        let encryption_key = encryption_key
            .try_into()
            .map_err(|_| InvalidKey::EncryptionKeyLength(encryption_key.len()))?;
        let keyed_mac = <HmacSha256 as Mac>::new_from_slice(auth_key)
            .map_err(|_| InvalidKey::AuthKeyTooShort(auth_key.len()))?;
        Ok(Self {
            keyed_mac,
            encryption_key,
            max_age: DEFAULT_MAX_AGE,
        })
    }

    #[must_use]
    pub const fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.encryption_key))
    }

    fn mac(&self, name: &str, timestamp: i64, blob: &str) -> HmacSha256 {
        let mut mac = self.keyed_mac.clone();
        mac.update(format!("{name}|{timestamp}|{blob}").as_bytes());
        mac
    }

    /// Encode `value` for the cookie called `name`.
    ///
    /// # Errors
    /// Fails if the value cannot be serialized or encrypted.
    pub fn encode<T: Serialize>(&self, name: &str, value: &T) -> Result<String, FailToEncodeCookie> {
        self.encode_at(name, value, OffsetDateTime::now_utc().unix_timestamp())
    }

    fn encode_at<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        timestamp: i64,
    ) -> Result<String, FailToEncodeCookie> {
        let plaintext = serde_json::to_vec(value)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| FailToEncodeCookie::Encrypt)?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        let blob = URL_SAFE.encode(sealed);

        let tag = self.mac(name, timestamp, &blob).finalize().into_bytes();
        let signed = format!("{timestamp}|{blob}|{}", URL_SAFE.encode(tag));
        Ok(URL_SAFE.encode(signed))
    }

    /// Decode a value produced by [`SecureCookie::encode`] for the same `name`.
    ///
    /// # Errors
    /// Fails if the value was tampered with, signed for another name, is
    /// older than the maximum age, or does not decrypt.
    pub fn decode<T: DeserializeOwned>(
        &self,
        name: &str,
        value: &str,
    ) -> Result<T, FailToDecodeCookie> {
        self.decode_at(name, value, OffsetDateTime::now_utc().unix_timestamp())
    }

    fn decode_at<T: DeserializeOwned>(
        &self,
        name: &str,
        value: &str,
        now: i64,
    ) -> Result<T, FailToDecodeCookie> {
        let signed = URL_SAFE
            .decode(value)
            .map_err(|_| FailToDecodeCookie::Encoding)?;
        let signed = String::from_utf8(signed).map_err(|_| FailToDecodeCookie::Malformed)?;

        let mut parts = signed.splitn(3, '|');
        let (Some(timestamp), Some(blob), Some(tag)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(FailToDecodeCookie::Malformed);
        };
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| FailToDecodeCookie::Malformed)?;
        let tag = URL_SAFE
            .decode(tag)
            .map_err(|_| FailToDecodeCookie::Encoding)?;

        self.mac(name, timestamp, blob)
            .verify_slice(&tag)
            .map_err(|_| FailToDecodeCookie::Signature)?;

        if timestamp > now {
            return Err(FailToDecodeCookie::FromFuture);
        }
        let max_age = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        if now - timestamp > max_age {
            return Err(FailToDecodeCookie::Expired);
        }

        let sealed = URL_SAFE
            .decode(blob)
            .map_err(|_| FailToDecodeCookie::Encoding)?;
        if sealed.len() < NONCE_LEN {
            return Err(FailToDecodeCookie::Malformed);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| FailToDecodeCookie::Decrypt)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Generate random authentication and encryption keys.
#[must_use]
pub fn generate_keys() -> ([u8; 64], [u8; ENCRYPTION_KEY_LEN]) {
    let mut auth_key = [0u8; 64];
    let mut encryption_key = [0u8; ENCRYPTION_KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut auth_key);
    rand::rngs::OsRng.fill_bytes(&mut encryption_key);
    (auth_key, encryption_key)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn codec() -> SecureCookie {
        SecureCookie::new(&[7u8; 64], &[9u8; 32]).unwrap()
    }

    fn value() -> BTreeMap<String, String> {
        BTreeMap::from([("UserEmail".to_string(), "a@b.c".to_string())])
    }

    #[test]
    fn round_trip() {
        let codec = codec();
        let encoded = codec.encode("session", &value()).unwrap();
        let decoded: BTreeMap<String, String> = codec.decode("session", &encoded).unwrap();
        assert_eq!(decoded, value());
    }

    #[test]
    fn value_is_not_readable() {
        let encoded = codec().encode("session", &value()).unwrap();
        let raw = String::from_utf8(URL_SAFE.decode(&encoded).unwrap()).unwrap();
        assert!(!raw.contains("a@b.c"));
    }

    #[test]
    fn other_name_is_rejected() {
        let codec = codec();
        let encoded = codec.encode("session", &value()).unwrap();
        assert!(matches!(
            codec.decode::<BTreeMap<String, String>>("other", &encoded),
            Err(FailToDecodeCookie::Signature)
        ));
    }

    #[test]
    fn tampering_is_rejected() {
        let codec = codec();
        let encoded = codec.encode("session", &value()).unwrap();
        let raw = String::from_utf8(URL_SAFE.decode(&encoded).unwrap()).unwrap();
        let (timestamp, rest) = raw.split_once('|').unwrap();
        let forged = URL_SAFE.encode(format!("{}|{rest}", timestamp.parse::<i64>().unwrap() + 1));
        assert!(matches!(
            codec.decode::<BTreeMap<String, String>>("session", &forged),
            Err(FailToDecodeCookie::Signature)
        ));
    }

    #[test]
    fn other_keys_are_rejected() {
        let encoded = codec().encode("session", &value()).unwrap();
        let stranger = SecureCookie::new(&[1u8; 64], &[9u8; 32]).unwrap();
        assert!(
            stranger
                .decode::<BTreeMap<String, String>>("session", &encoded)
                .is_err()
        );
    }

    #[test]
    fn expiry_and_future() {
        let codec = codec().with_max_age(Duration::from_secs(60));
        let encoded = codec.encode_at("session", &value(), 1_000).unwrap();
        assert!(
            codec
                .decode_at::<BTreeMap<String, String>>("session", &encoded, 1_060)
                .is_ok()
        );
        assert!(matches!(
            codec.decode_at::<BTreeMap<String, String>>("session", &encoded, 1_061),
            Err(FailToDecodeCookie::Expired)
        ));
        assert!(matches!(
            codec.decode_at::<BTreeMap<String, String>>("session", &encoded, 999),
            Err(FailToDecodeCookie::FromFuture)
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let codec = codec();
        let truncated = URL_SAFE.encode("1|2");
        for input in ["", "deleted", "!!!", truncated.as_str()] {
            assert!(
                codec
                    .decode::<BTreeMap<String, String>>("session", input)
                    .is_err(),
                "{input}"
            );
        }
    }

    #[test]
    fn key_lengths() {
        assert!(matches!(
            SecureCookie::new(&[0u8; 31], &[0u8; 32]),
            Err(InvalidKey::AuthKeyTooShort(31))
        ));
        assert!(matches!(
            SecureCookie::new(&[0u8; 32], &[0u8; 16]),
            Err(InvalidKey::EncryptionKeyLength(16))
        ));
        let (auth, encryption) = generate_keys();
        assert!(SecureCookie::new(&auth, &encryption).is_ok());
    }
}
