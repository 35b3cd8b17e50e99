use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;

use crate::error::{CourierError, Result};

type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

/// AES block length; the IV occupies exactly one block at the front of the blob
const BLOCK_SIZE: usize = 16;

/// Key length for AES-256
const KEY_SIZE: usize = 32;

/// Symmetric encryption of UTF-8 strings into self-describing base64 blobs.
///
/// Blob layout: `base64(IV || ciphertext)` with a random one-block IV and an
/// AES-256-CFB keystream. Confidentiality only; the blob carries no
/// authentication tag, so callers must treat a clean decrypt of tampered input
/// as possible.
#[derive(Debug)]
pub struct CryptoBox {
    secret: [u8; KEY_SIZE],
}

impl CryptoBox {
    /// Create a crypto box from a 32-byte secret.
    ///
    /// Any other length is a configuration error, rejected before any
    /// cryptographic operation is attempted.
    pub fn new(secret: &[u8]) -> Result<Self> {
        let secret: [u8; KEY_SIZE] = secret
            .try_into()
            .map_err(|_| CourierError::KeyLength {
                actual: secret.len(),
            })?;
        Ok(Self { secret })
    }

    /// Encrypt a plaintext string into a base64 blob
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut iv = [0u8; BLOCK_SIZE];
        rand::rng().fill_bytes(&mut iv);

        let mut buf = plaintext.as_bytes().to_vec();
        let cipher = Aes256CfbEnc::new_from_slices(&self.secret, &iv)
            .map_err(|e| CourierError::internal(format!("cipher init: {e}")))?;
        cipher.encrypt(&mut buf);

        let mut blob = Vec::with_capacity(BLOCK_SIZE + buf.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&buf);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a base64 blob back into the original plaintext
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        let decoded = BASE64.decode(blob)?;
        if decoded.len() <= BLOCK_SIZE {
            return Err(CourierError::BlobTooShort {
                actual: decoded.len(),
            });
        }

        let (iv, ciphertext) = decoded.split_at(BLOCK_SIZE);
        let mut buf = ciphertext.to_vec();
        let cipher = Aes256CfbDec::new_from_slices(&self.secret, iv)
            .map_err(|e| CourierError::internal(format!("cipher init: {e}")))?;
        cipher.decrypt(&mut buf);

        Ok(String::from_utf8(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn encrypt_decrypt_round_trip() {
        let crypto = CryptoBox::new(SECRET).unwrap();

        for plaintext in ["alice:p@ss", "", "x", "with unicode: héllo ✓"] {
            let blob = crypto.encrypt(plaintext).unwrap();
            if plaintext.is_empty() {
                // an empty plaintext yields an IV-only blob, which decrypt rejects
                assert!(crypto.decrypt(&blob).is_err());
            } else {
                assert_eq!(crypto.decrypt(&blob).unwrap(), plaintext);
            }
        }
    }

    #[test]
    fn blobs_differ_between_calls() {
        let crypto = CryptoBox::new(SECRET).unwrap();
        let a = crypto.encrypt("same plaintext").unwrap();
        let b = crypto.encrypt("same plaintext").unwrap();
        // random IVs make identical plaintexts encrypt differently
        assert_ne!(a, b);
    }

    #[test]
    fn short_key_is_rejected_before_any_cipher_work() {
        let err = CryptoBox::new(b"too short").unwrap_err();
        assert!(matches!(err, CourierError::KeyLength { actual: 9 }));

        let err = CryptoBox::new(&[0u8; 33]).unwrap_err();
        assert!(matches!(err, CourierError::KeyLength { actual: 33 }));
    }

    #[test]
    fn invalid_base64_is_an_encoding_error() {
        let crypto = CryptoBox::new(SECRET).unwrap();
        let err = crypto.decrypt("!!! not base64 !!!").unwrap_err();
        assert!(matches!(err, CourierError::BlobEncoding(_)));
    }

    #[test]
    fn blob_shorter_than_one_block_is_a_length_error() {
        let crypto = CryptoBox::new(SECRET).unwrap();
        let blob = BASE64.encode([0u8; 10]);
        let err = crypto.decrypt(&blob).unwrap_err();
        assert!(matches!(err, CourierError::BlobTooShort { actual: 10 }));
    }

    #[test]
    fn wrong_key_fails_or_garbles_but_never_panics() {
        let crypto = CryptoBox::new(SECRET).unwrap();
        let other = CryptoBox::new(b"ffffffffffffffffffffffffffffffff").unwrap();

        let blob = crypto.encrypt("alice:p@ss").unwrap();
        // no authentication tag: the wrong key either garbles the plaintext or
        // fails UTF-8 validation, but must not invert correctly
        match other.decrypt(&blob) {
            Ok(plaintext) => assert_ne!(plaintext, "alice:p@ss"),
            Err(e) => assert!(matches!(e, CourierError::BlobUtf8(_))),
        }
    }
}
