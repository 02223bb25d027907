//! Compact JWE sealing for cookie payloads.
//!
//! RSA-OAEP-512 wraps a fresh 256-bit content key; the payload itself is
//! A256GCM with the protected header as additional authenticated data.
//! Output is the five-part compact serialization
//! `header.cek.iv.ciphertext.tag`.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha512;

use crate::{AuthError, Result};

const CEK_BYTES: usize = 32;
const IV_BYTES: usize = 12;
const TAG_BYTES: usize = 16;

fn protected_header() -> String {
    // Static header: the algorithm pair never varies.
    URL_SAFE_NO_PAD.encode(br#"{"alg":"RSA-OAEP-512","enc":"A256GCM"}"#)
}

/// Seal `plaintext` for the holder of `public`.
pub fn seal(plaintext: &[u8], public: &RsaPublicKey) -> Result<String> {
    let header = protected_header();

    let mut cek = [0u8; CEK_BYTES];
    OsRng.fill_bytes(&mut cek);
    let mut iv = [0u8; IV_BYTES];
    OsRng.fill_bytes(&mut iv);

    let wrapped = public
        .encrypt(&mut OsRng, Oaep::new::<Sha512>(), &cek)
        .map_err(|e| AuthError::Crypto(format!("cek wrap: {e}")))?;

    let cipher = Aes256Gcm::new_from_slice(&cek)
        .map_err(|e| AuthError::Crypto(format!("content cipher init: {e}")))?;
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: header.as_bytes(),
            },
        )
        .map_err(|_| AuthError::Crypto("content encryption failed".into()))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_BYTES);

    Ok(format!(
        "{header}.{}.{}.{}.{}",
        URL_SAFE_NO_PAD.encode(wrapped),
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag),
    ))
}

/// Open a compact JWE produced by [`seal`].
///
/// # Errors
///
/// Any structural, unwrap, or authentication failure collapses to
/// [`AuthError::Crypto`]; callers treat all of them as "cookie unreadable".
pub fn open(compact: &str, private: &RsaPrivateKey) -> Result<Vec<u8>> {
    let parts: Vec<&str> = compact.split('.').collect();
    let [header, wrapped, iv, ciphertext, tag] = parts.as_slice() else {
        return Err(AuthError::Crypto("jwe must have five parts".into()));
    };

    let decode = |part: &str, what: &str| {
        URL_SAFE_NO_PAD
            .decode(part)
            .map_err(|_| AuthError::Crypto(format!("jwe {what} is not base64url")))
    };
    let wrapped = decode(wrapped, "cek")?;
    let iv = decode(iv, "iv")?;
    let ciphertext = decode(ciphertext, "ciphertext")?;
    let tag = decode(tag, "tag")?;
    if iv.len() != IV_BYTES || tag.len() != TAG_BYTES {
        return Err(AuthError::Crypto("jwe iv/tag length mismatch".into()));
    }

    let cek = private
        .decrypt(Oaep::new::<Sha512>(), &wrapped)
        .map_err(|_| AuthError::Crypto("cek unwrap failed".into()))?;
    let cipher = Aes256Gcm::new_from_slice(&cek)
        .map_err(|e| AuthError::Crypto(format!("content cipher init: {e}")))?;

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);
    cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad: header.as_bytes(),
            },
        )
        .map_err(|_| AuthError::Crypto("content decryption failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::EncryptionKeyPair;

    fn key_pair() -> EncryptionKeyPair {
        EncryptionKeyPair::generate().unwrap()
    }

    #[test]
    fn test_seal_open_round_trip() {
        let pair = key_pair();
        let sealed = seal(b"{\"state\":\"abc\"}", pair.public()).unwrap();
        assert_eq!(sealed.split('.').count(), 5);
        let opened = open(&sealed, pair.private()).unwrap();
        assert_eq!(opened, b"{\"state\":\"abc\"}");
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let pair = key_pair();
        let sealed = seal(b"payload", pair.public()).unwrap();
        let mut parts: Vec<String> = sealed.split('.').map(String::from).collect();
        // Flip the ciphertext part.
        parts[3] = URL_SAFE_NO_PAD.encode(b"tampered");
        assert!(open(&parts.join("."), pair.private()).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sealer = key_pair();
        let other = key_pair();
        let sealed = seal(b"payload", sealer.public()).unwrap();
        assert!(open(&sealed, other.private()).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let pair = key_pair();
        assert!(open("not-a-jwe", pair.private()).is_err());
        assert!(open("a.b.c.d", pair.private()).is_err());
    }
}
