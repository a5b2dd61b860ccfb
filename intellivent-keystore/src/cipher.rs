use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce, Tag};
use serde::{Deserialize, Serialize};

use crate::KeyStoreError;

/// AES-256-GCM with a 16 byte IV, the layout of stored credential blobs
type Aes256Gcm16 = AesGcm<Aes256, U16>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const SALT_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

/// scrypt cost parameters. Defaults are N = 2^14, r = 8, p = 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: 14,
            r: 8,
            p: 1,
        }
    }
}

/// Ciphertext with its detached GCM tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

pub fn derive_key(
    secret: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<[u8; KEY_LEN], KeyStoreError> {
    let params = scrypt::Params::new(params.log_n, params.r, params.p, KEY_LEN)
        .map_err(|e| KeyStoreError::Kdf(e.to_string()))?;
    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(secret, salt, &params, &mut key).map_err(|e| KeyStoreError::Kdf(e.to_string()))?;
    Ok(key)
}

pub fn seal(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
) -> Result<Sealed, KeyStoreError> {
    let cipher = Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key));
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(iv), b"", &mut buffer)
        .map_err(|_| KeyStoreError::Encrypt)?;

    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag);
    Ok(Sealed {
        ciphertext: buffer,
        tag: out,
    })
}

/// Decrypt and verify. Any mismatch, including wrong lengths, is reported
/// as tampering.
pub fn open(
    key: &[u8; KEY_LEN],
    iv: &[u8],
    tag: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, KeyStoreError> {
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(KeyStoreError::TamperedOrCorrupt);
    }
    let cipher = Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key));
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(iv),
            b"",
            &mut buffer,
            Tag::<U16>::from_slice(tag),
        )
        .map_err(|_| KeyStoreError::TamperedOrCorrupt)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams { log_n: 4, r: 8, p: 1 };

    #[test]
    fn derive_key_is_deterministic_per_salt() {
        let k1 = derive_key(b"secret", &[1; SALT_LEN], &FAST).unwrap();
        let k2 = derive_key(b"secret", &[1; SALT_LEN], &FAST).unwrap();
        let k3 = derive_key(b"secret", &[2; SALT_LEN], &FAST).unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn seal_open_round_trip() {
        let key = [0x11; KEY_LEN];
        let iv = [0x22; IV_LEN];
        let sealed = seal(&key, &iv, b"{\"code\":\"deadbeef\"}").unwrap();
        assert_ne!(sealed.ciphertext, b"{\"code\":\"deadbeef\"}");

        let plain = open(&key, &iv, &sealed.tag, &sealed.ciphertext).unwrap();
        assert_eq!(plain, b"{\"code\":\"deadbeef\"}");
    }

    #[test]
    fn open_rejects_wrong_key_and_bad_tag() {
        let iv = [0x33; IV_LEN];
        let sealed = seal(&[0x44; KEY_LEN], &iv, b"payload").unwrap();

        let err = open(&[0x45; KEY_LEN], &iv, &sealed.tag, &sealed.ciphertext).unwrap_err();
        assert!(matches!(err, KeyStoreError::TamperedOrCorrupt));

        let mut tag = sealed.tag;
        tag[0] ^= 0x01;
        let err = open(&[0x44; KEY_LEN], &iv, &tag, &sealed.ciphertext).unwrap_err();
        assert!(matches!(err, KeyStoreError::TamperedOrCorrupt));

        let err = open(&[0x44; KEY_LEN], &iv[..12], &sealed.tag, &sealed.ciphertext).unwrap_err();
        assert!(matches!(err, KeyStoreError::TamperedOrCorrupt));
    }
}
