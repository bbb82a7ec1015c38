//! Web Push message encryption (RFC 8291) in the `aes128gcm` content coding
//! (RFC 8188).
//!
//! The output is a single record:
//!
//! ```text
//! salt (16) | rs (u32 BE) | idlen (1) | keyid = ephemeral public key (65) | ciphertext + tag
//! ```

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};
use base64::{URL_SAFE_NO_PAD, decode_config};
use hkdf::Hkdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;

use crate::error::EncryptError;

/// Largest body push services are required to accept.
pub const MAX_MESSAGE_LEN: usize = 4096;

const SALT_LEN: usize = 16;
const PUBLIC_KEY_LEN: usize = 65;
const AUTH_SECRET_LEN: usize = 16;
const TAG_LEN: usize = 16;
const RECORD_SIZE: u32 = 4096;
const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;
const LAST_RECORD_DELIMITER: u8 = 0x02;

/// Largest plaintext whose encrypted form stays within [`MAX_MESSAGE_LEN`].
pub const MAX_PLAINTEXT_LEN: usize = MAX_MESSAGE_LEN - HEADER_LEN - TAG_LEN - 1;

const KEY_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

/// Encrypts `plaintext` for one subscriber. Every call uses a fresh
/// ephemeral key pair and salt.
pub fn encrypt(plaintext: &[u8], p256dh: &str, auth: &str) -> Result<Vec<u8>, EncryptError> {
    let mut rng = OsRng;
    encrypt_with_rng(&mut rng, plaintext, p256dh, auth)
}

pub(crate) fn encrypt_with_rng<R: RngCore + CryptoRng>(
    rng: &mut R,
    plaintext: &[u8],
    p256dh: &str,
    auth: &str,
) -> Result<Vec<u8>, EncryptError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(EncryptError::PayloadTooLarge {
            len: plaintext.len(),
            max: MAX_PLAINTEXT_LEN,
        });
    }
    let subscriber = decode_public_key(p256dh)?;
    let auth_secret = decode_auth_secret(auth)?;

    let ephemeral = SecretKey::random(rng);
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);

    seal(plaintext, &subscriber, &auth_secret, &ephemeral, &salt)
}

/// Checks that a browser-supplied key pair can be encrypted to.
pub fn validate_keys(p256dh: &str, auth: &str) -> Result<(), EncryptError> {
    decode_public_key(p256dh)?;
    decode_auth_secret(auth)?;
    Ok(())
}

fn decode_public_key(p256dh: &str) -> Result<PublicKey, EncryptError> {
    let bytes =
        decode_config(p256dh.trim(), URL_SAFE_NO_PAD).map_err(|_| EncryptError::InvalidPublicKey)?;
    PublicKey::from_sec1_bytes(&bytes).map_err(|_| EncryptError::InvalidPublicKey)
}

fn decode_auth_secret(auth: &str) -> Result<Vec<u8>, EncryptError> {
    let bytes =
        decode_config(auth.trim(), URL_SAFE_NO_PAD).map_err(|_| EncryptError::InvalidAuthSecret)?;
    if bytes.len() != AUTH_SECRET_LEN {
        return Err(EncryptError::InvalidAuthSecret);
    }
    Ok(bytes)
}

fn seal(
    plaintext: &[u8],
    subscriber: &PublicKey,
    auth_secret: &[u8],
    ephemeral: &SecretKey,
    salt: &[u8; SALT_LEN],
) -> Result<Vec<u8>, EncryptError> {
    let subscriber_point = subscriber.to_encoded_point(false);
    let sender_point = ephemeral.public_key().to_encoded_point(false);
    let shared = p256::ecdh::diffie_hellman(ephemeral.to_nonzero_scalar(), subscriber.as_affine());

    let (cek, nonce) = derive_content_key(
        shared.raw_secret_bytes().as_slice(),
        auth_secret,
        subscriber_point.as_bytes(),
        sender_point.as_bytes(),
        salt,
    )?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(LAST_RECORD_DELIMITER);

    let cipher = Aes128Gcm::new_from_slice(&cek).map_err(|_| EncryptError::Cipher)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|_| EncryptError::Cipher)?;

    let mut message = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    message.extend_from_slice(salt);
    message.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    message.push(PUBLIC_KEY_LEN as u8);
    message.extend_from_slice(sender_point.as_bytes());
    message.extend_from_slice(&ciphertext);
    Ok(message)
}

/// RFC 8291 §3.4 key schedule: the auth secret binds the ECDH secret to this
/// subscription, then the salt yields a per-message key and nonce.
fn derive_content_key(
    ecdh_secret: &[u8],
    auth_secret: &[u8],
    subscriber_public: &[u8],
    sender_public: &[u8],
    salt: &[u8],
) -> Result<([u8; 16], [u8; 12]), EncryptError> {
    let mut key_info =
        Vec::with_capacity(KEY_INFO_PREFIX.len() + subscriber_public.len() + sender_public.len());
    key_info.extend_from_slice(KEY_INFO_PREFIX);
    key_info.extend_from_slice(subscriber_public);
    key_info.extend_from_slice(sender_public);

    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth_secret), ecdh_secret)
        .expand(&key_info, &mut ikm)
        .map_err(|_| EncryptError::KeyDerivation)?;

    let prk = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut cek = [0u8; 16];
    prk.expand(CEK_INFO, &mut cek)
        .map_err(|_| EncryptError::KeyDerivation)?;
    let mut nonce = [0u8; 12];
    prk.expand(NONCE_INFO, &mut nonce)
        .map_err(|_| EncryptError::KeyDerivation)?;
    Ok((cek, nonce))
}
