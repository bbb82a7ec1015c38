use base64::{URL_SAFE_NO_PAD, decode_config, encode_config};
use jwt_simple::algorithms::ECDSAP256KeyPairLike;
use jwt_simple::prelude::{Claims, Duration as JwtDuration, ES256KeyPair};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use url::Url;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config;
use crate::error::VapidError;
use crate::types::push::VapidConfig;

/// Push services reject tokens valid for more than 24 hours.
const TOKEN_TTL: Duration = Duration::from_secs(12 * 60 * 60);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct VapidCredentials {
    pub private_key: String,
    pub public_key: String,
}

#[derive(Debug, Clone)]
pub(crate) enum VapidConfigStatus {
    Missing,
    Incomplete,
    Ready(VapidConfig),
}

pub(crate) fn load_vapid_config(config: &config::AppConfig) -> VapidConfigStatus {
    let private_key = non_empty(config.vapid_private_key.as_deref());
    let public_key = non_empty(config.vapid_public_key.as_deref());
    let subject = non_empty(config.vapid_subject.as_deref());
    let has_any = private_key.is_some() || public_key.is_some() || subject.is_some();

    match (private_key, public_key, subject) {
        (Some(private_key), Some(public_key), Some(subject)) => {
            VapidConfigStatus::Ready(VapidConfig {
                private_key: private_key.to_string(),
                public_key: public_key.to_string(),
                subject: subject.to_string(),
            })
        }
        _ if has_any => VapidConfigStatus::Incomplete,
        _ => VapidConfigStatus::Missing,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub fn generate_vapid_credentials() -> Result<VapidCredentials, VapidError> {
    let mut rng = OsRng;
    generate_vapid_credentials_with_rng(&mut rng)
}

pub(crate) fn generate_vapid_credentials_with_rng<R: RngCore + CryptoRng>(
    rng: &mut R,
) -> Result<VapidCredentials, VapidError> {
    let key_bytes = generate_es256_key_bytes_with_rng(rng);
    let private_key = encode_config(key_bytes, URL_SAFE_NO_PAD);
    let public_key = public_key_from_private(&key_bytes)?;

    Ok(VapidCredentials {
        private_key,
        public_key,
    })
}

fn generate_es256_key_bytes_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> [u8; 32] {
    let mut key_bytes = [0u8; 32];
    loop {
        rng.fill_bytes(&mut key_bytes);
        if ES256KeyPair::from_bytes(&key_bytes).is_ok() {
            return key_bytes;
        }
    }
}

fn public_key_from_private(key_bytes: &[u8]) -> Result<String, VapidError> {
    let secret = p256::SecretKey::from_slice(key_bytes)
        .map_err(|_| VapidError::InvalidPrivateKey("not a P-256 scalar".to_string()))?;
    let point = secret.public_key().to_encoded_point(false);
    Ok(encode_config(point.as_bytes(), URL_SAFE_NO_PAD))
}

/// The VAPID audience: the push service origin, never its path or query.
pub(crate) fn audience(endpoint: &str) -> Result<String, VapidError> {
    let url = Url::parse(endpoint).map_err(|_| VapidError::InvalidEndpoint(endpoint.to_string()))?;
    if !matches!(url.scheme(), "https" | "http") || url.host_str().is_none() {
        return Err(VapidError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(url.origin().ascii_serialization())
}

#[derive(Clone)]
struct CachedHeader {
    value: String,
    refresh_at: Instant,
}

/// Signs `Authorization: vapid t=…, k=…` headers with the application key.
///
/// Headers are cached per audience and reissued once less than an hour of
/// validity remains.
#[derive(Clone)]
pub struct VapidSigner {
    key_pair: Arc<ES256KeyPair>,
    public_key: String,
    subject: String,
    cache: Arc<Mutex<HashMap<String, CachedHeader>>>,
}

impl std::fmt::Debug for VapidSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidSigner")
            .field("public_key", &self.public_key)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl VapidSigner {
    pub fn new(config: &VapidConfig) -> Result<Self, VapidError> {
        let key_bytes = decode_config(config.private_key.trim(), URL_SAFE_NO_PAD)
            .map_err(|err| VapidError::InvalidPrivateKey(err.to_string()))?;
        if key_bytes.len() != 32 {
            return Err(VapidError::InvalidPrivateKey(format!(
                "expected a 32-byte P-256 scalar, got {} bytes",
                key_bytes.len()
            )));
        }
        let key_pair = ES256KeyPair::from_bytes(&key_bytes)
            .map_err(|err| VapidError::InvalidPrivateKey(err.to_string()))?;
        let public_key = public_key_from_private(&key_bytes)?;
        if public_key != config.public_key.trim() {
            return Err(VapidError::PublicKeyMismatch);
        }

        let subject = config.subject.trim();
        if !(subject.starts_with("mailto:") || subject.starts_with("https:")) {
            return Err(VapidError::InvalidSubject(subject.to_string()));
        }

        Ok(Self {
            key_pair: Arc::new(key_pair),
            public_key,
            subject: subject.to_string(),
            cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Base64url uncompressed public key, the browser's `applicationServerKey`.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn authorization(&self, endpoint: &str) -> Result<String, VapidError> {
        let audience = audience(endpoint)?;
        let now = Instant::now();
        {
            let cache = self.cache.lock().expect("vapid cache lock");
            if let Some(cached) = cache.get(&audience)
                && cached.refresh_at > now
            {
                return Ok(cached.value.clone());
            }
        }

        let value = self.sign(&audience)?;
        let mut cache = self.cache.lock().expect("vapid cache lock");
        cache.insert(
            audience,
            CachedHeader {
                value: value.clone(),
                refresh_at: now + (TOKEN_TTL - TOKEN_REFRESH_MARGIN),
            },
        );
        Ok(value)
    }

    fn sign(&self, audience: &str) -> Result<String, VapidError> {
        let claims = Claims::create(JwtDuration::from_secs(TOKEN_TTL.as_secs()))
            .with_audience(audience)
            .with_subject(&self.subject);
        let token = self
            .key_pair
            .sign(claims)
            .map_err(|err| VapidError::Sign(err.to_string()))?;
        Ok(format!("vapid t={token}, k={}", self.public_key))
    }
}
