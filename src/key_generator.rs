//! Key Generation Module
//!
//! Produces the asymmetric key pairs that sign and hold certificates. Two
//! algorithms are supported:
//!
//! - **ECDSA P-256** (default): named curve `prime256v1`
//! - **RSA**: 2048 to 4096-bit modulus, selected by configuration
//!
//! Both are wrapped in [`PrivateKey`], a sum type that can always yield a public
//! key and sign data regardless of the algorithm underneath. Key generation only
//! fails when the system randomness source does; such failures are returned as
//! [`PkiError::Crypto`] and never retried.

use openssl::ec::{Asn1Flag, EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PkiError, Result};

pub const RSA_KEY_SIZE_DEFAULT: u32 = 2048;
pub const RSA_KEY_SIZE_MIN: u32 = 2048;
pub const RSA_KEY_SIZE_MAX: u32 = 4096;

/// Algorithm used for every freshly generated certificate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    Rsa { bits: u32 },
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyAlgorithm::EcdsaP256 => write!(f, "ECDSA P-256"),
            KeyAlgorithm::Rsa { bits } => write!(f, "RSA-{}", bits),
        }
    }
}

/// A private key of either supported algorithm.
///
/// The inner `PKey` is what OpenSSL signs certificates with; the variant records
/// which shape it was generated or decoded as.
#[derive(Clone)]
pub enum PrivateKey {
    Ecdsa(PKey<Private>),
    Rsa(PKey<Private>),
}

impl PrivateKey {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PrivateKey::Ecdsa(_) => KeyAlgorithm::EcdsaP256,
            PrivateKey::Rsa(key) => KeyAlgorithm::Rsa { bits: key.bits() },
        }
    }

    pub fn pkey(&self) -> &PKey<Private> {
        match self {
            PrivateKey::Ecdsa(key) | PrivateKey::Rsa(key) => key,
        }
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, PrivateKey::Rsa(_))
    }

    /// SubjectPublicKeyInfo PEM of the public half.
    pub fn public_key_pem(&self) -> Result<Vec<u8>> {
        self.pkey()
            .public_key_to_pem()
            .map_err(|e| PkiError::crypto("Failed to export public key", e))
    }

    /// Sign `data` with SHA-256.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), self.pkey())
            .map_err(|e| PkiError::crypto("Failed to create signer", e))?;
        signer
            .sign_oneshot_to_vec(data)
            .map_err(|e| PkiError::crypto("Failed to sign data", e))
    }

    /// Verify a SHA-256 signature made by [`PrivateKey::sign`].
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let mut verifier = Verifier::new(MessageDigest::sha256(), self.pkey())
            .map_err(|e| PkiError::crypto("Failed to create verifier", e))?;
        verifier
            .verify_oneshot(signature, data)
            .map_err(|e| PkiError::crypto("Failed to verify signature", e))
    }

    /// Classify an already-parsed key, trying the elliptic-curve shape first.
    pub(crate) fn from_pkey(key: PKey<Private>) -> Result<Self> {
        if key.ec_key().is_ok() {
            return Ok(PrivateKey::Ecdsa(key));
        }
        if key.rsa().is_ok() {
            return Ok(PrivateKey::Rsa(key));
        }
        Err(PkiError::decoding(
            "private key",
            format!("unsupported key type {:?}", key.id()),
        ))
    }
}

// Key material must never reach logs.
impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Generates keys for one configured algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyGenerator {
    algorithm: KeyAlgorithm,
}

impl KeyGenerator {
    /// Rejects RSA moduli outside the supported range up front so that a bad
    /// configuration fails before any certificate is attempted.
    pub fn new(algorithm: KeyAlgorithm) -> Result<Self> {
        if let KeyAlgorithm::Rsa { bits } = algorithm {
            if !(RSA_KEY_SIZE_MIN..=RSA_KEY_SIZE_MAX).contains(&bits) {
                return Err(PkiError::Validation(format!(
                    "RSA key size must be between {} and {} bits, got {}",
                    RSA_KEY_SIZE_MIN, RSA_KEY_SIZE_MAX, bits
                )));
            }
        }
        Ok(Self { algorithm })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn generate(&self) -> Result<PrivateKey> {
        debug!(algorithm = %self.algorithm, "generating private key");
        match self.algorithm {
            KeyAlgorithm::EcdsaP256 => generate_ecdsa_key(),
            KeyAlgorithm::Rsa { bits } => generate_rsa_key(bits),
        }
    }
}

pub fn generate_ecdsa_key() -> Result<PrivateKey> {
    let mut group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
        .map_err(|e| PkiError::crypto("Failed to load P-256 curve", e))?;
    // Encode the curve by OID so verifiers need no explicit parameters.
    group.set_asn1_flag(Asn1Flag::NAMED_CURVE);
    let ec_key =
        EcKey::generate(&group).map_err(|e| PkiError::crypto("Failed to generate EC keypair", e))?;
    let key = PKey::from_ec_key(ec_key)
        .map_err(|e| PkiError::crypto("Failed to create private key", e))?;
    Ok(PrivateKey::Ecdsa(key))
}

pub fn generate_rsa_key(bits: u32) -> Result<PrivateKey> {
    let rsa =
        Rsa::generate(bits).map_err(|e| PkiError::crypto("Failed to generate RSA keypair", e))?;
    let key =
        PKey::from_rsa(rsa).map_err(|e| PkiError::crypto("Failed to create private key", e))?;
    Ok(PrivateKey::Rsa(key))
}
