//! Ed25519 signing and verification for plugin modules.

use ed25519_dalek::{
    Signature as DalekSignature, Signer as _, SigningKey as DalekSigningKey, Verifier as _,
    VerifyingKey as DalekVerifyingKey,
};
use rand::rngs::OsRng;

use crate::PackageError;

/// Ed25519 signing key (secret). Used by module authors.
pub struct SigningKey(DalekSigningKey);

/// Ed25519 verifying key (public). Embedded in signed modules and listed as
/// trusted signers by the host.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey(DalekVerifyingKey);

/// Ed25519 detached signature.
pub struct Signature(DalekSignature);

/// A keypair for signing and verification.
pub struct KeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generates a new random Ed25519 keypair.
    pub fn generate() -> Self {
        let signing = DalekSigningKey::generate(&mut OsRng);
        let verifying = signing.verifying_key();
        Self {
            signing_key: SigningKey(signing),
            verifying_key: VerifyingKey(verifying),
        }
    }
}

impl SigningKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(DalekSigningKey::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Parses a hex-encoded 32-byte secret.
    pub fn from_hex(s: &str) -> Result<Self, PackageError> {
        let bytes: [u8; 32] = hex::decode(s.trim())
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(PackageError::InvalidSecretKey)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Lowercase hex of the 32-byte secret, as written to `.key` files.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }
}

impl VerifyingKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, PackageError> {
        DalekVerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| PackageError::InvalidPublicKey)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Parses a hex-encoded 32-byte public key.
    pub fn from_hex(s: &str) -> Result<Self, PackageError> {
        let bytes: [u8; 32] = hex::decode(s.trim())
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(PackageError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }

    /// Lowercase hex of the 32-byte key, the form trusted signers are
    /// configured with.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), PackageError> {
        self.0
            .verify(message, &signature.0)
            .map_err(|_| PackageError::SignatureInvalid)
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerifyingKey({})", self.to_hex())
    }
}

impl Signature {
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self(DalekSignature::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}
