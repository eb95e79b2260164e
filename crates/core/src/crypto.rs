//! secp256k1 keys, addresses and recoverable `(V, R, S)` signatures.
//!
//! Signatures are recoverable: the signer's public key, and therefore its
//! address, can be reconstructed from the signature and the signed digest
//! alone. Transactions rely on this so that `from` never has to be looked up
//! before the signature can be checked.

use crate::hash::{hash, Hash};
use rand::rngs::OsRng;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey as SecpPublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Offset added to the recovery id when it is stored in `v`.
const RECOVERY_ID_OFFSET: u8 = 27;

pub type AddressBytes = [u8; 20];

/// A 20-byte account address: the first 20 bytes of the Blake3 digest of
/// the uncompressed public key (without its `0x04` tag).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub AddressBytes);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    /// Recipient of burned tokens.
    pub const BURN: Self = Self::ZERO;

    pub fn from_bytes(bytes: AddressBytes) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &AddressBytes {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Hex with `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from hex, with or without `0x`.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidAddress)?;
        let arr: AddressBytes = bytes.try_into().map_err(|_| CryptoError::InvalidAddress)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid address format")]
    InvalidAddress,
    #[error("public key recovery failed")]
    RecoveryFailed,
}

/// A recoverable ECDSA signature in Ethereum-style `(V, R, S)` form.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl Signature {
    /// `r || s || v`, 65 bytes.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Recover the public key that produced this signature over `digest`.
    pub fn recover(&self, digest: &Hash) -> Result<PublicKey, CryptoError> {
        let recovery = self
            .v
            .checked_sub(RECOVERY_ID_OFFSET)
            .ok_or(CryptoError::InvalidSignature)?;
        let recovery_id =
            RecoveryId::from_i32(recovery as i32).map_err(|_| CryptoError::InvalidSignature)?;

        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);
        let signature = RecoverableSignature::from_compact(&compact, recovery_id)
            .map_err(|_| CryptoError::InvalidSignature)?;

        let message = digest_message(digest)?;
        let key = Secp256k1::verification_only()
            .recover_ecdsa(&message, &signature)
            .map_err(|_| CryptoError::RecoveryFailed)?;
        Ok(PublicKey(key))
    }

    /// Recover the signer's address.
    pub fn recover_address(&self, digest: &Hash) -> Result<Address, CryptoError> {
        Ok(self.recover(digest)?.to_address())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(v={}, r={}...)", self.v, hex::encode(&self.r[..8]))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

fn digest_message(digest: &Hash) -> Result<Message, CryptoError> {
    Message::from_digest_slice(digest.as_bytes()).map_err(|_| CryptoError::InvalidSignature)
}

/// A secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "public_key_serde")] pub SecpPublicKey);

mod public_key_serde {
    use secp256k1::PublicKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(key: &PublicKey, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        key.serialize().to_vec().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<PublicKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        PublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

impl PublicKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        SecpPublicKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Compressed SEC1 encoding (33 bytes).
    pub fn to_bytes(&self) -> [u8; 33] {
        self.0.serialize()
    }

    pub fn to_address(&self) -> Address {
        let uncompressed = self.0.serialize_uncompressed();
        let digest = hash(&uncompressed[1..]);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&digest.0[..20]);
        Address(addr)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.to_bytes()[..8]))
    }
}

/// Anything that can produce recoverable signatures over digests.
///
/// The authority's block signer and the client-side keystore both sit
/// behind this.
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;
    fn sign_hash(&self, digest: &Hash) -> Result<Signature, CryptoError>;
}

/// A secp256k1 keypair.
#[derive(Clone)]
pub struct Keypair {
    secret: SecretKey,
    pub public_key: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let secret = SecretKey::new(&mut OsRng);
        Self::from_secret(secret)
    }

    pub fn from_private_key(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = SecpPublicKey::from_secret_key(&Secp256k1::signing_only(), &secret);
        Self {
            secret,
            public_key: PublicKey(public),
        }
    }

    pub fn private_key(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    pub fn address(&self) -> Address {
        self.public_key.to_address()
    }
}

impl Signer for Keypair {
    fn address(&self) -> Address {
        self.public_key.to_address()
    }

    fn sign_hash(&self, digest: &Hash) -> Result<Signature, CryptoError> {
        let message = digest_message(digest)?;
        let signature = Secp256k1::signing_only().sign_ecdsa_recoverable(&message, &self.secret);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);
        Ok(Signature {
            v: recovery_id.to_i32() as u8 + RECOVERY_ID_OFFSET,
            r,
            s,
        })
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = Keypair::generate();
        assert!(!kp.address().is_zero());
    }

    #[test]
    fn test_sign_and_recover() {
        let kp = Keypair::generate();
        let digest = hash(b"payload");
        let sig = kp.sign_hash(&digest).unwrap();

        assert!(sig.v == 27 || sig.v == 28);
        assert_eq!(sig.recover(&digest).unwrap(), kp.public_key);
        assert_eq!(sig.recover_address(&digest).unwrap(), kp.address());
    }

    #[test]
    fn test_recover_other_digest_gives_other_address() {
        let kp = Keypair::generate();
        let sig = kp.sign_hash(&hash(b"hello")).unwrap();

        let recovered = sig.recover_address(&hash(b"world"));
        assert!(recovered.map(|a| a != kp.address()).unwrap_or(true));
    }

    #[test]
    fn test_empty_signature_does_not_recover() {
        let sig = Signature::default();
        assert!(sig.is_empty());
        assert!(sig.recover(&hash(b"anything")).is_err());
    }

    #[test]
    fn test_address_hex_roundtrip() {
        let addr = Keypair::generate().address();
        assert_eq!(Address::from_hex(&addr.to_hex()).unwrap(), addr);
        assert_eq!(Address::from_hex(&hex::encode(addr.0)).unwrap(), addr);
        assert!(Address::from_hex("0x1234").is_err());
    }

    #[test]
    fn test_keypair_from_private_key() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::from_private_key(&kp1.private_key()).unwrap();
        assert_eq!(kp1.address(), kp2.address());
        assert!(Keypair::from_private_key(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_public_key_serde_roundtrip() {
        let kp = Keypair::generate();
        let json = serde_json::to_string(&kp.public_key).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kp.public_key);
    }

    #[test]
    fn test_burn_address_is_zero() {
        assert!(Address::BURN.is_zero());
    }
}
