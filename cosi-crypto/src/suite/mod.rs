//! Abstract algebra engine used by the collective signing protocol.
//!
//! The protocol only needs a prime order group with a generator, its scalar field and a
//! hash function. A [Suite] value provides them and is handed explicitly to every
//! component that needs it.

mod ristretto;

pub use ristretto::Ristretto255;

use std::fmt::Debug;

use digest::{Digest, FixedOutput};
use rand_core::CryptoRngCore;
use serde::{Serialize, de::DeserializeOwned};

/// Group, field and hash operations of a crypto engine.
pub trait Suite: Clone + Debug + Default + PartialEq + Eq + Send + Sync + 'static {
    /// Group element
    type Point: Copy + Debug + PartialEq + Eq + Send + Sync + Serialize + DeserializeOwned;

    /// Scalar of the group order field
    type Scalar: Copy + Debug + PartialEq + Eq + Send + Sync + Serialize + DeserializeOwned;

    /// Hash function used for the merkle trees
    type Hash: Digest + FixedOutput + Clone + Send + Sync;

    /// Name of the engine, used in logs.
    fn name(&self) -> &'static str;

    /// Neutral element of the group.
    fn identity(&self) -> Self::Point;

    /// `g^scalar` for the group generator `g`.
    fn base_mul(&self, scalar: &Self::Scalar) -> Self::Point;

    /// `point^scalar`.
    fn mul(&self, point: &Self::Point, scalar: &Self::Scalar) -> Self::Point;

    /// Group operation.
    fn add(&self, left: &Self::Point, right: &Self::Point) -> Self::Point;

    /// Group operation with the inverse of `right`.
    fn sub(&self, left: &Self::Point, right: &Self::Point) -> Self::Point;

    /// Canonical encoding of a point.
    fn point_to_bytes(&self, point: &Self::Point) -> Vec<u8>;

    /// Additive neutral scalar.
    fn scalar_zero(&self) -> Self::Scalar;

    /// Scalar addition.
    fn scalar_add(&self, left: &Self::Scalar, right: &Self::Scalar) -> Self::Scalar;

    /// Scalar subtraction.
    fn scalar_sub(&self, left: &Self::Scalar, right: &Self::Scalar) -> Self::Scalar;

    /// Scalar multiplication.
    fn scalar_mul(&self, left: &Self::Scalar, right: &Self::Scalar) -> Self::Scalar;

    /// Uniformly random scalar.
    fn random_scalar(&self, rng: &mut dyn CryptoRngCore) -> Self::Scalar;

    /// Hash the concatenation of `parts` to a scalar.
    fn hash_to_scalar(&self, parts: &[&[u8]]) -> Self::Scalar;
}

/// Long term key pair of a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair<S: Suite> {
    private_key: S::Scalar,
    public_key: S::Point,
}

impl<S: Suite> KeyPair<S> {
    /// Generate a fresh key pair.
    pub fn generate(suite: &S, rng: &mut dyn CryptoRngCore) -> Self {
        Self::from_private_key(suite, suite.random_scalar(rng))
    }

    /// Build the key pair matching a provisioned private key.
    pub fn from_private_key(suite: &S, private_key: S::Scalar) -> Self {
        Self {
            public_key: suite.base_mul(&private_key),
            private_key,
        }
    }

    /// Private scalar
    pub fn private_key(&self) -> &S::Scalar {
        &self.private_key
    }

    /// Public point
    pub fn public_key(&self) -> &S::Point {
        &self.public_key
    }
}
