use blake2::{Blake2b, Blake2b512, Digest, digest::consts::U32};
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar, traits::Identity};
use rand_core::{CryptoRngCore, RngCore};

use super::Suite;

/// Ristretto prime order group over Curve25519, hashed with Blake2b.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ristretto255;

impl Suite for Ristretto255 {
    type Point = RistrettoPoint;
    type Scalar = Scalar;
    type Hash = Blake2b<U32>;

    fn name(&self) -> &'static str {
        "Ristretto255"
    }

    fn identity(&self) -> Self::Point {
        RistrettoPoint::identity()
    }

    fn base_mul(&self, scalar: &Self::Scalar) -> Self::Point {
        RistrettoPoint::mul_base(scalar)
    }

    fn mul(&self, point: &Self::Point, scalar: &Self::Scalar) -> Self::Point {
        point * scalar
    }

    fn add(&self, left: &Self::Point, right: &Self::Point) -> Self::Point {
        left + right
    }

    fn sub(&self, left: &Self::Point, right: &Self::Point) -> Self::Point {
        left - right
    }

    fn point_to_bytes(&self, point: &Self::Point) -> Vec<u8> {
        point.compress().to_bytes().to_vec()
    }

    fn scalar_zero(&self) -> Self::Scalar {
        Scalar::ZERO
    }

    fn scalar_add(&self, left: &Self::Scalar, right: &Self::Scalar) -> Self::Scalar {
        left + right
    }

    fn scalar_sub(&self, left: &Self::Scalar, right: &Self::Scalar) -> Self::Scalar {
        left - right
    }

    fn scalar_mul(&self, left: &Self::Scalar, right: &Self::Scalar) -> Self::Scalar {
        left * right
    }

    fn random_scalar(&self, rng: &mut dyn CryptoRngCore) -> Self::Scalar {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        Scalar::from_bytes_mod_order_wide(&wide)
    }

    fn hash_to_scalar(&self, parts: &[&[u8]]) -> Self::Scalar {
        let mut hasher = Blake2b512::new();
        for part in parts {
            hasher.update(part);
        }
        let mut wide = [0u8; 64];
        wide.copy_from_slice(&hasher.finalize());
        Scalar::from_bytes_mod_order_wide(&wide)
    }
}
