//! Collective Schnorr signing over a tree of participants.

mod shares;
mod signature;
mod signing;

pub use shares::{CommitmentShare, ExceptionEntry, ResponseShare};
pub use signature::CollectiveSignature;
pub use signing::{CollectiveSigning, challenge_for};
