//! Self sabotage of a node, used to exercise the exception and view change paths.

use std::sync::{Mutex, PoisonError};

use blake2::{Blake2b, Digest, digest::consts::U32};
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

use crate::{RoundNumber, configuration::FailureConfiguration, messages::MessageType};

/// Role of a node in the view of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Role {
    /// Root of the tree
    Root,
    /// Any other node
    Follower,
}

/// Decides whether a node withholds an outgoing message.
#[cfg_attr(test, mockall::automock)]
pub trait FailurePolicy: Send + Sync {
    /// True if the message of type `message_type` for `round` must be withheld.
    fn should_fail(&self, role: Role, round: RoundNumber, message_type: MessageType) -> bool;
}

/// Never withholds anything.
pub struct NoFailure;

impl FailurePolicy for NoFailure {
    fn should_fail(&self, _role: Role, _round: RoundNumber, _message_type: MessageType) -> bool {
        false
    }
}

/// [FailurePolicy] driven by a [FailureConfiguration].
///
/// The deterministic settings withhold every Nth round in the given role. The probabilistic
/// one draws from a generator seeded by the node identity so that a run can be replayed.
pub struct FailureInjector {
    configuration: FailureConfiguration,
    rng: Mutex<ChaCha20Rng>,
}

impl FailureInjector {
    /// FailureInjector factory
    pub fn new(node: &str, configuration: FailureConfiguration) -> Self {
        let seed: [u8; 32] = Blake2b::<U32>::digest(node.as_bytes()).into();

        Self {
            configuration,
            rng: Mutex::new(ChaCha20Rng::from_seed(seed)),
        }
    }
}

impl FailurePolicy for FailureInjector {
    fn should_fail(&self, role: Role, round: RoundNumber, message_type: MessageType) -> bool {
        if self.configuration.is_disabled()
            || !self.configuration.failure_phases.contains(&message_type)
        {
            return false;
        }

        let every = match role {
            Role::Root => self.configuration.fail_as_root_every,
            Role::Follower => self.configuration.fail_as_follower_every,
        };
        if every != 0 && round % every == 0 {
            return true;
        }

        if self.configuration.failure_rate == 0 {
            return false;
        }
        let draw = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_u32()
            % 100;

        draw < u32::from(self.configuration.failure_rate)
    }
}
