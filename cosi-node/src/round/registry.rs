use std::{collections::BTreeMap, sync::Arc};

use cosi_crypto::Suite;
use rand_core::CryptoRngCore;

use crate::NodeError;

use super::{COSI_ROUND, CosiRound, PUBKEY_ROUND, PubKeyRound, RoundHandler, RoundSetup};

/// Constructor of a round variant
pub type RoundFactory<S> =
    Arc<dyn Fn(RoundSetup<S>, &mut dyn CryptoRngCore) -> Box<dyn RoundHandler<S>> + Send + Sync>;

/// Round variants available to a node, indexed by the tag carried in the announcement.
pub struct RoundRegistry<S: Suite> {
    factories: BTreeMap<String, RoundFactory<S>>,
}

impl<S: Suite> Clone for RoundRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            factories: self.factories.clone(),
        }
    }
}

impl<S: Suite> RoundRegistry<S> {
    /// Registry without any variant
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the `cosi` and `pubkey` variants
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(
            COSI_ROUND,
            Arc::new(
                |setup: RoundSetup<S>, rng: &mut dyn CryptoRngCore| -> Box<dyn RoundHandler<S>> {
                    Box::new(CosiRound::new(setup, rng))
                },
            ),
        );
        registry.register(
            PUBKEY_ROUND,
            Arc::new(
                |setup: RoundSetup<S>, rng: &mut dyn CryptoRngCore| -> Box<dyn RoundHandler<S>> {
                    Box::new(PubKeyRound::new(setup, rng))
                },
            ),
        );

        registry
    }

    /// Register a variant, replacing any previous one with the same tag.
    pub fn register(&mut self, round_type: &str, factory: RoundFactory<S>) {
        self.factories.insert(round_type.to_string(), factory);
    }

    /// True if a variant is registered under `round_type`
    pub fn contains(&self, round_type: &str) -> bool {
        self.factories.contains_key(round_type)
    }

    /// Registered tags
    pub fn round_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Create the handler of a round.
    pub fn create(
        &self,
        round_type: &str,
        setup: RoundSetup<S>,
        rng: &mut dyn CryptoRngCore,
    ) -> Result<Box<dyn RoundHandler<S>>, NodeError> {
        let factory = self
            .factories
            .get(round_type)
            .ok_or_else(|| NodeError::UnknownRoundType(round_type.to_string()))?;

        Ok(factory(setup, rng))
    }
}
