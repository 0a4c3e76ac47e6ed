use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{RoundNumber, StdResult, messages::MessageType};

/// Self sabotage settings, used to exercise the exception and view change paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureConfiguration {
    /// Probability, in percent, to withhold a message
    pub failure_rate: u8,

    /// Withhold the messages of every Nth round while root, 0 disables
    pub fail_as_root_every: u64,

    /// Withhold the messages of every Nth round while follower, 0 disables
    pub fail_as_follower_every: u64,

    /// Messages that may be withheld
    pub failure_phases: Vec<MessageType>,
}

impl Default for FailureConfiguration {
    fn default() -> Self {
        Self {
            failure_rate: 0,
            fail_as_root_every: 0,
            fail_as_follower_every: 0,
            failure_phases: vec![MessageType::Commitment, MessageType::Response],
        }
    }
}

impl FailureConfiguration {
    /// True if no failure can ever be injected
    pub fn is_disabled(&self) -> bool {
        self.failure_rate == 0 && self.fail_as_root_every == 0 && self.fail_as_follower_every == 0
    }
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfiguration {
    /// Deadline, in milliseconds, of a round started by the root
    pub max_wait_ms: u64,

    /// Time, in milliseconds, a node waits per level below it before defaulting a silent child
    pub child_timeout_ms: u64,

    /// Time, in milliseconds, without message from the parent before trying a view change
    pub heartbeat_timeout_ms: Option<u64>,

    /// Number of rounds after which the root proposes the next view, 0 disables
    pub rounds_per_view: u64,

    /// Number of children of each node in the derived views
    pub branching_factor: usize,

    /// Failure injection
    pub failure: FailureConfiguration,
}

impl Default for NodeConfiguration {
    fn default() -> Self {
        Self {
            max_wait_ms: 50_000,
            child_timeout_ms: 2_000,
            heartbeat_timeout_ms: None,
            rounds_per_view: 0,
            branching_factor: 3,
            failure: FailureConfiguration::default(),
        }
    }
}

impl NodeConfiguration {
    /// Create a sample configuration mainly for tests
    pub fn new_sample() -> Self {
        Self {
            max_wait_ms: 5_000,
            child_timeout_ms: 200,
            ..Self::default()
        }
    }

    /// Load the configuration from an optional file, overridden by `COSI_` prefixed
    /// environment variables (`COSI_FAILURE__FAILURE_RATE` for nested keys).
    pub fn load(file: Option<&Path>) -> StdResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix("COSI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| "Configuration build error")?
            .try_deserialize()
            .with_context(|| "Configuration deserialize error")
    }

    /// Round deadline
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Time to wait for the children of a node whose subtree is `height` levels deep.
    pub fn child_timeout(&self, height: u32) -> Duration {
        Duration::from_millis(self.child_timeout_ms.saturating_mul(u64::from(height.max(1))))
    }

    /// Heartbeat timeout, if enabled
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout_ms.map(Duration::from_millis)
    }

    /// True if the root must propose the next view with this round.
    pub fn time_for_view_change(&self, round: RoundNumber) -> bool {
        self.rounds_per_view != 0 && round % self.rounds_per_view == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_for_view_change_every_rounds_per_view() {
        let configuration = NodeConfiguration {
            rounds_per_view: 2,
            ..NodeConfiguration::new_sample()
        };

        assert!(!configuration.time_for_view_change(1));
        assert!(configuration.time_for_view_change(2));
        assert!(!configuration.time_for_view_change(3));
        assert!(configuration.time_for_view_change(4));
        assert!(!NodeConfiguration::new_sample().time_for_view_change(4));
    }

    #[test]
    fn child_timeout_grows_with_the_height() {
        let configuration = NodeConfiguration::new_sample();

        assert_eq!(configuration.child_timeout(0), Duration::from_millis(200));
        assert_eq!(configuration.child_timeout(1), Duration::from_millis(200));
        assert_eq!(configuration.child_timeout(3), Duration::from_millis(600));
    }

    #[test]
    fn load_from_json_file_keeps_defaults_for_missing_keys() {
        let directory = std::env::temp_dir().join("cosi_node_configuration");
        std::fs::create_dir_all(&directory).unwrap();
        let file = directory.join("load_from_json_file.json");
        std::fs::write(
            &file,
            r#"{ "rounds_per_view": 4, "failure": { "fail_as_follower_every": 2 } }"#,
        )
        .unwrap();

        let configuration = NodeConfiguration::load(Some(&file)).unwrap();

        assert_eq!(configuration.rounds_per_view, 4);
        assert_eq!(configuration.failure.fail_as_follower_every, 2);
        assert_eq!(
            configuration.failure.failure_phases,
            FailureConfiguration::default().failure_phases
        );
        assert_eq!(configuration.max_wait_ms, 50_000);
    }

    #[test]
    fn load_fails_on_missing_file() {
        NodeConfiguration::load(Some(Path::new("/nonexistent/cosi.json")))
            .expect_err("a required file is missing");
    }
}
