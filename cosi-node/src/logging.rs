//! Logging of the CoSi nodes.

use std::sync::Arc;

use slog::{Drain, Level, Logger};

/// Child of `parent` whose records carry the source component and the identity of the node.
pub(crate) fn node_logger(parent: &Logger, node: &str) -> Logger {
    parent.new(slog::o!("src" => "Node", "node" => node.to_owned()))
}

/// Asynchronous bunyan JSON logger writing to stdout, records below `min_level` are dropped.
pub fn build_logger(min_level: Level) -> Logger {
    let drain = slog_bunyan::new(std::io::stdout())
        .set_pretty(false)
        .build()
        .fuse();
    let drain = slog::LevelFilter::new(drain, min_level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Logger::root(Arc::new(drain), slog::o!())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use slog::{KV, Record, Serializer};

    use super::*;

    /// Keeps the key/value pairs of the records it receives.
    #[derive(Default)]
    struct CollectingDrain(Arc<Mutex<Vec<(String, String)>>>);

    struct Collector<'a>(&'a mut Vec<(String, String)>);

    impl Serializer for Collector<'_> {
        fn emit_arguments(&mut self, key: slog::Key, value: &std::fmt::Arguments) -> slog::Result {
            self.0.push((key.to_string(), value.to_string()));
            Ok(())
        }
    }

    impl Drain for CollectingDrain {
        type Ok = ();
        type Err = slog::Never;

        fn log(&self, record: &Record, values: &slog::OwnedKVList) -> Result<(), slog::Never> {
            let mut pairs = self.0.lock().unwrap();
            values.serialize(record, &mut Collector(&mut pairs)).unwrap();
            Ok(())
        }
    }

    #[test]
    fn node_logger_tags_records_with_the_node() {
        let drain = CollectingDrain::default();
        let pairs = drain.0.clone();
        let root = Logger::root(drain.fuse(), slog::o!());

        slog::info!(node_logger(&root, "node-3"), "Round started");

        let pairs = pairs.lock().unwrap();
        assert!(pairs.contains(&("src".to_string(), "Node".to_string())));
        assert!(pairs.contains(&("node".to_string(), "node-3".to_string())));
    }

    #[test]
    fn built_logger_accepts_child_loggers() {
        let logger = node_logger(&build_logger(Level::Warning), "node-0");

        slog::debug!(logger, "filtered out");
    }
}
