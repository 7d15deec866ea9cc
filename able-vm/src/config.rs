#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};

/// 默认时间片：每次恢复允许的求值步数
pub const DEFAULT_TIME_SLICE: usize = 256;

/// Tunables for one interpreter instance.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde_support", serde(default))]
pub struct RuntimeConfig {
    /// Evaluation steps a handle may run per resumption before it is
    /// preempted at the next loop back-edge. `0` disables time slicing.
    pub time_slice: usize,
    /// Upper bound on callbacks run by a program-level `flush()` that was
    /// called without an explicit limit, and by the drain after `run`.
    pub flush_limit: Option<usize>,
    /// Drain the run queue after the root program finishes.
    pub drain_on_exit: bool,
    /// Echo `print` output to stdout in addition to capturing it.
    pub echo_output: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            time_slice: DEFAULT_TIME_SLICE,
            flush_limit: None,
            drain_on_exit: true,
            echo_output: false,
        }
    }
}

impl RuntimeConfig {
    pub fn with_time_slice(mut self, time_slice: usize) -> Self {
        self.time_slice = time_slice;
        self
    }

    pub fn with_flush_limit(mut self, limit: Option<usize>) -> Self {
        self.flush_limit = limit;
        self
    }

    pub fn with_drain_on_exit(mut self, drain: bool) -> Self {
        self.drain_on_exit = drain;
        self
    }

    pub fn with_echo_output(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }
}

#[cfg(all(test, feature = "serde_support"))]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{ "time_slice": 8 }"#).unwrap();
        assert_eq!(config.time_slice, 8);
        assert!(config.drain_on_exit);
        assert_eq!(config.flush_limit, None);
    }

    #[test]
    fn test_builder_overrides() {
        let config = RuntimeConfig::default()
            .with_time_slice(0)
            .with_flush_limit(Some(10))
            .with_drain_on_exit(false);
        assert_eq!(config.time_slice, 0);
        assert_eq!(config.flush_limit, Some(10));
        assert!(!config.drain_on_exit);
    }
}
