//! Shutdown timeout policy.
//!
//! What happens when in-flight requests outlive the shutdown budget is the
//! embedder's call. A process hosting several servers cannot afford a forced
//! exit, a single-server binary usually wants one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Action run once when draining exceeds the shutdown timeout.
pub type OnTimeout = Arc<dyn Fn() + Send + Sync>;

/// Policy for a shutdown that exceeds its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Log the timeout and keep waiting for in-flight requests.
    KeepWaiting,
    /// Terminate the process with the given exit code.
    Exit { code: i32 },
}

impl TimeoutPolicy {
    /// Turn the policy into an on-timeout action for the server.
    pub fn into_callback(self) -> Option<OnTimeout> {
        match self {
            TimeoutPolicy::KeepWaiting => None,
            TimeoutPolicy::Exit { code } => Some(exit_process(code)),
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        TimeoutPolicy::Exit { code: 0 }
    }
}

/// On-timeout action that exits the process.
pub fn exit_process(code: i32) -> OnTimeout {
    Arc::new(move || {
        tracing::warn!(exit_code = code, "Forcing process exit after shutdown timeout");
        std::process::exit(code);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_waiting_has_no_callback() {
        assert!(TimeoutPolicy::KeepWaiting.into_callback().is_none());
        assert!(TimeoutPolicy::Exit { code: 3 }.into_callback().is_some());
    }

    #[test]
    fn policy_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: TimeoutPolicy,
        }

        let w: Wrapper = toml::from_str("policy = \"keep_waiting\"").unwrap();
        assert_eq!(w.policy, TimeoutPolicy::KeepWaiting);

        let w: Wrapper = toml::from_str("policy = { exit = { code = 2 } }").unwrap();
        assert_eq!(w.policy, TimeoutPolicy::Exit { code: 2 });
    }
}
