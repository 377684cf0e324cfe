//! Knobs of one pipeline run.
use serde::{Deserialize, Serialize};

/// What a fatal violation does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort resolution at the first fatal violation.
    FailFast,
    /// Resolve everything and collect every violation; reject at the end if any is fatal.
    #[default]
    ContinueOnWarning,
}

impl FailurePolicy {
    pub fn is_fail_fast(self) -> bool { self == FailurePolicy::FailFast }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveMode {
    /// Depth-first, one module at a time. The reference mode.
    #[default]
    Sequential,
    /// Topological waves evaluated with rayon. Same results.
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Resolve only this parameter and its dependencies. `None` resolves everything.
    pub target: Option<String>,
    pub policy: FailurePolicy,
    pub mode: ResolveMode,
    /// Prefix of the generation id.
    pub label: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            target: None,
            policy: FailurePolicy::default(),
            mode: ResolveMode::default(),
            label: "local".to_string(),
        }
    }
}

impl RunOptions {
    pub fn target(mut self, id: impl Into<String>) -> Self {
        self.target = Some(id.into());
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn mode(mut self, mode: ResolveMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}
