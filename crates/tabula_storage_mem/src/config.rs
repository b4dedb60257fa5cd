use serde::{Deserialize, Serialize};
use tabula_core::EngineError;

/// What `begin(true)` does while another write transaction is active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterPolicy {
    /// Wait until the active writer commits or rolls back.
    #[default]
    Block,
    /// Fail immediately with a transaction error.
    FailFast,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryEngineConfig {
    pub writer_policy: WriterPolicy,
}

impl MemoryEngineConfig {
    pub fn with_writer_policy(mut self, policy: WriterPolicy) -> Self {
        self.writer_policy = policy;
        self
    }

    /// Parse a config from JSON, e.g. `{"writer_policy": "fail_fast"}`.
    pub fn from_json_str(s: &str) -> Result<Self, EngineError> {
        serde_json::from_str(s).map_err(|e| EngineError::InvalidArgument(format!("engine config: {e}")))
    }
}
