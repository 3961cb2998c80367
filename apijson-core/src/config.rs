//! Engine settings shared by the read and write paths.

use serde::{Deserialize, Serialize};

/// Maximum number of path segments in a read request.
pub const DEFAULT_MAX_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Check caller roles against per-table access rules.
    pub access_verify: bool,
    pub max_depth: usize,
    /// Page handed to a container's primary table when the request has none.
    pub default_page: u64,
    /// Page size handed to a container's primary table when the request has none.
    pub default_count: u64,
    /// Upper bound for client-supplied page sizes. 0 disables the cap.
    pub max_count: u64,
    /// Ownership column used when an access rule does not name one.
    pub owner_column: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            access_verify: false,
            max_depth: DEFAULT_MAX_DEPTH,
            default_page: 1,
            default_count: 10,
            max_count: 100,
            owner_column: "user_id".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn verified() -> Self {
        Self {
            access_verify: true,
            ..Default::default()
        }
    }
}
