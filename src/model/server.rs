use serde::{Deserialize, Serialize};

/// A receipt validation endpoint.
///
/// Lower `priority` values are tried first; servers with equal priority keep
/// their registration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationServer {
    pub endpoint: String,
    #[serde(default)]
    pub priority: i32,
}

impl ValidationServer {
    pub fn new(endpoint: impl Into<String>, priority: i32) -> Self {
        Self {
            endpoint: endpoint.into(),
            priority,
        }
    }
}
