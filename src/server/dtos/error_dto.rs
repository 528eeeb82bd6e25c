use serde::{Deserialize, Serialize};

/// every json error leaves the server in this shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}
