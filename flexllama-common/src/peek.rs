//! Minimal request shape used by the router to decide where a request goes
//! without fully deserializing (and thereby reshaping) the client's body.

use serde::Deserialize;

/// The only two fields the router reads off an incoming request body before
/// forwarding it upstream verbatim.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RequestPeek {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
}

impl RequestPeek {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}
