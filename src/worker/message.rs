//! Control messages posted by the page to the manager.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages the manager recognizes, tagged by their `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
  /// Page asks for offline storage to be prepared
  #[serde(rename = "INIT_OFFLINE_DB")]
  InitOfflineDb,
}

impl ControlMessage {
  /// Returns None for anything that is not a recognized message.
  pub fn parse(value: &Value) -> Option<Self> {
    serde_json::from_value(value.clone()).ok()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
  Acknowledged(ControlMessage),
  Ignored,
}
