use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{domain::MerkleDisplayMode, error::ValidationError};

/// Partial snapshot update; absent fields leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MerkleUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MerkleStore {
    graph: Option<Value>,
    json: Option<Value>,
    mode: MerkleDisplayMode,
}

impl MerkleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_snapshot(&mut self, update: MerkleUpdate) -> bool {
        let mut changed = false;
        if let Some(graph) = update.graph.filter(|v| !v.is_null()) {
            self.graph = Some(graph);
            changed = true;
        }
        if let Some(json) = update.json.filter(|v| !v.is_null()) {
            self.json = Some(json);
            changed = true;
        }
        changed
    }

    pub fn set_display_mode(&mut self, mode: MerkleDisplayMode) -> bool {
        let changed = self.mode != mode;
        self.mode = mode;
        changed
    }

    pub fn set_display_mode_str(&mut self, mode: &str) -> Result<bool, ValidationError> {
        let mode = mode.parse::<MerkleDisplayMode>()?;
        Ok(self.set_display_mode(mode))
    }

    pub fn graph(&self) -> Option<&Value> {
        self.graph.as_ref()
    }

    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    pub fn display_mode(&self) -> MerkleDisplayMode {
        self.mode
    }
}
