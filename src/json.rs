use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// One result row keyed by column name. Key order is not significant; the
/// owning envelope's column list carries the authoritative ordering.
#[derive(Clone, Debug, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(transparent)]
pub struct RowMap(
    #[schema(value_type = Object)] pub serde_json::Map<String, serde_json::Value>,
);

impl Deref for RowMap {
    type Target = serde_json::Map<String, serde_json::Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RowMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for RowMap {
    fn from(value: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(value)
    }
}

impl From<RowMap> for serde_json::Map<String, serde_json::Value> {
    fn from(value: RowMap) -> Self {
        value.0
    }
}
