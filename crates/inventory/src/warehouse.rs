use serde::{Deserialize, Serialize};

use tallyerp_core::WarehouseId;

/// A stock location known to reference data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
}

impl Warehouse {
    pub fn new(id: WarehouseId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}
