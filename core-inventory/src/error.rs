use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Bridge error: {0}")]
    Bridge(BridgeError),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },
}

impl From<BridgeError> for InventoryError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NotFound { entity, id } => InventoryError::NotFound {
                entity_type: entity,
                id,
            },
            other => InventoryError::Bridge(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, InventoryError>;
