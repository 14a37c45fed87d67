pub mod error;
pub mod types;
pub mod value;

pub use error::{EntityFailure, Result, TrackError};
pub use types::{DataType, EntityKey, PropertyValues};
pub use value::Value;
