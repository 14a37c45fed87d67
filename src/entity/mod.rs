// ============================================================================
// Entities
// ============================================================================
//
// Live entity instances: reactive property holders, the change-tracking
// aspect, lifecycle state and validation.
//
// ============================================================================

pub mod aspect;
pub mod entity;
pub mod events;
pub mod observable;
pub mod state;
pub mod validation;

pub use aspect::{
    EntityAspect, NotifyPolicy, PropertyChangedArgs, TrackingOptions, ValidationErrorsChangedArgs,
};
pub use entity::{Entity, Extension};
pub use events::{SubscriptionId, Subscribers};
pub use observable::Observable;
pub use state::EntityState;
pub use validation::{
    CustomValidator, MaxLengthValidator, RequiredValidator, ValidationError, Validator,
    ValidatorSpec,
};
