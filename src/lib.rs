// ============================================================================
// entitrack Library
// ============================================================================

//! Metadata-driven entity cache with change tracking.
//!
//! Entity types are declared in a [`MetadataStore`]: mapped properties
//! known to the remote store, unmapped properties tracked only on the
//! client, and optional constructors and initializers. An
//! [`EntityManager`] materializes entities from those types, tracks every
//! write through each entity's aspect, generates temporary keys, merges
//! query results, saves pending changes through a [`DataService`], and
//! exports or imports snapshots of tracked state.
//!
//! ```
//! use entitrack::{
//!     DataType, EntityManager, EntityState, EntityType, MetadataStore, PropertyDescriptor,
//!     PropertyValues,
//! };
//!
//! # fn main() -> entitrack::Result<()> {
//! let mut store = MetadataStore::new();
//! store.add_entity_type(
//!     EntityType::new("Customer")
//!         .property(PropertyDescriptor::new("CustomerID", DataType::Integer).key())
//!         .property(PropertyDescriptor::new("CompanyName", DataType::Text)),
//! )?;
//!
//! let mut em = EntityManager::new(store);
//! let id = em.create_entity(
//!     "Customer",
//!     PropertyValues::new().with("CustomerID", 1).with("CompanyName", "Acme"),
//!     EntityState::Unchanged,
//! )?;
//!
//! let customer = em.entity_mut(id).unwrap();
//! customer.set("CompanyName", "Beta")?;
//! assert_eq!(customer.entity_state(), EntityState::Modified);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod core;
pub mod entity;
pub mod manager;
pub mod metadata;
pub mod service;

pub use codec::{EntitySnapshot, ImportOptions, SnapshotRecord};
pub use crate::core::{DataType, EntityFailure, EntityKey, PropertyValues, Result, TrackError, Value};
pub use entity::{
    CustomValidator, Entity, EntityAspect, EntityState, Extension, MaxLengthValidator,
    NotifyPolicy, Observable, PropertyChangedArgs, RequiredValidator, SubscriptionId,
    ValidationError, ValidationErrorsChangedArgs, Validator,
};
pub use manager::{
    DefaultKeyGenerator, EntityAction, EntityChanged, EntityId, EntityManager, EntityQuery,
    FilterOp, KeyGenerator, ManagerConfig, MergeStrategy, Predicate,
};
pub use metadata::{
    AutoGeneratedKeyType, EntityConstructor, EntityInitializer, EntityType, FieldAssignments,
    MetadataStore, PropertyDescriptor, initializer,
};
pub use service::{DataService, InMemoryDataService, SaveBundle, SaveOutcome, SaveResult};
