// ============================================================================
// Type Registry
// ============================================================================
//
// Entity type descriptions (mapped, key and unmapped properties) plus the
// per-type construction hooks. The store is an explicit value handed to
// each manager; nothing here is global.
//
// ============================================================================

pub mod constructor;
pub mod entity_type;
pub mod property;
pub mod store;

pub use constructor::{
    initializer, EntityConstructor, EntityInitializer, EntityMethod, FieldAssignments, FieldInit,
};
pub use entity_type::{AutoGeneratedKeyType, EntityType, EntityTypeDeclaration};
pub use property::{PropertyDeclaration, PropertyDescriptor};
pub use store::{MetadataDeclaration, MetadataStore};
