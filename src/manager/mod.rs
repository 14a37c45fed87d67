// ============================================================================
// Entity Manager
// ============================================================================
//
// The entity cache: attach/detach, temporary keys, query merge, local
// queries, and the prepare/apply save cycle against a `DataService`.
//
// ============================================================================

pub mod config;
pub mod events;
pub mod key_generator;
pub mod manager;
pub mod query;

pub use config::{ManagerConfig, MergeStrategy};
pub use events::{EntityAction, EntityChanged, EntityId};
pub use key_generator::{single_key_type, DefaultKeyGenerator, KeyGenerator};
pub use manager::EntityManager;
pub(crate) use manager::MergeOrigin;
pub use query::{EntityQuery, FilterOp, OrderBy, Predicate, PropertySource};
