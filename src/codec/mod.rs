// ============================================================================
// Export / Import
// ============================================================================
//
// Entities leave the cache as snapshot records holding tracked values only
// and come back through the same materialization path as a fresh create,
// so the importing store's constructors and initializers apply.
//
// ============================================================================

pub mod snapshot;

use std::collections::BTreeSet;
use std::path::Path;

use log::debug;

use crate::core::{PropertyValues, Result, TrackError};
use crate::entity::EntityState;
use crate::manager::{EntityId, EntityManager, MergeOrigin};
use crate::metadata::MetadataDeclaration;

pub use snapshot::{EntitySnapshot, ImportOptions, SnapshotRecord, SNAPSHOT_VERSION};

impl EntityManager {
    /// Exports the given entities, or every attached entity when `ids` is `None`.
    pub fn export_entities(&self, ids: Option<&[EntityId]>) -> Result<EntitySnapshot> {
        let selected: Vec<EntityId> = match ids {
            Some(ids) => ids.to_vec(),
            None => self.entities().map(|(id, _)| id).collect(),
        };

        let mut type_names = BTreeSet::new();
        let mut records = Vec::with_capacity(selected.len());
        for id in selected {
            let entity = self
                .entity(id)
                .ok_or_else(|| TrackError::EntityNotFound(id.to_string()))?;
            type_names.insert(entity.type_name().to_string());
            records.push(SnapshotRecord {
                type_name: entity.type_name().to_string(),
                entity_state: entity.entity_state(),
                values: entity.tracked_values(),
                original_values: entity.entity_aspect().original_values().clone(),
            });
        }

        let metadata = MetadataDeclaration {
            entity_types: self
                .metadata()
                .entity_types()
                .filter(|ty| type_names.contains(ty.name()))
                .map(|ty| ty.declaration())
                .collect(),
        };
        debug!("Exported {} entities", records.len());
        Ok(EntitySnapshot::new(metadata, records))
    }

    pub fn export_entities_to_string(&self, ids: Option<&[EntityId]>) -> Result<String> {
        self.export_entities(ids)?.to_json()
    }

    pub fn export_entities_to_bytes(&self, ids: Option<&[EntityId]>) -> Result<Vec<u8>> {
        self.export_entities(ids)?.to_bytes()
    }

    /// Exports every attached entity to `path`, replacing it atomically.
    pub fn export_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.export_entities(None)?.write_to_file(path)
    }

    /// Imports snapshot records.
    ///
    /// Types the store does not know are loaded from the snapshot's
    /// declarations first. Values for properties the target type does not
    /// declare are dropped. A record whose key is already cached is merged
    /// according to the configured merge strategy.
    pub fn import_entities(
        &mut self,
        snapshot: &EntitySnapshot,
        options: ImportOptions,
    ) -> Result<Vec<EntityId>> {
        let loaded = self.metadata_mut().import_declaration(&snapshot.metadata)?;
        if loaded > 0 {
            debug!("Loaded {} entity types from snapshot", loaded);
        }

        let no_originals = PropertyValues::new();
        let mut ids = Vec::with_capacity(snapshot.len());
        for record in &snapshot.entities {
            let entity_type = self.metadata().entity_type(&record.type_name)?;
            let origin = if options.restore_state {
                MergeOrigin::Import {
                    state: record.entity_state,
                    original_values: &record.original_values,
                }
            } else {
                MergeOrigin::Import {
                    state: EntityState::Unchanged,
                    original_values: &no_originals,
                }
            };
            ids.push(self.merge_row(&entity_type, &record.values, origin)?);
        }
        debug!("Imported {} entities", ids.len());
        Ok(ids)
    }

    pub fn import_from_str(&mut self, json: &str, options: ImportOptions) -> Result<Vec<EntityId>> {
        let snapshot = EntitySnapshot::from_json(json)?;
        self.import_entities(&snapshot, options)
    }

    pub fn import_from_bytes(&mut self, bytes: &[u8], options: ImportOptions) -> Result<Vec<EntityId>> {
        let snapshot = EntitySnapshot::from_bytes(bytes)?;
        self.import_entities(&snapshot, options)
    }

    pub fn import_from_file(
        &mut self,
        path: impl AsRef<Path>,
        options: ImportOptions,
    ) -> Result<Vec<EntityId>> {
        let snapshot = EntitySnapshot::read_from_file(path)?;
        self.import_entities(&snapshot, options)
    }
}
