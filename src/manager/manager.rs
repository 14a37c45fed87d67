use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

use super::config::{ManagerConfig, MergeStrategy};
use super::events::{EntityAction, EntityChanged, EntityId};
use super::key_generator::{DefaultKeyGenerator, KeyGenerator};
use super::query::EntityQuery;
use crate::core::{DataType, EntityKey, PropertyValues, Result, TrackError, Value};
use crate::entity::{Entity, EntityState, SubscriptionId, Subscribers};
use crate::metadata::{AutoGeneratedKeyType, EntityType, MetadataStore};
use crate::service::{
    AutoGeneratedKey, DataService, SaveBundle, SaveEntry, SaveOperation, SaveOutcome, SaveResult,
};

const MAX_TEMP_KEY_ATTEMPTS: usize = 16;

/// Where a merged row comes from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MergeOrigin<'a> {
    Query,
    Import {
        state: EntityState,
        original_values: &'a PropertyValues,
    },
}

/// The entity cache.
///
/// Owns every attached entity and hands out [`EntityId`] handles. Keys are
/// unique per type among live entities.
pub struct EntityManager {
    config: ManagerConfig,
    metadata: MetadataStore,
    entities: BTreeMap<EntityId, Entity>,
    next_id: u64,
    key_generator: Box<dyn KeyGenerator>,
    /// Temporary keys issued and not yet replaced by a save.
    temp_keys: Vec<EntityKey>,
    data_service: Option<Arc<dyn DataService>>,
    entity_changed: Subscribers<EntityChanged>,
}

impl EntityManager {
    pub fn new(metadata: MetadataStore) -> Self {
        Self::with_config(metadata, ManagerConfig::default())
    }

    pub fn with_config(metadata: MetadataStore, config: ManagerConfig) -> Self {
        Self {
            config,
            metadata,
            entities: BTreeMap::new(),
            next_id: 0,
            key_generator: Box::new(DefaultKeyGenerator::new()),
            temp_keys: Vec::new(),
            data_service: None,
            entity_changed: Subscribers::new(),
        }
    }

    pub fn with_data_service(mut self, service: Arc<dyn DataService>) -> Self {
        self.data_service = Some(service);
        self
    }

    pub fn set_data_service(&mut self, service: Arc<dyn DataService>) {
        self.data_service = Some(service);
    }

    pub fn data_service(&self) -> Option<&Arc<dyn DataService>> {
        self.data_service.as_ref()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Registrations made here affect entities materialized afterwards.
    pub fn metadata_mut(&mut self) -> &mut MetadataStore {
        &mut self.metadata
    }

    pub fn set_key_generator(&mut self, generator: impl KeyGenerator + 'static) {
        self.key_generator = Box::new(generator);
    }

    pub fn temp_keys(&self) -> &[EntityKey] {
        &self.temp_keys
    }

    pub fn subscribe_entity_changed(
        &mut self,
        handler: impl FnMut(&EntityChanged) + Send + 'static,
    ) -> SubscriptionId {
        self.entity_changed.subscribe(handler)
    }

    pub fn unsubscribe_entity_changed(&mut self, id: SubscriptionId) -> bool {
        self.entity_changed.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id).filter(|e| !e.entity_state().is_detached())
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities
            .get_mut(&id)
            .filter(|e| !e.entity_state().is_detached())
    }

    fn entity_or_err(&mut self, id: EntityId) -> Result<&mut Entity> {
        self.entity_mut(id)
            .ok_or_else(|| TrackError::EntityNotFound(id.to_string()))
    }

    /// Attached entities in attachment order.
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities
            .iter()
            .filter(|(_, e)| !e.entity_state().is_detached())
            .map(|(id, e)| (*id, e))
    }

    pub fn entities_of(&self, type_name: &str) -> Vec<EntityId> {
        self.entities()
            .filter(|(_, e)| e.type_name() == type_name)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn entities_in_state(&self, states: &[EntityState]) -> Vec<EntityId> {
        self.entities()
            .filter(|(_, e)| states.contains(&e.entity_state()))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn find_entity_by_key(&self, key: &EntityKey) -> Option<EntityId> {
        self.entities()
            .find(|(_, e)| e.type_name() == key.type_name && &e.key() == key)
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.entities().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_changes(&self) -> bool {
        self.entities()
            .any(|(_, e)| e.entity_aspect().has_changes())
    }

    /// Added, Modified and Deleted entities.
    pub fn changes(&self) -> Vec<EntityId> {
        self.entities()
            .filter(|(_, e)| e.entity_aspect().has_changes())
            .map(|(id, _)| id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Attach / detach
    // ------------------------------------------------------------------

    /// Materializes an entity and attaches it in `state`.
    ///
    /// `values` are applied as raw values during materialization, so they
    /// never count as changes.
    pub fn create_entity(
        &mut self,
        type_name: &str,
        values: PropertyValues,
        state: EntityState,
    ) -> Result<EntityId> {
        let entity_type = self.metadata.entity_type(type_name)?;
        if let Some(name) = values.names().find(|n| entity_type.get_property(n).is_none()) {
            return Err(TrackError::UndeclaredProperty(
                name.to_string(),
                type_name.to_string(),
            ));
        }
        let raw = (!values.is_empty()).then_some(&values);
        let entity = Entity::materialize(entity_type, raw);
        self.attach_entity(entity, state)
    }

    pub fn add_entity(&mut self, entity: Entity) -> Result<EntityId> {
        self.attach_entity(entity, EntityState::Added)
    }

    /// Attaches an externally materialized entity. Added entities with a
    /// default store-generated key receive a temporary key first; if that
    /// fails the entity is not attached.
    pub fn attach_entity(&mut self, entity: Entity, state: EntityState) -> Result<EntityId> {
        self.attach_internal(entity, state, EntityAction::Attach, true)
    }

    fn attach_internal(
        &mut self,
        mut entity: Entity,
        state: EntityState,
        action: EntityAction,
        generate_keys: bool,
    ) -> Result<EntityId> {
        if state.is_detached() {
            return Err(TrackError::InvalidState(
                "Cannot attach an entity as Detached".to_string(),
            ));
        }
        if !entity.entity_state().is_detached() {
            return Err(TrackError::InvalidState(format!(
                "{} is already attached",
                entity.key()
            )));
        }
        let type_name = entity.type_name().to_string();
        if !self.metadata.has_entity_type(&type_name) {
            return Err(TrackError::UnknownEntityType(type_name));
        }

        if state.is_added() && generate_keys {
            self.assign_temp_key(&mut entity)?;
        }
        let key = entity.key();
        if !key.values.iter().any(Value::is_null) && self.find_entity_by_key(&key).is_some() {
            return Err(TrackError::DuplicateKey(key.to_string()));
        }

        entity
            .entity_aspect_mut()
            .attach(state, self.config.tracking_options());
        if self.config.validate_on_attach {
            entity.validate_entity();
        }

        self.next_id += 1;
        let id = EntityId::from_raw(self.next_id);
        debug!("Attached {} as {} ({})", key, state, id);
        self.entities.insert(id, entity);
        self.publish(action, Some(id), Some(type_name));
        Ok(id)
    }

    fn assign_temp_key(&mut self, entity: &mut Entity) -> Result<()> {
        let entity_type = entity.entity_type_arc();
        let key_type = entity_type.auto_generated_key_type();
        if key_type == AutoGeneratedKeyType::None {
            return Ok(());
        }
        let (key_name, data_type) = match entity_type.key_properties().as_slice() {
            [only] => (only.name().to_string(), only.data_type()),
            [] => {
                return Err(TrackError::UnsupportedKeyType(format!(
                    "'{}' has no key property",
                    entity_type.name()
                )));
            }
            _ => return Err(TrackError::MultiPartKey(entity_type.name().to_string())),
        };

        let current = entity.get(&key_name).cloned().unwrap_or(Value::Null);
        if !current.is_null() && current != data_type.default_value() {
            return Ok(());
        }

        if key_type == AutoGeneratedKeyType::ClientGuid {
            if data_type != DataType::Guid {
                return Err(TrackError::UnsupportedKeyType(format!(
                    "{} client key on '{}'",
                    data_type,
                    entity_type.name()
                )));
            }
            entity.assign_untracked(&key_name, Value::Guid(Uuid::new_v4()));
            return Ok(());
        }

        let mut attempts = 0;
        let (key, value) = loop {
            let candidate = self.key_generator.generate_temp_key(&entity_type)?;
            let key = EntityKey::new(entity_type.name(), vec![candidate.clone()]);
            if !self.temp_keys.contains(&key) && self.find_entity_by_key(&key).is_none() {
                break (key, candidate);
            }
            attempts += 1;
            if attempts >= MAX_TEMP_KEY_ATTEMPTS {
                return Err(TrackError::DuplicateKey(key.to_string()));
            }
        };
        entity.assign_untracked(&key_name, value);
        debug!("Assigned temporary key {}", key);
        self.temp_keys.push(key);
        Ok(())
    }

    /// Removes an entity from the cache and returns it detached.
    pub fn detach_entity(&mut self, id: EntityId) -> Result<Entity> {
        self.entity_or_err(id)?;
        let mut entity = self
            .entities
            .remove(&id)
            .ok_or_else(|| TrackError::EntityNotFound(id.to_string()))?;
        self.release(id, &mut entity);
        Ok(entity)
    }

    fn release(&mut self, id: EntityId, entity: &mut Entity) {
        let key = entity.key();
        self.temp_keys.retain(|k| k != &key);
        entity.entity_aspect_mut().detach();
        debug!("Detached {} ({})", key, id);
        self.publish(
            EntityAction::Detach,
            Some(id),
            Some(entity.type_name().to_string()),
        );
    }

    /// Drops entities that became Detached through their own aspect.
    fn remove_if_detached(&mut self, id: EntityId) {
        if self
            .entities
            .get(&id)
            .is_some_and(|e| e.entity_state().is_detached())
        {
            if let Some(mut entity) = self.entities.remove(&id) {
                self.release(id, &mut entity);
            }
        }
    }

    /// Detaches every entity.
    pub fn clear(&mut self) {
        let count = self.entities.len();
        for entity in self.entities.values_mut() {
            entity.entity_aspect_mut().detach();
        }
        self.entities.clear();
        self.temp_keys.clear();
        debug!("Cleared {} entities from '{}'", count, self.config.service_name);
        self.publish(EntityAction::Clear, None, None);
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    pub fn set_deleted(&mut self, id: EntityId) -> Result<()> {
        self.entity_or_err(id)?.set_deleted()
    }

    /// Commits local changes. An accepted new entity keeps its key, which
    /// is no longer a temporary key; accepted deletes leave the cache.
    pub fn accept_changes(&mut self, id: EntityId) -> Result<()> {
        let entity = self.entity_or_err(id)?;
        let was_new = entity.entity_aspect().is_new();
        let key = entity.key();
        entity.accept_changes();
        let type_name = entity.type_name().to_string();
        if was_new {
            self.temp_keys.retain(|k| k != &key);
        }
        self.publish(EntityAction::AcceptChanges, Some(id), Some(type_name));
        self.remove_if_detached(id);
        Ok(())
    }

    /// Restores originals; entities that were never saved leave the cache.
    pub fn reject_changes(&mut self, id: EntityId) -> Result<()> {
        let entity = self.entity_or_err(id)?;
        entity.reject_changes();
        let type_name = entity.type_name().to_string();
        self.publish(EntityAction::RejectChanges, Some(id), Some(type_name));
        self.remove_if_detached(id);
        Ok(())
    }

    pub fn reject_all_changes(&mut self) -> Result<Vec<EntityId>> {
        let changed = self.changes();
        for id in &changed {
            self.reject_changes(*id)?;
        }
        Ok(changed)
    }

    fn publish(&mut self, action: EntityAction, entity_id: Option<EntityId>, type_name: Option<String>) {
        self.entity_changed.publish(&EntityChanged {
            action,
            entity_id,
            type_name,
        });
    }

    // ------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------

    /// Merges server rows of one type into the cache.
    pub fn merge_from_query(&mut self, type_name: &str, rows: &[PropertyValues]) -> Result<Vec<EntityId>> {
        let entity_type = self.metadata.entity_type(type_name)?;
        rows.iter()
            .map(|row| self.merge_row(&entity_type, row, MergeOrigin::Query))
            .collect()
    }

    pub(crate) fn merge_row(
        &mut self,
        entity_type: &Arc<EntityType>,
        row: &PropertyValues,
        origin: MergeOrigin<'_>,
    ) -> Result<EntityId> {
        let mut values = PropertyValues::new();
        for (name, value) in row.iter() {
            if entity_type.get_property(name).is_some() {
                values.insert(name, value.clone());
            } else {
                warn!(
                    "Ignoring column '{}' not declared on '{}'",
                    name,
                    entity_type.name()
                );
            }
        }

        let (attach_action, merge_action) = match origin {
            MergeOrigin::Query => (EntityAction::AttachOnQuery, EntityAction::MergeOnQuery),
            MergeOrigin::Import { .. } => (EntityAction::AttachOnImport, EntityAction::MergeOnImport),
        };

        let key = entity_type.key_from(|name| values.get(name));
        let existing = if key.values.iter().any(Value::is_null) {
            None
        } else {
            self.find_entity_by_key(&key)
        };

        if let Some(id) = existing {
            let preserve = self.config.merge_strategy == MergeStrategy::PreserveChanges;
            let validate = self.config.validate_on_attach;
            let entity = self.entity_or_err(id)?;
            if preserve && entity.entity_aspect().has_changes() {
                debug!("Kept local changes of {} ({})", key, id);
                return Ok(id);
            }
            entity.merge_values(&values);
            apply_origin(entity, origin);
            if validate {
                entity.validate_entity();
            }
            debug!("Merged {} ({})", key, id);
            self.publish(merge_action, Some(id), Some(entity_type.name().to_string()));
            return Ok(id);
        }

        let entity = Entity::materialize(entity_type.clone(), Some(&values));
        let state = match origin {
            MergeOrigin::Query => EntityState::Unchanged,
            MergeOrigin::Import { state, .. } if !state.is_detached() => state,
            MergeOrigin::Import { .. } => EntityState::Unchanged,
        };
        let id = self.attach_internal(entity, state, attach_action, false)?;
        if let MergeOrigin::Import { original_values, .. } = origin {
            if let Some(entity) = self.entity_mut(id) {
                for (name, value) in original_values.iter() {
                    if entity.entity_type().get_property(name).is_some() {
                        entity.entity_aspect_mut().set_original_value(name, value.clone());
                    }
                }
            }
            if state.is_added() && entity_type.auto_generated_key_type().is_store_generated() {
                self.temp_keys.push(key);
            }
        }
        Ok(id)
    }

    /// Filters cached entities. Every property the query names must be
    /// declared on the target type, even when nothing is cached.
    pub fn execute_query_locally(&self, query: &EntityQuery) -> Result<Vec<EntityId>> {
        let entity_type = self.metadata.entity_type_for_resource(query.resource_name())?;
        query.check_properties(&entity_type)?;
        let candidates: Vec<(EntityId, &Entity)> = self
            .entities()
            .filter(|(_, e)| e.type_name() == entity_type.name())
            .filter(|(_, e)| query.includes_deleted() || !e.entity_state().is_deleted())
            .collect();
        Ok(query
            .apply(candidates)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    fn service(&self) -> Result<Arc<dyn DataService>> {
        self.data_service.clone().ok_or(TrackError::NoDataService)
    }

    /// Runs the query remotely and merges the returned rows.
    pub async fn execute_query(&mut self, query: &EntityQuery) -> Result<Vec<EntityId>> {
        let service = self.service()?;
        let entity_type = self.metadata.entity_type_for_resource(query.resource_name())?;
        query.check_properties(&entity_type)?;

        let span = info_span!(
            "entitrack.query",
            service = %self.config.service_name,
            resource = %query.resource_name()
        );
        let rows = service
            .execute_query(&entity_type, query)
            .instrument(span.clone())
            .await;
        let _enter = span.enter();
        let rows = rows.inspect_err(|err| event!(Level::WARN, error = %err, "query failed"))?;
        event!(Level::DEBUG, rows = rows.len(), "query resolved");

        rows.iter()
            .map(|row| self.merge_row(&entity_type, row, MergeOrigin::Query))
            .collect()
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Collects pending changes. Only mapped properties are sent.
    pub fn prepare_save(&self) -> SaveBundle {
        let mut bundle = SaveBundle::default();
        for (id, entity) in self.entities() {
            let aspect = entity.entity_aspect();
            let operation = match aspect.entity_state() {
                EntityState::Added => SaveOperation::Insert,
                EntityState::Modified => SaveOperation::Update,
                EntityState::Deleted if aspect.is_new() => {
                    bundle.discarded.push(id);
                    continue;
                }
                EntityState::Deleted => SaveOperation::Delete,
                EntityState::Unchanged | EntityState::Detached => continue,
            };

            let entity_type = entity.entity_type();
            let key_properties: Vec<String> = entity_type
                .key_properties()
                .iter()
                .map(|p| p.name().to_string())
                .collect();
            let auto_generated_key = match key_properties.as_slice() {
                [only] if entity_type.auto_generated_key_type().is_store_generated() => {
                    Some(AutoGeneratedKey {
                        property_name: only.clone(),
                        key_type: entity_type.auto_generated_key_type(),
                    })
                }
                _ => None,
            };
            let original_values = aspect
                .original_values()
                .iter()
                .filter(|(name, _)| entity_type.get_property(name).is_some_and(|p| p.is_mapped()))
                .map(|(name, value)| (name, value.clone()))
                .collect();

            bundle.entries.push(SaveEntry {
                entity_id: id,
                type_name: entity.type_name().to_string(),
                operation,
                key: entity.key(),
                key_properties,
                auto_generated_key,
                values: entity.mapped_values(),
                original_values,
            });
        }
        bundle
    }

    /// Merges a save outcome into the cache.
    ///
    /// Other cache operations may have run since `prepare_save`; entities
    /// that left the cache are skipped, and properties edited in the
    /// meantime keep their edit with the saved value as original. A failed
    /// outcome changes nothing.
    pub fn apply_save_result(&mut self, bundle: &SaveBundle, outcome: SaveOutcome) -> Result<SaveResult> {
        let (saved, key_mappings) = match outcome {
            SaveOutcome::Failed { reasons } => {
                warn!(
                    "Save to '{}' failed for {} entities",
                    self.config.service_name,
                    reasons.len()
                );
                return Err(TrackError::SaveFailed { reasons });
            }
            SaveOutcome::Saved {
                entities,
                key_mappings,
            } => (entities, key_mappings),
        };

        for mapping in &key_mappings {
            let temp = EntityKey::new(mapping.type_name.as_str(), vec![mapping.temp_value.clone()]);
            self.temp_keys.retain(|k| k != &temp);
        }

        let mut result = SaveResult {
            key_mappings,
            ..SaveResult::default()
        };
        let validate = self.config.validate_on_attach;
        for entry in &bundle.entries {
            let id = entry.entity_id;
            if self.entity(id).is_none() {
                debug!("{} left the cache before its save completed", id);
                continue;
            }
            if entry.operation == SaveOperation::Delete {
                if let Some(mut entity) = self.entities.remove(&id) {
                    self.release(id, &mut entity);
                    result.deleted.push(id);
                }
                continue;
            }

            let server_values = saved
                .iter()
                .find(|s| s.entity_id == id)
                .map(|s| &s.values);
            let entity = self.entity_or_err(id)?;
            reconcile_saved(entity, entry, server_values);
            if validate {
                entity.validate_entity();
            }
            let type_name = entity.type_name().to_string();
            self.publish(EntityAction::MergeOnSave, Some(id), Some(type_name));
            result.saved.push(id);
        }

        for id in &bundle.discarded {
            let still_deleted = self.entity(*id).is_some_and(|e| e.entity_state().is_deleted());
            if still_deleted {
                if let Some(mut entity) = self.entities.remove(id) {
                    self.release(*id, &mut entity);
                    result.deleted.push(*id);
                }
            }
        }

        debug!(
            "Save to '{}' applied: {} saved, {} deleted",
            self.config.service_name,
            result.saved.len(),
            result.deleted.len()
        );
        Ok(result)
    }

    /// `prepare_save`, the service round trip, then `apply_save_result`.
    pub async fn save_changes(&mut self) -> Result<SaveResult> {
        let bundle = self.prepare_save();
        if bundle.entries.is_empty() {
            let nothing = SaveOutcome::Saved {
                entities: Vec::new(),
                key_mappings: Vec::new(),
            };
            return self.apply_save_result(&bundle, nothing);
        }

        let service = self.service()?;
        let span = info_span!(
            "entitrack.save",
            service = %self.config.service_name,
            entries = bundle.len()
        );
        let outcome = service
            .save_changes(&bundle)
            .instrument(span.clone())
            .await;
        let _enter = span.enter();
        let outcome = outcome.inspect_err(|err| event!(Level::WARN, error = %err, "save failed"))?;

        let result = self.apply_save_result(&bundle, outcome);
        match &result {
            Ok(r) => event!(
                Level::DEBUG,
                saved = r.saved.len(),
                deleted = r.deleted.len(),
                "save resolved"
            ),
            Err(err) => event!(Level::WARN, error = %err, "save rejected"),
        }
        result
    }
}

/// Applies the origin's target state to an entity whose values were just merged.
fn apply_origin(entity: &mut Entity, origin: MergeOrigin<'_>) {
    let aspect = entity.entity_aspect_mut();
    aspect.take_original_values();
    match origin {
        MergeOrigin::Query => {
            aspect.set_state(EntityState::Unchanged);
            aspect.mark_saved();
        }
        MergeOrigin::Import {
            state,
            original_values,
        } => {
            let state = if state.is_detached() {
                EntityState::Unchanged
            } else {
                state
            };
            aspect.set_state(state);
            for (name, value) in original_values.iter() {
                aspect.set_original_value(name, value.clone());
            }
        }
    }
}

fn reconcile_saved(entity: &mut Entity, entry: &SaveEntry, server_values: Option<&PropertyValues>) {
    let entity_type = entity.entity_type_arc();
    let mut merged = entry.values.clone();
    if let Some(server_values) = server_values {
        for (name, value) in server_values.iter() {
            merged.insert(name, value.clone());
        }
    }

    let mut edited_in_flight = Vec::new();
    for (name, server_value) in merged.iter() {
        let Some(descriptor) = entity_type.get_property(name) else {
            continue;
        };
        let current = entity.get(name).cloned().unwrap_or(Value::Null);
        let untouched = descriptor.is_part_of_key()
            || current == *server_value
            || entry.values.get(name).is_none_or(|sent| *sent == current);
        if untouched {
            entity.assign_untracked(name, server_value.clone());
        } else {
            edited_in_flight.push((name.to_string(), server_value.clone()));
        }
    }

    let aspect = entity.entity_aspect_mut();
    let was_deleted = aspect.entity_state().is_deleted();
    aspect.take_original_values();
    for (name, value) in &edited_in_flight {
        aspect.set_original_value(name, value.clone());
    }
    aspect.mark_saved();
    let state = if was_deleted {
        EntityState::Deleted
    } else if edited_in_flight.is_empty() {
        EntityState::Unchanged
    } else {
        EntityState::Modified
    };
    aspect.set_state(state);
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("service_name", &self.config.service_name)
            .field("entities", &self.entities.len())
            .field("temp_keys", &self.temp_keys)
            .field("key_generator", &self.key_generator)
            .field("has_data_service", &self.data_service.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PropertyDescriptor;
    use std::sync::Mutex;

    fn manager() -> EntityManager {
        let mut store = MetadataStore::new();
        store
            .add_entity_type(
                EntityType::new("Order")
                    .auto_generated_key(AutoGeneratedKeyType::Identity)
                    .property(PropertyDescriptor::new("OrderID", DataType::Integer).key())
                    .property(PropertyDescriptor::new("ShipName", DataType::Text)),
            )
            .unwrap();
        EntityManager::new(store)
    }

    #[test]
    fn test_added_entities_get_distinct_temp_keys() {
        let mut em = manager();
        let a = em
            .create_entity("Order", PropertyValues::new(), EntityState::Added)
            .unwrap();
        let b = em
            .create_entity("Order", PropertyValues::new(), EntityState::Added)
            .unwrap();

        let key_a = em.entity(a).unwrap().get("OrderID").cloned().unwrap();
        let key_b = em.entity(b).unwrap().get("OrderID").cloned().unwrap();
        assert!(key_a.as_i64().unwrap() < 0);
        assert_ne!(key_a, key_b);
        assert_eq!(em.temp_keys().len(), 2);
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let mut em = manager();
        let row = PropertyValues::new().with("OrderID", 7);
        em.create_entity("Order", row.clone(), EntityState::Unchanged)
            .unwrap();
        assert!(matches!(
            em.create_entity("Order", row, EntityState::Unchanged),
            Err(TrackError::DuplicateKey(_))
        ));
        assert_eq!(em.len(), 1);
    }

    #[test]
    fn test_reject_added_entity_leaves_cache() {
        let mut em = manager();
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        em.subscribe_entity_changed(move |e| log.lock().unwrap().push(e.action));

        let id = em
            .create_entity("Order", PropertyValues::new(), EntityState::Added)
            .unwrap();
        em.reject_changes(id).unwrap();

        assert!(em.entity(id).is_none());
        assert!(em.temp_keys().is_empty());
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                EntityAction::Attach,
                EntityAction::RejectChanges,
                EntityAction::Detach
            ]
        );
    }

    #[test]
    fn test_reject_deleted_new_entity_leaves_cache() {
        let mut em = manager();
        let id = em
            .create_entity("Order", PropertyValues::new(), EntityState::Added)
            .unwrap();
        em.set_deleted(id).unwrap();

        em.reject_changes(id).unwrap();

        assert!(em.entity(id).is_none());
        assert!(em.is_empty());
        assert!(em.temp_keys().is_empty());
        assert!(em.prepare_save().is_empty());
    }

    #[test]
    fn test_reject_deleted_entity_restores_originals() {
        let mut em = manager();
        let id = em
            .create_entity(
                "Order",
                PropertyValues::new().with("OrderID", 1).with("ShipName", "Old"),
                EntityState::Unchanged,
            )
            .unwrap();
        em.entity_mut(id).unwrap().set("ShipName", "New").unwrap();
        em.set_deleted(id).unwrap();
        assert_eq!(em.entity(id).unwrap().entity_state(), EntityState::Deleted);

        em.reject_changes(id).unwrap();

        let order = em.entity(id).unwrap();
        assert_eq!(order.entity_state(), EntityState::Unchanged);
        assert_eq!(order.get("ShipName"), Some(&Value::from("Old")));
        assert!(order.entity_aspect().original_values().is_empty());
        assert!(!em.has_changes());
    }

    #[test]
    fn test_accept_added_entity_retires_temp_key() {
        let mut em = manager();
        let id = em
            .create_entity("Order", PropertyValues::new(), EntityState::Added)
            .unwrap();
        assert_eq!(em.temp_keys().len(), 1);

        em.accept_changes(id).unwrap();

        let order = em.entity(id).unwrap();
        assert_eq!(order.entity_state(), EntityState::Unchanged);
        assert!(!order.entity_aspect().is_new());
        assert!(em.temp_keys().is_empty());
    }

    #[test]
    fn test_merge_overwrites_by_default() {
        let mut em = manager();
        let id = em
            .create_entity(
                "Order",
                PropertyValues::new().with("OrderID", 1).with("ShipName", "Old"),
                EntityState::Unchanged,
            )
            .unwrap();
        em.entity_mut(id).unwrap().set("ShipName", "Local").unwrap();

        let rows = vec![
            PropertyValues::new()
                .with("OrderID", 1)
                .with("ShipName", "Server")
                .with("Unknown", 5),
        ];
        let ids = em.merge_from_query("Order", &rows).unwrap();

        assert_eq!(ids, vec![id]);
        let order = em.entity(id).unwrap();
        assert_eq!(order.get("ShipName"), Some(&Value::from("Server")));
        assert_eq!(order.entity_state(), EntityState::Unchanged);
        assert!(order.entity_aspect().original_values().is_empty());
    }

    #[test]
    fn test_prepare_save_discards_new_deleted_entities() {
        let mut em = manager();
        let id = em
            .create_entity("Order", PropertyValues::new(), EntityState::Added)
            .unwrap();
        em.set_deleted(id).unwrap();

        let bundle = em.prepare_save();
        assert!(bundle.entries.is_empty());
        assert_eq!(bundle.discarded, vec![id]);
    }
}
