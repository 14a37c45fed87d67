use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    DataService, EntityRow, KeyMapping, SaveBundle, SaveEntry, SaveOperation, SaveOutcome,
    SavedEntity,
};
use crate::core::{EntityFailure, PropertyValues, Result, Value};
use crate::manager::EntityQuery;
use crate::metadata::EntityType;

/// Server-side computed column, evaluated against the stored row.
pub type CalculatedColumn = Arc<dyn Fn(&PropertyValues) -> Value + Send + Sync>;

#[derive(Debug)]
struct Table {
    rows: Vec<PropertyValues>,
    next_identity: i64,
}

impl Table {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            next_identity: 1,
        }
    }

    fn position(&self, key: &PropertyValues) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| !key.is_empty() && key.iter().all(|(name, v)| row.get(name) == Some(v)))
    }

    fn note_key(&mut self, value: Option<&Value>) {
        if let Some(n) = value.and_then(Value::as_i64) {
            self.next_identity = self.next_identity.max(n + 1);
        }
    }
}

/// A fake remote store keeping rows per entity type in memory.
///
/// Identity keys are allocated from 1 upwards per type. Saves are all or
/// nothing.
pub struct InMemoryDataService {
    /// One lock per table
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
    calculated: HashMap<String, Vec<(String, CalculatedColumn)>>,
    fail_next_save: AtomicBool,
}

impl InMemoryDataService {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            calculated: HashMap::new(),
            fail_next_save: AtomicBool::new(false),
        }
    }

    /// Adds a column computed by the store and returned with every row of `type_name`.
    pub fn with_calculated_column(
        mut self,
        type_name: &str,
        column: &str,
        compute: impl Fn(&PropertyValues) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.calculated
            .entry(type_name.to_string())
            .or_default()
            .push((column.to_string(), Arc::new(compute)));
        self
    }

    /// Makes the next `save_changes` call fail for every entry.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    async fn table(&self, type_name: &str) -> Arc<RwLock<Table>> {
        if let Some(table) = self.tables.read().await.get(type_name) {
            return table.clone();
        }
        self.tables
            .write()
            .await
            .entry(type_name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Table::new())))
            .clone()
    }

    /// Stores rows as if they already existed on the server.
    pub async fn seed(&self, entity_type: &EntityType, rows: Vec<PropertyValues>) {
        let key_names: Vec<String> = entity_type
            .key_properties()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        let handle = self.table(entity_type.name()).await;
        let mut table = handle.write().await;
        for row in rows {
            if let [key] = key_names.as_slice() {
                table.note_key(row.get(key));
            }
            table.rows.push(row);
        }
    }

    /// Stored rows of a type, without calculated columns.
    pub async fn rows(&self, type_name: &str) -> Vec<PropertyValues> {
        let handle = self.table(type_name).await;
        let table = handle.read().await;
        table.rows.clone()
    }

    fn with_calculated(&self, type_name: &str, mut row: PropertyValues) -> PropertyValues {
        if let Some(columns) = self.calculated.get(type_name) {
            for (name, compute) in columns {
                let value = compute(&row);
                row.insert(name.as_str(), value);
            }
        }
        row
    }

    fn failure(entry: &SaveEntry, message: impl Into<String>) -> EntityFailure {
        EntityFailure {
            type_name: entry.type_name.clone(),
            key: entry.key.values_display(),
            message: message.into(),
        }
    }

    /// Entries the store would reject, checked before anything is written.
    async fn check(&self, bundle: &SaveBundle) -> Vec<EntityFailure> {
        let mut failures = Vec::new();
        for entry in &bundle.entries {
            let handle = self.table(&entry.type_name).await;
            let table = handle.read().await;
            let exists = table.position(&entry.key_values()).is_some();
            match entry.operation {
                SaveOperation::Insert if entry.auto_generated_key.is_none() && exists => {
                    failures.push(Self::failure(entry, "duplicate key"));
                }
                SaveOperation::Update | SaveOperation::Delete if !exists => {
                    failures.push(Self::failure(entry, "entity does not exist"));
                }
                _ => {}
            }
        }
        failures
    }
}

impl Default for InMemoryDataService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataService for InMemoryDataService {
    async fn execute_query(
        &self,
        entity_type: &EntityType,
        query: &EntityQuery,
    ) -> Result<Vec<EntityRow>> {
        let handle = self.table(entity_type.name()).await;
        let rows: Vec<PropertyValues> = {
            let table = handle.read().await;
            table
                .rows
                .iter()
                .map(|row| self.with_calculated(entity_type.name(), row.clone()))
                .collect()
        };
        let result = query.apply(rows)?;
        debug!(
            "Query on '{}' returned {} rows",
            query.resource_name(),
            result.len()
        );
        Ok(result)
    }

    async fn save_changes(&self, bundle: &SaveBundle) -> Result<SaveOutcome> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            let reasons = bundle
                .entries
                .iter()
                .map(|entry| Self::failure(entry, "save rejected by server"))
                .collect();
            return Ok(SaveOutcome::Failed { reasons });
        }

        let failures = self.check(bundle).await;
        if !failures.is_empty() {
            return Ok(SaveOutcome::Failed { reasons: failures });
        }

        let mut entities = Vec::new();
        let mut key_mappings = Vec::new();
        for entry in &bundle.entries {
            let handle = self.table(&entry.type_name).await;
            let mut table = handle.write().await;
            match entry.operation {
                SaveOperation::Insert => {
                    let mut row = entry.values.clone();
                    if let Some(auto) = &entry.auto_generated_key {
                        let temp_value = row.get(&auto.property_name).cloned().unwrap_or(Value::Null);
                        let real_value = match temp_value {
                            Value::Guid(_) => Value::Guid(Uuid::new_v4()),
                            _ => {
                                let id = table.next_identity;
                                table.next_identity += 1;
                                Value::Integer(id)
                            }
                        };
                        row.insert(auto.property_name.as_str(), real_value.clone());
                        key_mappings.push(KeyMapping {
                            type_name: entry.type_name.clone(),
                            temp_value,
                            real_value,
                        });
                    } else if let [key] = entry.key_properties.as_slice() {
                        let value = row.get(key).cloned();
                        table.note_key(value.as_ref());
                    }
                    table.rows.push(row.clone());
                    entities.push(SavedEntity {
                        entity_id: entry.entity_id,
                        values: self.with_calculated(&entry.type_name, row),
                    });
                }
                SaveOperation::Update => {
                    if let Some(pos) = table.position(&entry.key_values()) {
                        let row = &mut table.rows[pos];
                        for (name, value) in entry.values.iter() {
                            row.insert(name, value.clone());
                        }
                        let row = row.clone();
                        entities.push(SavedEntity {
                            entity_id: entry.entity_id,
                            values: self.with_calculated(&entry.type_name, row),
                        });
                    }
                }
                SaveOperation::Delete => {
                    if let Some(pos) = table.position(&entry.key_values()) {
                        table.rows.remove(pos);
                    }
                }
            }
        }

        debug!(
            "Saved {} entities ({} new keys)",
            bundle.entries.len(),
            key_mappings.len()
        );
        Ok(SaveOutcome::Saved {
            entities,
            key_mappings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, EntityKey};
    use crate::manager::{EntityId, Predicate};
    use crate::metadata::{AutoGeneratedKeyType, PropertyDescriptor};
    use crate::service::AutoGeneratedKey;

    fn employee() -> EntityType {
        EntityType::new("Employee")
            .auto_generated_key(AutoGeneratedKeyType::Identity)
            .property(PropertyDescriptor::new("EmployeeID", DataType::Integer).key())
            .property(PropertyDescriptor::new("FirstName", DataType::Text))
            .property(PropertyDescriptor::new("LastName", DataType::Text))
    }

    fn insert(entity_id: u64, temp: i64, first: &str) -> SaveEntry {
        SaveEntry {
            entity_id: EntityId::from_raw(entity_id),
            type_name: "Employee".to_string(),
            operation: SaveOperation::Insert,
            key: EntityKey::single("Employee", temp),
            key_properties: vec!["EmployeeID".to_string()],
            auto_generated_key: Some(AutoGeneratedKey {
                property_name: "EmployeeID".to_string(),
                key_type: AutoGeneratedKeyType::Identity,
            }),
            values: PropertyValues::new()
                .with("EmployeeID", temp)
                .with("FirstName", first)
                .with("LastName", "Smith"),
            original_values: PropertyValues::new(),
        }
    }

    #[tokio::test]
    async fn test_identity_keys_follow_seeded_rows() {
        let service = InMemoryDataService::new();
        service
            .seed(
                &employee(),
                vec![PropertyValues::new().with("EmployeeID", 7).with("FirstName", "Nancy")],
            )
            .await;

        let bundle = SaveBundle {
            entries: vec![insert(1, -1, "Andrew")],
            discarded: Vec::new(),
        };
        let SaveOutcome::Saved { key_mappings, .. } = service.save_changes(&bundle).await.unwrap()
        else {
            panic!("save failed");
        };
        assert_eq!(key_mappings[0].temp_value, Value::Integer(-1));
        assert_eq!(key_mappings[0].real_value, Value::Integer(8));
        assert_eq!(service.rows("Employee").await.len(), 2);
    }

    #[tokio::test]
    async fn test_calculated_columns_and_filtering() {
        let service = InMemoryDataService::new().with_calculated_column(
            "Employee",
            "FullName",
            |row| {
                let first = row.get("FirstName").and_then(Value::as_str).unwrap_or("");
                let last = row.get("LastName").and_then(Value::as_str).unwrap_or("");
                Value::from(format!("{} {}", first, last))
            },
        );
        service
            .seed(
                &employee(),
                vec![
                    PropertyValues::new()
                        .with("EmployeeID", 1)
                        .with("FirstName", "Nancy")
                        .with("LastName", "Davolio"),
                    PropertyValues::new()
                        .with("EmployeeID", 2)
                        .with("FirstName", "Andrew")
                        .with("LastName", "Fuller"),
                ],
            )
            .await;

        let query = EntityQuery::from("Employees").where_(Predicate::eq("FirstName", "Nancy"));
        let rows = service.execute_query(&employee(), &query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("FullName"), Some(&Value::from("Nancy Davolio")));
        assert!(service.rows("Employee").await[0].get("FullName").is_none());
    }

    #[tokio::test]
    async fn test_failed_save_writes_nothing() {
        let service = InMemoryDataService::new();
        service.fail_next_save();
        let bundle = SaveBundle {
            entries: vec![insert(1, -1, "Andrew")],
            discarded: Vec::new(),
        };
        let outcome = service.save_changes(&bundle).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Failed { ref reasons } if reasons.len() == 1));
        assert!(service.rows("Employee").await.is_empty());

        // the switch resets after one use
        let outcome = service.save_changes(&bundle).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Saved { .. }));
    }

    #[tokio::test]
    async fn test_update_of_missing_row_fails() {
        let service = InMemoryDataService::new();
        let mut entry = insert(1, 5, "Andrew");
        entry.operation = SaveOperation::Update;
        entry.auto_generated_key = None;
        let bundle = SaveBundle {
            entries: vec![entry],
            discarded: Vec::new(),
        };
        let outcome = service.save_changes(&bundle).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Failed { .. }));
    }
}
