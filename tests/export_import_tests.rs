mod common;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use common::{customer_row, northwind_metadata};
use entitrack::{
    EntityConstructor, EntityManager, EntitySnapshot, EntityState, ImportOptions, MetadataStore,
    PropertyValues, Value, initializer,
};
use tempfile::TempDir;

fn store_with_extras() -> MetadataStore {
    let mut store = northwind_metadata();
    store.register_constructor(
        "Customer",
        Some(EntityConstructor::new().field("foo", 42)),
        Some(initializer(|c| {
            c.set_extension("isPartial", true).unwrap();
        })),
    );
    store
}

#[test]
fn test_export_and_import_round_trip() -> Result<()> {
    let store = northwind_metadata();
    let mut source = EntityManager::new(store.derive());
    source.create_entity("Customer", customer_row("Acme"), EntityState::Unchanged)?;
    source.create_entity("Customer", customer_row("Beta"), EntityState::Unchanged)?;

    let json = source.export_entities_to_string(None)?;
    let mut target = EntityManager::new(store);
    let ids = target.import_from_str(&json, ImportOptions::default())?;

    assert_eq!(ids.len(), 2);
    for (id, entity) in source.entities() {
        let key = entity.key();
        let copy = target.entity(target.find_entity_by_key(&key).unwrap()).unwrap();
        assert_eq!(copy.tracked_values(), entity.tracked_values(), "{id}");
        assert_eq!(copy.entity_state(), EntityState::Unchanged);
    }
    Ok(())
}

#[test]
fn test_ad_hoc_fields_are_recomputed_not_restored() -> Result<()> {
    let store = store_with_extras();
    let mut source = EntityManager::new(store.derive());
    let id = source.create_entity("Customer", customer_row("Acme"), EntityState::Unchanged)?;
    {
        let cust = source.entity_mut(id).unwrap();
        cust.set("foo", 60)?;
        cust.set_extension("note", "local only")?;
        cust.set_extension("isPartial", false)?;
    }

    let snapshot = source.export_entities(Some(&[id]))?;
    let record = &snapshot.entities[0];
    assert_eq!(record.values.get("foo"), Some(&Value::Integer(60)));
    assert!(!record.values.contains("note"));
    assert!(!record.values.contains("isPartial"));

    let mut target = EntityManager::new(store);
    let ids = target.import_entities(&snapshot, ImportOptions::default())?;
    let copy = target.entity(ids[0]).unwrap();
    assert_eq!(copy.get("foo"), Some(&Value::Integer(60)));
    assert_eq!(copy.extension_value("isPartial"), Some(&Value::Boolean(true)));
    assert_eq!(copy.extension_value("note"), None);
    Ok(())
}

#[test]
fn test_import_into_empty_store_loads_types() -> Result<()> {
    let mut source = EntityManager::new(store_with_extras());
    source.create_entity(
        "Customer",
        customer_row("Acme").with("foo", 7),
        EntityState::Unchanged,
    )?;
    let snapshot = source.export_entities(None)?;
    assert_eq!(snapshot.metadata.entity_types.len(), 1);

    let mut target = EntityManager::new(MetadataStore::new());
    let ids = target.import_entities(&snapshot, ImportOptions::default())?;

    assert!(target.metadata().has_entity_type("Customer"));
    assert!(!target.metadata().has_entity_type("Order"));
    let foo = target.metadata().get_property("Customer", "foo")?.unwrap();
    assert!(foo.is_unmapped());
    assert_eq!(target.entity(ids[0]).unwrap().get("foo"), Some(&Value::Integer(7)));
    Ok(())
}

#[test]
fn test_undeclared_values_are_dropped_on_import() -> Result<()> {
    let mut source = EntityManager::new(store_with_extras());
    source.create_entity(
        "Customer",
        customer_row("Acme").with("foo", 7),
        EntityState::Unchanged,
    )?;
    let json = source.export_entities_to_string(None)?;

    let mut target = EntityManager::new(northwind_metadata());
    let ids = target.import_from_str(&json, ImportOptions::default())?;

    let copy = target.entity(ids[0]).unwrap();
    assert_eq!(copy.get("CompanyName"), Some(&Value::from("Acme")));
    assert_eq!(copy.get("foo"), None);
    assert_eq!(copy.extension_value("foo"), None);
    Ok(())
}

#[test]
fn test_restore_state_keeps_pending_changes() -> Result<()> {
    let store = northwind_metadata();
    let mut source = EntityManager::new(store.derive());
    let customer = source.create_entity("Customer", customer_row("Acme"), EntityState::Unchanged)?;
    source.entity_mut(customer).unwrap().set("CompanyName", "Beta")?;
    let order = source.create_entity("Order", PropertyValues::new(), EntityState::Added)?;
    let temp_key = source.entity(order).unwrap().key();
    let bytes = source.export_entities_to_bytes(None)?;

    let mut plain = EntityManager::new(store.derive());
    plain.import_from_bytes(&bytes, ImportOptions::default())?;
    assert!(!plain.has_changes());
    assert!(plain.temp_keys().is_empty());

    let mut target = EntityManager::new(store);
    target.import_from_bytes(&bytes, ImportOptions::restore_state())?;

    let key = source.entity(customer).unwrap().key();
    let copy = target.entity(target.find_entity_by_key(&key).unwrap()).unwrap();
    assert_eq!(copy.entity_state(), EntityState::Modified);
    assert_eq!(
        copy.entity_aspect().original_values().get("CompanyName"),
        Some(&Value::from("Acme"))
    );

    let copy = target.entity(target.find_entity_by_key(&temp_key).unwrap()).unwrap();
    assert_eq!(copy.entity_state(), EntityState::Added);
    assert_eq!(target.temp_keys(), [temp_key]);
    Ok(())
}

#[test]
fn test_snapshot_files_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let mut source = EntityManager::new(northwind_metadata());
    source.create_entity("Customer", customer_row("Acme"), EntityState::Unchanged)?;
    source.create_entity("Customer", customer_row("Beta"), EntityState::Unchanged)?;

    for name in ["cache.json", "cache.msgpack"] {
        let path = dir.path().join(name);
        source.export_to_file(&path)?;
        assert_eq!(EntitySnapshot::read_from_file(&path)?.len(), 2);

        let mut target = EntityManager::new(northwind_metadata());
        let ids = target.import_from_file(&path, ImportOptions::default())?;
        assert_eq!(ids.len(), 2, "{name}");
    }
    Ok(())
}

#[test]
fn test_reimport_merges_into_cached_entities() -> Result<()> {
    let mut em = EntityManager::new(northwind_metadata());
    let id = em.create_entity("Customer", customer_row("Acme"), EntityState::Unchanged)?;
    let json = em.export_entities_to_string(None)?;
    em.entity_mut(id).unwrap().set("CompanyName", "Beta")?;

    let actions = Arc::new(Mutex::new(Vec::new()));
    let log = actions.clone();
    em.subscribe_entity_changed(move |e| log.lock().unwrap().push(e.action));

    let ids = em.import_from_str(&json, ImportOptions::default())?;

    assert_eq!(ids, vec![id]);
    assert_eq!(em.len(), 1);
    let cust = em.entity(id).unwrap();
    assert_eq!(cust.get("CompanyName"), Some(&Value::from("Acme")));
    assert_eq!(cust.entity_state(), EntityState::Unchanged);
    assert_eq!(
        *actions.lock().unwrap(),
        [entitrack::EntityAction::MergeOnImport]
    );
    Ok(())
}

#[test]
fn test_corrupt_snapshots_are_rejected() {
    let mut em = EntityManager::new(northwind_metadata());
    assert!(em.import_from_str("{not json", ImportOptions::default()).is_err());
    assert!(em.import_from_bytes(&[0xc1, 0x00], ImportOptions::default()).is_err());
    assert!(em.is_empty());
}
