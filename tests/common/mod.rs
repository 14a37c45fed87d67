#![allow(dead_code)]

use entitrack::{
    AutoGeneratedKeyType, DataType, EntityType, InMemoryDataService, MetadataStore,
    PropertyDescriptor, PropertyValues, Value,
};
use uuid::Uuid;

/// Customer, Order, Employee and OrderDetail, shaped like the Northwind sample.
pub fn northwind_metadata() -> MetadataStore {
    let mut store = MetadataStore::new();
    store
        .add_entity_type(
            EntityType::new("Customer")
                .property(PropertyDescriptor::new("CustomerID", DataType::Guid).key())
                .property(
                    PropertyDescriptor::new("CompanyName", DataType::Text)
                        .nullable(false)
                        .max_length(40),
                )
                .property(PropertyDescriptor::new("ContactName", DataType::Text).max_length(30))
                .property(PropertyDescriptor::new("City", DataType::Text)),
        )
        .unwrap();
    store
        .add_entity_type(
            EntityType::new("Order")
                .auto_generated_key(AutoGeneratedKeyType::Identity)
                .property(PropertyDescriptor::new("OrderID", DataType::Integer).key())
                .property(PropertyDescriptor::new("CustomerID", DataType::Guid))
                .property(PropertyDescriptor::new("ShipName", DataType::Text).max_length(40))
                .property(PropertyDescriptor::new("Freight", DataType::Float)),
        )
        .unwrap();
    store
        .add_entity_type(
            EntityType::new("Employee")
                .auto_generated_key(AutoGeneratedKeyType::Identity)
                .property(PropertyDescriptor::new("EmployeeID", DataType::Integer).key())
                .property(
                    PropertyDescriptor::new("FirstName", DataType::Text)
                        .nullable(false)
                        .max_length(10),
                )
                .property(
                    PropertyDescriptor::new("LastName", DataType::Text)
                        .nullable(false)
                        .max_length(20),
                ),
        )
        .unwrap();
    store
        .add_entity_type(
            EntityType::new("OrderDetail")
                .auto_generated_key(AutoGeneratedKeyType::KeyGenerator)
                .property(PropertyDescriptor::new("OrderID", DataType::Integer).key())
                .property(PropertyDescriptor::new("ProductID", DataType::Integer).key())
                .property(PropertyDescriptor::new("Quantity", DataType::Integer)),
        )
        .unwrap();
    store
}

pub fn todo_metadata() -> MetadataStore {
    let mut store = MetadataStore::new();
    store
        .add_entity_type(
            EntityType::new("TodoItem")
                .resource_name("Todos")
                .auto_generated_key(AutoGeneratedKeyType::Identity)
                .property(PropertyDescriptor::new("Id", DataType::Integer).key())
                .property(
                    PropertyDescriptor::new("Description", DataType::Text)
                        .nullable(false)
                        .max_length(30),
                )
                .property(
                    PropertyDescriptor::new("IsDone", DataType::Boolean)
                        .nullable(false)
                        .default_value(false),
                )
                .property(PropertyDescriptor::new("IsArchived", DataType::Boolean).nullable(false)),
        )
        .unwrap();
    store
}

pub fn customer_row(company_name: &str) -> PropertyValues {
    PropertyValues::new()
        .with("CustomerID", Uuid::new_v4())
        .with("CompanyName", company_name)
}

pub fn employee_row(id: i64, first: &str, last: &str) -> PropertyValues {
    PropertyValues::new()
        .with("EmployeeID", id)
        .with("FirstName", first)
        .with("LastName", last)
}

/// Remote store seeded with two employees; rows carry a computed `FullName`.
pub async fn employee_service(store: &MetadataStore) -> InMemoryDataService {
    let service = InMemoryDataService::new().with_calculated_column(
        "Employee",
        "FullName",
        |row| {
            let first = row.get("FirstName").and_then(Value::as_str).unwrap_or("");
            let last = row.get("LastName").and_then(Value::as_str).unwrap_or("");
            Value::from(format!("{} {}", last, first))
        },
    );
    let employee = store.entity_type("Employee").unwrap();
    service
        .seed(
            &employee,
            vec![
                employee_row(1, "Nancy", "Davolio"),
                employee_row(2, "Andrew", "Fuller"),
            ],
        )
        .await;
    service
}
