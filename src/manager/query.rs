//! Query descriptions evaluated against cached entities or raw rows.
//!
//! The same [`EntityQuery`] runs locally over the cache and is handed to a
//! [`DataService`](crate::service::DataService) for remote execution.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::core::{PropertyValues, Result, TrackError, Value};
use crate::entity::Entity;
use crate::metadata::EntityType;

/// Anything a predicate can read property values from.
pub trait PropertySource {
    fn property(&self, name: &str) -> Option<&Value>;
}

impl PropertySource for Entity {
    fn property(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl PropertySource for PropertyValues {
    fn property(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl<T: PropertySource + ?Sized> PropertySource for &T {
    fn property(&self, name: &str) -> Option<&Value> {
        (**self).property(name)
    }
}

/// Handle-tagged items, e.g. `(EntityId, &Entity)`.
impl<K, T: PropertySource> PropertySource for (K, T) {
    fn property(&self, name: &str) -> Option<&Value> {
        self.1.property(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StartsWith,
    EndsWith,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        property: String,
        op: FilterOp,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(property: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            property: property.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Eq, value)
    }

    pub fn ne(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Ne, value)
    }

    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Lt, value)
    }

    pub fn le(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Le, value)
    }

    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Gt, value)
    }

    pub fn ge(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Ge, value)
    }

    pub fn starts_with(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(property, FilterOp::StartsWith, value.into())
    }

    pub fn ends_with(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(property, FilterOp::EndsWith, value.into())
    }

    pub fn contains(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(property, FilterOp::Contains, value.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Every property name referenced anywhere in the predicate.
    pub fn property_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Compare { property, .. } => names.push(property),
            Self::And(parts) | Self::Or(parts) => {
                for part in parts {
                    part.collect_names(names);
                }
            }
            Self::Not(inner) => inner.collect_names(names),
        }
    }

    /// Evaluates against one item. A missing property reads as `Null`.
    pub fn evaluate(&self, source: &impl PropertySource) -> Result<bool> {
        match self {
            Self::Compare {
                property,
                op,
                value,
            } => {
                let actual = source.property(property).unwrap_or(&Value::Null);
                compare(actual, *op, value)
            }
            Self::And(parts) => {
                for part in parts {
                    if !part.evaluate(source)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(parts) => {
                for part in parts {
                    if part.evaluate(source)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(inner) => Ok(!inner.evaluate(source)?),
        }
    }
}

fn compare(actual: &Value, op: FilterOp, expected: &Value) -> Result<bool> {
    match op {
        FilterOp::Eq => Ok(actual == expected),
        FilterOp::Ne => Ok(actual != expected),
        FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
            // Null never satisfies an ordering comparison.
            if actual.is_null() || expected.is_null() {
                return Ok(false);
            }
            let ordering = actual.compare(expected)?;
            Ok(match op {
                FilterOp::Lt => ordering == Ordering::Less,
                FilterOp::Le => ordering != Ordering::Greater,
                FilterOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        FilterOp::StartsWith | FilterOp::EndsWith | FilterOp::Contains => {
            let Some(needle) = expected.as_str() else {
                return Err(TrackError::TypeMismatch(format!(
                    "{:?} needs a text operand, got {}",
                    op,
                    expected.type_name()
                )));
            };
            let haystack = match actual {
                Value::Null => return Ok(false),
                Value::Text(s) => s,
                other => {
                    return Err(TrackError::TypeMismatch(format!(
                        "{:?} applies to text properties, got {}",
                        op,
                        other.type_name()
                    )));
                }
            };
            Ok(match op {
                FilterOp::StartsWith => haystack.starts_with(needle),
                FilterOp::EndsWith => haystack.ends_with(needle),
                _ => haystack.contains(needle),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub property: String,
    pub descending: bool,
}

/// A query against one resource (e.g. "Customers") or entity type name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityQuery {
    resource_name: String,
    predicate: Option<Predicate>,
    order_by: Vec<OrderBy>,
    skip: Option<usize>,
    take: Option<usize>,
    include_deleted: bool,
}

impl EntityQuery {
    pub fn from(resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            predicate: None,
            order_by: Vec::new(),
            skip: None,
            take: None,
            include_deleted: false,
        }
    }

    /// Adds a filter; repeated calls are combined with AND.
    pub fn where_(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn order_by(mut self, property: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            property: property.into(),
            descending,
        });
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.skip = Some(count);
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    /// Fails with `UndeclaredProperty` for any name the type does not track.
    pub fn check_properties(&self, entity_type: &EntityType) -> Result<()> {
        let filter_names = self
            .predicate
            .iter()
            .flat_map(|p| p.property_names());
        let order_names = self.order_by.iter().map(|o| o.property.as_str());
        for name in filter_names.chain(order_names) {
            if entity_type.get_property(name).is_none() {
                return Err(TrackError::UndeclaredProperty(
                    name.to_string(),
                    entity_type.name().to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Filters, sorts and pages `items`.
    pub fn apply<T: PropertySource>(&self, items: Vec<T>) -> Result<Vec<T>> {
        let mut selected = Vec::with_capacity(items.len());
        for item in items {
            let keep = match &self.predicate {
                Some(predicate) => predicate.evaluate(&item)?,
                None => true,
            };
            if keep {
                selected.push(item);
            }
        }

        if !self.order_by.is_empty() {
            selected.sort_by(|a, b| self.compare_items(a, b));
        }

        Ok(selected
            .into_iter()
            .skip(self.skip.unwrap_or(0))
            .take(self.take.unwrap_or(usize::MAX))
            .collect())
    }

    fn compare_items<T: PropertySource>(&self, a: &T, b: &T) -> Ordering {
        for key in &self.order_by {
            let left = a.property(&key.property).unwrap_or(&Value::Null);
            let right = b.property(&key.property).unwrap_or(&Value::Null);
            let ordering = left.compare(right).unwrap_or(Ordering::Equal);
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::metadata::PropertyDescriptor;

    fn rows() -> Vec<PropertyValues> {
        vec![
            PropertyValues::new().with("Id", 1).with("Name", "Alfreds").with("foo", 60),
            PropertyValues::new().with("Id", 2).with("Name", "Ana").with("foo", 61),
            PropertyValues::new().with("Id", 3).with("Name", "Berglunds").with("foo", 60),
        ]
    }

    #[test]
    fn test_filter_sort_page() {
        let query = EntityQuery::from("Customers")
            .where_(Predicate::eq("foo", 60))
            .order_by("Id", true)
            .take(1);
        let result = query.apply(rows()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get("Id"), Some(&Value::Integer(3)));
    }

    #[test]
    fn test_text_operators_and_combinators() {
        let query = EntityQuery::from("Customers").where_(
            Predicate::starts_with("Name", "A")
                .and(Predicate::contains("Name", "lf").negate()),
        );
        let result = query.apply(rows()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get("Name"), Some(&Value::from("Ana")));

        let either = Predicate::eq("Id", 1).or(Predicate::gt("foo", 60));
        assert_eq!(EntityQuery::from("x").where_(either).apply(rows()).unwrap().len(), 2);
    }

    #[test]
    fn test_mismatched_operands_error() {
        let query = EntityQuery::from("Customers").where_(Predicate::lt("Name", 5));
        assert!(matches!(query.apply(rows()), Err(TrackError::TypeMismatch(_))));
    }

    #[test]
    fn test_check_properties_rejects_unknown_names() {
        let ty = EntityType::new("Customer")
            .property(PropertyDescriptor::new("Id", DataType::Integer).key())
            .property(PropertyDescriptor::new("foo", DataType::Integer).unmapped());

        let ok = EntityQuery::from("Customers").where_(Predicate::eq("foo", 60));
        assert!(ok.check_properties(&ty).is_ok());

        let bad = EntityQuery::from("Customers")
            .where_(Predicate::eq("foo", 60))
            .order_by("bar", false);
        assert!(matches!(
            bad.check_properties(&ty),
            Err(TrackError::UndeclaredProperty(name, _)) if name == "bar"
        ));
    }
}
