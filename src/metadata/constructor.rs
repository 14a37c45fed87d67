//! Per-type construction hooks.
//!
//! An [`EntityConstructor`] is an explicit list of field assignments that
//! runs before any property wiring. Registering one declares every
//! value-assigned field that is not already mapped as an unmapped
//! property of the type. Method fields stay plain callable extensions.

use std::fmt;
use std::sync::Arc;

use crate::core::Value;
use crate::entity::Entity;

/// Callable member attached to an entity by a constructor or initializer.
pub type EntityMethod = Arc<dyn Fn(&Entity) -> Value + Send + Sync>;

/// Runs after properties are wired, before the entity can be attached.
pub type EntityInitializer = Arc<dyn Fn(&mut Entity) + Send + Sync>;

/// Wraps a closure as an [`EntityInitializer`].
pub fn initializer(f: impl Fn(&mut Entity) + Send + Sync + 'static) -> EntityInitializer {
    Arc::new(f)
}

type ConstructHook = Arc<dyn Fn(&mut FieldAssignments) + Send + Sync>;

#[derive(Clone)]
pub enum FieldInit {
    Value(Value),
    Method(EntityMethod),
}

impl fmt::Debug for FieldInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Method(_) => f.write_str("Method(..)"),
        }
    }
}

/// Ordered field assignments produced by running a constructor.
#[derive(Debug, Clone, Default)]
pub struct FieldAssignments {
    fields: Vec<(String, FieldInit)>,
}

impl FieldAssignments {
    pub fn field(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.assign(name.into(), FieldInit::Value(value.into()));
        self
    }

    pub fn method(
        &mut self,
        name: impl Into<String>,
        method: impl Fn(&Entity) -> Value + Send + Sync + 'static,
    ) -> &mut Self {
        self.assign(name.into(), FieldInit::Method(Arc::new(method)));
        self
    }

    fn assign(&mut self, name: String, init: FieldInit) {
        // later assignment to the same field wins, keeping its first position
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = init,
            None => self.fields.push((name, init)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldInit> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, init)| init)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldInit)> {
        self.fields.iter().map(|(n, init)| (n.as_str(), init))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct EntityConstructor {
    declared: FieldAssignments,
    hook: Option<ConstructHook>,
}

impl EntityConstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.declared.field(name, value);
        self
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        method: impl Fn(&Entity) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.declared.method(name, method);
        self
    }

    /// Code run on every construction after the declared assignments.
    ///
    /// Fields it assigns that are not declared properties of the type end
    /// up as ad hoc extensions; they are not inferred at registration.
    pub fn on_construct(
        mut self,
        hook: impl Fn(&mut FieldAssignments) + Send + Sync + 'static,
    ) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Value-assigned fields visible at registration time.
    pub fn declared_values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.declared.iter().filter_map(|(name, init)| match init {
            FieldInit::Value(v) => Some((name, v)),
            FieldInit::Method(_) => None,
        })
    }

    pub(crate) fn construct(&self) -> FieldAssignments {
        let mut assignments = self.declared.clone();
        if let Some(hook) = &self.hook {
            hook(&mut assignments);
        }
        assignments
    }
}

impl fmt::Debug for EntityConstructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityConstructor")
            .field("declared", &self.declared)
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}
