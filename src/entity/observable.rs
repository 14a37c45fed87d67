use super::events::{SubscriptionId, Subscribers};
use crate::core::Value;

/// Reactive holder backing every tracked property.
#[derive(Debug)]
pub struct Observable {
    value: Value,
    subscribers: Subscribers<Value>,
}

impl Observable {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            subscribers: Subscribers::new(),
        }
    }

    pub fn get(&self) -> &Value {
        &self.value
    }

    /// Swaps the stored value without notifying; returns the previous one.
    pub fn replace(&mut self, value: Value) -> Value {
        std::mem::replace(&mut self.value, value)
    }

    /// Stores `value` and notifies when it differs from the current one.
    /// Returns the previous value when a change happened.
    pub fn set(&mut self, value: Value) -> Option<Value> {
        if self.value == value {
            return None;
        }
        let old = self.replace(value);
        self.notify();
        Some(old)
    }

    /// Forces a notification carrying the current value.
    pub fn notify(&mut self) {
        self.subscribers.publish(&self.value);
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&Value) + Send + 'static) -> SubscriptionId {
        self.subscribers.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_set_notifies_only_on_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut holder = Observable::new(Value::Integer(1));
        let log = seen.clone();
        holder.subscribe(move |v| log.lock().unwrap().push(v.clone()));

        assert_eq!(holder.set(Value::Integer(1)), None);
        assert_eq!(holder.set(Value::Integer(2)), Some(Value::Integer(1)));
        holder.notify();

        assert_eq!(*seen.lock().unwrap(), vec![Value::Integer(2), Value::Integer(2)]);
    }

    #[test]
    fn test_replace_is_silent() {
        let mut holder = Observable::new(Value::Null);
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        holder.subscribe(move |_| *h.lock().unwrap() += 1);
        holder.replace(Value::from("x"));
        assert_eq!(holder.get(), &Value::from("x"));
        assert_eq!(*hits.lock().unwrap(), 0);
    }
}
