use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::RwLock;

use super::actor::{Actor, ActorRef};
use crate::error::{Error, Result};

/// Typed lookup handle: binds a service name to the actor type whose
/// message/response pair callers expect.
pub struct ServiceKey<A: Actor> {
    name: &'static str,
    _actor: PhantomData<fn() -> A>,
}

impl<A: Actor> ServiceKey<A> {
    pub const fn new(name: &'static str) -> Self {
        ServiceKey {
            name,
            _actor: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<A: Actor> Clone for ServiceKey<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: Actor> Copy for ServiceKey<A> {}

/// Process-wide service table. The composition root populates it in
/// dependency order at startup and tears it down in reverse; there is no
/// lazy registration.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: RwLock<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
    order: RwLock<Vec<&'static str>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: a second registration under the same key is ignored.
    pub fn register<A: Actor>(&self, key: ServiceKey<A>, actor_ref: ActorRef<A>) {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(key.name) {
            return;
        }
        entries.insert(key.name, Box::new(actor_ref));
        self.order.write().unwrap().push(key.name);
    }

    pub fn lookup<A: Actor>(&self, key: ServiceKey<A>) -> Result<ActorRef<A>> {
        let entries = self.entries.read().unwrap();
        let entry = entries
            .get(key.name)
            .ok_or_else(|| Error::NotFound(format!("service {}", key.name)))?;
        entry
            .downcast_ref::<ActorRef<A>>()
            .cloned()
            .ok_or_else(|| Error::Internal(format!("service {} type mismatch", key.name)))
    }

    /// Drop every registered ref, newest registration first.
    pub fn teardown(&self) {
        let mut order = self.order.write().unwrap();
        let mut entries = self.entries.write().unwrap();
        for name in order.drain(..).rev() {
            entries.remove(name);
        }
    }
}
