//! # Commands — Deferred Structural Mutation
//!
//! Systems iterating a query cannot spawn, despawn, or add/remove components
//! on the world they are iterating: those operations move rows between
//! archetypes. Instead they record [`Commands`], which the app applies at the
//! synchronization point after each frame phase.
//!
//! Commands run in the order they were recorded. A command whose target
//! entity died in the meantime is skipped with a debug log rather than
//! treated as an error: the ordering between systems decides which one wins.

use super::component::Component;
use super::entity::Entity;
use super::world::{Bundle, World};

type CommandFn = Box<dyn FnOnce(&mut World) + Send>;

/// An ordered queue of deferred world mutations.
#[derive(Default)]
pub struct Commands {
    queue: Vec<CommandFn>,
}

impl Commands {
    pub fn new() -> Self {
        Self { queue: Vec::new() }
    }

    /// Queue an arbitrary mutation.
    pub fn push(&mut self, command: impl FnOnce(&mut World) + Send + 'static) {
        self.queue.push(Box::new(command));
    }

    pub fn spawn<B: Bundle + Send + 'static>(&mut self, bundle: B) {
        self.push(move |world| {
            world.spawn(bundle);
        });
    }

    pub fn despawn(&mut self, entity: Entity) {
        self.push(move |world| {
            if !world.despawn(entity) {
                log::debug!("deferred despawn of {:?} skipped: already dead", entity);
            }
        });
    }

    /// Add or replace a component.
    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) {
        self.push(move |world| {
            if world.is_alive(entity) {
                world.insert(entity, component);
            } else {
                log::debug!(
                    "deferred insert of `{}` on dead {:?} skipped",
                    std::any::type_name::<T>(),
                    entity
                );
            }
        });
    }

    pub fn remove<T: Component>(&mut self, entity: Entity) {
        self.push(move |world| {
            if world.is_alive(entity) {
                world.remove_component::<T>(entity);
            }
        });
    }

    pub fn attach_child(&mut self, parent: Entity, child: Entity) {
        self.push(move |world| {
            if let Err(err) = world.attach_child(parent, child) {
                log::warn!("deferred attach rejected: {err}");
            }
        });
    }

    pub fn detach_child(&mut self, parent: Entity, child: Entity) {
        self.push(move |world| {
            if let Err(err) = world.detach_child(parent, child) {
                log::warn!("deferred detach rejected: {err}");
            }
        });
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Run every queued command against `world`, in recording order.
    pub fn apply(&mut self, world: &mut World) {
        for command in self.queue.drain(..) {
            command(world);
        }
    }
}
