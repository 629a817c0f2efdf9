//! # Component — Type Registry and Columnar Storage
//!
//! Components are plain data. Archetypes hold a *dynamic* set of component
//! types, so each column is stored behind the [`ErasedColumn`] trait object
//! while the data itself stays a dense `Vec<T>` ([`TypedColumn`]). Generic
//! code (migration, despawn, duplication) works through the trait; typed code
//! (queries, `get`) downcasts once to reach the `Vec<T>`.
//!
//! The [`ComponentRegistry`] assigns each type a dense [`ComponentId`] and
//! records the metadata migration needs: size, alignment, whether dropping
//! runs code, a column factory, and an optional clone hook used by
//! [`World::duplicate`](super::world::World::duplicate).
//!
//! The registry is owned by the `World`, not a process global: ids are stable
//! for the lifetime of the world that assigned them.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

/// Dense id of a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// Marker bound for anything storable as a component.
pub trait Component: 'static + Send + Sync {}

impl<T: 'static + Send + Sync> Component for T {}

/// Type-erased view of one archetype column.
///
/// Every implementation is a [`TypedColumn<T>`]; the trait only exposes what
/// row migration and teardown need without knowing `T`.
pub(crate) trait ErasedColumn: Any + Send + Sync {
    fn len(&self) -> usize;

    /// Swap-remove `row` and drop the value.
    fn swap_remove_drop(&mut self, row: usize);

    /// Swap-remove `row` from `self` and push it onto `dst`, which must be a
    /// column of the same type.
    fn move_row(&mut self, row: usize, dst: &mut dyn ErasedColumn);

    /// A fresh empty column of the same type.
    fn new_empty(&self) -> Box<dyn ErasedColumn>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    fn type_name(&self) -> &'static str;
}

/// Dense storage for one component type.
pub struct TypedColumn<T> {
    pub(crate) data: Vec<T>,
}

impl<T> TypedColumn<T> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Default for TypedColumn<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> ErasedColumn for TypedColumn<T> {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn swap_remove_drop(&mut self, row: usize) {
        self.data.swap_remove(row);
    }

    fn move_row(&mut self, row: usize, dst: &mut dyn ErasedColumn) {
        let value = self.data.swap_remove(row);
        downcast_column_mut::<T>(dst).data.push(value);
    }

    fn new_empty(&self) -> Box<dyn ErasedColumn> {
        Box::new(TypedColumn::<T>::new())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Downcast a column to its concrete type.
///
/// # Panics
///
/// Panics on a type mismatch, which indicates a storage bug.
pub(crate) fn downcast_column<T: Component>(col: &dyn ErasedColumn) -> &TypedColumn<T> {
    let name = col.type_name();
    col.as_any()
        .downcast_ref::<TypedColumn<T>>()
        .unwrap_or_else(|| column_mismatch::<T>(name))
}

pub(crate) fn downcast_column_mut<T: Component>(
    col: &mut dyn ErasedColumn,
) -> &mut TypedColumn<T> {
    let name = col.type_name();
    col.as_any_mut()
        .downcast_mut::<TypedColumn<T>>()
        .unwrap_or_else(|| column_mismatch::<T>(name))
}

/// Take ownership of a boxed column as its concrete type.
pub(crate) fn downcast_column_box<T: Component>(col: Box<dyn ErasedColumn>) -> Box<TypedColumn<T>> {
    let name = col.type_name();
    col.into_any()
        .downcast::<TypedColumn<T>>()
        .unwrap_or_else(|_| column_mismatch::<T>(name))
}

fn column_mismatch<T>(found: &str) -> ! {
    panic!(
        "Component column type mismatch: expected `{}`, found `{}`",
        std::any::type_name::<T>(),
        found
    )
}

type CloneRowFn = fn(&mut dyn ErasedColumn, usize);

fn clone_row<T: Component + Clone>(col: &mut dyn ErasedColumn, row: usize) {
    let col = downcast_column_mut::<T>(col);
    let value = col.data[row].clone();
    col.data.push(value);
}

fn new_column<T: Component>() -> Box<dyn ErasedColumn> {
    Box::new(TypedColumn::<T>::new())
}

/// Metadata recorded for a registered component type.
#[derive(Clone)]
pub struct ComponentInfo {
    id: ComponentId,
    type_id: TypeId,
    name: &'static str,
    size: usize,
    align: usize,
    needs_drop: bool,
    new_column: fn() -> Box<dyn ErasedColumn>,
    clone_row: Option<CloneRowFn>,
}

impl ComponentInfo {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Module-stripped type name, e.g. `Transform2d`.
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn needs_drop(&self) -> bool {
        self.needs_drop
    }

    /// Whether [`World::duplicate`](super::world::World::duplicate) can copy this type.
    pub fn is_cloneable(&self) -> bool {
        self.clone_row.is_some()
    }

    pub(crate) fn new_column(&self) -> Box<dyn ErasedColumn> {
        (self.new_column)()
    }

    pub(crate) fn clone_row_fn(&self) -> Option<CloneRowFn> {
        self.clone_row
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("needs_drop", &self.needs_drop)
            .field("cloneable", &self.is_cloneable())
            .finish()
    }
}

/// Assigns stable [`ComponentId`]s and keeps per-type metadata.
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_type: HashMap<TypeId, ComponentId>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            infos: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    /// Register `T`, returning its id. Registering twice returns the same id.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            return id;
        }
        let id = ComponentId(
            u32::try_from(self.infos.len())
                .unwrap_or_else(|_| panic!("component id space exhausted")),
        );
        let info = ComponentInfo {
            id,
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            needs_drop: std::mem::needs_drop::<T>(),
            new_column: new_column::<T>,
            clone_row: None,
        };
        log::debug!(
            "registered component `{}` as {:?} (size {}, align {})",
            info.name,
            id,
            info.size,
            info.align
        );
        self.infos.push(info);
        self.by_type.insert(TypeId::of::<T>(), id);
        id
    }

    /// Register `T` with clone capability, upgrading an earlier plain
    /// registration if there was one.
    pub fn register_cloneable<T: Component + Clone>(&mut self) -> ComponentId {
        let id = self.register::<T>();
        self.infos[id.index()].clone_row = Some(clone_row::<T>);
        id
    }

    pub fn id_of<T: Component>(&self) -> Option<ComponentId> {
        self.id_of_type_id(TypeId::of::<T>())
    }

    pub fn id_of_type_id(&self, type_id: TypeId) -> Option<ComponentId> {
        self.by_type.get(&type_id).copied()
    }

    /// Metadata for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this registry.
    pub fn info(&self, id: ComponentId) -> &ComponentInfo {
        &self.infos[id.index()]
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip the module path from a fully-qualified type name
/// (e.g. `vargr::math::Transform2d` → `Transform2d`).
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    // Generic arguments carry their own paths; only strip the outer one.
    let outer = full.split('<').next().unwrap_or(full);
    match outer.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}
