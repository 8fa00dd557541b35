//! Per-type mappings: table metadata, column bindings, and relations.
//!
//! A [`Mapping`] records how one host type corresponds to one table: its
//! ID properties, scalar column bindings, relationship properties, and the
//! memoized command text generated for it. Mappings are built once at
//! startup through the typed fluent [`MappingBuilder`] and registered in a
//! [`crate::registry::MappingRegistry`]; property accessors are
//! type-erased over `dyn Any` so mappings for different types live in one
//! registry and relations may point at any registered type, including
//! their own (self-referencing tables).

use crate::batch::{Command, CommandKind};
use crate::error::{OrmError, OrmResult};
use crate::session::Session;
use crate::value::{FromValue, IntoValue, Value};
use futures_util::future::BoxFuture;
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use tokio_postgres::Row;

/// Whether a column binding participates in reads, writes, or both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn readable(self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

/// The kind of a scalar column binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    /// A plain mapped column.
    Map,
    /// A foreign scalar (an FK value stored inline on this table).
    Reference,
}

/// The kind of a relationship property.
///
/// Container flavors of the same relationship collapse into these two
/// kinds; the key-extraction closures absorb the container shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    ManyToOne,
    ManyToMany,
}

/// Slots for memoized generated command text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandSlot {
    SelectAll,
    SelectAny,
    Insert,
    Update,
    Delete,
}

impl CommandSlot {
    fn index(self) -> usize {
        match self {
            CommandSlot::SelectAll => 0,
            CommandSlot::SelectAny => 1,
            CommandSlot::Insert => 2,
            CommandSlot::Update => 3,
            CommandSlot::Delete => 4,
        }
    }
}

type Getter = Arc<dyn Fn(&dyn Any) -> OrmResult<Value> + Send + Sync>;
type Setter = Arc<dyn Fn(&mut dyn Any, Value) -> OrmResult<()> + Send + Sync>;
type KeysGetter = Arc<dyn Fn(&dyn Any) -> OrmResult<Vec<Value>> + Send + Sync>;
type CascadeSaveHook = Arc<
    dyn for<'a> Fn(&'a Session, &'a mut (dyn Any + Send)) -> BoxFuture<'a, OrmResult<()>>
        + Send
        + Sync,
>;
type CascadeDeleteHook = Arc<
    dyn for<'a> Fn(&'a Session, &'a (dyn Any + Send + Sync)) -> BoxFuture<'a, OrmResult<()>>
        + Send
        + Sync,
>;

/// An ID (primary key) property binding.
#[derive(Clone)]
pub struct IdProperty {
    /// Host member name.
    pub name: String,
    /// DB column name.
    pub field_name: String,
    /// Generated by the database; never supplied on insert.
    pub auto_increment: bool,
    pub(crate) get: Getter,
    pub(crate) set: Setter,
}

impl IdProperty {
    /// Read this key's current value from an object.
    pub fn value(&self, obj: &dyn Any) -> OrmResult<Value> {
        (self.get)(obj)
    }

    /// Write a (typically generated) key value back onto an object.
    pub fn assign(&self, obj: &mut dyn Any, value: Value) -> OrmResult<()> {
        (self.set)(obj, value)
    }
}

/// A scalar column binding.
#[derive(Clone)]
pub struct Property {
    pub name: String,
    pub field_name: String,
    pub kind: PropertyKind,
    pub mode: AccessMode,
    pub(crate) get: Getter,
    pub(crate) set: Setter,
}

impl Property {
    pub fn value(&self, obj: &dyn Any) -> OrmResult<Value> {
        (self.get)(obj)
    }
}

/// A relationship property maintained through a join table.
#[derive(Clone)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
    pub cascade: bool,
    /// Join table holding the foreign-key pairs.
    pub table_name: String,
    /// The related mapping, resolved through the registry (never owned,
    /// so self-referencing cycles are representable).
    pub foreign: TypeId,
    pub(crate) get_keys: KeysGetter,
    pub(crate) cascade_save: Option<CascadeSaveHook>,
    pub(crate) cascade_delete: Option<CascadeDeleteHook>,
    /// Lazily memoized SELECT used to load this property's related rows.
    pub(crate) load_command: Arc<OnceLock<Command>>,
}

impl Relation {
    /// Current ID values of the related objects held in memory.
    pub fn related_keys(&self, obj: &dyn Any) -> OrmResult<Vec<Value>> {
        (self.get_keys)(obj)
    }

    /// The memoized load command, if derived or authored already.
    pub fn load_command(&self) -> Option<&Command> {
        self.load_command.get()
    }

    pub(crate) fn memoize_load(&self, f: impl FnOnce() -> Command) -> &Command {
        self.load_command.get_or_init(f)
    }
}

/// The registered correspondence between a host type and a table.
pub struct Mapping {
    type_id: TypeId,
    type_name: &'static str,
    pub table_name: String,
    pub id_properties: Vec<IdProperty>,
    pub properties: Vec<Property>,
    pub relations: Vec<Relation>,
    commands: [OnceLock<Command>; 5],
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("type", &self.type_name)
            .field("table", &self.table_name)
            .field("ids", &self.id_properties.len())
            .field("properties", &self.properties.len())
            .field("relations", &self.relations.len())
            .finish()
    }
}

impl Mapping {
    /// The identity of the mapped host type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The host type's name, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether this mapping maps the type `T`.
    pub fn maps<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// The single ID property, for the common non-composite case.
    pub fn primary_id(&self) -> OrmResult<&IdProperty> {
        self.id_properties
            .first()
            .ok_or_else(|| OrmError::mapping(format!("{} has no ID property", self.type_name)))
    }

    /// Current ID values of an object, in registration order.
    pub fn id_values(&self, obj: &dyn Any) -> OrmResult<Vec<Value>> {
        self.id_properties.iter().map(|id| id.value(obj)).collect()
    }

    /// Find a relation property by host member name.
    pub fn relation(&self, name: &str) -> OrmResult<&Relation> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| {
                OrmError::mapping(format!("{} has no relation '{}'", self.type_name, name))
            })
    }

    /// The memoized command for `slot`, if derived or authored already.
    pub fn command(&self, slot: CommandSlot) -> Option<&Command> {
        self.commands[slot.index()].get()
    }

    /// Get the memoized command for `slot`, deriving it at most once.
    ///
    /// The derivation must be a pure function of mapping state; concurrent
    /// callers may race to compute but exactly one result is kept.
    pub fn memoize(&self, slot: CommandSlot, f: impl FnOnce() -> Command) -> &Command {
        self.commands[slot.index()].get_or_init(f)
    }

    /// Columns selected by reads: IDs first, then readable scalars.
    pub fn select_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self
            .id_properties
            .iter()
            .map(|id| id.field_name.as_str())
            .collect();
        cols.extend(
            self.properties
                .iter()
                .filter(|p| p.mode.readable())
                .map(|p| p.field_name.as_str()),
        );
        cols
    }

    /// Hydrate an object's mapped fields from a result row.
    ///
    /// Columns absent from the row are skipped, so narrower generated
    /// selects and authored commands both hydrate what they fetched.
    pub fn apply_row(&self, obj: &mut dyn Any, row: &Row) -> OrmResult<()> {
        let present =
            |col: &str| -> bool { row.columns().iter().any(|c| c.name() == col) };

        for id in &self.id_properties {
            if present(&id.field_name) {
                let value: Value = row
                    .try_get(id.field_name.as_str())
                    .map_err(|e| OrmError::decode(&id.field_name, e.to_string()))?;
                (id.set)(obj, value)?;
            }
        }
        for prop in self.properties.iter().filter(|p| p.mode.readable()) {
            if present(&prop.field_name) {
                let value: Value = row
                    .try_get(prop.field_name.as_str())
                    .map_err(|e| OrmError::decode(&prop.field_name, e.to_string()))?;
                (prop.set)(obj, value)?;
            }
        }
        Ok(())
    }
}

fn erase_get<T: 'static, V: IntoValue + Clone + 'static>(
    type_name: &'static str,
    get: fn(&T) -> V,
) -> Getter {
    Arc::new(move |obj| {
        let obj = obj
            .downcast_ref::<T>()
            .ok_or_else(|| OrmError::mapping(format!("getter invoked on non-{}", type_name)))?;
        Ok(get(obj).into_value())
    })
}

fn erase_set<T: 'static, V: FromValue + 'static>(
    type_name: &'static str,
    set: fn(&mut T, V),
) -> Setter {
    Arc::new(move |obj, value| {
        let obj = obj
            .downcast_mut::<T>()
            .ok_or_else(|| OrmError::mapping(format!("setter invoked on non-{}", type_name)))?;
        set(obj, V::from_value(value)?);
        Ok(())
    })
}

/// Fluent builder producing a [`Mapping`] for `T`.
///
/// ```ignore
/// let mapping = MappingBuilder::<User>::new("users")
///     .auto_id("id", "id", |u| u.id, |u, v| u.id = v)
///     .map("name", "name", |u| u.name.clone(), |u, v| u.name = v)
///     .many_to_many::<Role>(
///         "roles", "users_roles", false,
///         |u| u.roles.iter().collect(),
///         |u| u.roles.iter_mut().collect(),
///         |r| Value::Int(r.id),
///     )
///     .build()?;
/// ```
pub struct MappingBuilder<T> {
    table_name: String,
    id_properties: Vec<IdProperty>,
    properties: Vec<Property>,
    relations: Vec<Relation>,
    authored: Vec<(CommandSlot, Command)>,
    build_error: Option<String>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + Sync + 'static> MappingBuilder<T> {
    /// Start a mapping for table `table_name`.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            id_properties: Vec::new(),
            properties: Vec::new(),
            relations: Vec::new(),
            authored: Vec::new(),
            build_error: None,
            _marker: PhantomData,
        }
    }

    fn fail(&mut self, message: impl Into<String>) {
        if self.build_error.is_none() {
            self.build_error = Some(message.into());
        }
    }

    fn check_names(&mut self, what: &str, name: &str, column: &str) -> bool {
        if name.is_empty() || column.is_empty() {
            self.fail(format!(
                "{}: {} binding requires a member name and a column name",
                std::any::type_name::<T>(),
                what
            ));
            return false;
        }
        true
    }

    /// Register a natural (caller-assigned) ID property.
    pub fn id<V: IntoValue + FromValue + Clone + 'static>(
        self,
        name: &str,
        column: &str,
        get: fn(&T) -> V,
        set: fn(&mut T, V),
    ) -> Self {
        self.id_inner(name, column, false, get, set)
    }

    /// Register a database-generated ID property.
    pub fn auto_id<V: IntoValue + FromValue + Clone + 'static>(
        self,
        name: &str,
        column: &str,
        get: fn(&T) -> V,
        set: fn(&mut T, V),
    ) -> Self {
        self.id_inner(name, column, true, get, set)
    }

    fn id_inner<V: IntoValue + FromValue + Clone + 'static>(
        mut self,
        name: &str,
        column: &str,
        auto_increment: bool,
        get: fn(&T) -> V,
        set: fn(&mut T, V),
    ) -> Self {
        if !self.check_names("id", name, column) {
            return self;
        }
        self.id_properties.push(IdProperty {
            name: name.to_string(),
            field_name: column.to_string(),
            auto_increment,
            get: erase_get(std::any::type_name::<T>(), get),
            set: erase_set(std::any::type_name::<T>(), set),
        });
        self
    }

    /// Register a plain mapped column (read/write).
    pub fn map<V: IntoValue + FromValue + Clone + 'static>(
        self,
        name: &str,
        column: &str,
        get: fn(&T) -> V,
        set: fn(&mut T, V),
    ) -> Self {
        self.scalar(name, column, PropertyKind::Map, AccessMode::ReadWrite, get, set)
    }

    /// Register a mapped column with an explicit access mode.
    pub fn map_mode<V: IntoValue + FromValue + Clone + 'static>(
        self,
        name: &str,
        column: &str,
        mode: AccessMode,
        get: fn(&T) -> V,
        set: fn(&mut T, V),
    ) -> Self {
        self.scalar(name, column, PropertyKind::Map, mode, get, set)
    }

    /// Register a foreign scalar (FK value stored on this table).
    pub fn reference<V: IntoValue + FromValue + Clone + 'static>(
        self,
        name: &str,
        column: &str,
        get: fn(&T) -> V,
        set: fn(&mut T, V),
    ) -> Self {
        self.scalar(
            name,
            column,
            PropertyKind::Reference,
            AccessMode::ReadWrite,
            get,
            set,
        )
    }

    fn scalar<V: IntoValue + FromValue + Clone + 'static>(
        mut self,
        name: &str,
        column: &str,
        kind: PropertyKind,
        mode: AccessMode,
        get: fn(&T) -> V,
        set: fn(&mut T, V),
    ) -> Self {
        if !self.check_names("column", name, column) {
            return self;
        }
        let property = Property {
            name: name.to_string(),
            field_name: column.to_string(),
            kind,
            mode,
            get: erase_get(std::any::type_name::<T>(), get),
            set: erase_set(std::any::type_name::<T>(), set),
        };
        // Re-mapping an existing column replaces the earlier binding.
        if let Some(existing) = self
            .properties
            .iter_mut()
            .find(|p| p.field_name == property.field_name)
        {
            *existing = property;
        } else {
            self.properties.push(property);
        }
        self
    }

    /// Register a many-to-many relationship maintained through `join_table`.
    pub fn many_to_many<C: Send + Sync + 'static>(
        self,
        name: &str,
        join_table: &str,
        cascade: bool,
        children: for<'a> fn(&'a T) -> Vec<&'a C>,
        children_mut: for<'a> fn(&'a mut T) -> Vec<&'a mut C>,
        child_key: fn(&C) -> Value,
    ) -> Self {
        self.relation_inner(
            name,
            RelationKind::ManyToMany,
            join_table,
            cascade,
            children,
            children_mut,
            child_key,
        )
    }

    /// Register a many-to-one relationship maintained through `join_table`.
    pub fn many_to_one<C: Send + Sync + 'static>(
        self,
        name: &str,
        join_table: &str,
        cascade: bool,
        children: for<'a> fn(&'a T) -> Vec<&'a C>,
        children_mut: for<'a> fn(&'a mut T) -> Vec<&'a mut C>,
        child_key: fn(&C) -> Value,
    ) -> Self {
        self.relation_inner(
            name,
            RelationKind::ManyToOne,
            join_table,
            cascade,
            children,
            children_mut,
            child_key,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn relation_inner<C: Send + Sync + 'static>(
        mut self,
        name: &str,
        kind: RelationKind,
        join_table: &str,
        cascade: bool,
        children: for<'a> fn(&'a T) -> Vec<&'a C>,
        children_mut: for<'a> fn(&'a mut T) -> Vec<&'a mut C>,
        child_key: fn(&C) -> Value,
    ) -> Self {
        if !self.check_names("relation", name, join_table) {
            return self;
        }

        let type_name = std::any::type_name::<T>();
        let get_keys: KeysGetter = Arc::new(move |obj| {
            let obj = obj
                .downcast_ref::<T>()
                .ok_or_else(|| OrmError::mapping(format!("relation read on non-{}", type_name)))?;
            Ok(children(obj).into_iter().map(child_key).collect())
        });

        let (cascade_save, cascade_delete) = if cascade {
            let save: CascadeSaveHook = Arc::new(move |session, obj| {
                Box::pin(async move {
                    let obj = obj.downcast_mut::<T>().ok_or_else(|| {
                        OrmError::mapping(format!("cascade save on non-{}", type_name))
                    })?;
                    for child in children_mut(obj) {
                        session.save::<C>(child).await?;
                    }
                    Ok(())
                })
            });
            let delete: CascadeDeleteHook = Arc::new(move |session, obj| {
                Box::pin(async move {
                    let obj = obj.downcast_ref::<T>().ok_or_else(|| {
                        OrmError::mapping(format!("cascade delete on non-{}", type_name))
                    })?;
                    for child in children(obj) {
                        session.delete::<C>(child).await?;
                    }
                    Ok(())
                })
            });
            (Some(save), Some(delete))
        } else {
            (None, None)
        };

        self.relations.push(Relation {
            name: name.to_string(),
            kind,
            cascade,
            table_name: join_table.to_string(),
            foreign: TypeId::of::<C>(),
            get_keys,
            cascade_save,
            cascade_delete,
            load_command: Arc::new(OnceLock::new()),
        });
        self
    }

    /// Author command text for a slot, pre-empting generated derivation.
    pub fn with_command(mut self, slot: CommandSlot, sql: &str, kind: CommandKind) -> Self {
        self.authored.push((slot, Command::bare(sql, kind)));
        self
    }

    /// Finish the mapping; fails on malformed registration.
    pub fn build(self) -> OrmResult<Mapping> {
        if let Some(message) = self.build_error {
            return Err(OrmError::Mapping(message));
        }
        if self.table_name.is_empty() {
            return Err(OrmError::mapping(format!(
                "{}: mapping requires a table name",
                std::any::type_name::<T>()
            )));
        }
        if self.id_properties.is_empty() {
            return Err(OrmError::mapping(format!(
                "{}: mapping requires at least one ID property",
                std::any::type_name::<T>()
            )));
        }

        let mapping = Mapping {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            table_name: self.table_name,
            id_properties: self.id_properties,
            properties: self.properties,
            relations: self.relations,
            commands: Default::default(),
        };
        for (slot, command) in self.authored {
            // Set-once: a second authored command for the same slot is a
            // registration mistake.
            if mapping.commands[slot.index()].set(command).is_err() {
                return Err(OrmError::mapping(format!(
                    "{}: command for {:?} authored twice",
                    mapping.type_name, slot
                )));
            }
        }
        Ok(mapping)
    }
}
