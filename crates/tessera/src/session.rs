//! Session: multi-database fan-out, save/delete orchestration, cascades.
//!
//! A [`Session`] holds an ordered set of [`Database`]s plus a shared
//! mapping registry. Reads visit every readable database that handles
//! the requested type, in ascending order, and the last database's
//! result wins (reproducing the source system's fan-out semantics; a
//! `warn!` fires whenever an earlier result is overwritten). Writes
//! visit every writable database, wrapping each row-plus-join batch in
//! a transaction.

use crate::batch::{Batch, Command};
use crate::client::Executor;
use crate::config::DatabaseConfig;
use crate::error::{OrmError, OrmResult};
use crate::filter::Filter;
use crate::generator;
use crate::graph::DependencyGraph;
use crate::mapping::{Mapping, Relation};
use crate::pool;
use crate::registry::MappingRegistry;
use crate::value::Value;
use deadpool_postgres::Pool;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

enum Backend {
    Pool(Pool),
    #[cfg(test)]
    Mock(Arc<tests::RecordingExecutor>),
}

/// One registered database: a pool plus fan-out metadata.
pub struct Database {
    pub name: String,
    pub order: i32,
    pub readable: bool,
    pub writable: bool,
    /// Mapped types this database handles; `None` means all.
    types: Option<HashSet<TypeId>>,
    backend: Backend,
}

impl Database {
    /// Build a database from a config record, constructing its pool.
    pub fn connect(config: &DatabaseConfig) -> OrmResult<Self> {
        let pool = pool::create_pool_with_config(&config.url, config.pool_size)?;
        Ok(Self {
            name: config.name.clone(),
            order: config.order,
            readable: config.readable,
            writable: config.writable,
            types: None,
            backend: Backend::Pool(pool),
        })
    }

    /// Restrict this database to a subset of mapped types. Calling this
    /// at least once switches the database from handling every type to
    /// handling only the listed ones.
    pub fn restrict<T: 'static>(mut self) -> Self {
        self.types
            .get_or_insert_with(HashSet::new)
            .insert(TypeId::of::<T>());
        self
    }

    #[cfg(test)]
    fn mock(name: &str, order: i32, executor: Arc<tests::RecordingExecutor>) -> Self {
        Self {
            name: name.to_string(),
            order,
            readable: true,
            writable: true,
            types: None,
            backend: Backend::Mock(executor),
        }
    }

    fn handles(&self, id: TypeId) -> bool {
        match &self.types {
            Some(set) => set.contains(&id),
            None => true,
        }
    }

    async fn acquire(&self) -> OrmResult<Conn> {
        match &self.backend {
            Backend::Pool(pool) => Ok(Conn::Pooled(pool.get().await?)),
            #[cfg(test)]
            Backend::Mock(exec) => Ok(Conn::Mock(Arc::clone(exec))),
        }
    }
}

/// A per-operation connection scope.
enum Conn {
    Pooled(deadpool_postgres::Client),
    #[cfg(test)]
    Mock(Arc<tests::RecordingExecutor>),
}

impl Executor for Conn {
    async fn fetch(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> OrmResult<Vec<tokio_postgres::Row>> {
        match self {
            Conn::Pooled(c) => Executor::fetch(c, sql, params).await,
            #[cfg(test)]
            Conn::Mock(m) => Executor::fetch(&**m, sql, params).await,
        }
    }

    async fn fetch_opt(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> OrmResult<Option<tokio_postgres::Row>> {
        match self {
            Conn::Pooled(c) => Executor::fetch_opt(c, sql, params).await,
            #[cfg(test)]
            Conn::Mock(m) => Executor::fetch_opt(&**m, sql, params).await,
        }
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> OrmResult<u64> {
        match self {
            Conn::Pooled(c) => Executor::execute(c, sql, params).await,
            #[cfg(test)]
            Conn::Mock(m) => Executor::execute(&**m, sql, params).await,
        }
    }

    async fn fetch_value(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> OrmResult<Option<Value>> {
        match self {
            Conn::Pooled(c) => Executor::fetch_value(c, sql, params).await,
            #[cfg(test)]
            Conn::Mock(m) => Executor::fetch_value(&**m, sql, params).await,
        }
    }
}

enum SaveAction {
    Insert,
    Update,
}

/// The query provider: fans operations out across registered databases.
pub struct Session {
    databases: Vec<Database>,
    registry: Arc<MappingRegistry>,
}

impl Session {
    pub fn new(registry: Arc<MappingRegistry>) -> Self {
        Self {
            databases: Vec::new(),
            registry,
        }
    }

    /// Register a database; the list stays sorted by ascending order.
    pub fn add_database(&mut self, database: Database) -> &mut Self {
        self.databases.push(database);
        self.databases.sort_by_key(|d| d.order);
        self
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.registry
    }

    /// Derive the memoized commands for every registered mapping.
    /// Idempotent; typically called once after registration.
    pub fn setup_commands(&self) {
        for mapping in self.registry.all() {
            generator::setup_commands(&mapping);
        }
    }

    /// Registered mappings in relation-dependency order.
    pub fn dependency_order(&self) -> OrmResult<Vec<Arc<Mapping>>> {
        DependencyGraph::from_registry(&self.registry).topo_order()
    }

    fn readers(&self, id: TypeId) -> impl Iterator<Item = &Database> {
        self.databases
            .iter()
            .filter(move |d| d.readable && d.handles(id))
    }

    fn writers(&self, id: TypeId) -> impl Iterator<Item = &Database> {
        self.databases
            .iter()
            .filter(move |d| d.writable && d.handles(id))
    }

    // ---- reads ----

    /// Every mapped row, optionally filtered.
    pub async fn all<T>(&self, filters: &[Filter]) -> OrmResult<Vec<T>>
    where
        T: Default + Send + Sync + 'static,
    {
        let mapping = self.registry.get::<T>()?;
        let command = generator::select_all(&mapping, filters);
        self.read_rows(&mapping, &command).await
    }

    /// The first `limit` mapped rows.
    pub async fn all_limited<T>(&self, limit: u64, filters: &[Filter]) -> OrmResult<Vec<T>>
    where
        T: Default + Send + Sync + 'static,
    {
        let mapping = self.registry.get::<T>()?;
        let command = generator::select_all_limited(&mapping, limit, filters);
        self.read_rows(&mapping, &command).await
    }

    /// At most one matching row.
    pub async fn any<T>(&self, filters: &[Filter]) -> OrmResult<Option<T>>
    where
        T: Default + Send + Sync + 'static,
    {
        let mapping = self.registry.get::<T>()?;
        let command = generator::select_any(&mapping, filters);
        let rows: Vec<T> = self.read_rows(&mapping, &command).await?;
        Ok(rows.into_iter().next())
    }

    /// One zero-based page of an ordered result set.
    pub async fn paged<T>(
        &self,
        page_size: u64,
        current_page: u64,
        order_by: Option<&str>,
        filters: &[Filter],
    ) -> OrmResult<Vec<T>>
    where
        T: Default + Send + Sync + 'static,
    {
        let mapping = self.registry.get::<T>()?;
        let command = generator::paged(&mapping, page_size, current_page, order_by, filters);
        self.read_rows(&mapping, &command).await
    }

    /// Number of pages needed to cover the matching rows.
    pub async fn page_count<T>(&self, page_size: u64, filters: &[Filter]) -> OrmResult<u64>
    where
        T: Send + Sync + 'static,
    {
        if page_size == 0 {
            return Err(OrmError::validation("page_size must be positive"));
        }
        let mapping = self.registry.get::<T>()?;
        let command = generator::page_count(&mapping, filters);

        let mut total: Option<u64> = None;
        for db in self.readers(mapping.type_id()) {
            let conn = db.acquire().await?;
            let value = conn
                .fetch_value(&command.sql, &command.params.as_refs())
                .await?;
            let count = value.and_then(|v| v.as_int()).unwrap_or(0).max(0) as u64;
            if total.is_some() {
                tracing::warn!(
                    database = %db.name,
                    type_name = mapping.type_name(),
                    "read fan-out overwrites earlier result"
                );
            }
            total = Some(count);
        }
        let total = total.unwrap_or(0);
        Ok(total.div_ceil(page_size))
    }

    /// Load one relation property's related rows for an owner.
    pub async fn load_property<T, C>(&self, obj: &T, relation_name: &str) -> OrmResult<Vec<C>>
    where
        T: Send + Sync + 'static,
        C: Default + Send + Sync + 'static,
    {
        let mapping = self.registry.get::<T>()?;
        let relation = mapping.relation(relation_name)?;
        let foreign = self.registry.foreign_mapping(relation)?;
        if !foreign.maps::<C>() {
            return Err(OrmError::mapping(format!(
                "relation '{}' loads {}, not {}",
                relation_name,
                foreign.type_name(),
                std::any::type_name::<C>()
            )));
        }

        let owner_key = mapping.primary_id()?.value(obj as &dyn Any)?;
        let command = generator::load_command(&mapping, relation, &foreign)?
            .with_params(vec![owner_key].into());
        self.read_rows(&foreign, &command).await
    }

    async fn read_rows<T>(&self, mapping: &Mapping, command: &Command) -> OrmResult<Vec<T>>
    where
        T: Default + Send + Sync + 'static,
    {
        let mut result: Option<Vec<T>> = None;
        for db in self.readers(mapping.type_id()) {
            let conn = db.acquire().await?;
            tracing::debug!(database = %db.name, sql = %command.sql, "read");
            let rows = conn.fetch(&command.sql, &command.params.as_refs()).await?;
            let mut items = Vec::with_capacity(rows.len());
            for row in &rows {
                let mut obj = T::default();
                mapping.apply_row(&mut obj, row)?;
                items.push(obj);
            }
            if result.is_some() {
                tracing::warn!(
                    database = %db.name,
                    type_name = mapping.type_name(),
                    "read fan-out overwrites earlier result"
                );
            }
            result = Some(items);
        }
        Ok(result.unwrap_or_default())
    }

    // ---- writes ----

    /// Insert or update one object, its cascade children, and its join
    /// rows, across every writable database handling its type.
    pub async fn save<T>(&self, obj: &mut T) -> OrmResult<()>
    where
        T: Send + Sync + 'static,
    {
        let mapping = self.registry.get::<T>()?;

        // Cascade children first: their rows (and generated keys) must
        // exist before join rows point at them. Child saves fan out on
        // their own, so this runs once, not once per database. With
        // several cascade relations, children save in dependency order.
        let mut cascades: Vec<&Relation> = mapping
            .relations
            .iter()
            .filter(|r| r.cascade_save.is_some())
            .collect();
        if cascades.len() > 1 {
            let rank: HashMap<TypeId, usize> = self
                .dependency_order()?
                .iter()
                .enumerate()
                .map(|(i, m)| (m.type_id(), i))
                .collect();
            cascades.sort_by_key(|r| rank.get(&r.foreign).copied().unwrap_or(usize::MAX));
        }
        for relation in cascades {
            if let Some(hook) = &relation.cascade_save {
                hook(self, &mut *obj).await?;
            }
        }

        for db in self.writers(mapping.type_id()) {
            tracing::debug!(database = %db.name, type_name = mapping.type_name(), "save");
            match &db.backend {
                Backend::Pool(pool) => {
                    let mut client = pool.get().await?;
                    let tx = client
                        .transaction()
                        .await
                        .map_err(OrmError::from_db_error)?;
                    self.save_in(&tx, &mapping, obj).await?;
                    tx.commit().await.map_err(OrmError::from_db_error)?;
                }
                #[cfg(test)]
                Backend::Mock(m) => self.save_in(&**m, &mapping, obj).await?,
            }
        }
        Ok(())
    }

    /// Row save plus join maintenance against one executor.
    async fn save_in<T, E>(&self, conn: &E, mapping: &Mapping, obj: &mut T) -> OrmResult<()>
    where
        T: Send + Sync + 'static,
        E: Executor,
    {
        self.save_row(conn, mapping, &mut *obj).await?;

        // Clear-then-reinsert keeps join rows exactly in sync with the
        // in-memory relationship values and never duplicates pairs.
        let owner_key = mapping.primary_id()?.value(&*obj)?;
        for relation in &mapping.relations {
            let foreign = self.registry.foreign_mapping(relation)?;
            let clear =
                generator::joins_delete(mapping, relation, &foreign, owner_key.clone())?;
            Batch::single(clear).execute(conn).await?;

            let keys = relation.related_keys(&*obj)?;
            generator::joins_save(mapping, relation, &foreign, owner_key.clone(), keys)?
                .execute(conn)
                .await?;
        }
        Ok(())
    }

    /// The insert-or-update decision for one row.
    ///
    /// Zero ID means the row is new. A populated auto-increment ID must
    /// already exist. A populated natural key needs an existence probe,
    /// the one case where a round-trip is unavoidable.
    async fn save_row<E: Executor>(
        &self,
        conn: &E,
        mapping: &Mapping,
        obj: &mut (dyn Any + Send),
    ) -> OrmResult<()> {
        let id = mapping.primary_id()?;
        let current = id.value(&*obj)?;

        let action = if current.is_zero() {
            SaveAction::Insert
        } else if id.auto_increment {
            SaveAction::Update
        } else {
            let probe = generator::exists_by_id(mapping, mapping.id_values(&*obj)?);
            let exists = conn
                .fetch_value(&probe.sql, &probe.params.as_refs())
                .await?
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if exists {
                SaveAction::Update
            } else {
                SaveAction::Insert
            }
        };

        match action {
            SaveAction::Insert => {
                let command = generator::insert(mapping, &*obj)?;
                tracing::debug!(sql = %command.sql, "insert");
                if id.auto_increment {
                    let key = conn
                        .fetch_value(&command.sql, &command.params.as_refs())
                        .await?;
                    if let Some(key) = key {
                        id.assign(&mut *obj, key)?;
                    }
                } else {
                    conn.execute(&command.sql, &command.params.as_refs())
                        .await?;
                }
            }
            SaveAction::Update => {
                let command = generator::update(mapping, &*obj)?;
                tracing::debug!(sql = %command.sql, "update");
                conn.execute(&command.sql, &command.params.as_refs())
                    .await?;
            }
        }
        Ok(())
    }

    /// Delete one object: join rows first, then cascade children, then
    /// the row itself.
    pub async fn delete<T>(&self, obj: &T) -> OrmResult<()>
    where
        T: Send + Sync + 'static,
    {
        let mapping = self.registry.get::<T>()?;
        let owner_key = mapping.primary_id()?.value(obj)?;

        // Join rows must go before the rows they point at.
        for db in self.writers(mapping.type_id()) {
            tracing::debug!(database = %db.name, type_name = mapping.type_name(), "clear joins");
            match &db.backend {
                Backend::Pool(pool) => {
                    let mut client = pool.get().await?;
                    let tx = client
                        .transaction()
                        .await
                        .map_err(OrmError::from_db_error)?;
                    self.clear_joins_in(&tx, &mapping, owner_key.clone()).await?;
                    tx.commit().await.map_err(OrmError::from_db_error)?;
                }
                #[cfg(test)]
                Backend::Mock(m) => {
                    self.clear_joins_in(&**m, &mapping, owner_key.clone())
                        .await?
                }
            }
        }

        for relation in &mapping.relations {
            if let Some(hook) = &relation.cascade_delete {
                hook(self, obj).await?;
            }
        }

        let command = generator::delete(&mapping, mapping.id_values(obj)?)?;
        for db in self.writers(mapping.type_id()) {
            tracing::debug!(database = %db.name, sql = %command.sql, "delete");
            let conn = db.acquire().await?;
            conn.execute(&command.sql, &command.params.as_refs())
                .await?;
        }
        Ok(())
    }

    async fn clear_joins_in<E: Executor>(
        &self,
        conn: &E,
        mapping: &Mapping,
        owner_key: Value,
    ) -> OrmResult<()> {
        for relation in &mapping.relations {
            let foreign = self.registry.foreign_mapping(relation)?;
            let clear =
                generator::joins_delete(mapping, relation, &foreign, owner_key.clone())?;
            Batch::single(clear).execute(conn).await?;
        }
        Ok(())
    }
}
