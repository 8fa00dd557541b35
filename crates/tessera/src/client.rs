//! Executor trait unifying clients, transactions, and pooled connections.

use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

/// A command executor the generated statements run against.
///
/// Implemented for `tokio_postgres::Client`, transactions, and pooled
/// deadpool clients, so session operations compose with or without an
/// explicit transaction.
pub trait Executor: Send + Sync {
    /// Execute a query and return all rows.
    fn fetch(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<Vec<Row>>> + Send;

    /// Execute a query and return the first row, if any.
    fn fetch_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<Option<Row>>> + Send;

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<u64>> + Send;

    /// Execute a query and return the first column of the first row, if any.
    ///
    /// Used for scalar readbacks: generated keys from `RETURNING`, COUNT
    /// totals, and `SELECT EXISTS(...)` probes.
    fn fetch_value(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<Option<Value>>> + Send {
        async move {
            let row = self.fetch_opt(sql, params).await?;
            match row {
                Some(r) => r
                    .try_get::<_, Value>(0)
                    .map(Some)
                    .map_err(|e| OrmError::decode("0", e.to_string())),
                None => Ok(None),
            }
        }
    }
}

impl Executor for tokio_postgres::Client {
    async fn fetch(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        tokio_postgres::Client::query(self, sql, params)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn fetch_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<Option<Row>> {
        let rows = Executor::fetch(self, sql, params).await?;
        Ok(rows.into_iter().next())
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        tokio_postgres::Client::execute(self, sql, params)
            .await
            .map_err(OrmError::from_db_error)
    }
}

impl Executor for tokio_postgres::Transaction<'_> {
    async fn fetch(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        tokio_postgres::Transaction::query(self, sql, params)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn fetch_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<Option<Row>> {
        let rows = Executor::fetch(self, sql, params).await?;
        Ok(rows.into_iter().next())
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        tokio_postgres::Transaction::execute(self, sql, params)
            .await
            .map_err(OrmError::from_db_error)
    }
}

impl Executor for deadpool_postgres::Client {
    async fn fetch(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        // Delegate to the deref target (ClientWrapper / tokio_postgres::Client).
        Executor::fetch(&**self, sql, params).await
    }

    async fn fetch_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<Option<Row>> {
        Executor::fetch_opt(&**self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        Executor::execute(&**self, sql, params).await
    }
}

impl Executor for deadpool_postgres::ClientWrapper {
    async fn fetch(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        Executor::fetch(&**self, sql, params).await
    }

    async fn fetch_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<Option<Row>> {
        Executor::fetch_opt(&**self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        Executor::execute(&**self, sql, params).await
    }
}

impl Executor for deadpool_postgres::Transaction<'_> {
    async fn fetch(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        Executor::fetch(&**self, sql, params).await
    }

    async fn fetch_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<Option<Row>> {
        Executor::fetch_opt(&**self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        Executor::execute(&**self, sql, params).await
    }
}

impl<E: Executor> Executor for &E {
    async fn fetch(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        (*self).fetch(sql, params).await
    }

    async fn fetch_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<Option<Row>> {
        (*self).fetch_opt(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        (*self).execute(sql, params).await
    }

    fn fetch_value(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<Option<Value>>> + Send {
        (*self).fetch_value(sql, params)
    }
}
