//! Generic schema versioning over a `___orcschema` metatable.
//!
//! A named schema carries an ordered list of upgrade scripts. On open the
//! metatable is created if absent (refusing a database that already holds
//! foreign tables), the stored name is checked against the expected one,
//! pending upgrades run in order with pre/post version assertions, and the
//! database is vacuumed.

use crate::error::{MetadataError, MetadataResult};
use sqlx::{Sqlite, SqlitePool, Transaction};

const METATABLE: &str = "___orcschema";

/// A named, versioned schema. Upgrade `n` moves the database from version
/// `n` to version `n + 1`.
pub struct Schema {
    pub name: &'static str,
    pub upgrades: &'static [&'static str],
}

impl Schema {
    /// Bring a freshly opened database up to the current schema version.
    pub async fn apply(&self, pool: &SqlitePool) -> MetadataResult<()> {
        if self.name.is_empty() {
            return Err(MetadataError::Internal("schema has no name".into()));
        }

        if !self.metatable_exists(pool).await? {
            let mut tx = pool.begin().await?;
            sqlx::query(
                "CREATE TABLE ___orcschema (
                     name TEXT NOT NULL,
                     version INTEGER NOT NULL,
                     meta_version INTEGER NOT NULL
                 )",
            )
            .execute(&mut *tx)
            .await?;
            sqlx::query("INSERT INTO ___orcschema (name, version, meta_version) VALUES (?, 0, 1)")
                .bind(self.name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        let (name, mut version) = schema_version(pool).await?;
        if name != self.name {
            return Err(MetadataError::Internal(format!(
                "database schema mismatch (got {name:?} want {:?})",
                self.name
            )));
        }

        while (version as usize) < self.upgrades.len() {
            let next = version + 1;
            self.apply_upgrade(pool, version, next).await?;
            version = next;
        }

        sqlx::query("VACUUM").execute(pool).await?;

        Ok(())
    }

    async fn metatable_exists(&self, pool: &SqlitePool) -> MetadataResult<bool> {
        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(pool)
                .await?;

        let saw_metatable = tables.iter().any(|t| t == METATABLE);
        let foreign: Vec<&String> = tables.iter().filter(|t| t.as_str() != METATABLE).collect();

        if !saw_metatable && !foreign.is_empty() {
            return Err(MetadataError::Internal(format!(
                "database has no {METATABLE} table but holds other tables: {foreign:?}"
            )));
        }

        Ok(saw_metatable)
    }

    async fn apply_upgrade(&self, pool: &SqlitePool, from: i64, to: i64) -> MetadataResult<()> {
        let script = self.upgrades[from as usize];

        let mut tx = pool.begin().await?;

        self.expect_version(&mut tx, from, "before upgrade script").await?;
        sqlx::raw_sql(script).execute(&mut *tx).await?;
        self.expect_version(&mut tx, from, "after upgrade script").await?;

        sqlx::query("UPDATE ___orcschema SET version = ?")
            .bind(to)
            .execute(&mut *tx)
            .await?;
        self.expect_version(&mut tx, to, "after version update").await?;

        tx.commit().await?;

        tracing::info!(schema = self.name, from, to, "applied schema upgrade");
        Ok(())
    }

    async fn expect_version(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        want: i64,
        when: &str,
    ) -> MetadataResult<()> {
        let (_, version): (String, i64) =
            sqlx::query_as("SELECT name, version FROM ___orcschema")
                .fetch_one(&mut **tx)
                .await?;
        if version != want {
            return Err(MetadataError::Internal(format!(
                "schema version expectation failed {when}: got {version}, want {want}"
            )));
        }
        Ok(())
    }
}

async fn schema_version(pool: &SqlitePool) -> MetadataResult<(String, i64)> {
    Ok(sqlx::query_as("SELECT name, version FROM ___orcschema")
        .fetch_one(pool)
        .await?)
}
