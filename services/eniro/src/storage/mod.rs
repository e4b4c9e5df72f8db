//! SQLite storage provider.
//!
//! All SQL lives in a [`Queries`] structure so another dialect can override
//! only the statements that differ. Methods wrap each statement in a
//! `db.query` span.

mod migrations;
mod models;

pub use migrations::{SchemaMigration, between, latest_version};
pub use models::{ApprovedDevice, Device, DeviceStatus, Entry};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{Instrument, info, info_span};

use crate::clock::unix_now;

/// Parameterized SQL statements for one dialect.
#[derive(Debug, Clone)]
pub struct Queries {
    pub get_latest_schema_version: &'static str,
    pub insert_migration: &'static str,

    pub list_entries: &'static str,
    pub get_entry: &'static str,
    pub create_entry: &'static str,
    pub delete_entry: &'static str,

    pub create_nonce: &'static str,
    pub exists_nonce: &'static str,
    pub consume_nonce: &'static str,
    pub expire_nonces: &'static str,

    pub create_device: &'static str,
    pub get_device: &'static str,
    pub list_devices: &'static str,
    pub update_device_status: &'static str,
    pub prune_devices: &'static str,

    pub create_approved_device: &'static str,
    pub get_approved_device: &'static str,
    pub list_approved_by_device: &'static str,
    pub revoke_approved_device: &'static str,
}

fn sqlite_queries() -> Queries {
    Queries {
        get_latest_schema_version: "SELECT COALESCE(MAX(version_after), 0) FROM migrations",
        insert_migration: "INSERT INTO migrations (applied_at, version_before, version_after, application_version) VALUES (?, ?, ?, ?)",

        list_entries: "SELECT id, name, calendar_url, created_at, deleted_at FROM entries WHERE deleted_at IS NULL ORDER BY created_at DESC",
        get_entry: "SELECT id, name, calendar_url, created_at, deleted_at FROM entries WHERE id = ? AND deleted_at IS NULL",
        create_entry: "INSERT INTO entries (name, calendar_url, created_at) VALUES (?, ?, ?)",
        delete_entry: "UPDATE entries SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",

        create_nonce: "INSERT INTO nonces (nonce, expires_at) VALUES (?, ?) ON CONFLICT (nonce) DO UPDATE SET expires_at = excluded.expires_at",
        exists_nonce: "SELECT COUNT(1) AS present FROM nonces WHERE nonce = ? AND expires_at > ?",
        consume_nonce: "DELETE FROM nonces WHERE nonce = ? RETURNING expires_at",
        expire_nonces: "DELETE FROM nonces WHERE expires_at <= ?",

        create_device: "INSERT INTO devices (device_id, client_ip, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        get_device: "SELECT device_id, client_ip, status, created_at, updated_at, approved_by FROM devices WHERE device_id = ?",
        list_devices: "SELECT device_id, client_ip, status, created_at, updated_at, approved_by FROM devices WHERE status = ? ORDER BY created_at DESC",
        update_device_status: "UPDATE devices SET status = ?, updated_at = ?, approved_by = ? WHERE device_id = ?",
        prune_devices: "DELETE FROM devices WHERE status = ? AND created_at < ?",

        create_approved_device: "INSERT INTO approved_devices (device_id, entry_id, approved_by, approved_at) VALUES (?, ?, ?, ?)",
        get_approved_device: "SELECT id, device_id, entry_id, approved_by, approved_at, revoked_at FROM approved_devices WHERE device_id = ? AND entry_id = ? AND revoked_at IS NULL",
        list_approved_by_device: "SELECT id, device_id, entry_id, approved_by, approved_at, revoked_at FROM approved_devices WHERE device_id = ? AND revoked_at IS NULL ORDER BY approved_at DESC",
        revoke_approved_device: "UPDATE approved_devices SET revoked_at = ? WHERE device_id = ? AND entry_id = ? AND revoked_at IS NULL",
    }
}

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = operation,
        db.statement = statement
    )
}

pub struct Provider {
    pool: SqlitePool,
    queries: Queries,
}

impl Provider {
    /// Open (creating if missing) the SQLite database at `path`.
    ///
    /// `:memory:` databases are capped at a single connection so every
    /// acquire sees the same data.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be established.
    pub async fn connect(path: &str) -> Result<Self> {
        let in_memory = path == ":memory:";
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new().filename(path).create_if_missing(true)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database at {path}"))?;

        Ok(Self {
            pool,
            queries: sqlite_queries(),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Current schema version; 0 when the migrations table does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on query failure.
    pub async fn schema_version(&self) -> Result<i64> {
        let query = "SELECT COUNT(1) AS present FROM sqlite_master WHERE type = 'table' AND name = 'migrations'";
        let row = sqlx::query(query)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to inspect schema")?;
        let present: i64 = row.get("present");
        if present == 0 {
            return Ok(0);
        }

        let row = sqlx::query(self.queries.get_latest_schema_version)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", self.queries.get_latest_schema_version))
            .await
            .context("failed to read schema version")?;
        Ok(row.get(0))
    }

    /// Apply pending migrations up to the latest embedded version.
    ///
    /// Each migration runs in a transaction together with its bookkeeping
    /// row, so a failed migration leaves the version unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration statement or its record fails.
    pub async fn migrate(&self) -> Result<()> {
        let current = self.schema_version().await?;
        let target = latest_version();
        if current == target {
            info!(version = current, "database schema is up to date");
            return Ok(());
        }

        for migration in between(current, target) {
            info!(
                version = migration.version,
                name = migration.name,
                "applying migration"
            );
            self.apply_migration(&migration).await?;
        }
        Ok(())
    }

    async fn apply_migration(&self, migration: &SchemaMigration) -> Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin migration transaction")?;

        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to execute migration {:04}_{}", migration.version, migration.name))?;

        sqlx::query(self.queries.insert_migration)
            .bind(unix_now())
            .bind(migration.before())
            .bind(migration.after())
            .bind(env!("CARGO_PKG_VERSION"))
            .execute(&mut *tx)
            .await
            .context("failed to record migration")?;

        tx.commit().await.context("failed to commit migration")?;
        Ok(())
    }

    // --- Entries ---

    /// # Errors
    /// Returns an error on query failure.
    pub async fn list_entries(&self) -> Result<Vec<Entry>> {
        let rows = sqlx::query(self.queries.list_entries)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", self.queries.list_entries))
            .await
            .context("failed to list entries")?;
        Ok(rows.iter().map(entry_from_row).collect())
    }

    /// # Errors
    /// Returns an error on query failure.
    pub async fn get_entry(&self, id: i64) -> Result<Option<Entry>> {
        let row = sqlx::query(self.queries.get_entry)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", self.queries.get_entry))
            .await
            .context("failed to get entry")?;
        Ok(row.as_ref().map(entry_from_row))
    }

    /// Insert an entry and return its id.
    ///
    /// # Errors
    /// Returns an error on query failure (including a name conflict among
    /// non-deleted entries).
    pub async fn create_entry(&self, name: &str, calendar_url: Option<&str>) -> Result<i64> {
        let result = sqlx::query(self.queries.create_entry)
            .bind(name)
            .bind(calendar_url)
            .bind(unix_now())
            .execute(&self.pool)
            .instrument(query_span("INSERT", self.queries.create_entry))
            .await
            .context("failed to create entry")?;
        Ok(result.last_insert_rowid())
    }

    /// Soft-delete an entry.
    ///
    /// # Errors
    /// Returns an error when the entry does not exist or is already deleted.
    pub async fn delete_entry(&self, id: i64) -> Result<()> {
        let result = sqlx::query(self.queries.delete_entry)
            .bind(unix_now())
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", self.queries.delete_entry))
            .await
            .context("failed to delete entry")?;
        anyhow::ensure!(
            result.rows_affected() > 0,
            "entry not found or already deleted: {id}"
        );
        Ok(())
    }

    // --- Nonces ---

    /// Insert or refresh a nonce row.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn create_nonce(&self, nonce: &str, expires_at: i64) -> Result<(), sqlx::Error> {
        sqlx::query(self.queries.create_nonce)
            .bind(nonce)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", self.queries.create_nonce))
            .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error on query failure.
    pub async fn exists_nonce(&self, nonce: &str, now: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(self.queries.exists_nonce)
            .bind(nonce)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", self.queries.exists_nonce))
            .await?;
        let present: i64 = row.get("present");
        Ok(present > 0)
    }

    /// Delete a nonce row, returning its expiry when one existed.
    ///
    /// The single `DELETE ... RETURNING` keeps consumption linearizable:
    /// two racing callers cannot both observe the row.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn consume_nonce(&self, nonce: &str) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(self.queries.consume_nonce)
            .bind(nonce)
            .fetch_optional(&self.pool)
            .instrument(query_span("DELETE", self.queries.consume_nonce))
            .await?;
        Ok(row.map(|row| row.get("expires_at")))
    }

    /// # Errors
    /// Returns an error on query failure.
    pub async fn expire_nonces(&self, now: i64) -> Result<(), sqlx::Error> {
        sqlx::query(self.queries.expire_nonces)
            .bind(now)
            .execute(&self.pool)
            .instrument(query_span("DELETE", self.queries.expire_nonces))
            .await?;
        Ok(())
    }

    // --- Devices ---

    /// # Errors
    /// Returns an error on query failure.
    pub async fn create_device(&self, device_id: &str, client_ip: &str) -> Result<Device> {
        let now = unix_now();
        sqlx::query(self.queries.create_device)
            .bind(device_id)
            .bind(client_ip)
            .bind(DeviceStatus::Pending.as_str())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .instrument(query_span("INSERT", self.queries.create_device))
            .await
            .context("failed to create device")?;

        Ok(Device {
            device_id: device_id.to_string(),
            client_ip: client_ip.to_string(),
            status: DeviceStatus::Pending,
            created_at: now,
            updated_at: now,
            approved_by: None,
        })
    }

    /// # Errors
    /// Returns an error on query failure.
    pub async fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        let row = sqlx::query(self.queries.get_device)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", self.queries.get_device))
            .await
            .context("failed to get device")?;
        row.as_ref().map(device_from_row).transpose()
    }

    /// # Errors
    /// Returns an error on query failure.
    pub async fn list_devices(&self, status: DeviceStatus) -> Result<Vec<Device>> {
        let rows = sqlx::query(self.queries.list_devices)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", self.queries.list_devices))
            .await
            .context("failed to list devices")?;
        rows.iter().map(device_from_row).collect()
    }

    /// # Errors
    /// Returns an error when the device does not exist.
    pub async fn update_device_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        approved_by: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(self.queries.update_device_status)
            .bind(status.as_str())
            .bind(unix_now())
            .bind(approved_by)
            .bind(device_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", self.queries.update_device_status))
            .await
            .context("failed to update device status")?;
        anyhow::ensure!(result.rows_affected() > 0, "device not found: {device_id}");
        Ok(())
    }

    /// Remove devices of `status` created before `older_than`.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn prune_devices(&self, older_than: i64, status: DeviceStatus) -> Result<u64> {
        let result = sqlx::query(self.queries.prune_devices)
            .bind(status.as_str())
            .bind(older_than)
            .execute(&self.pool)
            .instrument(query_span("DELETE", self.queries.prune_devices))
            .await
            .context("failed to prune devices")?;
        Ok(result.rows_affected())
    }

    // --- Approved devices ---

    /// # Errors
    /// Returns an error on query failure (including an active duplicate).
    pub async fn create_approved_device(
        &self,
        device_id: &str,
        entry_id: i64,
        approved_by: &str,
    ) -> Result<()> {
        sqlx::query(self.queries.create_approved_device)
            .bind(device_id)
            .bind(entry_id)
            .bind(approved_by)
            .bind(unix_now())
            .execute(&self.pool)
            .instrument(query_span("INSERT", self.queries.create_approved_device))
            .await
            .context("failed to create approved device")?;
        Ok(())
    }

    /// Active (unrevoked) approval for a device/entry pair.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn get_approved_device(
        &self,
        device_id: &str,
        entry_id: i64,
    ) -> Result<Option<ApprovedDevice>> {
        let row = sqlx::query(self.queries.get_approved_device)
            .bind(device_id)
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", self.queries.get_approved_device))
            .await
            .context("failed to get approved device")?;
        Ok(row.as_ref().map(approved_device_from_row))
    }

    /// Active approvals held by a device, newest first.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn list_approved_by_device(&self, device_id: &str) -> Result<Vec<ApprovedDevice>> {
        let rows = sqlx::query(self.queries.list_approved_by_device)
            .bind(device_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", self.queries.list_approved_by_device))
            .await
            .context("failed to list approved devices")?;
        Ok(rows.iter().map(approved_device_from_row).collect())
    }

    /// # Errors
    /// Returns an error when no active approval exists for the pair.
    pub async fn revoke_approved_device(&self, device_id: &str, entry_id: i64) -> Result<()> {
        let result = sqlx::query(self.queries.revoke_approved_device)
            .bind(unix_now())
            .bind(device_id)
            .bind(entry_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", self.queries.revoke_approved_device))
            .await
            .context("failed to revoke approved device")?;
        anyhow::ensure!(
            result.rows_affected() > 0,
            "approved device not found: device_id={device_id}, entry_id={entry_id}"
        );
        Ok(())
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Entry {
    Entry {
        id: row.get("id"),
        name: row.get("name"),
        calendar_url: row.get("calendar_url"),
        created_at: row.get("created_at"),
        deleted_at: row.get("deleted_at"),
    }
}

fn device_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Device> {
    let status: String = row.get("status");
    Ok(Device {
        device_id: row.get("device_id"),
        client_ip: row.get("client_ip"),
        status: status
            .parse()
            .map_err(|err: String| anyhow::anyhow!(err))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        approved_by: row.get("approved_by"),
    })
}

fn approved_device_from_row(row: &sqlx::sqlite::SqliteRow) -> ApprovedDevice {
    ApprovedDevice {
        id: row.get("id"),
        device_id: row.get("device_id"),
        entry_id: row.get("entry_id"),
        approved_by: row.get("approved_by"),
        approved_at: row.get("approved_at"),
        revoked_at: row.get("revoked_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    async fn provider() -> Result<Provider> {
        let provider = Provider::connect(":memory:").await?;
        provider.migrate().await?;
        Ok(provider)
    }

    #[tokio::test]
    async fn migrate_is_idempotent() -> Result<()> {
        let provider = provider().await?;
        assert_eq!(provider.schema_version().await?, latest_version());
        provider.migrate().await?;
        assert_eq!(provider.schema_version().await?, latest_version());
        Ok(())
    }

    #[tokio::test]
    async fn entry_lifecycle() -> Result<()> {
        let provider = provider().await?;
        let id = provider.create_entry("Ag C331", None).await?;

        let entry = provider.get_entry(id).await?.expect("entry exists");
        assert_eq!(entry.name, "Ag C331");
        assert!(entry.deleted_at.is_none());

        // Unique among non-deleted rows.
        assert!(provider.create_entry("Ag C331", None).await.is_err());

        provider.delete_entry(id).await?;
        assert!(provider.get_entry(id).await?.is_none());
        assert!(provider.delete_entry(id).await.is_err());

        // The name is free again after the soft delete.
        provider.create_entry("Ag C331", None).await?;
        Ok(())
    }

    #[tokio::test]
    async fn nonce_consume_returns_expiry_once() -> Result<()> {
        let provider = provider().await?;
        provider.create_nonce("nonce", unix_now() + 60).await?;
        assert!(provider.exists_nonce("nonce", unix_now()).await?);

        let expiry = provider.consume_nonce("nonce").await?;
        assert!(expiry.is_some());
        assert_eq!(provider.consume_nonce("nonce").await?, None);
        assert!(!provider.exists_nonce("nonce", unix_now()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn nonce_put_refreshes_expiry() -> Result<()> {
        let provider = provider().await?;
        provider.create_nonce("nonce", 100).await?;
        provider.create_nonce("nonce", 200).await?;
        assert_eq!(provider.consume_nonce("nonce").await?, Some(200));
        Ok(())
    }

    #[tokio::test]
    async fn expired_nonces_are_swept() -> Result<()> {
        let provider = provider().await?;
        let now = unix_now();
        provider.create_nonce("past", now - 5).await?;
        provider.create_nonce("future", now + 60).await?;

        provider.expire_nonces(now).await?;
        assert_eq!(provider.consume_nonce("past").await?, None);
        assert!(provider.exists_nonce("future", now).await?);
        Ok(())
    }

    #[tokio::test]
    async fn device_lifecycle() -> Result<()> {
        let provider = provider().await?;
        let device = provider.create_device("device-1", "192.0.2.7").await?;
        assert_eq!(device.status, DeviceStatus::Pending);

        let fetched = provider.get_device("device-1").await?.expect("device exists");
        assert_eq!(fetched.client_ip, "192.0.2.7");

        provider
            .update_device_status("device-1", DeviceStatus::Approved, Some("admin@host"))
            .await?;
        let fetched = provider.get_device("device-1").await?.expect("device exists");
        assert_eq!(fetched.status, DeviceStatus::Approved);
        assert_eq!(fetched.approved_by.as_deref(), Some("admin@host"));

        assert!(
            provider
                .update_device_status("missing", DeviceStatus::Rejected, None)
                .await
                .is_err()
        );
        Ok(())
    }

    #[tokio::test]
    async fn approved_device_uniqueness_and_revocation() -> Result<()> {
        let provider = provider().await?;
        let entry_id = provider.create_entry("door", None).await?;
        provider.create_device("device-1", "192.0.2.7").await?;

        provider
            .create_approved_device("device-1", entry_id, "admin@host")
            .await?;
        // Active duplicate is rejected by the partial unique index.
        assert!(
            provider
                .create_approved_device("device-1", entry_id, "admin@host")
                .await
                .is_err()
        );

        assert!(provider.get_approved_device("device-1", entry_id).await?.is_some());
        provider.revoke_approved_device("device-1", entry_id).await?;
        assert!(provider.get_approved_device("device-1", entry_id).await?.is_none());
        assert!(provider.list_approved_by_device("device-1").await?.is_empty());

        // Revocation frees the pair for a fresh approval.
        provider
            .create_approved_device("device-1", entry_id, "admin@host")
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn prune_removes_only_matching_status() -> Result<()> {
        let provider = provider().await?;
        provider.create_device("pending-old", "192.0.2.1").await?;
        provider.create_device("approved-old", "192.0.2.2").await?;
        provider
            .update_device_status("approved-old", DeviceStatus::Approved, Some("admin"))
            .await?;

        let removed = provider
            .prune_devices(unix_now() + 10, DeviceStatus::Pending)
            .await?;
        assert_eq!(removed, 1);
        assert!(provider.get_device("pending-old").await?.is_none());
        assert!(provider.get_device("approved-old").await?.is_some());
        Ok(())
    }
}
