//! Postgres-backed permission and role stores.
//!
//! Schema: `migrations/0001_roles_and_permissions.sql`.
//!
//! The store contracts are synchronous; queries are driven on the ambient tokio
//! runtime via `block_in_place`, so callers must run inside a multi-threaded
//! runtime. Outside of one, or on a current-thread runtime, every operation
//! fails with [`StoreError::Unavailable`].

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::runtime::RuntimeFlavor;
use uuid::Uuid;

use rolegate_auth::{GrantRecord, Permission, PermissionStore, Role, RoleStore, StoreError};
use rolegate_core::{Entity, RoleId};

/// Drive `fut` to completion, leaving the query error for the caller to inspect.
fn run<F, T>(fut: F) -> Result<Result<T, sqlx::Error>, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| StoreError::Unavailable(format!("no tokio runtime: {e}")))?;
    if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
        return Err(StoreError::Unavailable(
            "postgres store requires a multi-threaded tokio runtime".to_string(),
        ));
    }
    Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
}

fn block_on<F, T>(fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    run(fut)?.map_err(unavailable)
}

fn unavailable(err: sqlx::Error) -> StoreError {
    tracing::warn!(error = %err, "postgres query failed");
    StoreError::Unavailable(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn grant_from_row(row: &PgRow) -> Result<GrantRecord, sqlx::Error> {
    let role_id: Uuid = row.try_get("role_id")?;
    let permission: String = row.try_get("permission_slug")?;
    let granted_at: DateTime<Utc> = row.try_get("granted_at")?;

    Ok(GrantRecord {
        role_id: RoleId::from_uuid(role_id),
        permission: Permission::new(permission),
        granted_at,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    let id: Uuid = row.try_get("id")?;
    let slug: String = row.try_get("slug")?;
    let name: String = row.try_get("name")?;
    Ok(Role::with_id(RoleId::from_uuid(id), slug, name))
}

/// Grant records in the `role_permissions` table.
#[derive(Debug, Clone)]
pub struct PostgresPermissionStore {
    pool: Arc<PgPool>,
}

impl PostgresPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

impl PermissionStore for PostgresPermissionStore {
    fn create(&self, role_id: RoleId, permission: &Permission) -> Result<GrantRecord, StoreError> {
        let pool = self.pool.clone();
        let result = run(async {
            sqlx::query(
                r#"
                INSERT INTO role_permissions (role_id, permission_slug, granted_at)
                VALUES ($1, $2, NOW())
                RETURNING role_id, permission_slug, granted_at
                "#,
            )
            .bind(role_id.as_uuid())
            .bind(permission.as_str())
            .fetch_one(&*pool)
            .await
        })?;

        match result {
            Ok(row) => grant_from_row(&row).map_err(unavailable),
            Err(e) if is_unique_violation(&e) => Err(StoreError::grant_exists(role_id, permission)),
            Err(e) => Err(unavailable(e)),
        }
    }

    fn find(&self, role_id: RoleId, permission: &Permission) -> Result<GrantRecord, StoreError> {
        let pool = self.pool.clone();
        let row = block_on(async {
            sqlx::query(
                r#"
                SELECT role_id, permission_slug, granted_at
                FROM role_permissions
                WHERE role_id = $1 AND permission_slug = $2
                "#,
            )
            .bind(role_id.as_uuid())
            .bind(permission.as_str())
            .fetch_optional(&*pool)
            .await
        })?;

        match row {
            Some(row) => grant_from_row(&row).map_err(unavailable),
            None => Err(StoreError::grant_not_found(role_id, permission)),
        }
    }

    fn list_by_role(&self, role_id: RoleId) -> Result<Vec<GrantRecord>, StoreError> {
        let pool = self.pool.clone();
        let rows = block_on(async {
            sqlx::query(
                r#"
                SELECT role_id, permission_slug, granted_at
                FROM role_permissions
                WHERE role_id = $1
                "#,
            )
            .bind(role_id.as_uuid())
            .fetch_all(&*pool)
            .await
        })?;

        rows.iter()
            .map(|row| grant_from_row(row).map_err(unavailable))
            .collect()
    }

    fn delete(&self, role_id: RoleId, permission: &Permission) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        let result = block_on(async {
            sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_slug = $2")
                .bind(role_id.as_uuid())
                .bind(permission.as_str())
                .execute(&*pool)
                .await
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::grant_not_found(role_id, permission));
        }
        Ok(())
    }

    fn delete_all_by_role(&self, role_id: RoleId) -> Result<Vec<GrantRecord>, StoreError> {
        let pool = self.pool.clone();
        let rows = block_on(async {
            sqlx::query(
                r#"
                DELETE FROM role_permissions
                WHERE role_id = $1
                RETURNING role_id, permission_slug, granted_at
                "#,
            )
            .bind(role_id.as_uuid())
            .fetch_all(&*pool)
            .await
        })?;

        rows.iter()
            .map(|row| grant_from_row(row).map_err(unavailable))
            .collect()
    }

    fn delete_all_by_permission(&self, permission: &Permission) -> Result<usize, StoreError> {
        let pool = self.pool.clone();
        let result = block_on(async {
            sqlx::query("DELETE FROM role_permissions WHERE permission_slug = $1")
                .bind(permission.as_str())
                .execute(&*pool)
                .await
        })?;

        Ok(result.rows_affected() as usize)
    }

    fn exists_for_permission(&self, permission: &Permission) -> Result<bool, StoreError> {
        let pool = self.pool.clone();
        let row = block_on(async {
            sqlx::query(
                "SELECT EXISTS (SELECT 1 FROM role_permissions WHERE permission_slug = $1) AS held",
            )
            .bind(permission.as_str())
            .fetch_one(&*pool)
            .await
        })?;

        row.try_get::<bool, _>("held").map_err(unavailable)
    }
}

/// Roles in the `roles` table.
#[derive(Debug, Clone)]
pub struct PostgresRoleStore {
    pool: Arc<PgPool>,
}

impl PostgresRoleStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

impl RoleStore for PostgresRoleStore {
    fn insert(&self, role: &Role) -> Result<Role, StoreError> {
        let pool = self.pool.clone();
        let id = RoleId::new();
        let result = run(async {
            sqlx::query("INSERT INTO roles (id, slug, name) VALUES ($1, $2, $3)")
                .bind(id.as_uuid())
                .bind(role.slug())
                .bind(role.name())
                .execute(&*pool)
                .await
        })?;

        match result {
            Ok(_) => Ok(Role::with_id(id, role.slug(), role.name())),
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::AlreadyExists(format!("role '{}'", role.slug())))
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    fn update(&self, role: &Role) -> Result<(), StoreError> {
        let id = role
            .id()
            .ok_or_else(|| StoreError::NotFound(format!("role '{}' has no id", role.slug())))?;

        let pool = self.pool.clone();
        let result = block_on(async {
            sqlx::query("UPDATE roles SET name = $2, updated_at = NOW() WHERE id = $1")
                .bind(id.as_uuid())
                .bind(role.name())
                .execute(&*pool)
                .await
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::role_not_found(id));
        }
        Ok(())
    }

    fn get(&self, role_id: RoleId) -> Result<Role, StoreError> {
        let pool = self.pool.clone();
        let row = block_on(async {
            sqlx::query("SELECT id, slug, name FROM roles WHERE id = $1")
                .bind(role_id.as_uuid())
                .fetch_optional(&*pool)
                .await
        })?;

        match row {
            Some(row) => role_from_row(&row).map_err(unavailable),
            None => Err(StoreError::role_not_found(role_id)),
        }
    }

    fn find_by_slug(&self, slug: &str) -> Result<Option<Role>, StoreError> {
        let pool = self.pool.clone();
        let row = block_on(async {
            sqlx::query("SELECT id, slug, name FROM roles WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&*pool)
                .await
        })?;

        row.map(|row| role_from_row(&row).map_err(unavailable))
            .transpose()
    }

    fn list(&self) -> Result<Vec<Role>, StoreError> {
        let pool = self.pool.clone();
        let rows = block_on(async {
            sqlx::query("SELECT id, slug, name FROM roles ORDER BY slug")
                .fetch_all(&*pool)
                .await
        })?;

        rows.iter()
            .map(|row| role_from_row(row).map_err(unavailable))
            .collect()
    }

    fn delete(&self, role_id: RoleId) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        let result = block_on(async {
            sqlx::query("DELETE FROM roles WHERE id = $1")
                .bind(role_id.as_uuid())
                .execute(&*pool)
                .await
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::role_not_found(role_id));
        }
        Ok(())
    }
}
