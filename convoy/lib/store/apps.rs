use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite, SqliteConnection, Transaction};
use tokio::sync::RwLock;
use typed_builder::TypedBuilder;

use crate::ConvoyResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A flattened application row as stored in the `app` table.
///
/// `services`, `networks` and `volumes` hold JSON text.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct DatabaseApp {
    /// The row id, once stored.
    #[builder(default)]
    pub id: Option<i64>,

    /// The numeric application id.
    pub app_id: i64,

    /// The application uuid.
    #[builder(default, setter(strip_option, into))]
    pub uuid: Option<String>,

    /// Where the target state came from.
    #[builder(setter(into))]
    pub source: String,

    /// The application name.
    #[builder(setter(into))]
    pub name: String,

    /// The id of the active release.
    #[builder(default, setter(strip_option))]
    pub release_id: Option<i64>,

    /// The commit of the active release.
    #[builder(default, setter(strip_option, into))]
    pub commit: Option<String>,

    /// Whether the application runs on the host OS.
    #[builder(default)]
    pub is_host: bool,

    /// The JSON array of stored services.
    #[builder(default = "[]".to_string(), setter(into))]
    pub services: String,

    /// The JSON object of network configurations.
    #[builder(default = "{}".to_string(), setter(into))]
    pub networks: String,

    /// The JSON object of volume configurations.
    #[builder(default = "{}".to_string(), setter(into))]
    pub volumes: String,
}

/// The persisted target applications with an in-memory read cache.
///
/// The cache is filled on first read and dropped on every write. A write made inside a caller's
/// transaction leaves the cache bypassed until [`TargetStateCache::invalidate`] is called, since
/// only the caller knows when that transaction commits or rolls back.
#[derive(Debug)]
pub struct TargetStateCache {
    pool: Pool<Sqlite>,
    cache: RwLock<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    apps: Option<Vec<DatabaseApp>>,

    /// Set while a write in a caller-owned transaction may still be uncommitted.
    pending_write: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TargetStateCache {
    /// Creates a cache over the given database.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            cache: RwLock::new(CacheState::default()),
        }
    }

    /// Returns the stored row of the given application, if any.
    pub async fn get_target_app(&self, app_id: i64) -> ConvoyResult<Option<DatabaseApp>> {
        Ok(self
            .get_target_apps()
            .await?
            .into_iter()
            .find(|app| app.app_id == app_id))
    }

    /// Returns every stored application row.
    pub async fn get_target_apps(&self) -> ConvoyResult<Vec<DatabaseApp>> {
        if let Some(apps) = self.cache.read().await.apps.as_ref() {
            return Ok(apps.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(apps) = cache.apps.as_ref() {
            return Ok(apps.clone());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, app_id, uuid, source, name, release_id, commit_hash,
                   is_host, services, networks, volumes
            FROM app
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let apps = rows
            .iter()
            .map(app_from_row)
            .collect::<ConvoyResult<Vec<_>>>()?;
        if !cache.pending_write {
            cache.apps = Some(apps.clone());
        }

        Ok(apps)
    }

    /// Replaces every stored application row with `apps`.
    ///
    /// Runs inside `trx` when one is supplied, otherwise inside a transaction of its own. After a
    /// write inside `trx`, reads go to the database until [`TargetStateCache::invalidate`] is
    /// called once the transaction has ended.
    pub async fn set_target_apps(
        &self,
        apps: &[DatabaseApp],
        trx: Option<&mut Transaction<'_, Sqlite>>,
    ) -> ConvoyResult<()> {
        let mut cache = self.cache.write().await;
        cache.apps = None;

        match trx {
            Some(trx) => {
                cache.pending_write = true;
                replace_apps(&mut **trx, apps).await?;
            }
            None => {
                let mut tx = self.pool.begin().await?;
                replace_apps(&mut *tx, apps).await?;
                tx.commit().await?;
                cache.pending_write = false;
            }
        }

        Ok(())
    }

    /// Drops the cached rows and resumes caching.
    ///
    /// Call once a transaction passed to [`TargetStateCache::set_target_apps`] has committed or
    /// rolled back.
    pub async fn invalidate(&self) {
        *self.cache.write().await = CacheState::default();
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn replace_apps(conn: &mut SqliteConnection, apps: &[DatabaseApp]) -> ConvoyResult<()> {
    sqlx::query("DELETE FROM app").execute(&mut *conn).await?;

    for app in apps {
        sqlx::query(
            r#"
            INSERT INTO app (
                app_id, uuid, source, name, release_id, commit_hash,
                is_host, services, networks, volumes
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(app.app_id)
        .bind(&app.uuid)
        .bind(&app.source)
        .bind(&app.name)
        .bind(app.release_id)
        .bind(&app.commit)
        .bind(app.is_host)
        .bind(&app.services)
        .bind(&app.networks)
        .bind(&app.volumes)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

fn app_from_row(row: &SqliteRow) -> ConvoyResult<DatabaseApp> {
    Ok(DatabaseApp {
        id: row.try_get("id")?,
        app_id: row.try_get("app_id")?,
        uuid: row.try_get("uuid")?,
        source: row.try_get("source")?,
        name: row.try_get("name")?,
        release_id: row.try_get("release_id")?,
        commit: row.try_get("commit_hash")?,
        is_host: row.try_get("is_host")?,
        services: row.try_get("services")?,
        networks: row.try_get("networks")?,
        volumes: row.try_get("volumes")?,
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
