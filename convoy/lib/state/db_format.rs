use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{Sqlite, Transaction};

use crate::{
    images,
    store::{DatabaseApp, TargetStateCache},
    ConvoyError, ConvoyResult,
};

use super::{TargetApp, TargetApps, TargetRelease, TargetService};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A service as stored in the `services` column of an `app` row.
///
/// The service's own composition fields are kept as they are and the identifiers of the app,
/// release and image it belongs to are added next to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredService {
    /// The normalised image reference.
    pub image: String,

    /// Environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Container labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Whether the service should be running. Absent means running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,

    /// Contract metadata the service declares.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<Value>,

    /// Any other composition fields.
    #[serde(flatten)]
    pub composition: Map<String, Value>,

    /// The numeric application id.
    pub app_id: i64,

    /// The application uuid.
    pub app_uuid: String,

    /// The release id.
    pub release_id: i64,

    /// The release commit.
    pub commit: String,

    /// The numeric image id.
    pub image_id: i64,

    /// The numeric service id.
    pub service_id: i64,

    /// The service name.
    pub service_name: String,
}

/// The decoded contents of an `app` row, ready to build an application instance from.
#[derive(Debug, Clone, PartialEq)]
pub struct AppTargetConfig {
    /// The numeric application id.
    pub app_id: i64,

    /// The application uuid.
    pub uuid: Option<String>,

    /// The application name.
    pub name: String,

    /// Where the target state came from.
    pub source: String,

    /// The active release id.
    pub release_id: Option<i64>,

    /// The active release commit.
    pub commit: Option<String>,

    /// Whether the application runs on the host OS.
    pub is_host: bool,

    /// The services of the active release.
    pub services: Vec<StoredService>,

    /// Network configurations keyed by network name.
    pub networks: Map<String, Value>,

    /// Volume configurations keyed by volume name.
    pub volumes: Map<String, Value>,
}

/// Live application instances keyed by numeric application id.
pub type InstancedAppState<A> = BTreeMap<i64, A>;

/// Builds a live application instance from stored configuration.
///
/// Instances combine the stored configuration with the state of the container engine, which is
/// outside the scope of this crate.
#[async_trait]
pub trait AppInstantiator: Send + Sync {
    /// The application instance type.
    type App: Send;

    /// Builds an application from its stored target configuration.
    async fn from_target_state(&self, config: AppTargetConfig) -> ConvoyResult<Self::App>;
}

/// An [`AppInstantiator`] that hands back the decoded configuration unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredConfigInstantiator;

/// Maps between the nested target application tree and the flattened `app` rows.
pub struct DbFormat<I> {
    cache: Arc<TargetStateCache>,
    instantiator: I,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<I> DbFormat<I>
where
    I: AppInstantiator,
{
    /// Creates a translator over the given target state cache.
    pub fn new(cache: Arc<TargetStateCache>, instantiator: I) -> Self {
        Self {
            cache,
            instantiator,
        }
    }

    /// Loads and instantiates one application.
    ///
    /// Fails with [`ConvoyError::NotFound`] if no application with that id is stored.
    pub async fn get_app(&self, app_id: i64) -> ConvoyResult<I::App> {
        let app = self
            .cache
            .get_target_app(app_id)
            .await?
            .ok_or_else(|| ConvoyError::NotFound(format!("app with id {app_id}")))?;

        self.instantiator
            .from_target_state(app_target_config(app)?)
            .await
    }

    /// Loads and instantiates every stored application.
    pub async fn get_apps(&self) -> ConvoyResult<InstancedAppState<I::App>> {
        let mut apps = InstancedAppState::new();
        for app in self.cache.get_target_apps().await? {
            let app_id = app.app_id;
            let instance = self
                .instantiator
                .from_target_state(app_target_config(app)?)
                .await?;
            apps.insert(app_id, instance);
        }

        Ok(apps)
    }

    /// Replaces the stored target applications.
    pub async fn set_apps(
        &self,
        apps: &TargetApps,
        source: &str,
        trx: Option<&mut Transaction<'_, Sqlite>>,
    ) -> ConvoyResult<()> {
        let rows = to_database_apps(apps, source)?;
        self.cache.set_target_apps(&rows, trx).await
    }

    /// Rebuilds the target application tree from the stored rows.
    pub async fn get_target_json(&self) -> ConvoyResult<TargetApps> {
        from_database_apps(&self.cache.get_target_apps().await?)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Flattens target applications into `app` rows.
///
/// The first release of each application is taken as the active one.
pub fn to_database_apps(apps: &TargetApps, source: &str) -> ConvoyResult<Vec<DatabaseApp>> {
    apps.iter()
        .map(|(uuid, app)| to_database_app(uuid, app, source))
        .collect()
}

/// Rebuilds target applications from `app` rows.
///
/// Applications are keyed by uuid, or by their stringified numeric id when the row has no uuid.
pub fn from_database_apps(rows: &[DatabaseApp]) -> ConvoyResult<TargetApps> {
    rows.iter()
        .map(|row| {
            let key = row
                .uuid
                .clone()
                .unwrap_or_else(|| row.app_id.to_string());
            Ok((key, from_database_app(row)?))
        })
        .collect()
}

/// Decodes the JSON columns of an `app` row.
pub fn app_target_config(app: DatabaseApp) -> ConvoyResult<AppTargetConfig> {
    Ok(AppTargetConfig {
        services: serde_json::from_str(&app.services)?,
        networks: serde_json::from_str(&app.networks)?,
        volumes: serde_json::from_str(&app.volumes)?,
        app_id: app.app_id,
        uuid: app.uuid,
        name: app.name,
        source: app.source,
        release_id: app.release_id,
        commit: app.commit,
        is_host: app.is_host,
    })
}

fn to_database_app(uuid: &str, app: &TargetApp, source: &str) -> ConvoyResult<DatabaseApp> {
    let Some((commit, release)) = app.active_release() else {
        return Ok(DatabaseApp::builder()
            .app_id(app.id)
            .uuid(uuid)
            .source(source)
            .name(app.name.clone())
            .is_host(app.is_host.unwrap_or(false))
            .build());
    };

    let services = release
        .services
        .iter()
        .map(|(service_name, service)| {
            Ok(StoredService {
                image: images::normalise(&service.image)?,
                environment: service.environment.clone(),
                labels: service.labels.clone(),
                running: service.running,
                contract: service.contract.clone(),
                composition: service.composition.clone(),
                app_id: app.id,
                app_uuid: uuid.to_string(),
                release_id: release.id,
                commit: commit.clone(),
                image_id: service.image_id,
                service_id: service.id,
                service_name: service_name.clone(),
            })
        })
        .collect::<ConvoyResult<Vec<_>>>()?;

    Ok(DatabaseApp::builder()
        .app_id(app.id)
        .uuid(uuid)
        .source(source)
        .name(app.name.clone())
        .release_id(release.id)
        .commit(commit.clone())
        .is_host(app.is_host.unwrap_or(false))
        .services(serde_json::to_string(&services)?)
        .networks(serde_json::to_string(&release.networks)?)
        .volumes(serde_json::to_string(&release.volumes)?)
        .build())
}

fn from_database_app(row: &DatabaseApp) -> ConvoyResult<TargetApp> {
    let services: Vec<StoredService> = serde_json::from_str(&row.services)?;
    let services = services
        .into_iter()
        .map(|service| {
            (
                service.service_name,
                TargetService {
                    id: service.service_id,
                    image_id: service.image_id,
                    image: service.image,
                    environment: service.environment,
                    labels: service.labels,
                    running: service.running,
                    contract: service.contract,
                    composition: service.composition,
                },
            )
        })
        .collect();

    let mut releases = IndexMap::new();
    if let (Some(commit), Some(release_id)) = (&row.commit, row.release_id) {
        releases.insert(
            commit.clone(),
            TargetRelease {
                id: release_id,
                services,
                networks: serde_json::from_str(&row.networks)?,
                volumes: serde_json::from_str(&row.volumes)?,
            },
        );
    }

    Ok(TargetApp {
        id: row.app_id,
        name: row.name.clone(),
        releases,
        is_host: row.is_host.then_some(true),
    })
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl AppInstantiator for StoredConfigInstantiator {
    type App = AppTargetConfig;

    async fn from_target_state(&self, config: AppTargetConfig) -> ConvoyResult<AppTargetConfig> {
        Ok(config)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
