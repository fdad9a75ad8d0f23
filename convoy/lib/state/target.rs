use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Target applications keyed by application uuid.
pub type TargetApps = BTreeMap<String, TargetApp>;

/// A target application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetApp {
    /// The numeric application id.
    pub id: i64,

    /// The application name.
    pub name: String,

    /// Releases keyed by commit, in document order. Only the first entry is treated as active.
    #[serde(default)]
    pub releases: IndexMap<String, TargetRelease>,

    /// Whether the application runs on the host OS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_host: Option<bool>,
}

/// A release of a target application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRelease {
    /// The numeric release id.
    pub id: i64,

    /// Services keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, TargetService>,

    /// Volume configurations keyed by volume name. Not validated.
    #[serde(default)]
    pub volumes: Map<String, Value>,

    /// Network configurations keyed by network name. Not validated.
    #[serde(default)]
    pub networks: Map<String, Value>,
}

/// A service of a target release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetService {
    /// The numeric service id.
    pub id: i64,

    /// The numeric id of the image the service runs.
    pub image_id: i64,

    /// The image reference.
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

    /// Any other composition fields, kept verbatim.
    #[serde(flatten)]
    pub composition: Map<String, Value>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TargetApp {
    /// The active release and its commit, if the application has any release.
    pub fn active_release(&self) -> Option<(&String, &TargetRelease)> {
        self.releases.first()
    }
}

impl TargetService {
    /// Whether the service should be running.
    pub fn running(&self) -> bool {
        self.running.unwrap_or(true)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
