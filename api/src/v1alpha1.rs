use crate::labels::realm_id;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::IntoStaticStr;
use typed_builder::TypedBuilder;

/// Number of hex characters of the spec digest kept as the instance hash.
pub const HASH_LENGTH: usize = 10;

#[derive(
    Default, Deserialize, Serialize, Copy, Clone, Debug, JsonSchema, PartialEq, Eq, IntoStaticStr,
)]
#[serde(rename_all = "PascalCase")]
pub enum ImagePullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

fn default_port() -> i32 {
    8080
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    kind = "Application",
    group = "canopy.dev",
    version = "v1alpha1",
    namespaced,
    status = "ApplicationStatus",
    shortname = "app",
    singular = "application",
    plural = "applications"
)]
#[kube(derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default = "default_port")]
    pub port: i32,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceLimits>,

    #[serde(default)]
    pub image_pull_policy: ImagePullPolicy,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,

    pub gateway_ref: GatewayRef,
}

impl ApplicationSpec {
    /// Content hash of the spec, stable across serializations of equal specs.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_string(self)?;
        Ok(sha256::digest(canonical.as_str())
            .chars()
            .take(HASH_LENGTH)
            .collect())
    }
}

/// One versioned realization of an application's spec.
#[derive(TypedBuilder, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[builder(setter(into))]
    pub hash_of_spec: String,

    pub revision: u32,

    #[builder(setter(into))]
    pub realm_id: String,

    #[builder(setter(into))]
    pub namespace: String,

    #[builder(default)]
    #[serde(default)]
    pub is_latest_instance: bool,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub instances: Vec<Instance>,

    /// Hash of the spec the application is rolling out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
}

impl ApplicationStatus {
    /// The most recently (re)created instance with the given hash.
    pub fn instance_by_hash(&self, hash: &str) -> Option<&Instance> {
        self.instances
            .iter()
            .filter(|instance| instance.hash_of_spec == hash)
            .max_by_key(|instance| instance.revision)
    }

    pub fn instance(&self, hash: &str, revision: u32) -> Option<&Instance> {
        self.instances
            .iter()
            .find(|instance| instance.hash_of_spec == hash && instance.revision == revision)
    }

    /// The instance currently receiving traffic.
    pub fn latest_instance(&self) -> Option<&Instance> {
        self.instances
            .iter()
            .find(|instance| instance.is_latest_instance)
    }

    /// The instance realizing `spec_hash`. It becomes the latest instance once
    /// its workload is ready and the service has moved to it.
    pub fn desired_instance(&self) -> Option<&Instance> {
        self.instance_by_hash(self.spec_hash.as_deref()?)
    }

    pub fn next_revision(&self, hash: &str) -> u32 {
        self.instance_by_hash(hash)
            .map_or(1, |instance| instance.revision.saturating_add(1))
    }

    /// Records a newly created instance as the desired one. It does not become
    /// latest here.
    pub fn record(&mut self, mut instance: Instance) {
        self.instances.retain(|existing| {
            existing.hash_of_spec != instance.hash_of_spec || existing.revision != instance.revision
        });
        instance.is_latest_instance = false;
        self.spec_hash = Some(instance.hash_of_spec.clone());
        self.instances.push(instance);
    }

    /// Makes the instance `hash` r`revision` the only latest instance. Returns
    /// false when it is unknown or already latest.
    pub fn promote(&mut self, hash: &str, revision: u32) -> bool {
        let already_latest = match self.instance(hash, revision) {
            None => return false,
            Some(instance) => instance.is_latest_instance,
        };
        if already_latest {
            return false;
        }

        for instance in &mut self.instances {
            instance.is_latest_instance =
                instance.hash_of_spec == hash && instance.revision == revision;
        }
        true
    }
}

impl Application {
    pub fn realm_id(&self) -> Option<String> {
        let namespace = self.namespace()?;
        let name = self.metadata.name.as_deref()?;
        Some(realm_id(&namespace, name))
    }

    /// Builds, without recording it, the instance that would realize `hash` next.
    pub fn next_instance(&self, hash: &str) -> Option<Instance> {
        let namespace = self.namespace()?;
        let realm_id = self.realm_id()?;
        let revision = self
            .status
            .as_ref()
            .map_or(1, |status| status.next_revision(hash));

        Some(
            Instance::builder()
                .hash_of_spec(hash)
                .revision(revision)
                .realm_id(realm_id)
                .namespace(namespace)
                .build(),
        )
    }
}
