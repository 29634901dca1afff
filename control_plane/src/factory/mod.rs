mod deployments;
mod routes;
mod services;

pub use deployments::{DeploymentFactory, workload_name};
pub use routes::RouteFactory;
pub use services::ServiceFactory;

use canopy_api::labels::{LabelSet, object_labels};
use canopy_api::v1alpha1::{Application, Instance};
use kube::Resource;
use kube::api::ObjectMeta;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("Application is missing its {0}")]
    MissingMetadata(&'static str),
    #[error("Invalid {kind} manifest: {source}")]
    Manifest {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Builds the desired state of one object kind for an instance of an application.
pub trait Factory<K>: Send + Sync {
    fn build(
        &self,
        application: &Application,
        instance: &Instance,
        labels: &LabelSet,
    ) -> Result<K, FactoryError>;
}

fn application_name(application: &Application) -> Result<&str, FactoryError> {
    application
        .meta()
        .name
        .as_deref()
        .ok_or(FactoryError::MissingMetadata("name"))
}

/// Metadata shared by every created object: instance labels and a controller
/// owner reference back to the application.
fn object_meta(
    application: &Application,
    instance: &Instance,
    name: String,
    labels: &LabelSet,
) -> Result<ObjectMeta, FactoryError> {
    let owner = application
        .controller_owner_ref(&())
        .ok_or(FactoryError::MissingMetadata("uid"))?;

    Ok(ObjectMeta {
        name: Some(name),
        namespace: Some(instance.namespace.clone()),
        labels: Some(object_labels(labels)),
        owner_references: Some(vec![owner]),
        ..Default::default()
    })
}
