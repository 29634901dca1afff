use crate::factory::{Factory, FactoryError};
use crate::kubernetes::objects::{ObjectRef, ObjectRefError};
use async_trait::async_trait;
use canopy_api::constants::FIELD_MANAGER;
use canopy_api::labels::LabelSet;
use canopy_api::v1alpha1::{Application, Instance};
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::marker::PhantomData;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to build object: {0}")]
    Factory(#[from] FactoryError),
    #[error("Built object is invalid: {0}")]
    InvalidObject(#[from] ObjectRefError),
    #[error("Failed to apply object: {0}")]
    Kube(#[from] kube::Error),
}

/// Creates or replaces the object of kind `K` belonging to an instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn publish(
        &self,
        application: &Application,
        instance: &Instance,
        labels: &LabelSet,
    ) -> Result<(), PublishError>;
}

/// Server-side apply as the controller's field manager, taking over fields
/// another manager changed.
pub fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

/// Builds the object an instance needs and the reference it is applied under.
pub fn applied_object<K, F>(
    factory: &F,
    application: &Application,
    instance: &Instance,
    labels: &LabelSet,
) -> Result<(K, ObjectRef), PublishError>
where
    K: Resource<DynamicType = ()>,
    F: Factory<K>,
{
    let object = factory.build(application, instance, labels)?;
    let object_ref = ObjectRef::for_object(&object)?;
    Ok((object, object_ref))
}

/// Publishes factory output with server-side apply.
pub struct KubePublisher<K, F> {
    client: Client,
    factory: F,
    kind: PhantomData<fn() -> K>,
}

impl<K, F> KubePublisher<K, F>
where
    F: Factory<K>,
{
    pub fn new(client: Client, factory: F) -> Self {
        Self {
            client,
            factory,
            kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K, F> Publisher<K> for KubePublisher<K, F>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
    F: Factory<K>,
{
    async fn publish(
        &self,
        application: &Application,
        instance: &Instance,
        labels: &LabelSet,
    ) -> Result<(), PublishError> {
        let (object, object_ref) = applied_object(&self.factory, application, instance, labels)?;
        debug!("Applying {}", object_ref);

        let api: Api<K> = Api::namespaced(self.client.clone(), object_ref.namespace());
        api.patch(
            object_ref.name(),
            &apply_params(),
            &Patch::Apply(&object),
        )
        .await?;

        info!(
            "Applied {} for instance {} r{}",
            object_ref, instance.hash_of_spec, instance.revision
        );
        Ok(())
    }
}
