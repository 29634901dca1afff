use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use tracing::{error, info};

pub mod objects;

pub async fn connect() -> Result<Client, kube::Error> {
    Client::try_default()
        .await
        .inspect(|client| {
            info!(
                "Connected to Kubernetes, default namespace '{}'",
                client.default_namespace()
            );
        })
        .inspect_err(|err| error!("Failed to create Kubernetes client: {}", err))
}

/// An API handle for `K` limited to `namespace`, or spanning the cluster when `None`.
pub fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}
