use super::{Factory, FactoryError, application_name, object_meta};
use canopy_api::labels::LabelSet;
use canopy_api::v1alpha1::{Application, Instance};
use gateway_api::apis::standard::httproutes::HTTPRoute;
use serde_json::json;

/// Routes the application's hostnames through its gateway to its service.
#[derive(Clone, Copy, Debug, Default)]
pub struct RouteFactory;

impl Factory<HTTPRoute> for RouteFactory {
    fn build(
        &self,
        application: &Application,
        instance: &Instance,
        labels: &LabelSet,
    ) -> Result<HTTPRoute, FactoryError> {
        let name = application_name(application)?.to_string();
        let metadata = object_meta(application, instance, name.clone(), labels)?;
        let spec = &application.spec;

        let manifest = json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "HTTPRoute",
            "metadata": metadata,
            "spec": {
                "parentRefs": [{
                    "name": spec.gateway_ref.name,
                    "namespace": spec.gateway_ref.namespace,
                }],
                "hostnames": spec.hostnames,
                "rules": [{
                    "backendRefs": [{
                        "name": name,
                        "port": spec.port,
                    }],
                }],
            },
        });

        serde_json::from_value(manifest).map_err(|source| FactoryError::Manifest {
            kind: "HTTPRoute",
            source,
        })
    }
}
