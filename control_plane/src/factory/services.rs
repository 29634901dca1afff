use super::{Factory, FactoryError, application_name, object_meta};
use canopy_api::labels::{LabelSet, instance_labels};
use canopy_api::v1alpha1::{Application, Instance};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// One service per application, selecting the pods of whichever instance it is built for.
///
/// The selector uses the instance's identity labels only, since pods never carry
/// the latest-instance label.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServiceFactory;

impl Factory<Service> for ServiceFactory {
    fn build(
        &self,
        application: &Application,
        instance: &Instance,
        labels: &LabelSet,
    ) -> Result<Service, FactoryError> {
        let name = application_name(application)?.to_string();
        let port = application.spec.port;

        Ok(Service {
            metadata: object_meta(application, instance, name, labels)?,
            spec: Some(ServiceSpec {
                selector: Some(instance_labels(instance)),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port,
                    target_port: Some(IntOrString::Int(port)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}
