use super::{Factory, FactoryError, application_name, object_meta};
use canopy_api::constants::APP_CONTAINER_NAME;
use canopy_api::labels::{LabelSet, object_labels};
use canopy_api::v1alpha1::{Application, Instance};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    TCPSocketAction,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Workload names are unique per instance so that instances never share pods.
pub fn workload_name(application_name: &str, instance: &Instance) -> String {
    format!(
        "{}-{}-r{}",
        application_name, instance.hash_of_spec, instance.revision
    )
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeploymentFactory;

impl Factory<Deployment> for DeploymentFactory {
    fn build(
        &self,
        application: &Application,
        instance: &Instance,
        labels: &LabelSet,
    ) -> Result<Deployment, FactoryError> {
        let name = workload_name(application_name(application)?, instance);
        let spec = &application.spec;

        let env = spec
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect::<Vec<_>>();

        let resources = spec.resources.as_ref().map(|limits| {
            let quantities = [("cpu", &limits.cpu), ("memory", &limits.memory)]
                .into_iter()
                .filter_map(|(key, value)| {
                    value
                        .as_ref()
                        .map(|value| (key.to_string(), Quantity(value.clone())))
                })
                .collect::<BTreeMap<_, _>>();
            ResourceRequirements {
                limits: Some(quantities.clone()),
                requests: Some(quantities),
                ..Default::default()
            }
        });

        let container = Container {
            name: APP_CONTAINER_NAME.to_string(),
            image: Some(spec.image.clone()),
            image_pull_policy: Some(<&'static str>::from(spec.image_pull_policy).to_string()),
            ports: Some(vec![ContainerPort {
                name: Some("http".to_string()),
                container_port: spec.port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            env: (!env.is_empty()).then_some(env),
            resources,
            readiness_probe: Some(Probe {
                tcp_socket: Some(TCPSocketAction {
                    port: IntOrString::Int(spec.port),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(Deployment {
            metadata: object_meta(application, instance, name, labels)?,
            spec: Some(DeploymentSpec {
                replicas: Some(spec.replicas.unwrap_or(1)),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(object_labels(labels)),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}
