#![warn(
    clippy::pedantic,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::needless_pass_by_value,
    clippy::needless_continue,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::struct_field_names
)]

mod alerts;
mod cli;
mod controllers;
mod driver;
mod factory;
mod health;
mod kubernetes;
mod listener;
mod options;
mod probes;
mod publisher;
mod status;
mod triggers;

use crate::alerts::EventAlertSink;
use crate::cli::{Cli, Command};
use crate::controllers::{RouteController, ServiceController, WorkloadController};
use crate::driver::Driver;
use crate::factory::{DeploymentFactory, RouteFactory, ServiceFactory};
use crate::health::{HealthPoller, KubePodLister};
use crate::kubernetes::{connect, scoped_api};
use crate::listener::ResourceListener;
use crate::options::Options;
use crate::probes::{ProbeState, ProbesError, spawn_probes};
use crate::publisher::KubePublisher;
use crate::status::KubeStatusWriter;
use crate::triggers::TriggerSource;
use canopy_api::constants::{FIELD_MANAGER, REALM_LABEL};
use canopy_api::v1alpha1::Application;
use canopy_core::crypto::init_crypto;
use canopy_core::instrumentation::init_instrumentation;
use canopy_core::task::Builder as TaskBuilder;
use clap::Parser;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::CustomResourceExt;
use kube::runtime::events::Reporter;
use kube::runtime::watcher;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum MainError {
    #[error("Failed to render CRD: {0}")]
    Crd(#[from] serde_yaml::Error),
    #[error("Failed to connect to Kubernetes: {0}")]
    Kubernetes(#[from] kube::Error),
    #[error("Failed to start probes: {0}")]
    Probes(#[from] ProbesError),
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), MainError> {
    let args = Cli::parse();

    if args.command() == Command::Crdgen {
        print!("{}", serde_yaml::to_string(&Application::crd())?);
        return Ok(());
    }

    init_crypto();
    init_instrumentation(args.log_format());

    let options = Arc::new(Options::default());
    let client = connect().await?;
    let namespace = args.namespace().as_deref();

    let task_builder = TaskBuilder::default();
    task_builder.shutdown_on_ctrl_c();
    let token = task_builder.cancellation_token();

    let (trigger_tx, trigger_rx) = mpsc::channel(options.trigger_channel_capacity());
    let owned = || watcher::Config::default().labels(REALM_LABEL);

    let applications = ResourceListener::<Application>::new(
        scoped_api(client.clone(), namespace),
        watcher::Config::default(),
        TriggerSource::Parent,
        trigger_tx.clone(),
        options.clone(),
        token.child_token(),
    );
    let workloads = ResourceListener::<Deployment>::new(
        scoped_api(client.clone(), namespace),
        owned(),
        TriggerSource::owned_by::<Application>(),
        trigger_tx.clone(),
        options.clone(),
        token.child_token(),
    );
    let services = ResourceListener::<Service>::new(
        scoped_api(client.clone(), namespace),
        owned(),
        TriggerSource::owned_by::<Application>(),
        trigger_tx.clone(),
        options.clone(),
        token.child_token(),
    );
    let routes = ResourceListener::<HTTPRoute>::new(
        scoped_api(client.clone(), namespace),
        owned(),
        TriggerSource::owned_by::<Application>(),
        trigger_tx,
        options.clone(),
        token.child_token(),
    );

    applications.start(&task_builder);
    workloads.start(&task_builder);
    services.start(&task_builder);
    routes.start(&task_builder);

    let driver = Driver::new(
        options.clone(),
        applications.cache().clone(),
        WorkloadController::new(
            workloads.cache().clone(),
            Arc::new(KubePublisher::<Deployment, _>::new(
                client.clone(),
                DeploymentFactory,
            )),
        ),
        ServiceController::new(
            workloads.cache().clone(),
            services.cache().clone(),
            Arc::new(KubePublisher::<Service, _>::new(
                client.clone(),
                ServiceFactory,
            )),
        ),
        RouteController::new(
            routes.cache().clone(),
            Arc::new(KubePublisher::<HTTPRoute, _>::new(
                client.clone(),
                RouteFactory,
            )),
        ),
        Arc::new(KubeStatusWriter::new(client.clone())),
    );
    driver.start(&task_builder, trigger_rx);

    let reporter = Reporter {
        controller: FIELD_MANAGER.to_string(),
        instance: args.pod_name().clone(),
    };
    let poller = HealthPoller::new(
        options.clone(),
        applications.cache().clone(),
        Arc::new(KubePodLister::new(client.clone())),
        Arc::new(EventAlertSink::new(client.clone(), reporter)),
        token.child_token(),
    );
    poller.start(&task_builder);

    let probes = ProbeState::new(vec![
        (applications.kind().to_string(), applications.liveness()),
        (workloads.kind().to_string(), workloads.liveness()),
        (services.kind().to_string(), services.liveness()),
        (routes.kind().to_string(), routes.liveness()),
    ]);
    spawn_probes(&task_builder, args.port(), probes)
        .await
        .inspect_err(|err| error!("Failed to start probes: {}", err))?;

    info!("Control plane started");
    task_builder.join_all().await;

    applications.stop();
    workloads.stop();
    services.stop();
    routes.stop();
    poller.stop();
    info!("Control plane stopped");

    Ok(())
}
