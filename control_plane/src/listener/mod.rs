mod cache;

pub use cache::ObjectCache;

use crate::options::Options;
use crate::triggers::{Trigger, TriggerSource, derive_trigger};
use canopy_api::v1alpha1::{Application, Instance};
use canopy_core::sync::signal::{Receiver, Sender, channel};
use canopy_core::task::Builder as TaskBuilder;
use futures::StreamExt;
use kube::runtime::reflector::{self, store::Writer};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::select;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Owned until `start()` hands it to the watch task.
struct Pending<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    writer: Writer<K>,
    tx: mpsc::Sender<Trigger>,
}

/// Watches one kind, keeps a local cache of it and turns every change into a
/// [`Trigger`] for the parent it belongs to.
pub struct ResourceListener<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    kind: String,
    api: Api<K>,
    config: watcher::Config,
    source: TriggerSource,
    cache: ObjectCache<K>,
    pending: Mutex<Option<Pending<K>>>,
    token: CancellationToken,
    liveness: Sender<bool>,
    options: Arc<Options>,
}

impl<K> ResourceListener<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(
        api: Api<K>,
        config: watcher::Config,
        source: TriggerSource,
        tx: mpsc::Sender<Trigger>,
        options: Arc<Options>,
        token: CancellationToken,
    ) -> Self {
        let (store, writer) = reflector::store();
        let (liveness, _) = channel(true);

        Self {
            kind: K::kind(&()).to_string(),
            api,
            config,
            source,
            cache: ObjectCache::new(store),
            pending: Mutex::new(Some(Pending { writer, tx })),
            token,
            liveness,
            options,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn cache(&self) -> &ObjectCache<K> {
        &self.cache
    }

    pub fn liveness(&self) -> Receiver<bool> {
        self.liveness.subscribe()
    }

    pub fn by_instance(&self, instance: &Instance) -> Vec<Arc<K>> {
        self.cache.by_instance(instance)
    }

    pub fn by_parent(&self, application: &Application) -> Vec<Arc<K>> {
        self.cache.by_parent(application)
    }

    fn take_pending(&self) -> Option<Pending<K>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Spawns the watch task. Only the first call has any effect.
    pub fn start(&self, task_builder: &TaskBuilder) {
        let Some(Pending { writer, tx }) = self.take_pending() else {
            debug!("Listener for {} already started or stopped", self.kind);
            return;
        };

        let stream = watcher::watcher(self.api.clone(), self.config.clone())
            .default_backoff()
            .reflect(writer);
        let kind = self.kind.clone();
        let source = self.source.clone();
        let token = self.token.clone();
        let liveness = self.liveness.clone();
        let window = self.options.watch_liveness_window();

        task_builder
            .new_task("resource_listener")
            .spawn(async move {
                info!("Watching {}", kind);
                let mut stream = pin!(stream);
                let mut outage = Outage::new(window);

                loop {
                    select! {
                        () = token.cancelled() => {
                            debug!("Listener for {} stopped", kind);
                            break;
                        }
                        event = stream.next() => match event {
                            Some(Ok(event)) => {
                                outage.recovered(&kind, &liveness);
                                dispatch(&event, &source, &tx, &kind);
                            }
                            Some(Err(err)) => {
                                warn!("Watch for {} failed: {}", kind, err);
                                outage.failed(&kind, &liveness);
                            }
                            None => {
                                warn!("Watch stream for {} ended", kind);
                                liveness.replace(false);
                                break;
                            }
                        }
                    }
                }
            });
    }

    /// Cancels the watch task. Safe to call repeatedly and before `start()`.
    pub fn stop(&self) {
        self.token.cancel();
        drop(self.take_pending());
    }
}

/// Derives and enqueues the trigger for one watch event. Returns whether one was sent.
fn dispatch<K>(
    event: &Event<K>,
    source: &TriggerSource,
    tx: &mpsc::Sender<Trigger>,
    kind: &str,
) -> bool
where
    K: Resource<DynamicType = ()>,
{
    let object = match event {
        Event::Apply(object) | Event::InitApply(object) | Event::Delete(object) => object,
        Event::Init | Event::InitDone => return false,
    };
    let Some(trigger) = derive_trigger(object, source) else {
        return false;
    };

    match tx.try_send(trigger) {
        Ok(()) => true,
        Err(TrySendError::Full(trigger)) => {
            warn!(
                "Trigger channel full, dropping {} trigger for {}",
                kind,
                trigger.realm_id()
            );
            false
        }
        Err(TrySendError::Closed(_)) => {
            trace!("Trigger channel closed, dropping {} trigger", kind);
            false
        }
    }
}

/// Tracks how long a watch has been failing without a successful event.
struct Outage {
    window: Duration,
    since: Option<Instant>,
    reported: bool,
}

impl Outage {
    fn new(window: Duration) -> Self {
        Self {
            window,
            since: None,
            reported: false,
        }
    }

    fn failed(&mut self, kind: &str, liveness: &Sender<bool>) {
        let since = *self.since.get_or_insert_with(Instant::now);
        let elapsed = since.elapsed();
        if !self.reported && elapsed >= self.window {
            error!(
                "Watch for {} has been failing for {:?}, changes are not being observed",
                kind, elapsed
            );
            liveness.replace(false);
            self.reported = true;
        }
    }

    fn recovered(&mut self, kind: &str, liveness: &Sender<bool>) {
        if self.since.take().is_some() {
            info!("Watch for {} recovered", kind);
            liveness.replace(true);
            self.reported = false;
        }
    }
}
