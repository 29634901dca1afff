use canopy_api::labels::{LabelSet, instance_labels, matches, parent_labels};
use canopy_api::v1alpha1::{Application, Instance};
use kube::runtime::reflector::{ObjectRef as StoreKey, Store};
use kube::{Resource, ResourceExt};
use std::sync::Arc;

/// Read side of a listener's watch cache. Queries never touch the API server.
#[derive(Clone)]
pub struct ObjectCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
}

impl<K> ObjectCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn new(store: Store<K>) -> Self {
        Self { store }
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.store.get(&StoreKey::new(name).within(namespace))
    }

    pub fn all(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    pub fn by_labels(&self, namespace: &str, required: &LabelSet) -> Vec<Arc<K>> {
        self.store
            .state()
            .into_iter()
            .filter(|object| object.meta().namespace.as_deref() == Some(namespace))
            .filter(|object| matches(required, object.labels()))
            .collect()
    }

    /// Objects carrying every identity label of `instance`, whether or not it is
    /// still the latest instance.
    pub fn by_instance(&self, instance: &Instance) -> Vec<Arc<K>> {
        self.by_labels(&instance.namespace, &instance_labels(instance))
    }

    /// Objects labelled with the realm of `application`, whatever their instance.
    pub fn by_parent(&self, application: &Application) -> Vec<Arc<K>> {
        match (application.namespace(), parent_labels(application)) {
            (Some(namespace), Some(labels)) => self.by_labels(&namespace, &labels),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
impl<K> ObjectCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn from_objects(objects: impl IntoIterator<Item = K>) -> Self {
        use kube::runtime::watcher::Event;

        let (store, mut writer) = kube::runtime::reflector::store();
        for object in objects {
            writer.apply_watcher_event(&Event::Apply(object));
        }
        Self::new(store)
    }
}
