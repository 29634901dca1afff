//! Label schema shared by everything that creates or queries instance objects.
//!
//! The keys in [`INSTANCE_LABEL_KEYS`] and their value encodings are a wire
//! contract: ownership of a cluster object is recovered from these labels alone.
//! Per-application objects that send traffic to an instance (the service and
//! the route) additionally carry [`LATEST_INSTANCE_LABEL`] with that instance's
//! hash.

use crate::constants::{
    INSTANCE_HASH_LABEL, LATEST_INSTANCE_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
    MAX_LABEL_VALUE_LENGTH, REALM_LABEL, REVISION_LABEL,
};
use crate::v1alpha1::{Application, Instance};
use itertools::Itertools;
use std::collections::BTreeMap;

pub type LabelSet = BTreeMap<String, String>;

/// Hex characters of the digest appended to shortened realm ids.
const REALM_DIGEST_LENGTH: usize = 10;

/// Label-value encoding of a namespace + name pair.
///
/// `namespace.name` when it fits in a label value. Longer pairs keep a prefix
/// and append a digest of the full pair, so distinct applications still get
/// distinct realm ids.
pub fn realm_id(namespace: &str, name: &str) -> String {
    let realm = format!("{namespace}.{name}");
    if realm.len() <= MAX_LABEL_VALUE_LENGTH {
        return realm;
    }

    let prefix = realm
        .chars()
        .take(MAX_LABEL_VALUE_LENGTH - REALM_DIGEST_LENGTH - 1)
        .collect::<String>();
    let digest = sha256::digest(realm.as_str())
        .chars()
        .take(REALM_DIGEST_LENGTH)
        .collect::<String>();
    format!("{prefix}-{digest}")
}

/// Identity labels of an instance. They do not depend on whether the instance
/// is the latest one, so objects keep matching after a newer instance takes over.
pub fn instance_labels(instance: &Instance) -> LabelSet {
    BTreeMap::from([
        (REALM_LABEL.to_string(), instance.realm_id.clone()),
        (INSTANCE_HASH_LABEL.to_string(), instance.hash_of_spec.clone()),
        (REVISION_LABEL.to_string(), instance.revision.to_string()),
    ])
}

/// Labels of a per-application object that sends traffic to `instance`.
pub fn latest_instance_labels(instance: &Instance) -> LabelSet {
    let mut labels = instance_labels(instance);
    labels.insert(
        LATEST_INSTANCE_LABEL.to_string(),
        instance.hash_of_spec.clone(),
    );
    labels
}

pub fn parent_labels(application: &Application) -> Option<LabelSet> {
    let realm_id = application.realm_id()?;
    Some(BTreeMap::from([(REALM_LABEL.to_string(), realm_id)]))
}

/// Labels written onto created objects: the given labels plus the managed-by marker.
pub fn object_labels(labels: &LabelSet) -> LabelSet {
    let mut object_labels = labels.clone();
    object_labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    object_labels
}

/// Equality-based label selector, e.g. `a=1,b=2`.
pub fn selector(labels: &LabelSet) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .join(",")
}

/// True when `actual` contains every key of `required` with the same value.
pub fn matches(required: &LabelSet, actual: &BTreeMap<String, String>) -> bool {
    required
        .iter()
        .all(|(key, value)| actual.get(key) == Some(value))
}
