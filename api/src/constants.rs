pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "canopy-control-plane";

pub const REALM_LABEL: &str = "canopy.dev/realm";
pub const INSTANCE_HASH_LABEL: &str = "canopy.dev/instance-hash";
pub const REVISION_LABEL: &str = "canopy.dev/revision";
pub const LATEST_INSTANCE_LABEL: &str = "canopy.dev/latest-instance";

/// Identity of an instance. Every object created for an instance carries all of
/// these keys, and their values never change for the lifetime of the object.
pub const INSTANCE_LABEL_KEYS: [&str; 3] = [REALM_LABEL, INSTANCE_HASH_LABEL, REVISION_LABEL];

/// Kubernetes rejects label values longer than this.
pub const MAX_LABEL_VALUE_LENGTH: usize = 63;

pub const GROUP: &str = "canopy.dev";
pub const VERSION: &str = "v1alpha1";
pub const APPLICATION_CRD_KIND: &str = "Application";

pub const APP_CONTAINER_NAME: &str = "app";
pub const FIELD_MANAGER: &str = "canopy-control-plane";
