use crate::kubernetes::objects::ObjectRef;
use canopy_api::constants::{INSTANCE_HASH_LABEL, REALM_LABEL};
use canopy_api::labels::realm_id;
use canopy_api::v1alpha1::Application;
use canopy_core::CaseInsensitiveString;
use getset::Getters;
use kube::{Resource, ResourceExt};
use tracing::trace;
use typed_builder::TypedBuilder;

/// A request to reconcile one parent, raised by a watch event on any related object.
#[derive(TypedBuilder, Getters, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Trigger {
    #[getset(get = "pub")]
    #[builder(setter(into))]
    realm_id: String,

    #[getset(get = "pub")]
    #[builder(setter(into))]
    name: String,

    #[getset(get = "pub")]
    #[builder(setter(into))]
    namespace: String,

    #[getset(get = "pub")]
    #[builder(default, setter(into))]
    instance_hash: Option<String>,

    #[getset(get = "pub")]
    #[builder(setter(into))]
    source_kind: String,
}

impl Trigger {
    pub fn parent_ref(&self) -> ObjectRef {
        ObjectRef::of_kind::<Application>()
            .namespace(self.namespace.clone())
            .name(self.name.clone())
            .build()
    }
}

/// How a listener maps its objects back to the parent they belong to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    /// The watched objects are parents themselves.
    Parent,
    /// The watched objects carry an owner reference of the given kind.
    OwnedBy(CaseInsensitiveString),
}

impl TriggerSource {
    pub fn owned_by<P: Resource<DynamicType = ()>>() -> Self {
        Self::OwnedBy(CaseInsensitiveString::new(P::kind(&())))
    }
}

pub fn derive_trigger<K>(object: &K, source: &TriggerSource) -> Option<Trigger>
where
    K: Resource<DynamicType = ()>,
{
    let source_kind = K::kind(&()).to_string();
    let namespace = object.namespace()?;

    match source {
        TriggerSource::Parent => {
            let name = object.meta().name.clone()?;
            Some(
                Trigger::builder()
                    .realm_id(realm_id(&namespace, &name))
                    .name(name)
                    .namespace(namespace)
                    .source_kind(source_kind)
                    .build(),
            )
        }
        TriggerSource::OwnedBy(parent_kind) => {
            let labels = object.labels();
            let Some(realm_id) = labels.get(REALM_LABEL) else {
                trace!("Ignoring {} without realm label", source_kind);
                return None;
            };
            let Some(owner) = object
                .owner_references()
                .iter()
                .find(|owner| parent_kind.eq_str(&owner.kind))
            else {
                trace!("Ignoring {} not owned by a {}", source_kind, parent_kind);
                return None;
            };

            Some(
                Trigger::builder()
                    .realm_id(realm_id.clone())
                    .name(owner.name.clone())
                    .namespace(namespace)
                    .instance_hash(labels.get(INSTANCE_HASH_LABEL).cloned())
                    .source_kind(source_kind)
                    .build(),
            )
        }
    }
}
