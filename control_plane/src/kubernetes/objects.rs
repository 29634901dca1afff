use getset::Getters;
use kube::{Resource, ResourceExt};
use std::fmt::{Display, Formatter, Write};
use thiserror::Error;
use typed_builder::TypedBuilder;

#[derive(Error, Debug)]
pub enum ObjectRefError {
    #[error("Object is missing a name")]
    MissingName,
    #[error("Object is missing a namespace")]
    MissingNamespace,
}

/// A kind-qualified, namespaced object name used for queue keys and log output.
#[derive(TypedBuilder, Getters, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    #[getset(get = "pub")]
    #[builder(setter(into))]
    kind: String,

    #[getset(get = "pub")]
    #[builder(setter(into))]
    namespace: String,

    #[getset(get = "pub")]
    #[builder(setter(into))]
    name: String,
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())?;
        f.write_char('/')?;
        f.write_str(self.namespace())?;
        f.write_char('/')?;
        f.write_str(self.name())
    }
}

impl ObjectRef {
    pub fn of_kind<K: Resource<DynamicType = ()>>() -> ObjectRefBuilder<((String,), (), ())> {
        ObjectRef::builder().kind(K::kind(&()).to_string())
    }

    pub fn for_object<K: Resource<DynamicType = ()>>(object: &K) -> Result<Self, ObjectRefError> {
        let name = object.meta().name.clone().ok_or(ObjectRefError::MissingName)?;
        let namespace = object.namespace().ok_or(ObjectRefError::MissingNamespace)?;

        Ok(Self::of_kind::<K>().namespace(namespace).name(name).build())
    }
}
