#![warn(
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented
)]
#![allow(
    clippy::needless_continue,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::struct_field_names
)]

pub mod crypto;
pub mod instrumentation;
pub mod sync;
pub mod task;

use std::fmt::{Display, Formatter};
use unicase::UniCase;

/// String compared without regard to ASCII/Unicode case, e.g. Kubernetes kinds
/// read from owner references.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaseInsensitiveString(UniCase<String>);

impl CaseInsensitiveString {
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        Self(UniCase::new(s.as_ref().to_string()))
    }

    pub fn eq_str(&self, other: &str) -> bool {
        self.0 == UniCase::new(other.to_string())
    }
}

impl Display for CaseInsensitiveString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
