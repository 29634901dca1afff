use tracing::debug;

/// Installs ring as the process-wide rustls provider used by the kube client.
///
/// A provider installed earlier (e.g. by a test harness) is left in place.
pub fn init_crypto() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
}
