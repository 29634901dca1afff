use getset::CopyGetters;
use std::time::Duration;
use typed_builder::TypedBuilder;

#[derive(Debug, CopyGetters, TypedBuilder, PartialEq, Eq)]
pub struct Options {
    /// Period at which every known application is re-queued regardless of watch events.
    #[getset(get_copy = "pub")]
    #[builder(default = Duration::from_secs(60))]
    resync_interval: Duration,

    #[getset(get_copy = "pub")]
    #[builder(default = Duration::from_secs(30))]
    health_poll_interval: Duration,

    /// How long a watch may keep failing before its listener reports itself not live.
    #[getset(get_copy = "pub")]
    #[builder(default = Duration::from_secs(300))]
    watch_liveness_window: Duration,

    #[getset(get_copy = "pub")]
    #[builder(default = 1024)]
    trigger_channel_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self::builder().build()
    }
}
