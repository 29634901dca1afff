use std::cell::RefCell;
use std::rc::Rc;
use tokio::select;
use tokio::signal::ctrl_c;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type MutableJoinSet = Rc<RefCell<JoinSet<()>>>;

/// Owns every long-running task of the process and the root cancellation token
/// they shut down on.
pub struct Builder {
    join_set: MutableJoinSet,
    token: CancellationToken,
}

impl Builder {
    pub fn new_task(&self, name: &'static str) -> Spawner {
        Spawner {
            name,
            join_set: self.join_set.clone(),
        }
    }

    /// The root token; components derive child tokens from it for their own `stop()`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancels the root token on Ctrl+C.
    pub fn shutdown_on_ctrl_c(&self) {
        let token = self.token.clone();
        self.new_task("shutdown_on_ctrl_c").spawn(async move {
            select! {
                result = ctrl_c() => {
                    match result {
                        Ok(()) => info!("Received Ctrl+C, shutting down"),
                        Err(err) => warn!("Unable to listen for Ctrl+C, shutting down: {}", err),
                    }
                    token.cancel();
                }
                () = token.cancelled() => {}
            }
        });
    }

    pub fn len(&self) -> usize {
        self.join_set.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.join_set.borrow().is_empty()
    }

    pub async fn join_all(self) {
        let join_set = self.join_set.take();
        let _ = join_set.join_all().await;
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            join_set: MutableJoinSet::default(),
            token: CancellationToken::new(),
        }
    }
}

pub struct Spawner {
    name: &'static str,
    join_set: MutableJoinSet,
}

impl Spawner {
    #[track_caller]
    pub fn spawn<F>(self, task: F)
    where
        F: Future<Output = ()>,
        F: Send + 'static,
    {
        let name = self.name;
        debug!("Spawning task '{}'", name);
        self.join_set.borrow_mut().spawn(async move {
            task.await;
            debug!("Task '{}' finished", name);
        });
    }
}
