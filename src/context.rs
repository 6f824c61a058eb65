//! Client configuration and lifecycle callbacks

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{
    concurrent::agent::{
        BackoffIdleStrategy, BusySpinIdleStrategy, ErrorHandler, IdleStrategy,
        SleepingIdleStrategy, YieldingIdleStrategy,
    },
    image::Image,
};

/// Invoked when a publication registration completes:
/// `(channel, stream_id, session_id, correlation_id)`
pub type OnNewPublication = dyn Fn(&str, i32, i32, i64) + Send + Sync;

/// Invoked when a subscription registration completes:
/// `(channel, stream_id, correlation_id)`
pub type OnNewSubscription = dyn Fn(&str, i32, i64) + Send + Sync;

/// Invoked as a new image is installed under a subscription.
///
/// Runs on the conductor thread; never block in it.
pub type OnAvailableImage = dyn Fn(&Image) + Send + Sync;

/// Invoked after an image has been removed and closed.
///
/// Runs on the conductor thread; never block in it.
pub type OnUnavailableImage = dyn Fn(&Image) + Send + Sync;

/// Idle behavior of the conductor thread
#[derive(Debug, Clone)]
pub enum IdleStrategyChoice {
    BusySpin,
    Yielding,
    Sleeping(Duration),
    Backoff,
}

impl IdleStrategyChoice {
    pub(crate) fn create(&self) -> Box<dyn IdleStrategy> {
        match self {
            Self::BusySpin => Box::new(BusySpinIdleStrategy),
            Self::Yielding => Box::new(YieldingIdleStrategy),
            Self::Sleeping(period) => Box::new(SleepingIdleStrategy::new(*period)),
            Self::Backoff => Box::new(BackoffIdleStrategy::default()),
        }
    }
}

/// Configuration for a [`crate::Tern`] client.
///
/// Defaults: driver timeout 10 s, keepalive 1 s, inter-service timeout
/// 10 s, resource linger 5 s, publication connection timeout 5 s,
/// sleeping idle strategy. The driver directory comes from `TERN_DIR`,
/// falling back to `/dev/shm/tern-<user>` and then the system temp dir.
#[derive(Clone)]
pub struct Context {
    dir: PathBuf,
    driver_timeout: Duration,
    keepalive_interval: Duration,
    inter_service_timeout: Duration,
    resource_linger: Duration,
    publication_connection_timeout: Duration,
    idle_strategy: IdleStrategyChoice,
    error_handler: Arc<ErrorHandler>,
    on_new_publication: Option<Arc<OnNewPublication>>,
    on_new_subscription: Option<Arc<OnNewSubscription>>,
    on_available_image: Option<Arc<OnAvailableImage>>,
    on_unavailable_image: Option<Arc<OnUnavailableImage>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("dir", &self.dir)
            .field("driver_timeout", &self.driver_timeout)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("inter_service_timeout", &self.inter_service_timeout)
            .field("resource_linger", &self.resource_linger)
            .field("idle_strategy", &self.idle_strategy)
            .finish_non_exhaustive()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            driver_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(1),
            inter_service_timeout: Duration::from_secs(10),
            resource_linger: Duration::from_secs(5),
            publication_connection_timeout: Duration::from_secs(5),
            idle_strategy: IdleStrategyChoice::Sleeping(Duration::from_millis(4)),
            error_handler: Arc::new(|error| {
                tracing::error!(%error, "client error");
            }),
            on_new_publication: None,
            on_new_subscription: None,
            on_available_image: None,
            on_unavailable_image: None,
        }
    }
}

/// Resolve the default driver directory
pub fn default_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TERN_DIR") {
        return PathBuf::from(dir);
    }

    let user = std::env::var("USER").unwrap_or_else(|_| "default".to_string());
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        return shm.join(format!("tern-{}", user));
    }

    std::env::temp_dir().join(format!("tern-{}", user))
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn driver_timeout(&self) -> Duration {
        self.driver_timeout
    }

    pub fn with_driver_timeout(mut self, timeout: Duration) -> Self {
        self.driver_timeout = timeout;
        self
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn inter_service_timeout(&self) -> Duration {
        self.inter_service_timeout
    }

    pub fn with_inter_service_timeout(mut self, timeout: Duration) -> Self {
        self.inter_service_timeout = timeout;
        self
    }

    pub fn resource_linger(&self) -> Duration {
        self.resource_linger
    }

    pub fn with_resource_linger(mut self, linger: Duration) -> Self {
        self.resource_linger = linger;
        self
    }

    pub fn publication_connection_timeout(&self) -> Duration {
        self.publication_connection_timeout
    }

    pub fn with_publication_connection_timeout(mut self, timeout: Duration) -> Self {
        self.publication_connection_timeout = timeout;
        self
    }

    pub fn idle_strategy(&self) -> &IdleStrategyChoice {
        &self.idle_strategy
    }

    pub fn with_idle_strategy(mut self, choice: IdleStrategyChoice) -> Self {
        self.idle_strategy = choice;
        self
    }

    pub fn error_handler(&self) -> Arc<ErrorHandler> {
        Arc::clone(&self.error_handler)
    }

    pub fn with_error_handler(
        mut self,
        handler: impl Fn(&crate::error::TernError) + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn on_new_publication(&self) -> Option<Arc<OnNewPublication>> {
        self.on_new_publication.clone()
    }

    pub fn with_on_new_publication(
        mut self,
        handler: impl Fn(&str, i32, i32, i64) + Send + Sync + 'static,
    ) -> Self {
        self.on_new_publication = Some(Arc::new(handler));
        self
    }

    pub fn on_new_subscription(&self) -> Option<Arc<OnNewSubscription>> {
        self.on_new_subscription.clone()
    }

    pub fn with_on_new_subscription(
        mut self,
        handler: impl Fn(&str, i32, i64) + Send + Sync + 'static,
    ) -> Self {
        self.on_new_subscription = Some(Arc::new(handler));
        self
    }

    pub fn on_available_image(&self) -> Option<Arc<OnAvailableImage>> {
        self.on_available_image.clone()
    }

    pub fn with_on_available_image(
        mut self,
        handler: impl Fn(&Image) + Send + Sync + 'static,
    ) -> Self {
        self.on_available_image = Some(Arc::new(handler));
        self
    }

    pub fn on_unavailable_image(&self) -> Option<Arc<OnUnavailableImage>> {
        self.on_unavailable_image.clone()
    }

    pub fn with_on_unavailable_image(
        mut self,
        handler: impl Fn(&Image) + Send + Sync + 'static,
    ) -> Self {
        self.on_unavailable_image = Some(Arc::new(handler));
        self
    }
}
