//! Notice notifier: builds, filters and delivers notices.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use faultline_core::{ConfigBuilder, ErrorInfo};
//! use faultline_core::value::Map;
//! use faultline_delivery::Notifier;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ConfigBuilder::new().project_id(1).project_key("key").build();
//! let notifier = Notifier::from_config(config)?;
//!
//! let promise = notifier
//!     .notify(vec![ErrorInfo::new("Timeout", "upstream took too long")], Map::new())
//!     .await;
//! promise.on_failure(|e| eprintln!("notice not delivered: {e}"));
//!
//! notifier.close().await?;
//! # Ok(())
//! # }
//! ```

use std::error::Error;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use faultline_core::filters::{ContextFilter, ErrorTypeFilter, RootDirectoryFilter};
use faultline_core::value::Map;
use faultline_core::{Config, Context, ErrorInfo, Filter, FilterChain, Notice};
use tracing::{debug, error, warn};

use crate::async_sender::AsyncSender;
use crate::backlog::Backlog;
use crate::http::HttpTransport;
use crate::metrics::{DeliveryMetrics, Outcome};
use crate::sync_sender::SyncSender;
use crate::transport::{Response, Transport};
use crate::{DeliveryError, NoticePromise};

pub struct Notifier {
    config: Config,
    /// `None` when the configuration has no usable project id or host
    endpoint: Option<String>,
    chain: Mutex<FilterChain>,
    context: Context,
    async_sender: AsyncSender,
    sync_sender: Arc<SyncSender>,
    metrics: Arc<DeliveryMetrics>,
    closed: AtomicBool,
}

impl Notifier {
    /// Creates a notifier delivering through `transport`.
    ///
    /// No task is spawned until the first notice is sent.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let endpoint = match config.endpoint() {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                if !config.is_ignored_environment() {
                    warn!(error = %e, "Notifier is not configured, notices will be rejected");
                }
                None
            }
        };

        let backlog = config
            .delivery
            .backlog
            .then(|| Backlog::new(Arc::clone(&transport), config.flush_period()));
        let sync_sender = Arc::new(SyncSender::new(transport, backlog));
        let async_sender = AsyncSender::new(
            Arc::clone(&sync_sender),
            config.delivery.workers,
            config.delivery.queue_size,
        );

        let context = Context::new();
        let mut chain = FilterChain::new();
        chain.add_filter(ErrorTypeFilter::new(
            config.notice.ignore_error_types.iter().cloned(),
        ));
        chain.add_filter(ContextFilter::new(context.clone()));
        if let Some(root) = &config.project.root_directory {
            chain.add_filter(RootDirectoryFilter::new(root.clone()));
        }

        Ok(Self {
            config,
            endpoint,
            chain: Mutex::new(chain),
            context,
            async_sender,
            sync_sender,
            metrics: Arc::new(DeliveryMetrics::new()?),
            closed: AtomicBool::new(false),
        })
    }

    /// Creates a notifier posting to the configured host over HTTPS.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let transport = HttpTransport::from_config(&config)?;
        Self::new(config, Arc::new(transport))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sends the notice on a worker. Falls back to direct delivery when no
    /// worker is running.
    ///
    /// The returned promise settles with the delivery outcome; it is already
    /// rejected when the notice was ignored, filtered out or could not be
    /// queued.
    pub async fn notify(&self, errors: Vec<ErrorInfo>, params: Map) -> NoticePromise {
        let prepared = self.prepare(errors, params);
        self.dispatch(prepared).await
    }

    /// Sends the notice directly and waits for the collector's answer.
    pub async fn notify_sync(
        &self,
        errors: Vec<ErrorInfo>,
        params: Map,
    ) -> Result<Response, DeliveryError> {
        let prepared = self.prepare(errors, params);
        self.deliver_sync(prepared).await
    }

    /// Like [`notify`](Self::notify) for a notice obtained from
    /// [`build_notice`](Self::build_notice) and edited by the caller.
    /// `params` are merged into its params section before filtering.
    pub async fn notify_notice(&self, notice: Notice, params: Map) -> NoticePromise {
        let prepared = self.prepare_notice(notice, params);
        self.dispatch(prepared).await
    }

    /// Like [`notify_sync`](Self::notify_sync) for a pre-built notice.
    pub async fn notify_notice_sync(
        &self,
        notice: Notice,
        params: Map,
    ) -> Result<Response, DeliveryError> {
        let prepared = self.prepare_notice(notice, params);
        self.deliver_sync(prepared).await
    }

    /// Reports `error` and its sources, with the current backtrace attached
    /// to the outermost entry.
    pub fn notify_error<E>(
        &self,
        error: &E,
        params: Map,
    ) -> impl Future<Output = NoticePromise> + '_
    where
        E: Error + 'static,
    {
        let mut errors = ErrorInfo::of(error);
        if !errors.is_empty() {
            let first = errors.remove(0).capture_backtrace();
            errors.insert(0, first);
        }
        self.notify(errors, params)
    }

    /// Builds a notice without filtering or sending it.
    pub fn build_notice(
        &self,
        errors: Vec<ErrorInfo>,
        params: Map,
    ) -> Result<Notice, DeliveryError> {
        if self.is_closed() {
            error!("Attempted to build a notice with a closed notifier");
            return Err(DeliveryError::Closed);
        }
        Ok(Notice::build(&self.config, errors, params))
    }

    pub fn add_filter<T: Filter>(&self, filter: T) {
        self.chain.lock().unwrap().add_filter(filter);
    }

    /// Removes every filter of type `T`.
    pub fn delete_filter<T: Filter>(&self) -> bool {
        self.chain.lock().unwrap().delete_filter::<T>()
    }

    /// Filter names in execution order.
    pub fn filters(&self) -> Vec<String> {
        self.chain.lock().unwrap().names()
    }

    /// Merges `values` into the context attached to the next notice.
    pub fn merge_context(&self, values: Map) {
        self.context.merge(values);
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Whether the configuration passes validation.
    pub fn is_configured(&self) -> bool {
        self.config.validate().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Delivery metrics, with the queue depth refreshed on every call.
    pub fn metrics(&self) -> &DeliveryMetrics {
        self.metrics.set_queue_depth(self.async_sender.queued());
        &self.metrics
    }

    /// Waits for queued notices to be delivered, then stops the workers and
    /// the retry backlog.
    pub async fn close(&self) -> Result<(), DeliveryError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(DeliveryError::Closed);
        }
        self.async_sender
            .close()
            .await
            .map_err(|_| DeliveryError::Closed)?;
        self.metrics.set_queue_depth(0);
        Ok(())
    }

    async fn dispatch(&self, prepared: Result<(Notice, String), DeliveryError>) -> NoticePromise {
        let promise = self.tracked_promise();
        let (notice, endpoint) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                promise.reject(e);
                return promise;
            }
        };

        if self.async_sender.has_workers() {
            let promise = self.async_sender.send(notice, promise, &endpoint);
            self.metrics.set_queue_depth(self.async_sender.queued());
            promise
        } else {
            warn!("Falling back to sync delivery because there are no running async workers");
            self.sync_sender.send(notice, promise, &endpoint).await
        }
    }

    async fn deliver_sync(
        &self,
        prepared: Result<(Notice, String), DeliveryError>,
    ) -> Result<Response, DeliveryError> {
        let promise = self.tracked_promise();
        match prepared {
            Ok((notice, endpoint)) => {
                self.sync_sender.send(notice, promise.clone(), &endpoint).await;
            }
            Err(e) => {
                promise.reject(e);
            }
        }
        promise.wait().await
    }

    fn prepare(
        &self,
        errors: Vec<ErrorInfo>,
        params: Map,
    ) -> Result<(Notice, String), DeliveryError> {
        self.check_environment()?;
        let notice = self.build_notice(errors, params)?;
        self.refine(notice)
    }

    fn prepare_notice(
        &self,
        mut notice: Notice,
        params: Map,
    ) -> Result<(Notice, String), DeliveryError> {
        if self.is_closed() {
            error!("Attempted to send a notice with a closed notifier");
            return Err(DeliveryError::Closed);
        }
        self.check_environment()?;
        notice.merge_params(params)?;
        self.refine(notice)
    }

    fn check_environment(&self) -> Result<(), DeliveryError> {
        if self.config.is_ignored_environment() {
            let environment = self.config.project.environment.clone().unwrap_or_default();
            debug!(environment = %environment, "Environment is ignored, notice dropped");
            return Err(DeliveryError::IgnoredEnvironment(environment));
        }
        Ok(())
    }

    /// Runs the filter chain and resolves the endpoint.
    fn refine(&self, mut notice: Notice) -> Result<(Notice, String), DeliveryError> {
        let endpoint = self.endpoint.clone().ok_or_else(|| {
            DeliveryError::NotConfigured("project.project_id or project.host is invalid".into())
        })?;

        // Filters run without holding the chain lock.
        let chain = self.chain.lock().unwrap().clone();
        chain.refine(&mut notice).map_err(|e| {
            error!(filter = %e.filter, error = %e, "Filter failed");
            DeliveryError::Filter(e.to_string())
        })?;

        if notice.is_ignored() {
            debug!("Notice was marked as ignored");
            return Err(DeliveryError::ignored());
        }
        Ok((notice, endpoint))
    }

    /// A fresh promise whose outcome is counted in the metrics.
    fn tracked_promise(&self) -> NoticePromise {
        let promise = NoticePromise::new();
        let on_success = Arc::clone(&self.metrics);
        let on_failure = Arc::clone(&self.metrics);
        promise
            .on_success(move |_| on_success.record(Outcome::Delivered))
            .on_failure(move |e| on_failure.record(outcome_of(e)));
        promise
    }
}

fn outcome_of(error: &DeliveryError) -> Outcome {
    match error {
        DeliveryError::Transport(_) | DeliveryError::Panicked(_) => Outcome::Failed,
        DeliveryError::Ignored(_) | DeliveryError::IgnoredEnvironment(_) => Outcome::Ignored,
        DeliveryError::CapacityExceeded { .. }
        | DeliveryError::TruncationExhausted { .. }
        | DeliveryError::Filter(_)
        | DeliveryError::NotConfigured(_)
        | DeliveryError::Notice(_)
        | DeliveryError::Closed => Outcome::Dropped,
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("project_id", &self.config.project.project_id)
            .field("host", &self.config.project.host)
            .field("filters", &self.filters())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use crate::transport::TransportError;
    use faultline_core::{weighted, ConfigBuilder, ErrorInfo, Value};

    fn config() -> ConfigBuilder {
        ConfigBuilder::new().project_id(1).project_key("key")
    }

    fn notifier(config: Config) -> (Arc<RecordingTransport>, Notifier) {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = Notifier::new(config, transport.clone()).unwrap();
        (transport, notifier)
    }

    fn boom() -> Vec<ErrorInfo> {
        vec![ErrorInfo::new("Boom", "it broke")]
    }

    fn payload(transport: &RecordingTransport) -> serde_json::Value {
        serde_json::from_str(&transport.calls()[0].0).unwrap()
    }

    #[tokio::test]
    async fn test_notify_delivers_through_workers() {
        let (transport, notifier) = notifier(config().build());

        let promise = notifier.notify(boom(), Map::new()).await;
        assert!(promise.wait().await.is_ok());

        let (_, endpoint) = &transport.calls()[0];
        assert_eq!(endpoint, "https://airbrake.io/api/v3/projects/1/notices");
        assert_eq!(notifier.metrics().count(Outcome::Delivered), 1);
    }

    #[tokio::test]
    async fn test_ignored_environment_is_rejected() {
        let config = config()
            .environment("test")
            .ignore_environment("test")
            .build();
        let (transport, notifier) = notifier(config);

        let promise = notifier.notify(boom(), Map::new()).await;
        assert!(matches!(
            promise.value(),
            Some(Err(DeliveryError::IgnoredEnvironment(env))) if env == "test"
        ));
        assert_eq!(transport.call_count(), 0);
        assert_eq!(notifier.metrics().count(Outcome::Ignored), 1);
    }

    #[tokio::test]
    async fn test_filter_can_ignore_notice() {
        let (transport, notifier) = notifier(config().build());
        notifier.add_filter(|n: &mut Notice| -> anyhow::Result<()> {
            n.ignore();
            Ok(())
        });

        let err = notifier.notify_sync(boom(), Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "notice was marked as ignored");
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_filter_failure_rejects_promise() {
        let (transport, notifier) = notifier(config().build());
        notifier.add_filter(weighted(10, |_: &mut Notice| {
            anyhow::bail!("redaction failed")
        }));

        let promise = notifier.notify(boom(), Map::new()).await;
        match promise.value() {
            Some(Err(DeliveryError::Filter(message))) => {
                assert!(message.contains("redaction failed"))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(transport.call_count(), 0);
        assert_eq!(notifier.metrics().count(Outcome::Dropped), 1);
    }

    #[tokio::test]
    async fn test_error_type_filter_from_config() {
        let config = config().ignore_error_type("Boom").build();
        let (transport, notifier) = notifier(config);

        let err = notifier.notify_sync(boom(), Map::new()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Ignored(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_context_is_attached_once() {
        let (transport, notifier) = notifier(config().build());
        let mut values = Map::new();
        values.insert("request_id".into(), Value::from("r-42"));
        notifier.merge_context(values);

        notifier.notify_sync(boom(), Map::new()).await.unwrap();
        assert_eq!(payload(&transport)["params"]["app_context"]["request_id"], "r-42");
        assert!(notifier.context().is_empty());
    }

    #[tokio::test]
    async fn test_notify_sync_returns_transport_error() {
        let transport = Arc::new(RecordingTransport::failing_with(401));
        let notifier = Notifier::new(config().build(), transport.clone()).unwrap();

        let err = notifier.notify_sync(boom(), Map::new()).await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::Transport(TransportError::Status { code: 401, .. })
        ));
        assert_eq!(notifier.metrics().count(Outcome::Failed), 1);
    }

    #[tokio::test]
    async fn test_close_twice_and_notify_after_close() {
        let (_transport, notifier) = notifier(config().build());
        notifier.close().await.unwrap();
        assert!(matches!(notifier.close().await, Err(DeliveryError::Closed)));

        let promise = notifier.notify(boom(), Map::new()).await;
        assert!(matches!(promise.value(), Some(Err(DeliveryError::Closed))));
        assert!(notifier.build_notice(boom(), Map::new()).is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_notifier_rejects() {
        let (transport, notifier) = notifier(Config::default());
        assert!(!notifier.is_configured());

        let promise = notifier.notify(boom(), Map::new()).await;
        assert!(matches!(promise.value(), Some(Err(DeliveryError::NotConfigured(_)))));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_default_filters_and_delete() {
        let (_transport, notifier) = notifier(config().root_directory("/srv/app".into()).build());
        assert_eq!(
            notifier.filters(),
            vec!["error_type", "context", "root_directory"]
        );

        assert!(notifier.delete_filter::<ContextFilter>());
        assert_eq!(notifier.filters(), vec!["error_type", "root_directory"]);
    }

    #[tokio::test]
    async fn test_notify_notice_sends_customized_notice() {
        let (transport, notifier) = notifier(config().build());
        let mut notice = notifier.build_notice(boom(), Map::new()).unwrap();
        notice
            .section("session")
            .unwrap()
            .lock()
            .insert("user_id".into(), Value::from(7));

        let mut params = Map::new();
        params.insert("job".into(), Value::from("import"));
        let promise = notifier.notify_notice(notice, params).await;
        promise.wait().await.unwrap();

        let doc = payload(&transport);
        assert_eq!(doc["session"]["user_id"], 7);
        assert_eq!(doc["params"]["job"], "import");
        assert_eq!(doc["errors"][0]["type"], "Boom");
    }

    #[tokio::test]
    async fn test_notify_notice_sync_runs_filters() {
        let (transport, notifier) = notifier(config().ignore_error_type("Boom").build());
        let notice = notifier.build_notice(boom(), Map::new()).unwrap();

        let err = notifier
            .notify_notice_sync(notice, Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Ignored(_)));
        assert_eq!(transport.call_count(), 0);

        let notice = notifier
            .build_notice(vec![ErrorInfo::new("Other", "m")], Map::new())
            .unwrap();
        notifier.notify_notice_sync(notice, Map::new()).await.unwrap();
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_notify_notice_after_close_is_rejected() {
        let (_transport, notifier) = notifier(config().build());
        let notice = notifier.build_notice(boom(), Map::new()).unwrap();
        notifier.close().await.unwrap();

        let promise = notifier.notify_notice(notice, Map::new()).await;
        assert!(matches!(promise.value(), Some(Err(DeliveryError::Closed))));
    }

    #[tokio::test]
    async fn test_queue_depth_follows_workers() {
        let transport = Arc::new(RecordingTransport::with_delay(
            std::time::Duration::from_millis(5),
        ));
        let notifier = Notifier::new(config().workers(1).build(), transport.clone()).unwrap();

        let mut promises = Vec::new();
        for _ in 0..3 {
            promises.push(notifier.notify(boom(), Map::new()).await);
        }
        for promise in &promises {
            promise.wait().await.unwrap();
        }

        assert_eq!(transport.call_count(), 3);
        let output = notifier.metrics().encode().unwrap();
        assert!(output.contains("faultline_queue_depth 0"));
    }

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "request failed")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[tokio::test]
    async fn test_notify_error_reports_sources() {
        let (transport, notifier) = notifier(config().build());
        let error = Outer(std::io::Error::other("connection reset"));

        let promise = notifier.notify_error(&error, Map::new()).await;
        promise.wait().await.unwrap();

        let doc = payload(&transport);
        assert_eq!(doc["errors"][0]["type"], "Outer");
        assert_eq!(doc["errors"][0]["message"], "request failed");
        assert_eq!(doc["errors"][1]["message"], "connection reset");
    }
}
