// Response pub/sub
//
// The provider owns a reader and fans parsed responses out to subscribers.
// It is Idle with no subscribers and Polling with at least one: the first
// subscription opens the reader and starts a periodic poll task, the last
// unsubscription stops the task and closes the reader.
//
// Each tick (and each manual pull) runs the same sequence:
//   prune dead subscribers -> pull all buffered samples -> notify in order
//
// The whole sequence runs under one dispatch lock, so batches never overlap
// and every subscriber sees responses in arrival order. A pull issued from
// inside a callback returns nothing rather than interleaving a newer batch.
// If the stream drops out while polling, the next tick resolves it again.
//
// Callbacks run without the subscriber list locked, so they may subscribe or
// unsubscribe. A panicking callback is logged and the batch continues.

use crate::config::MarkerStreamConfig;
use crate::reader::MarkerReader;
use crate::response::{Response, ResponseType};
use crate::transport::MarkerTransport;
use crate::types::{ProviderState, ReaderState};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Resolve retry cadence used unless configured otherwise
pub const DEFAULT_RESOLVE_TIMEOUT: f64 = 1.0;

pub type ResponseCallback = Arc<dyn Fn(&Response) + Send + Sync>;
type Liveness = Box<dyn Fn() -> bool + Send + Sync>;

/// Handle returned by subscribe, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Optional filter and liveness check for a subscription
#[derive(Default)]
pub struct SubscribeOptions {
    response_type: Option<ResponseType>,
    liveness: Option<Liveness>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only deliver responses of this exact type
    pub fn of_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    /// Drop the subscription on the next tick once `alive` returns false
    ///
    /// `alive` is called with the subscriber list locked and must not call
    /// back into the provider.
    pub fn alive_while<F>(mut self, alive: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.liveness = Some(Box::new(alive));
        self
    }

    /// Keep the subscription only while `owner` has strong references
    pub fn owned_by<T: Send + Sync + 'static>(self, owner: &Arc<T>) -> Self {
        let owner: Weak<T> = Arc::downgrade(owner);
        self.alive_while(move || owner.strong_count() > 0)
    }
}

struct Subscription {
    id: SubscriptionId,
    response_type: Option<ResponseType>,
    liveness: Option<Liveness>,
    callback: ResponseCallback,
    active: AtomicBool,
}

impl Subscription {
    fn is_alive(&self) -> bool {
        self.liveness.as_ref().map_or(true, |alive| alive())
    }

    fn wants(&self, response: &Response) -> bool {
        self.response_type
            .map_or(true, |wanted| wanted == response.response_type())
    }
}

struct PollTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollTask {
    fn stop(self) {
        self.cancel_token.cancel();
        self.handle.abort();
    }
}

#[derive(Default)]
struct Registry {
    state: ProviderState,
    subscriptions: Vec<Arc<Subscription>>,
    poll_task: Option<PollTask>,
}

struct ProviderInner {
    reader: MarkerReader,
    polling_period: Duration,
    resolve_timeout: f64,
    registry: Mutex<Registry>,
    /// Held for a whole pull-and-notify pass; the flag marks a pass in progress
    dispatch: ReentrantMutex<Cell<bool>>,
    next_id: AtomicU64,
}

/// Polls a response stream and notifies subscribers
pub struct ResponseProvider {
    inner: Arc<ProviderInner>,
}

impl ResponseProvider {
    pub fn new(reader: MarkerReader, polling_period: Duration) -> Self {
        Self::with_timeouts(reader, polling_period, DEFAULT_RESOLVE_TIMEOUT)
    }

    pub fn with_timeouts(
        reader: MarkerReader,
        polling_period: Duration,
        resolve_timeout: f64,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                reader,
                polling_period,
                resolve_timeout,
                registry: Mutex::new(Registry::default()),
                dispatch: ReentrantMutex::new(Cell::new(false)),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Provider on the configured response stream
    pub fn from_config(transport: Arc<dyn MarkerTransport>, config: &MarkerStreamConfig) -> Self {
        Self::with_timeouts(
            MarkerReader::from_config(transport, config),
            config.polling_interval(),
            config.resolve_timeout,
        )
    }

    pub fn state(&self) -> ProviderState {
        self.inner.registry.lock().state
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.lock().subscriptions.len()
    }

    pub fn reader(&self) -> &MarkerReader {
        &self.inner.reader
    }

    /// Receive every response
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.subscribe_with(SubscribeOptions::new(), callback)
    }

    /// Receive predicted class values only
    pub fn subscribe_predictions<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.subscribe_with(
            SubscribeOptions::new().of_type(ResponseType::Prediction),
            move |response: &Response| {
                if let Some(value) = response.prediction() {
                    callback(value);
                }
            },
        )
    }

    pub fn subscribe_with<F>(&self, options: SubscribeOptions, callback: F) -> SubscriptionId
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Arc::new(Subscription {
            id,
            response_type: options.response_type,
            liveness: options.liveness,
            callback: Arc::new(callback),
            active: AtomicBool::new(true),
        });

        let mut registry = self.inner.registry.lock();
        registry.subscriptions.push(subscription);

        log::debug!(
            "Subscriber {:?} added ({} total)",
            id,
            registry.subscriptions.len()
        );

        if registry.state == ProviderState::Idle {
            self.inner.start_polling(&mut registry);
        }

        id
    }

    /// Remove a subscription; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.inner.registry.lock();

        let Some(index) = registry.subscriptions.iter().position(|s| s.id == id) else {
            log::warn!("Unsubscribe for unknown subscriber {:?}", id);
            return false;
        };

        let subscription = registry.subscriptions.remove(index);
        subscription.active.store(false, Ordering::SeqCst);

        log::debug!(
            "Subscriber {:?} removed ({} left)",
            id,
            registry.subscriptions.len()
        );

        if registry.subscriptions.is_empty() {
            self.inner.stop_polling(&mut registry);
        }

        true
    }

    /// Pull and dispatch now, outside the poll loop
    ///
    /// Subscribers are notified exactly as they are by a poll tick. The pulled
    /// responses are also returned.
    pub fn pull_all_responses(&self) -> Vec<Response> {
        self.inner.poll_once()
    }
}

impl Drop for ResponseProvider {
    fn drop(&mut self) {
        let mut registry = self.inner.registry.lock();
        for subscription in registry.subscriptions.drain(..) {
            subscription.active.store(false, Ordering::SeqCst);
        }
        self.inner.stop_polling(&mut registry);
    }
}

impl ProviderInner {
    fn start_polling(self: &Arc<Self>, registry: &mut Registry) {
        registry.state = ProviderState::Polling;

        if self.reader.state() == ReaderState::Closed {
            self.reader.open_stream(self.resolve_timeout);
        }

        registry.poll_task = self.spawn_poll_task();

        log::info!(
            "Response provider polling {} every {:?}",
            self.reader.predicate(),
            self.polling_period
        );
    }

    fn stop_polling(&self, registry: &mut Registry) {
        if let Some(task) = registry.poll_task.take() {
            task.stop();
        }

        if registry.state == ProviderState::Polling {
            self.reader.close_stream();
            registry.state = ProviderState::Idle;
            log::info!("Response provider idle");
        }
    }

    fn spawn_poll_task(self: &Arc<Self>) -> Option<PollTask> {
        if self.polling_period.is_zero() {
            log::warn!("Polling period is zero; responses are only delivered on manual pulls");
            return None;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::warn!(
                    "No tokio runtime ({}); responses are only delivered on manual pulls",
                    e
                );
                return None;
            }
        };

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let inner = Arc::downgrade(self);
        let period = self.polling_period;

        let handle = runtime.spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        log::debug!("Response poll loop cancelled");
                        break;
                    }

                    _ = tick.tick() => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        inner.poll_once();
                    }
                }
            }
        });

        Some(PollTask {
            cancel_token,
            handle,
        })
    }

    fn poll_once(&self) -> Vec<Response> {
        let dispatch = self.dispatch.lock();
        if dispatch.get() {
            log::debug!("Pull requested from a subscriber callback; skipped");
            return Vec::new();
        }

        if !self.reader.is_connected() {
            self.reopen_if_dropped();
            if !self.reader.is_connected() {
                return Vec::new();
            }
        }

        let subscribers = {
            let mut registry = self.registry.lock();
            self.prune(&mut registry);
            registry.subscriptions.clone()
        };

        let responses = self.reader.pull_responses();

        dispatch.set(true);
        for response in &responses {
            self.notify(&subscribers, response);
        }
        dispatch.set(false);

        responses
    }

    /// Resolve again when the reader gave up while subscribers still wait
    fn reopen_if_dropped(&self) {
        let registry = self.registry.lock();
        if registry.state == ProviderState::Polling && self.reader.state() == ReaderState::Closed {
            log::debug!(
                "Response stream not connected; resolving {} again",
                self.reader.predicate()
            );
            self.reader.open_stream(self.resolve_timeout);
        }
    }

    fn prune(&self, registry: &mut Registry) {
        let before = registry.subscriptions.len();

        registry.subscriptions.retain(|subscription| {
            let alive = subscription.is_alive();
            if !alive {
                subscription.active.store(false, Ordering::SeqCst);
                log::debug!("Pruned dead subscriber {:?}", subscription.id);
            }
            alive
        });

        if before > 0 && registry.subscriptions.is_empty() {
            self.stop_polling(registry);
        }
    }

    fn notify(&self, subscribers: &[Arc<Subscription>], response: &Response) {
        for subscription in subscribers {
            if !subscription.active.load(Ordering::SeqCst) || !subscription.wants(response) {
                continue;
            }

            let callback = &subscription.callback;
            if catch_unwind(AssertUnwindSafe(|| callback(response))).is_err() {
                log::error!(
                    "Subscriber {:?} panicked handling {} response",
                    subscription.id,
                    response.response_type()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Predicate;
    use crate::transport::{Inlet, LocalTransport, Outlet};
    use crate::types::{StreamDescriptor, StreamError, StreamResult};
    use std::sync::atomic::AtomicUsize;

    /// Local transport whose first `failures` inlet opens fail
    struct FlakyTransport {
        inner: LocalTransport,
        failures: AtomicUsize,
    }

    impl MarkerTransport for FlakyTransport {
        fn advertise(
            &self,
            name: &str,
            stream_type: &str,
            source_id: &str,
        ) -> StreamResult<Box<dyn Outlet>> {
            self.inner.advertise(name, stream_type, source_id)
        }

        fn resolve(
            &self,
            predicate: &Predicate,
            timeout: f64,
        ) -> StreamResult<Vec<StreamDescriptor>> {
            self.inner.resolve(predicate, timeout)
        }

        fn open_inlet(&self, descriptor: &StreamDescriptor) -> StreamResult<Box<dyn Inlet>> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StreamError::Transport("inlet refused".to_string()));
            }
            self.inner.open_inlet(descriptor)
        }
    }

    fn flaky_provider(transport: &LocalTransport, failures: usize) -> ResponseProvider {
        let flaky = Arc::new(FlakyTransport {
            inner: transport.clone(),
            failures: AtomicUsize::new(failures),
        });
        let reader = MarkerReader::new(flaky, Predicate::by_type("Responses"));
        ResponseProvider::new(reader, Duration::from_millis(100))
    }

    fn provider(transport: &LocalTransport) -> ResponseProvider {
        let reader = MarkerReader::new(Arc::new(transport.clone()), Predicate::by_type("Responses"));
        ResponseProvider::new(reader, Duration::from_millis(100))
    }

    fn push(outlet: &dyn Outlet, value: &str) {
        outlet.push_sample(&[value.to_string()]).unwrap();
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&Response) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |response: &Response| {
            sink.lock().push(response.raw_sample.join("|"));
        })
    }

    #[test]
    fn test_manual_pull_without_runtime() {
        let transport = LocalTransport::new();
        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        let provider = provider(&transport);

        let (seen, callback) = recorder();
        provider.subscribe(callback);
        assert_eq!(provider.state(), ProviderState::Polling);
        assert_eq!(provider.reader().state(), ReaderState::Connected);

        push(outlet.as_ref(), "ping");
        push(outlet.as_ref(), "[0]");
        let pulled = provider.pull_all_responses();

        assert_eq!(pulled.len(), 2);
        assert_eq!(*seen.lock(), vec!["ping", "[0]"]);
    }

    #[test]
    fn test_type_filter_and_prediction_callback() {
        let transport = LocalTransport::new();
        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        let provider = provider(&transport);

        let pings = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&pings);
        provider.subscribe_with(
            SubscribeOptions::new().of_type(ResponseType::Ping),
            move |_| *counter.lock() += 1,
        );

        let predictions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&predictions);
        provider.subscribe_predictions(move |value| sink.lock().push(value));

        for value in ["ping", "[2]", "hello", "ping", "3"] {
            push(outlet.as_ref(), value);
        }
        provider.pull_all_responses();

        assert_eq!(*pings.lock(), 2);
        assert_eq!(*predictions.lock(), vec![2, 3]);
    }

    #[test]
    fn test_subscribers_notified_in_subscription_order() {
        let transport = LocalTransport::new();
        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        let provider = provider(&transport);

        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            provider.subscribe(move |response| {
                order
                    .lock()
                    .push(format!("{}:{}", name, response.raw_sample[0]));
            });
        }

        push(outlet.as_ref(), "1");
        push(outlet.as_ref(), "2");
        provider.pull_all_responses();

        assert_eq!(
            *order.lock(),
            vec!["a:1", "b:1", "c:1", "a:2", "b:2", "c:2"]
        );
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let transport = LocalTransport::new();
        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        let provider = provider(&transport);

        provider.subscribe(|_| panic!("subscriber failure"));
        let (seen, callback) = recorder();
        provider.subscribe(callback);

        push(outlet.as_ref(), "ping");
        push(outlet.as_ref(), "[1]");
        provider.pull_all_responses();

        assert_eq!(*seen.lock(), vec!["ping", "[1]"]);
        assert_eq!(provider.subscriber_count(), 2);
    }

    #[test]
    fn test_dead_subscriber_pruned_before_notification() {
        let transport = LocalTransport::new();
        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        let provider = provider(&transport);

        let owner = Arc::new(());
        let (dead_seen, dead_callback) = recorder();
        provider.subscribe_with(SubscribeOptions::new().owned_by(&owner), dead_callback);
        let (seen, callback) = recorder();
        provider.subscribe(callback);

        push(outlet.as_ref(), "first");
        provider.pull_all_responses();
        assert_eq!(*dead_seen.lock(), vec!["first"]);

        drop(owner);
        push(outlet.as_ref(), "second");
        provider.pull_all_responses();

        assert_eq!(*dead_seen.lock(), vec!["first"]);
        assert_eq!(*seen.lock(), vec!["first", "second"]);
        assert_eq!(provider.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_unknown_id() {
        let transport = LocalTransport::new();
        let provider = provider(&transport);
        let id = provider.subscribe(|_| {});

        assert!(provider.unsubscribe(id));
        assert!(!provider.unsubscribe(id));
        assert_eq!(provider.state(), ProviderState::Idle);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let transport = LocalTransport::new();
        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        let provider = Arc::new(provider(&transport));

        let calls = Arc::new(Mutex::new(0));
        let id_slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let keep_alive = provider.subscribe(|_| {});
        let id = {
            let calls = Arc::clone(&calls);
            let id_slot = Arc::clone(&id_slot);
            let weak = Arc::downgrade(&provider);
            provider.subscribe(move |_| {
                *calls.lock() += 1;
                if let (Some(provider), Some(id)) = (weak.upgrade(), *id_slot.lock()) {
                    provider.unsubscribe(id);
                }
            })
        };
        *id_slot.lock() = Some(id);

        push(outlet.as_ref(), "1");
        push(outlet.as_ref(), "2");
        provider.pull_all_responses();

        assert_eq!(*calls.lock(), 1);
        assert_eq!(provider.subscriber_count(), 1);
        assert!(provider.unsubscribe(keep_alive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_delivers_and_stops_after_last_unsubscribe() {
        let transport = LocalTransport::new();
        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        let provider = provider(&transport);

        let (seen, callback) = recorder();
        let id = provider.subscribe(callback);

        push(outlet.as_ref(), "ping");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(*seen.lock(), vec!["ping"]);

        assert!(provider.unsubscribe(id));
        assert_eq!(provider.state(), ProviderState::Idle);
        assert_eq!(provider.reader().state(), ReaderState::Closed);

        push(outlet.as_ref(), "[1]");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*seen.lock(), vec!["ping"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_waits_for_stream() {
        let transport = LocalTransport::new();
        let provider = provider(&transport);

        let (seen, callback) = recorder();
        provider.subscribe(callback);
        assert_eq!(provider.reader().state(), ReaderState::Resolving);

        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(provider.reader().state(), ReaderState::Connected);

        push(outlet.as_ref(), "marker received: Trial Started");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(*seen.lock(), vec!["marker received: Trial Started"]);
    }

    #[test]
    fn test_manual_pull_reopens_after_failed_inlet() {
        let transport = LocalTransport::new();
        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        let provider = flaky_provider(&transport, 2);

        let (seen, callback) = recorder();
        provider.subscribe(callback);
        assert_eq!(provider.state(), ProviderState::Polling);
        assert_eq!(provider.reader().state(), ReaderState::Closed);

        assert!(provider.pull_all_responses().is_empty());
        assert_eq!(provider.reader().state(), ReaderState::Closed);

        push(outlet.as_ref(), "ping");
        assert!(provider.pull_all_responses().is_empty());
        assert_eq!(provider.reader().state(), ReaderState::Connected);

        push(outlet.as_ref(), "[1]");
        assert_eq!(provider.pull_all_responses().len(), 1);
        assert_eq!(*seen.lock(), vec!["[1]"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_recovers_after_failed_inlet() {
        let transport = LocalTransport::new();
        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        let provider = flaky_provider(&transport, 2);

        let (seen, callback) = recorder();
        provider.subscribe(callback);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(provider.state(), ProviderState::Polling);
        assert_eq!(provider.reader().state(), ReaderState::Connected);

        push(outlet.as_ref(), "ping");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(*seen.lock(), vec!["ping"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_manual_pull_waits_for_batch_in_progress() {
        let transport = LocalTransport::new();
        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        let reader = MarkerReader::new(Arc::new(transport.clone()), Predicate::by_type("Responses"));
        let provider = ResponseProvider::new(reader, Duration::from_millis(20));

        let (slow_seen, record_slow) = recorder();
        provider.subscribe(move |response| {
            if response.raw_sample == ["a"] {
                std::thread::sleep(Duration::from_millis(300));
            }
            record_slow(response);
        });
        let (fast_seen, record_fast) = recorder();
        provider.subscribe(record_fast);

        push(outlet.as_ref(), "a");
        tokio::time::sleep(Duration::from_millis(100)).await;
        push(outlet.as_ref(), "b");
        provider.pull_all_responses();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*slow_seen.lock(), vec!["a", "b"]);
        assert_eq!(*fast_seen.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_pull_from_callback_is_skipped() {
        let transport = LocalTransport::new();
        let outlet = transport.advertise("Python", "Responses", "src").unwrap();
        let provider = Arc::new(provider(&transport));

        let nested = Arc::new(Mutex::new(Vec::new()));
        {
            let nested = Arc::clone(&nested);
            let weak = Arc::downgrade(&provider);
            provider.subscribe(move |_| {
                if let Some(provider) = weak.upgrade() {
                    nested.lock().push(provider.pull_all_responses().len());
                }
            });
        }
        let (seen, callback) = recorder();
        provider.subscribe(callback);

        push(outlet.as_ref(), "1");
        push(outlet.as_ref(), "2");
        assert_eq!(provider.pull_all_responses().len(), 2);

        assert_eq!(*nested.lock(), vec![0, 0]);
        assert_eq!(*seen.lock(), vec!["1", "2"]);
    }
}
