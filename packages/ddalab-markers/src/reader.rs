// Inbound response stream
//
// Resolves the response stream in the background and, once found, keeps one
// inlet open. Pulls never block: each sample is requested with a zero timeout
// and absence of data simply ends the batch.

use crate::config::MarkerStreamConfig;
use crate::resolver::{self, Predicate, ResolveLoop};
use crate::response::{build_response, Response};
use crate::transport::{Inlet, MarkerTransport};
use crate::types::{ReaderState, StreamDescriptor};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Samples pulled per batch unless the caller asks otherwise
pub const DEFAULT_MAX_SAMPLES: usize = 50;

struct Connection {
    inlet: Box<dyn Inlet>,
    descriptor: StreamDescriptor,
}

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// Reads and parses responses from one resolved stream
pub struct MarkerReader {
    transport: Arc<dyn MarkerTransport>,
    predicate: Predicate,
    connection: SharedConnection,
    resolve_loop: Mutex<Option<ResolveLoop>>,
}

impl MarkerReader {
    pub fn new(transport: Arc<dyn MarkerTransport>, predicate: Predicate) -> Self {
        Self {
            transport,
            predicate,
            connection: Arc::new(Mutex::new(None)),
            resolve_loop: Mutex::new(None),
        }
    }

    /// Reader for the configured response stream type
    pub fn from_config(transport: Arc<dyn MarkerTransport>, config: &MarkerStreamConfig) -> Self {
        Self::new(
            transport,
            Predicate::by_type(config.response_stream_type.clone()),
        )
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn state(&self) -> ReaderState {
        if self.connection.lock().is_some() {
            return ReaderState::Connected;
        }

        match self.resolve_loop.lock().as_ref() {
            Some(resolve_loop) if !resolve_loop.is_finished() => ReaderState::Resolving,
            _ => ReaderState::Closed,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// Descriptor of the connected stream
    pub fn descriptor(&self) -> Option<StreamDescriptor> {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| connection.descriptor.clone())
    }

    /// Start (or restart) resolving and connecting
    ///
    /// Checks once without waiting; if the stream is not there yet, a background
    /// loop retries every `resolve_timeout` seconds. Returns false, with a warning,
    /// when nothing could be started.
    pub fn open_stream(&self, resolve_timeout: f64) -> bool {
        if !self.predicate.is_valid() {
            log::warn!(
                "Not opening response stream: invalid predicate {:?}",
                self.predicate.to_string()
            );
            return false;
        }

        if !resolve_timeout.is_finite() || resolve_timeout <= 0.0 {
            log::warn!(
                "Not opening response stream: resolve timeout must be positive, got {}",
                resolve_timeout
            );
            return false;
        }

        self.close_stream();

        if let Some(descriptor) = resolver::resolve(self.transport.as_ref(), &self.predicate, 0.0)
        {
            if let Some(connection) = Self::connect(self.transport.as_ref(), descriptor) {
                *self.connection.lock() = Some(connection);
                return true;
            }
        }

        let cancel_token = CancellationToken::new();
        let on_resolved = {
            let transport = Arc::clone(&self.transport);
            let connection = Arc::clone(&self.connection);
            let cancel_token = cancel_token.clone();

            move |descriptor: StreamDescriptor| {
                let opened = Self::connect(transport.as_ref(), descriptor);
                let mut slot = connection.lock();
                if !cancel_token.is_cancelled() {
                    *slot = opened;
                }
            }
        };

        match ResolveLoop::spawn(
            Arc::clone(&self.transport),
            self.predicate.clone(),
            Duration::from_secs_f64(resolve_timeout),
            cancel_token,
            on_resolved,
        ) {
            Ok(resolve_loop) => {
                log::info!("Waiting for response stream {}", self.predicate);
                *self.resolve_loop.lock() = Some(resolve_loop);
                true
            }
            Err(e) => {
                log::warn!(
                    "Response stream {} not found and cannot keep resolving: {}",
                    self.predicate,
                    e
                );
                false
            }
        }
    }

    /// Cancel any outstanding resolve and drop the inlet; safe to call at any time
    pub fn close_stream(&self) {
        if let Some(resolve_loop) = self.resolve_loop.lock().take() {
            resolve_loop.cancel();
        }

        if let Some(connection) = self.connection.lock().take() {
            log::info!("Closed response stream '{}'", connection.descriptor.name);
        }
    }

    /// Samples buffered on the inlet; 0 when not connected
    pub fn samples_available(&self) -> usize {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| connection.inlet.samples_available())
            .unwrap_or(0)
    }

    /// Pull up to `max_samples` already-buffered samples and parse each one
    pub fn pull_all_responses(&self, max_samples: usize) -> Vec<Response> {
        let mut guard = self.connection.lock();
        let Some(connection) = guard.as_mut() else {
            return Vec::new();
        };

        let mut responses = Vec::new();
        while responses.len() < max_samples {
            match connection.inlet.pull_sample(0.0) {
                Ok(Some(sample)) if sample.capture_time > 0.0 => {
                    let values = sample.values.as_slice();
                    responses.push(build_response(values, sample.capture_time));
                }
                Ok(_) => break,
                Err(e) => {
                    log::warn!(
                        "Pull from response stream '{}' failed: {}",
                        connection.descriptor.name,
                        e
                    );
                    break;
                }
            }
        }

        if !responses.is_empty() {
            log::debug!(
                "Pulled {} response(s) from '{}'",
                responses.len(),
                connection.descriptor.name
            );
        }

        responses
    }

    /// `pull_all_responses` with the default batch size
    pub fn pull_responses(&self) -> Vec<Response> {
        self.pull_all_responses(DEFAULT_MAX_SAMPLES)
    }

    fn connect(transport: &dyn MarkerTransport, descriptor: StreamDescriptor) -> Option<Connection> {
        match transport.open_inlet(&descriptor) {
            Ok(inlet) => {
                log::info!(
                    "Connected to response stream '{}' ({})",
                    descriptor.name,
                    descriptor.source_id
                );
                Some(Connection { inlet, descriptor })
            }
            Err(e) => {
                log::error!(
                    "Failed to open inlet on response stream '{}': {}",
                    descriptor.name,
                    e
                );
                None
            }
        }
    }
}

impl Drop for MarkerReader {
    fn drop(&mut self) {
        self.close_stream();
    }
}
