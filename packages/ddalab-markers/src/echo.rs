// Stand-in for the remote signal-processing process
//
// Reads the marker stream and answers on the response stream with the same wire
// forms the real backend uses: receipts, pings and predictions. Used for loopback
// sessions and end-to-end tests.

use crate::config::MarkerStreamConfig;
use crate::reader::MarkerReader;
use crate::resolver::Predicate;
use crate::response::{MARKER_RECEIPT_PREFIX, PING};
use crate::transport::MarkerTransport;
use crate::types::{ReaderState, StreamError, StreamResult};
use crate::writer::MarkerWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct MarkerEchoResponder {
    markers: MarkerReader,
    responses: MarkerWriter,
    resolve_timeout: f64,
}

impl MarkerEchoResponder {
    pub fn new(transport: Arc<dyn MarkerTransport>, config: &MarkerStreamConfig) -> Self {
        Self {
            markers: MarkerReader::new(
                Arc::clone(&transport),
                Predicate::by_name_and_type(
                    config.marker_stream_name.clone(),
                    config.marker_stream_type.clone(),
                ),
            ),
            responses: MarkerWriter::new(
                transport,
                config.response_stream_name.clone(),
                config.response_stream_type.clone(),
            ),
            resolve_timeout: config.resolve_timeout,
        }
    }

    pub fn marker_state(&self) -> ReaderState {
        self.markers.state()
    }

    /// Advertise the response stream and start looking for the marker stream
    pub fn connect(&self) -> bool {
        let advertised = self.responses.is_open() || self.responses.open_stream();

        let resolving = match self.markers.state() {
            ReaderState::Closed => self.markers.open_stream(self.resolve_timeout),
            ReaderState::Resolving | ReaderState::Connected => true,
        };

        advertised && resolving
    }

    /// Echo every pending marker; returns how many were answered
    pub fn poll_once(&self) -> usize {
        let mut echoed = 0;

        for response in self.markers.pull_responses() {
            let marker = response.raw_sample.join(",");
            if self.send_receipt(&marker) {
                echoed += 1;
            }
        }

        echoed
    }

    pub fn send_receipt(&self, marker: &str) -> bool {
        self.responses
            .push_string(&format!("{}{}", MARKER_RECEIPT_PREFIX, marker))
    }

    pub fn send_ping(&self) -> bool {
        self.responses.push_string(PING)
    }

    /// Predictions go out in the bracketed array form
    pub fn send_prediction(&self, value: i32) -> bool {
        self.responses.push_string(&format!("[{}]", value))
    }

    pub fn close(&self) {
        self.markers.close_stream();
        self.responses.close_stream();
    }

    /// Run `poll_once` every `period` until the returned task is stopped
    pub fn spawn(self: Arc<Self>, period: Duration) -> StreamResult<EchoTask> {
        if period.is_zero() {
            return Err(StreamError::InvalidConfig(
                "echo period must be positive".to_string(),
            ));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StreamError::NoRuntime(e.to_string()))?;

        self.connect();

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        let handle = runtime.spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,

                    _ = tick.tick() => {
                        let echoed = self.poll_once();
                        if echoed > 0 {
                            log::debug!("Echoed {} marker(s)", echoed);
                        }
                    }
                }
            }

            self.close();
        });

        Ok(EchoTask {
            cancel_token,
            handle: Some(handle),
        })
    }
}

/// Handle to a running echo loop; dropping it stops the loop
pub struct EchoTask {
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl EchoTask {
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Stop and wait for the loop to release its streams
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::warn!("Echo task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for EchoTask {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseKind;
    use crate::transport::LocalTransport;

    fn config() -> MarkerStreamConfig {
        MarkerStreamConfig {
            marker_stream_name: format!("markers-{}", uuid::Uuid::new_v4()),
            response_stream_name: format!("responses-{}", uuid::Uuid::new_v4()),
            ..MarkerStreamConfig::default()
        }
    }

    #[test]
    fn test_echoes_markers_as_receipts() {
        let transport = LocalTransport::new();
        let config = config();
        let writer = MarkerWriter::from_config(Arc::new(transport.clone()), &config);
        writer.open_stream();

        let echo = MarkerEchoResponder::new(Arc::new(transport.clone()), &config);
        assert!(echo.connect());
        assert_eq!(echo.marker_state(), ReaderState::Connected);

        let responses = MarkerReader::from_config(Arc::new(transport.clone()), &config);
        assert!(responses.open_stream(1.0));

        writer.push_trial_started();
        writer.push_mi_marker(2, 1.5, 1);
        assert_eq!(echo.poll_once(), 2);
        echo.send_ping();
        echo.send_prediction(1);

        let kinds: Vec<ResponseKind> = responses
            .pull_responses()
            .into_iter()
            .map(|response| response.kind)
            .collect();

        assert_eq!(kinds[0], ResponseKind::TrialStartedMarkerReceipt);
        assert!(matches!(kinds[1], ResponseKind::MiEventMarkerReceipt(_)));
        assert_eq!(kinds[2], ResponseKind::Ping);
        assert_eq!(kinds[3], ResponseKind::Prediction { value: 1 });
    }

    #[test]
    fn test_poll_without_marker_stream_is_noop() {
        let transport = LocalTransport::new();
        let echo = MarkerEchoResponder::new(Arc::new(transport), &config());
        assert_eq!(echo.poll_once(), 0);
    }

    #[test]
    fn test_spawn_requires_runtime() {
        let echo = Arc::new(MarkerEchoResponder::new(
            Arc::new(LocalTransport::new()),
            &config(),
        ));
        assert!(matches!(
            echo.spawn(Duration::from_millis(10)),
            Err(StreamError::NoRuntime(_))
        ));
    }
}
