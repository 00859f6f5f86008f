// Outbound marker stream
//
// Owns one outlet, advertised lazily on first push. Delivery is at-most-once:
// if the outlet cannot be opened or the push fails, the marker is logged and
// dropped so that stimulus timing is never interrupted.

use crate::config::MarkerStreamConfig;
use crate::marker::{CommandMarker, EventMarker, Marker};
use crate::transport::{MarkerTransport, Outlet};
use crate::types::{StreamDescriptor, StreamError, StreamResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// Source id unique to this machine and process
pub fn local_source_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Writes marker strings to a single outbound stream
pub struct MarkerWriter {
    transport: Arc<dyn MarkerTransport>,
    name: String,
    stream_type: String,
    source_id: String,
    outlet: Mutex<Option<Box<dyn Outlet>>>,
}

impl MarkerWriter {
    pub fn new(
        transport: Arc<dyn MarkerTransport>,
        name: impl Into<String>,
        stream_type: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            name: name.into(),
            stream_type: stream_type.into(),
            source_id: local_source_id(),
            outlet: Mutex::new(None),
        }
    }

    pub fn from_config(transport: Arc<dyn MarkerTransport>, config: &MarkerStreamConfig) -> Self {
        Self::new(
            transport,
            config.marker_stream_name.clone(),
            config.marker_stream_type.clone(),
        )
    }

    /// Override the generated source id
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn is_open(&self) -> bool {
        self.outlet.lock().is_some()
    }

    /// Descriptor of the live outlet
    pub fn descriptor(&self) -> Option<StreamDescriptor> {
        self.outlet
            .lock()
            .as_ref()
            .map(|outlet| outlet.descriptor().clone())
    }

    /// Advertise the stream
    ///
    /// Returns false (with a warning) if it is already open, or (with an error)
    /// if the transport refuses the advertisement.
    pub fn open_stream(&self) -> bool {
        let mut outlet = self.outlet.lock();
        if outlet.is_some() {
            log::warn!("Marker stream '{}' is already open", self.name);
            return false;
        }

        match self.advertise() {
            Ok(opened) => {
                *outlet = Some(opened);
                true
            }
            Err(e) => {
                log::error!("Failed to open marker stream '{}': {}", self.name, e);
                false
            }
        }
    }

    /// Release the outlet; safe to call when closed
    pub fn close_stream(&self) {
        if self.outlet.lock().take().is_some() {
            log::info!("Closed marker stream '{}'", self.name);
        }
    }

    /// Push one marker string, opening the stream first if needed
    ///
    /// Returns true when the sample was handed to the transport.
    pub fn push_string(&self, value: &str) -> bool {
        let mut outlet = self.outlet.lock();

        if outlet.is_none() {
            match self.advertise() {
                Ok(opened) => *outlet = Some(opened),
                Err(e) => {
                    log::error!(
                        "Dropping marker {:?}: could not open stream '{}': {}",
                        value,
                        self.name,
                        e
                    );
                    return false;
                }
            }
        }

        let Some(live) = outlet.as_ref() else {
            return false;
        };

        match live.push_sample(&[value.to_string()]) {
            Ok(()) => {
                log::debug!("Pushed marker {:?} on '{}'", value, self.name);
                true
            }
            Err(e) => {
                log::error!("Dropping marker {:?} on '{}': {}", value, self.name, e);
                false
            }
        }
    }

    pub fn push_marker(&self, marker: &Marker) -> bool {
        self.push_string(&marker.encode())
    }

    pub fn push_command(&self, command: CommandMarker) -> bool {
        self.push_string(command.as_str())
    }

    pub fn push_trial_started(&self) -> bool {
        self.push_command(CommandMarker::TrialStarted)
    }

    pub fn push_trial_ends(&self) -> bool {
        self.push_command(CommandMarker::TrialEnds)
    }

    pub fn push_training_complete(&self) -> bool {
        self.push_command(CommandMarker::TrainingComplete)
    }

    pub fn push_update_classifier(&self) -> bool {
        self.push_command(CommandMarker::UpdateClassifier)
    }

    pub fn push_mi_marker(
        &self,
        object_count: usize,
        window_length: f32,
        training_target: i32,
    ) -> bool {
        self.push_event(EventMarker::MotorImagery {
            object_count,
            window_length,
            training_target,
        })
    }

    pub fn push_switch_marker(
        &self,
        object_count: usize,
        window_length: f32,
        training_target: i32,
    ) -> bool {
        self.push_event(EventMarker::Switch {
            object_count,
            window_length,
            training_target,
        })
    }

    pub fn push_ssvep_marker(
        &self,
        object_count: usize,
        window_length: f32,
        frequencies: &[f32],
        training_target: i32,
    ) -> bool {
        self.push_event(EventMarker::Ssvep {
            object_count,
            window_length,
            frequencies: frequencies.to_vec(),
            training_target,
        })
    }

    pub fn push_tvep_marker(
        &self,
        object_count: usize,
        window_length: f32,
        frequencies: &[f32],
        training_target: i32,
    ) -> bool {
        self.push_event(EventMarker::Tvep {
            object_count,
            window_length,
            frequencies: frequencies.to_vec(),
            training_target,
        })
    }

    pub fn push_single_flash_p300_marker(
        &self,
        object_count: usize,
        active_object: i32,
        training_target: i32,
    ) -> bool {
        self.push_event(EventMarker::P300Single {
            object_count,
            active_object,
            training_target,
        })
    }

    pub fn push_multi_flash_p300_marker(
        &self,
        object_count: usize,
        active_objects: &[i32],
        training_target: i32,
    ) -> bool {
        self.push_event(EventMarker::P300Multi {
            object_count,
            active_objects: active_objects.to_vec(),
            training_target,
        })
    }

    fn push_event(&self, event: EventMarker) -> bool {
        self.push_string(&event.encode())
    }

    fn advertise(&self) -> StreamResult<Box<dyn Outlet>> {
        if self.name.is_empty() {
            return Err(StreamError::InvalidConfig(
                "marker stream name is empty".to_string(),
            ));
        }

        let outlet = self
            .transport
            .advertise(&self.name, &self.stream_type, &self.source_id)?;

        log::info!(
            "Opened marker stream '{}' type '{}' source '{}'",
            self.name,
            self.stream_type,
            self.source_id
        );

        Ok(outlet)
    }
}

impl Drop for MarkerWriter {
    fn drop(&mut self) {
        self.close_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{resolve_by_name, Predicate};
    use crate::transport::LocalTransport;

    fn writer(transport: &LocalTransport) -> MarkerWriter {
        MarkerWriter::new(Arc::new(transport.clone()), "Unity", "Markers")
    }

    #[test]
    fn test_open_is_idempotent_with_warning() {
        let transport = LocalTransport::new();
        let writer = writer(&transport);

        assert!(!writer.is_open());
        assert!(writer.open_stream());
        assert!(writer.is_open());
        assert!(!writer.open_stream());
        assert_eq!(transport.stream_count(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let transport = LocalTransport::new();
        let writer = writer(&transport);

        writer.close_stream();
        writer.open_stream();
        writer.close_stream();
        writer.close_stream();

        assert!(!writer.is_open());
        assert_eq!(transport.stream_count(), 0);
    }

    #[test]
    fn test_push_opens_lazily() {
        let transport = LocalTransport::new();
        let writer = writer(&transport);
        assert!(resolve_by_name(&transport, "Unity", 0.0).is_none());

        assert!(writer.push_trial_started());
        assert!(writer.is_open());

        let descriptor = resolve_by_name(&transport, "Unity", 0.0).unwrap();
        assert_eq!(descriptor.source_id, writer.source_id());
        assert_eq!(descriptor.stream_type, "Markers");
    }

    #[test]
    fn test_push_helpers_encode_markers() {
        let transport = LocalTransport::new();
        let writer = writer(&transport);
        writer.open_stream();

        let mut inlet = transport.open_inlet(&writer.descriptor().unwrap()).unwrap();

        writer.push_mi_marker(2, 1.5, 1);
        writer.push_switch_marker(2, 1.0, 7);
        writer.push_ssvep_marker(4, 1.5, &[12.5, 18.7, 24.4, 30.1], 2);
        writer.push_tvep_marker(1, 2.0, &[8.0], 0);
        writer.push_single_flash_p300_marker(4, 2, -1);
        writer.push_multi_flash_p300_marker(8, &[1, 3, 5, 7], 3);
        writer.push_training_complete();

        let mut pushed = Vec::new();
        while let Some(sample) = inlet.pull_sample(0.0).unwrap() {
            pushed.push(sample.values[0].clone());
        }

        assert_eq!(
            pushed,
            vec![
                "mi,2,2,1.50",
                "switch,2,-1,1.00",
                "ssvep,4,3,1.50,12.5,18.7,24.4,30.1",
                "tvep,1,1,2.00,8",
                "p300,s,4,-1,3",
                "p300,m,8,4,2,4,6,8",
                "Training Complete",
            ]
        );
    }

    #[test]
    fn test_failed_open_drops_write() {
        let transport = LocalTransport::new();
        let writer = MarkerWriter::new(Arc::new(transport.clone()), "", "Markers");

        assert!(!writer.open_stream());
        assert!(!writer.push_trial_ends());
        assert!(!writer.is_open());
        assert_eq!(transport.stream_count(), 0);
    }

    #[test]
    fn test_source_id_contains_process_id() {
        let transport = LocalTransport::new();
        let writer = writer(&transport);
        assert!(writer
            .source_id()
            .ends_with(&format!("-{}", std::process::id())));

        let custom = MarkerWriter::new(Arc::new(transport.clone()), "Unity", "Markers")
            .with_source_id("rig-7");
        custom.open_stream();
        let found = transport
            .resolve(&Predicate::by_name("Unity"), 0.0)
            .unwrap();
        assert_eq!(found[0].source_id, "rig-7");
    }
}
