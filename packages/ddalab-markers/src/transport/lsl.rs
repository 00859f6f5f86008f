// Lab Streaming Layer (LSL) marker transport
//
// Advertises and resolves single-channel string streams on the local network.
// LSL handles clock synchronization; capture times are the LSL timestamps of
// the pulled samples.
//
// Resolved stream infos are kept by uid so opening an inlet never waits on
// the network again.

use super::{Inlet, MarkerTransport, Outlet, Sample};
use crate::resolver::Predicate;
use crate::types::{StreamDescriptor, StreamError, StreamResult};
use lsl::{ChannelFormat, Pullable, Pushable, StreamInfo, StreamInlet, StreamOutlet};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Seconds an inlet may buffer before old samples are dropped
const INLET_MAX_BUFFER: i32 = 360;

/// Marker transport over liblsl
#[derive(Clone, Default)]
pub struct LslTransport {
    resolved: Arc<Mutex<HashMap<String, StreamInfo>>>,
}

impl LslTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn descriptor_from_info(info: &StreamInfo) -> StreamDescriptor {
        StreamDescriptor {
            name: info.stream_name(),
            stream_type: info.stream_type(),
            source_id: info.source_id(),
            uid: info.uid(),
            channel_count: info.channel_count().max(0) as u32,
        }
    }

    fn lsl_error(context: &str, e: lsl::Error) -> StreamError {
        StreamError::Transport(format!("{}: {:?}", context, e))
    }
}

impl MarkerTransport for LslTransport {
    fn advertise(
        &self,
        name: &str,
        stream_type: &str,
        source_id: &str,
    ) -> StreamResult<Box<dyn Outlet>> {
        let info = StreamInfo::new(name, stream_type, 1, 0.0, ChannelFormat::String, source_id)
            .map_err(|e| Self::lsl_error("Failed to create stream info", e))?;

        let outlet = StreamOutlet::new(&info, 0, INLET_MAX_BUFFER)
            .map_err(|e| Self::lsl_error("Failed to create outlet", e))?;

        let descriptor = match outlet.info() {
            Ok(advertised) => Self::descriptor_from_info(&advertised),
            Err(_) => Self::descriptor_from_info(&info),
        };

        log::info!(
            "LSL outlet advertised: name='{}', type='{}', source_id='{}'",
            descriptor.name,
            descriptor.stream_type,
            descriptor.source_id
        );

        Ok(Box::new(LslOutlet { outlet, descriptor }))
    }

    fn resolve(&self, predicate: &Predicate, timeout: f64) -> StreamResult<Vec<StreamDescriptor>> {
        let query = predicate.to_string();
        log::debug!("LSL predicate: '{}'", query);

        let streams = lsl::resolve_bypred(&query, 1, timeout)
            .map_err(|e| Self::lsl_error("LSL resolve failed", e))?;

        let descriptors: Vec<StreamDescriptor> =
            streams.iter().map(Self::descriptor_from_info).collect();

        let mut resolved = self.resolved.lock();
        for (info, descriptor) in streams.into_iter().zip(&descriptors) {
            resolved.insert(descriptor.uid.clone(), info);
        }

        Ok(descriptors)
    }

    fn open_inlet(&self, descriptor: &StreamDescriptor) -> StreamResult<Box<dyn Inlet>> {
        // Taken out so a stream that went away is resolved afresh next time
        let info = self
            .resolved
            .lock()
            .remove(&descriptor.uid)
            .ok_or_else(|| StreamError::StreamNotFound(descriptor.name.clone()))?;

        let inlet = StreamInlet::new(&info, INLET_MAX_BUFFER, 0, true)
            .map_err(|e| Self::lsl_error("Failed to create inlet", e))?;

        log::info!("LSL inlet created on '{}'", descriptor.name);

        Ok(Box::new(LslInlet { inlet }))
    }
}

struct LslOutlet {
    outlet: StreamOutlet,
    descriptor: StreamDescriptor,
}

impl Outlet for LslOutlet {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn push_sample(&self, sample: &[String]) -> StreamResult<()> {
        self.outlet
            .push_sample(&sample.to_vec())
            .map_err(|e| LslTransport::lsl_error("LSL push failed", e))
    }
}

struct LslInlet {
    inlet: StreamInlet,
}

impl Inlet for LslInlet {
    fn pull_sample(&mut self, timeout: f64) -> StreamResult<Option<Sample>> {
        let (values, capture_time): (Vec<String>, f64) = self
            .inlet
            .pull_sample(timeout)
            .map_err(|e| LslTransport::lsl_error("LSL pull failed", e))?;

        // LSL reports "nothing available" as a zero timestamp
        if capture_time <= 0.0 {
            return Ok(None);
        }

        Ok(Some(Sample {
            values,
            capture_time,
        }))
    }

    fn samples_available(&self) -> usize {
        self.inlet.samples_available() as usize
    }
}
