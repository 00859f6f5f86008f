// In-process marker transport
//
// Streams are advertised into a shared namespace; every inlet gets its own FIFO
// queue and sees only samples pushed after it was opened. `LocalTransport::global()`
// is the process-wide namespace; `LocalTransport::new()` creates an isolated one.

use super::{local_clock, Inlet, MarkerTransport, Outlet, Sample};
use crate::resolver::Predicate;
use crate::types::{StreamDescriptor, StreamError, StreamResult};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

const WAIT_STEP: Duration = Duration::from_millis(2);

static GLOBAL_TRANSPORT: OnceLock<LocalTransport> = OnceLock::new();

type SampleQueue = Mutex<VecDeque<Sample>>;
type StreamTable = RwLock<Vec<Arc<StreamSlot>>>;

struct StreamSlot {
    descriptor: StreamDescriptor,
    inlets: Mutex<Vec<Weak<SampleQueue>>>,
}

/// In-memory namespace of advertised streams
#[derive(Clone)]
pub struct LocalTransport {
    streams: Arc<StreamTable>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Process-wide namespace shared by every caller
    pub fn global() -> Self {
        GLOBAL_TRANSPORT.get_or_init(LocalTransport::new).clone()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    fn matching(&self, predicate: &Predicate) -> Vec<StreamDescriptor> {
        self.streams
            .read()
            .iter()
            .filter(|slot| predicate.matches(&slot.descriptor))
            .map(|slot| slot.descriptor.clone())
            .collect()
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkerTransport for LocalTransport {
    fn advertise(
        &self,
        name: &str,
        stream_type: &str,
        source_id: &str,
    ) -> StreamResult<Box<dyn Outlet>> {
        if name.is_empty() || stream_type.is_empty() {
            return Err(StreamError::InvalidConfig(format!(
                "stream name and type are required (name={:?}, type={:?})",
                name, stream_type
            )));
        }

        let descriptor = StreamDescriptor::marker_stream(
            name,
            stream_type,
            source_id,
            uuid::Uuid::new_v4().to_string(),
        );

        let slot = Arc::new(StreamSlot {
            descriptor,
            inlets: Mutex::new(Vec::new()),
        });

        self.streams.write().push(Arc::clone(&slot));

        log::debug!(
            "Advertised local stream '{}' type '{}' ({})",
            slot.descriptor.name,
            slot.descriptor.stream_type,
            slot.descriptor.uid
        );

        Ok(Box::new(LocalOutlet {
            slot,
            streams: Arc::downgrade(&self.streams),
        }))
    }

    fn resolve(&self, predicate: &Predicate, timeout: f64) -> StreamResult<Vec<StreamDescriptor>> {
        let deadline = Instant::now() + Duration::from_secs_f64(timeout.max(0.0));

        loop {
            let found = self.matching(predicate);
            if !found.is_empty() || Instant::now() >= deadline {
                return Ok(found);
            }
            std::thread::sleep(WAIT_STEP);
        }
    }

    fn open_inlet(&self, descriptor: &StreamDescriptor) -> StreamResult<Box<dyn Inlet>> {
        let slot = self
            .streams
            .read()
            .iter()
            .find(|slot| slot.descriptor.uid == descriptor.uid)
            .cloned()
            .ok_or_else(|| StreamError::StreamNotFound(descriptor.name.clone()))?;

        let queue: Arc<SampleQueue> = Arc::new(Mutex::new(VecDeque::new()));
        slot.inlets.lock().push(Arc::downgrade(&queue));

        log::debug!("Opened local inlet on '{}'", slot.descriptor.name);

        Ok(Box::new(LocalInlet { queue }))
    }
}

struct LocalOutlet {
    slot: Arc<StreamSlot>,
    streams: Weak<StreamTable>,
}

impl Outlet for LocalOutlet {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.slot.descriptor
    }

    fn push_sample(&self, sample: &[String]) -> StreamResult<()> {
        let channel_count = self.slot.descriptor.channel_count as usize;
        if sample.len() != channel_count {
            return Err(StreamError::Transport(format!(
                "sample has {} values, stream '{}' has {} channel(s)",
                sample.len(),
                self.slot.descriptor.name,
                channel_count
            )));
        }

        let stamped = Sample {
            values: sample.to_vec(),
            capture_time: local_clock(),
        };

        let mut inlets = self.slot.inlets.lock();
        inlets.retain(|inlet| match inlet.upgrade() {
            Some(queue) => {
                queue.lock().push_back(stamped.clone());
                true
            }
            None => false,
        });

        Ok(())
    }
}

impl Drop for LocalOutlet {
    fn drop(&mut self) {
        if let Some(streams) = self.streams.upgrade() {
            streams
                .write()
                .retain(|slot| slot.descriptor.uid != self.slot.descriptor.uid);
            log::debug!("Unadvertised local stream '{}'", self.slot.descriptor.name);
        }
    }
}

struct LocalInlet {
    queue: Arc<SampleQueue>,
}

impl Inlet for LocalInlet {
    fn pull_sample(&mut self, timeout: f64) -> StreamResult<Option<Sample>> {
        let deadline = Instant::now() + Duration::from_secs_f64(timeout.max(0.0));

        loop {
            if let Some(sample) = self.queue.lock().pop_front() {
                return Ok(Some(sample));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(WAIT_STEP);
        }
    }

    fn samples_available(&self) -> usize {
        self.queue.lock().len()
    }
}
