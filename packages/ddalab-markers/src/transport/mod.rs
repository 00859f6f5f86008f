// Pluggable stream transport for markers
//
// The transport performs stream advertisement, discovery and sample I/O across
// process boundaries. Everything above this module (writer, reader, provider)
// talks to it only through the traits below, so a new transport can be added by:
// 1. Implementing `MarkerTransport`, `Outlet` and `Inlet`
// 2. Handing an `Arc<dyn MarkerTransport>` to the writer/reader
//
// Current implementations:
// - Local: in-process namespace, used for loopback sessions and tests
// - LSL: Lab Streaming Layer (feature `lsl-support`)

pub mod local;
#[cfg(feature = "lsl-support")]
pub mod lsl;

use crate::resolver::Predicate;
use crate::types::{StreamDescriptor, StreamResult};
use serde::{Deserialize, Serialize};

pub use local::LocalTransport;
#[cfg(feature = "lsl-support")]
pub use self::lsl::LslTransport;

/// One pulled sample: the channel values plus the transport capture time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub values: Vec<String>,
    pub capture_time: f64,
}

/// Write side of an advertised stream
pub trait Outlet: Send + Sync {
    /// Descriptor assigned at advertisement
    fn descriptor(&self) -> &StreamDescriptor;

    /// Push one sample (one string per channel)
    fn push_sample(&self, sample: &[String]) -> StreamResult<()>;
}

/// Read side of a resolved stream
pub trait Inlet: Send {
    /// Pull one sample, waiting at most `timeout` seconds
    ///
    /// `Ok(None)` means nothing was available.
    fn pull_sample(&mut self, timeout: f64) -> StreamResult<Option<Sample>>;

    /// Number of samples buffered and ready to pull
    fn samples_available(&self) -> usize;
}

/// Stream advertisement and discovery
pub trait MarkerTransport: Send + Sync {
    /// Advertise a single-channel string stream
    fn advertise(
        &self,
        name: &str,
        stream_type: &str,
        source_id: &str,
    ) -> StreamResult<Box<dyn Outlet>>;

    /// Find streams matching `predicate`, waiting at most `timeout` seconds
    ///
    /// A timeout of 0 checks once and returns immediately.
    fn resolve(&self, predicate: &Predicate, timeout: f64) -> StreamResult<Vec<StreamDescriptor>>;

    /// Open an inlet on a resolved stream
    fn open_inlet(&self, descriptor: &StreamDescriptor) -> StreamResult<Box<dyn Inlet>>;
}

/// Capture clock in seconds; always positive
pub fn local_clock() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
