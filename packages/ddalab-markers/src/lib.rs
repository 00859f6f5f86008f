// Marker streams for stimulus presentation
//
// This crate sends experiment markers to a remote signal-processing process and
// turns whatever comes back into typed responses delivered to subscribers.
//
// Architecture:
// - `transport`: Trait-based stream primitive (local in-process, LSL)
// - `resolver`: Stream predicates, one-shot and background resolution
// - `marker` / `writer`: Marker wire encoding and the outbound stream
// - `response`: Ordered, total parser for inbound samples
// - `reader`: Inbound stream with non-blocking batch pulls
// - `provider`: Polling pub/sub over the reader
// - `echo`: Loopback responder standing in for the remote process

pub mod config;
pub mod echo;
pub mod marker;
pub mod provider;
pub mod reader;
pub mod resolver;
pub mod response;
pub mod transport;
pub mod types;
pub mod writer;

pub use config::{ConfigError, MarkerStreamConfig};
pub use echo::{EchoTask, MarkerEchoResponder};
pub use marker::{CommandMarker, EventMarker, FlashKind, Marker, Paradigm};
pub use provider::{ResponseProvider, SubscribeOptions, SubscriptionId};
pub use reader::MarkerReader;
pub use resolver::{Predicate, PredicateField, ResolveLoop};
pub use response::{build_response, Response, ResponseKind, ResponseType};
pub use transport::{Inlet, LocalTransport, MarkerTransport, Outlet, Sample};
pub use types::{ProviderState, ReaderState, StreamDescriptor, StreamError, StreamResult};
pub use writer::MarkerWriter;
