pub mod demo;
pub mod echo;
pub mod resolve;

use crate::exit_codes;
use ddalab_markers::{MarkerStreamConfig, MarkerTransport};
use std::sync::Arc;

/// Configuration from the environment, or the exit code to fail with
pub fn load_config() -> Result<MarkerStreamConfig, i32> {
    MarkerStreamConfig::from_env().map_err(|e| {
        eprintln!("Error: {}", e);
        exit_codes::CONFIG_ERROR
    })
}

#[cfg(feature = "lsl-support")]
pub fn network_transport() -> Result<Arc<dyn MarkerTransport>, i32> {
    Ok(Arc::new(ddalab_markers::transport::LslTransport::new()))
}

#[cfg(not(feature = "lsl-support"))]
pub fn network_transport() -> Result<Arc<dyn MarkerTransport>, i32> {
    eprintln!("Error: this build has no network transport; rebuild with --features lsl-support");
    Err(exit_codes::UNSUPPORTED)
}
