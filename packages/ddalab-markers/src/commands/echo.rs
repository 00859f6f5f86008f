use crate::cli::EchoArgs;
use crate::exit_codes;
use ddalab_markers::MarkerEchoResponder;
use std::sync::Arc;
use std::time::Duration;

pub async fn execute(args: EchoArgs) -> i32 {
    let config = match super::load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };

    let transport = match super::network_transport() {
        Ok(transport) => transport,
        Err(code) => return code,
    };

    if !(args.period > 0.0) {
        eprintln!("Error: --period must be positive");
        return exit_codes::CONFIG_ERROR;
    }

    let responder = Arc::new(MarkerEchoResponder::new(transport, &config));
    let task = match Arc::clone(&responder).spawn(Duration::from_secs_f64(args.period)) {
        Ok(task) => task,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    println!(
        "Echoing '{}' markers on '{}'",
        config.marker_stream_name, config.response_stream_name
    );

    let ping_every = args
        .ping_every
        .filter(|seconds| *seconds > 0.0)
        .map(Duration::from_secs_f64);
    let deadline = args
        .duration
        .filter(|seconds| *seconds > 0.0)
        .map(|seconds| tokio::time::Instant::now() + Duration::from_secs_f64(seconds));

    let step = ping_every.unwrap_or(Duration::from_secs(1));
    loop {
        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
        }

        tokio::time::sleep(step).await;

        if ping_every.is_some() && !responder.send_ping() {
            log::warn!("Ping was dropped");
        }
    }

    task.shutdown().await;
    exit_codes::SUCCESS
}
