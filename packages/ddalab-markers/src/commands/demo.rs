use crate::cli::DemoArgs;
use crate::exit_codes;
use ddalab_markers::{
    LocalTransport, MarkerEchoResponder, MarkerTransport, MarkerWriter, Response, ResponseProvider,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn print_response(response: &Response, json: bool) {
    if json {
        match serde_json::to_string(response) {
            Ok(line) => println!("{}", line),
            Err(e) => log::error!("Failed to serialize response: {}", e),
        }
    } else {
        println!(
            "[{:.3}] {:<32} {}",
            response.capture_time,
            response.response_type().to_string(),
            response.raw_sample.join(" | ")
        );
    }
}

pub async fn execute(args: DemoArgs) -> i32 {
    let config = match super::load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };

    if args.objects == 0 {
        eprintln!("Error: --objects must be at least 1");
        return exit_codes::CONFIG_ERROR;
    }

    let transport: Arc<dyn MarkerTransport> = Arc::new(LocalTransport::new());

    let writer = MarkerWriter::from_config(Arc::clone(&transport), &config);
    if !writer.open_stream() {
        return exit_codes::EXECUTION_ERROR;
    }

    let responder = Arc::new(MarkerEchoResponder::new(Arc::clone(&transport), &config));
    let echo_task = match Arc::clone(&responder).spawn(config.polling_interval()) {
        Ok(task) => task,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    let provider = ResponseProvider::from_config(Arc::clone(&transport), &config);
    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    let json = args.json;
    let subscription = provider.subscribe(move |response| {
        counter.fetch_add(1, Ordering::Relaxed);
        print_response(response, json);
    });

    let settle = config.polling_interval() * 3;
    let mut sent = 0usize;

    for trial in 0..args.trials {
        let target = (trial as usize % args.objects) as i32;

        sent += usize::from(writer.push_trial_started());
        sent += usize::from(writer.push_mi_marker(args.objects, args.window_length, target));
        tokio::time::sleep(Duration::from_secs_f32(args.window_length.max(0.0))).await;
        sent += usize::from(writer.push_trial_ends());

        responder.send_prediction(target);
        tokio::time::sleep(settle).await;
    }

    sent += usize::from(writer.push_training_complete());
    tokio::time::sleep(settle).await;

    provider.unsubscribe(subscription);
    echo_task.shutdown().await;
    writer.close_stream();

    if !json {
        println!();
        println!(
            "Sent {} marker(s), received {} response(s)",
            sent,
            received.load(Ordering::Relaxed)
        );
    }

    exit_codes::SUCCESS
}
