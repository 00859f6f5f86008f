use crate::cli::ResolveArgs;
use crate::exit_codes;
use ddalab_markers::resolver::{self, Predicate};

pub fn execute(args: ResolveArgs) -> i32 {
    let predicate = match Predicate::parse(&args.predicate) {
        Ok(predicate) => predicate,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };

    let transport = match super::network_transport() {
        Ok(transport) => transport,
        Err(code) => return code,
    };

    let Some(descriptor) = resolver::resolve(transport.as_ref(), &predicate, args.timeout) else {
        eprintln!("No stream matching {} within {}s", predicate, args.timeout);
        return exit_codes::NOT_FOUND;
    };

    if args.json {
        match serde_json::to_string_pretty(&descriptor) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_codes::EXECUTION_ERROR;
            }
        }
    } else {
        println!("Name:      {}", descriptor.name);
        println!("Type:      {}", descriptor.stream_type);
        println!("Source id: {}", descriptor.source_id);
        println!("Uid:       {}", descriptor.uid);
        println!("Channels:  {}", descriptor.channel_count);
    }

    exit_codes::SUCCESS
}
