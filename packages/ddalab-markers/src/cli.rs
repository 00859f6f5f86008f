use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ddalab-markers",
    version,
    about = "Marker stream tool for stimulus presentation sessions",
    long_about = "Send experiment markers and watch the responses that come back.\n\
                  Stream names and periods are read from DDALAB_MARKER_* variables (or .env)."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run an in-process session: markers, echo responder and subscriber
    Demo(DemoArgs),
    /// Answer markers on the network like the signal-processing backend (requires LSL)
    Echo(EchoArgs),
    /// Look up an advertised stream by predicate (requires LSL)
    Resolve(ResolveArgs),
}

#[derive(Args)]
pub struct DemoArgs {
    /// Number of trials to run
    #[arg(long, default_value_t = 3)]
    pub trials: u32,

    /// Objects on screen
    #[arg(long, default_value_t = 2)]
    pub objects: usize,

    /// Epoch window length in seconds
    #[arg(long, default_value_t = 1.5)]
    pub window_length: f32,

    /// Print responses as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct EchoArgs {
    /// Seconds between marker polls
    #[arg(long, default_value_t = 0.05)]
    pub period: f64,

    /// Send a ping every N seconds
    #[arg(long)]
    pub ping_every: Option<f64>,

    /// Stop after N seconds (runs until killed when omitted)
    #[arg(long)]
    pub duration: Option<f64>,
}

#[derive(Args)]
pub struct ResolveArgs {
    /// Stream predicate, e.g. "type='BCI_Essentials_Markers'"
    #[arg(long)]
    pub predicate: String,

    /// Seconds to wait for the stream
    #[arg(long, default_value_t = 2.0)]
    pub timeout: f64,

    /// Print the descriptor as JSON
    #[arg(long)]
    pub json: bool,
}
