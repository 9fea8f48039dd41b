//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Level for the `-v` count; `quiet` wins over any count.
pub fn level_for(
    verbose: u8,
    quiet: bool,
) -> &'static str
{
    if quiet
    {
        return "error";
    }
    match verbose
    {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the flag level.
pub fn init(
    verbose: u8,
    quiet: bool,
    no_color: bool,
)
{
    let level = level_for(verbose, quiet);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("ccsync={level}")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(!no_color)
        .without_time();

    // A second init (tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt)
        .try_init();
}
