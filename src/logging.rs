// src/logging.rs
// =============================================================================
// Log output for the binary.
//
// The library only emits `tracing` events; without a subscriber they go
// nowhere. The CLI installs a `fmt` subscriber writing to stderr, so the
// result table (or JSON) on stdout stays clean.
//
// Level selection:
// - RUST_LOG wins when set (e.g. RUST_LOG=crawl_pool=debug)
// - otherwise `info` for our crate, `debug` with -v; other crates `warn`
// =============================================================================

use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default = if verbose { "warn,crawl_pool=debug" } else { "warn,crawl_pool=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose);

    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
}
