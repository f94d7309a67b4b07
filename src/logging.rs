//! Tracing setup
//!
//! Logs go to stderr so stdout stays free for the run summary. The filter
//! sits behind a reload layer: a RunConfig with `DebugSwitch: true` raises
//! the level to `debug` once it has been validated.

use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Handle to the installed filter
#[derive(Clone)]
pub struct VerbosityHandle(reload::Handle<EnvFilter, Registry>);

impl VerbosityHandle {
    pub fn enable_debug(&self) {
        match self.0.modify(|filter| *filter = EnvFilter::new("debug")) {
            Ok(()) => tracing::debug!("Debug logging enabled by RunConfig"),
            Err(e) => warn!(error = %e, "Could not raise log level"),
        }
    }
}

fn initial_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

/// Install the global subscriber
pub fn init(verbose: bool) -> VerbosityHandle {
    let (filter, handle) = reload::Layer::new(initial_filter(verbose));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
    if let Err(e) = installed {
        eprintln!("tracing already initialized: {}", e);
    }
    VerbosityHandle(handle)
}
