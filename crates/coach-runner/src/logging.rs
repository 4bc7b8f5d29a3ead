//! Log subscriber setup
//!
//! The subscriber is installed before any configuration is read so that
//! warnings from loading the environment and operator options are visible.
//! The `debug_logging` option is only known afterwards and is applied by
//! swapping the filter in place.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

const DEFAULT_FILTER: &str = "info,coach_runner=info,coach_supervisor=info,rumqttc=warn";
const DEBUG_FILTER: &str = "debug,coach_runner=debug,coach_supervisor=debug,rumqttc=info";

/// Handle for adjusting verbosity once the operator options are loaded
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    /// `RUST_LOG` was set and always wins
    from_env: bool,
}

impl LogHandle {
    /// Switch between the default and the debug filter
    pub fn set_debug(&self, debug: bool) -> Result<(), reload::Error> {
        if self.from_env {
            return Ok(());
        }
        self.handle.reload(default_filter(debug))
    }
}

fn default_filter(debug: bool) -> EnvFilter {
    EnvFilter::new(if debug { DEBUG_FILTER } else { DEFAULT_FILTER })
}

fn reloadable(env_filter: Option<EnvFilter>) -> (reload::Layer<EnvFilter, Registry>, LogHandle) {
    let from_env = env_filter.is_some();
    let (layer, handle) = reload::Layer::new(env_filter.unwrap_or_else(|| default_filter(false)));
    (layer, LogHandle { handle, from_env })
}

/// Install the global subscriber: `RUST_LOG` if set, otherwise the default filter
pub fn init() -> LogHandle {
    let (filter, handle) = reloadable(EnvFilter::try_from_default_env().ok());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
    handle
}
