//! Log output for the data server.
//!
//! Output format is picked by `CPFS_LOG_FORMAT`:
//! - `json` - one JSON object per event, for log shippers
//! - `pretty` - multi-line human-readable output
//! - `compact` - single-line output
//!
//! When it is unset or unrecognized, [`TracingConfig::from_env`] uses
//! `pretty` if stdout is a terminal and `json` otherwise. Configs built in
//! code default to `compact`.
//!
//! ```ignore
//! use cpfs_ds::observability::{TracingConfig, init_tracing};
//!
//! let _guard = init_tracing(TracingConfig::from_env())?;
//! ```

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig, TracingConfigBuilder};
pub use tracing_setup::{TracingGuard, build_filter, init_tracing};

/// Span covering one resync round towards a rejoining role.
#[macro_export]
macro_rules! resync_span {
    ($epoch:expr, $target:expr) => {
        tracing::info_span!("resync_round", epoch = $epoch, target = %$target)
    };
}
