use once_cell::sync::OnceCell;
use tracing::error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::reload::Handle;
use tracing_subscriber::{EnvFilter, Registry};

use crate::commands::Verbosity;

static LOGGER_HANDLE: OnceCell<Handle<EnvFilter, Registry>> = OnceCell::new();

/// Install the global subscriber, or update its filter if already installed
///
/// `RUST_LOG` takes precedence over the verbosity flags.
pub(crate) fn init_logger(verbosity: Option<Verbosity>) {
    let verbosity = verbosity.unwrap_or_default();

    let log_filter = match verbosity {
        // Show only errors
        Verbosity::Quiet => "off,pluginmaster=error,PLUGINR=error",
        // Show failed refreshes and dropped entries
        Verbosity::Verbose(0) => "off,pluginmaster=warn,PLUGINR=warn",
        // Also show refresh progress
        Verbosity::Verbose(1) => "off,pluginmaster=info,PLUGINR=info",
        // Also show client construction and request spans
        Verbosity::Verbose(2) => "off,pluginmaster=debug,PLUGINR=debug,plugin_repository=debug",
        Verbosity::Verbose(3) => "off,pluginmaster=trace,PLUGINR=trace,plugin_repository=trace",
        // Also show the HTTP stack
        Verbosity::Verbose(_) => "trace",
    };

    let filter_handle = LOGGER_HANDLE.get_or_init(|| {
        // The initial filter caps `log` verbosity for the lifetime of the process,
        // so start wide open and narrow it through the reload handle.
        let (filter, reload_handle) = tracing_subscriber::reload::Layer::new(EnvFilter::new("trace"));
        let log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(log_layer).init();
        reload_handle
    });

    update_filters(filter_handle, log_filter);
}

fn update_filters(filter_handle: &Handle<EnvFilter, Registry>, log_filter: &str) {
    let result = filter_handle.modify(|layer| {
        match EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_filter)) {
            Ok(new_filter) => *layer = new_filter,
            Err(err) => {
                error!("Updating logger filter failed: {}", err);
            },
        };
    });
    if let Err(err) = result {
        error!("Updating logger filter failed: {}", err);
    }
}
