//! Tracing subscriber and Prometheus recorder setup.

use std::{io, sync::OnceLock, thread, time::Duration};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, prelude::*};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global tracing subscriber. `RUST_LOG` wins over `verbose`.
pub(crate) fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter),
        )
        .with(tracing_error::ErrorLayer::default())
        .try_init();
    if installed.is_err() {
        warn!("tracing subscriber already installed");
    }
}

/// Ensure the global metrics recorder is installed and return the Prometheus
/// handle.
pub(crate) fn init_metrics_recorder() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            warn!("metrics recorder already installed; /metrics will be empty");
        }

        let upkeep_handle = handle.clone();
        let upkeep = spawn_thread("prometheus-upkeep", move || {
            loop {
                thread::sleep(Duration::from_secs(5));
                upkeep_handle.run_upkeep();
            }
        });
        if let Err(err) = upkeep {
            warn!("failed to spawn prometheus upkeep thread: {err}");
        }

        handle
    })
}

/// Access the Prometheus handle when already initialised.
pub(crate) fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get()
}

/// Spawn a thread that inherits the current tracing dispatcher.
pub(crate) fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}
