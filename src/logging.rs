//! Injected-logging helper (§9 design note: "confine process-wide notify
//! stream/verbosity to an injected logging capability passed to each
//! handle; avoid global mutable state"). The engine itself only ever calls
//! the `log` facade macros (`debug!`/`info!`/`warn!`/`error!`), exactly as
//! the teacher's modules do; this is the one place that wires a concrete
//! subscriber (`env_logger`) to that facade, and only the binary front end
//! calls it — library code never installs a global logger itself.

/// Installs `env_logger` as the `log` backend, honouring `RUST_LOG` if set
/// and defaulting to `info` otherwise. Safe to call more than once: later
/// calls are no-ops.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
