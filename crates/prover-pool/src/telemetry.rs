//! Tracing setup for the coordinator binary.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Level variable consulted when `RUST_LOG` is unset.
pub const ENV_LOG: &str = "PROVER_POOL_LOG";

fn filter_directives(level: Option<&str>) -> String {
    let base_level = match level {
        Some("debug") => "debug",
        Some("trace") => "trace",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("prover_pool={base_level},prover_coordinator={base_level}")
}

/// Initialize tracing with `RUST_LOG`/`PROVER_POOL_LOG` and `LOG_FORMAT` support.
///
/// Logs go to stderr; `LOG_FORMAT=json` switches to JSON lines. Calling this
/// more than once is harmless.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter_directives(std::env::var(ENV_LOG).ok().as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
