use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive, e.g. `redliner=debug`.
pub const LOG_ENV_VAR: &str = "REDLINER_LOG";

/// Initialize the tracing subscriber. Logs go to stderr so stdout carries
/// only the redline or JSON result.
///
/// `REDLINER_LOG` wins when set; otherwise `info`, or `debug` with `verbose`.
pub fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}
