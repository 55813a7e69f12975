use ferrous_tunnel_domain::Config;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` wins over `[logging] level`.
pub fn init_logging(config: &Config) {
    let level = parse_level(&config.logging.level);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.logging.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialised: {}", e);
    }
}

fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}
