use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info,tower_http=warn";

/// Installs the global subscriber once. `RUST_LOG` overrides the default
/// filter and `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let _ = INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let json = std::env::var("LOG_FORMAT")
            .map(|value| value.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if json {
            fmt().with_env_filter(filter).json().init();
        } else {
            fmt().with_env_filter(filter).with_target(false).init();
        }
    });
}
