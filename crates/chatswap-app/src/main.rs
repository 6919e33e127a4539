use std::sync::Arc;

use chatswap_app::clock::SystemClock;
use chatswap_app::logging::{init_logging, DEFAULT_FILTER};
use chatswap_app::stdio::serve;
use chatswap_app::storage::{AreaName, MemoryStorageArea};
use chatswap_app::{FileStorageArea, MessageRouter, PreferenceStore};
use tokio::io::BufReader;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging(DEFAULT_FILTER);
    if let Err(message) = run().await {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

/// Serves the background message router over newline-delimited JSON on
/// stdin/stdout until stdin closes.
async fn run() -> Result<(), String> {
    let open = |name: AreaName| {
        FileStorageArea::open_default(name)
            .map_err(|error| format!("chatswap-app: failed to open {name} storage\n  {error}"))
    };
    let store = PreferenceStore::new(
        Arc::new(open(AreaName::Local)?),
        Arc::new(open(AreaName::Sync)?),
        Arc::new(SystemClock),
    );
    let router = MessageRouter::new(store, Arc::new(MemoryStorageArea::new(AreaName::Session)));
    router.on_theme_changed(|theme| info!(%theme, "theme change relayed"));
    info!("chatswap background ready");

    serve(
        &router,
        BufReader::new(tokio::io::stdin()),
        &mut tokio::io::stdout(),
    )
    .await
}
