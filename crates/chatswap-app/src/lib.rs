pub mod bridge;
pub mod clock;
pub mod config;
pub mod embed;
pub mod host;
pub mod logging;
pub mod navigation;
pub mod persistence;
pub mod prompt;
pub mod router;
pub mod runtime;
pub mod session;
pub mod signal;
pub mod stdio;
pub mod storage;
pub mod store;
pub mod theme;
pub mod toggle;

pub use bridge::{LocalMessenger, Messenger};
pub use config::{Config, ConfigError};
pub use host::{HostError, HostPage};
pub use persistence::FileStorageArea;
pub use router::{MessageRouter, Sender};
pub use runtime::{ContentRuntime, RuntimeError};
pub use store::PreferenceStore;
