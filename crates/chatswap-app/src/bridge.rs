use std::sync::Arc;

use async_trait::async_trait;
use chatswap_core::{Request, Response};
use tracing::warn;

use crate::router::{MessageRouter, Sender};

/// Content-side end of the message channel to the background router.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, request: Request) -> Response;
}

/// Delivers requests to an in-process router as they would travel between
/// contexts: encoded to the untyped wire form and decoded back.
pub struct LocalMessenger {
    router: Arc<MessageRouter>,
    sender: Sender,
}

impl LocalMessenger {
    pub fn new(router: Arc<MessageRouter>, sender: Sender) -> Self {
        Self { router, sender }
    }
}

#[async_trait]
impl Messenger for LocalMessenger {
    async fn send(&self, request: Request) -> Response {
        let encoded = request
            .to_wire()
            .map_err(|error| error.to_string())
            .and_then(|wire| serde_json::to_value(wire).map_err(|error| error.to_string()));
        let message = match encoded {
            Ok(message) => message,
            Err(error) => {
                warn!(action = %request.action(), error = %error, "failed to encode request");
                return Response::failure();
            }
        };

        let reply = self.router.handle_json(message, &self.sender).await;
        serde_json::from_value(reply).unwrap_or_else(|error| {
            warn!(error = %error, "undecodable response");
            Response::failure()
        })
    }
}
