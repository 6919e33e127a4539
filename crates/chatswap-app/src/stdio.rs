use chatswap_core::TabId;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::router::{MessageRouter, Sender};

/// One line of input: either a message from a tab or a tab-closed notice.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    tab_id: Option<TabId>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    tab_removed: Option<TabId>,
    #[serde(default)]
    message: Option<Value>,
}

/// Serves `router` over newline-delimited JSON until `input` closes.
/// Every line written to `output` is one JSON response.
pub async fn serve<R, W>(router: &MessageRouter, input: R, output: &mut W) -> Result<(), String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|error| format!("chatswap-app: failed to read stdin\n  {error}"))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(error = %error, "skipping malformed envelope");
                continue;
            }
        };

        if let Some(tab_id) = envelope.tab_removed {
            router.tab_removed(tab_id).await;
            continue;
        }
        let Some(message) = envelope.message else {
            warn!("envelope without a message");
            continue;
        };
        let sender = Sender {
            tab_id: envelope.tab_id,
            url: envelope.url,
        };
        let response = router.handle_json(message, &sender).await;
        output
            .write_all(format!("{response}\n").as_bytes())
            .await
            .map_err(|error| format!("chatswap-app: failed to write stdout\n  {error}"))?;
        output
            .flush()
            .await
            .map_err(|error| format!("chatswap-app: failed to write stdout\n  {error}"))?;
    }

    info!("stdin closed, shutting down");
    Ok(())
}
