//! Incremental output of a streaming generation

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use crate::error::{RelayError, RelayResult};

/// Message shown to clients when generation fails
pub const GENERIC_FAILURE: &str = "Error generating response";

/// One frame of a streamed reply, serialized as a tagged JSON object
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamPart {
    #[serde(rename_all = "camelCase")]
    Start { message_id: String },
    TextDelta { id: String, delta: String },
    #[serde(rename_all = "camelCase")]
    ToolInputAvailable { tool_call_id: String, tool_name: String, input: Value },
    #[serde(rename_all = "camelCase")]
    ToolOutputAvailable { tool_call_id: String, output: Value },
    Finish,
    #[serde(rename_all = "camelCase")]
    Error { error_text: String },
}

/// Stream of parts handed to the HTTP layer
pub type TextStream = ReceiverStream<StreamPart>;

/// Where dispatch output goes.
///
/// `Start` is held back until the first real part so a failure before any
/// output reaches the client as a bare `Error`.
pub(crate) enum Sink {
    Buffered,
    Streaming {
        tx: mpsc::Sender<StreamPart>,
        message_id: String,
        started: bool,
    },
}

impl Sink {
    pub(crate) fn streaming(tx: mpsc::Sender<StreamPart>) -> Self {
        Sink::Streaming {
            tx,
            message_id: uuid::Uuid::new_v4().to_string(),
            started: false,
        }
    }

    pub(crate) fn is_streaming(&self) -> bool {
        matches!(self, Sink::Streaming { .. })
    }

    pub(crate) async fn emit(&mut self, part: StreamPart) -> RelayResult<()> {
        let Sink::Streaming { tx, message_id, started } = self else {
            return Ok(());
        };
        if !*started {
            tx.send(StreamPart::Start { message_id: message_id.clone() })
                .await
                .map_err(|_| RelayError::Cancelled)?;
            *started = true;
        }
        tx.send(part).await.map_err(|_| RelayError::Cancelled)
    }

    /// Report a failure as the final part; the client sees only the generic text
    pub(crate) async fn fail(&mut self) {
        if let Sink::Streaming { tx, .. } = self {
            let _ = tx
                .send(StreamPart::Error { error_text: GENERIC_FAILURE.to_string() })
                .await;
        }
    }

    pub(crate) fn has_started(&self) -> bool {
        matches!(self, Sink::Streaming { started: true, .. })
    }
}
