// # JSON Lines Trigger Source
//
// Line-delimited JSON implementation of TriggerSource over any async
// reader/writer pair (stdin/stdout, a socket, an in-memory pipe).
//
// ## Line Format
//
// Inbound, one trigger per line:
//
// ```json
// {"sender": "<base64 identity>", "message_id": "m-1", "text": "PROMO1"}
// ```
//
// Outbound, one response per line:
//
// ```json
// {"version": 0, "text": "...", "reply": {"message_id": "m-1", "sender_id": "<base64 identity>"}}
// ```
//
// Malformed inbound lines are logged and skipped. A read error ends the
// trigger stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, warn};

use crate::Error;
use crate::identity::Identity;
use crate::traits::{Response, Trigger, TriggerSource};

/// Payload version written on every response
const PAYLOAD_VERSION: u32 = 0;

type BoxedReader = Box<dyn AsyncBufRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Deserialize)]
struct InboundLine {
    sender: Identity,
    #[serde(default)]
    message_id: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct OutboundLine<'a> {
    version: u32,
    text: &'a str,
    reply: ReplyRef<'a>,
}

#[derive(Debug, Serialize)]
struct ReplyRef<'a> {
    message_id: &'a str,
    sender_id: Identity,
}

/// Trigger source reading and writing JSON lines
pub struct JsonLinesTriggerSource {
    reader: Mutex<Option<BoxedReader>>,
    writer: tokio::sync::Mutex<BoxedWriter>,
}

impl JsonLinesTriggerSource {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Mutex::new(Some(Box::new(BufReader::new(reader)))),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
        }
    }
}

/// Parse one inbound line, `None` for blank or malformed lines
fn parse_trigger_line(line: &str) -> Option<Trigger> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<InboundLine>(line) {
        Ok(inbound) => Some(Trigger::new(inbound.sender, inbound.message_id, inbound.text)),
        Err(e) => {
            warn!("Skipping malformed trigger line: {}", e);
            None
        }
    }
}

/// Encode a response as one JSON line, newline included
fn encode_response(response: &Response) -> Result<String, Error> {
    let outbound = OutboundLine {
        version: PAYLOAD_VERSION,
        text: &response.text,
        reply: ReplyRef {
            message_id: &response.reply_to,
            sender_id: response.recipient,
        },
    };

    let mut line = serde_json::to_string(&outbound)?;
    line.push('\n');
    Ok(line)
}

#[async_trait]
impl TriggerSource for JsonLinesTriggerSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = Trigger> + Send + 'static>> {
        let reader = self.reader.lock().ok().and_then(|mut guard| guard.take());

        let Some(reader) = reader else {
            error!("JSON lines reader already taken, no further triggers");
            return Box::pin(tokio_stream::empty());
        };

        let stream = LinesStream::new(reader.lines())
            .take_while(|line| match line {
                Ok(_) => true,
                Err(e) => {
                    error!("Failed to read trigger line: {}", e);
                    false
                }
            })
            .filter_map(|line| line.ok().as_deref().and_then(parse_trigger_line));

        Box::pin(stream)
    }

    async fn respond(&self, response: Response) -> Result<(), Error> {
        let line = encode_response(&response)?;

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        Ok(())
    }

    fn source_name(&self) -> &'static str {
        "json-lines"
    }
}
