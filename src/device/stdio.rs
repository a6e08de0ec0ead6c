//! Line-oriented reader device over stdin/stdout
//!
//! Each stdin line is one JSON data message from the reader. Keyboard output
//! bytes are written to stdout unchanged.

use super::{DeviceError, InboundMessage, ReaderDevice};
use async_trait::async_trait;
use std::io::BufRead;
use std::thread;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

pub struct StdioDevice {
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl StdioDevice {
    pub fn stdout() -> Self {
        Self::with_writer(tokio::io::stdout())
    }

    pub fn with_writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }

    /// Forward stdin lines into `tx` from a dedicated thread until EOF or the receiver closes
    ///
    /// A plain thread rather than a tokio task: a pending stdin read must not
    /// hold up runtime shutdown.
    pub fn spawn_stdin_reader(tx: mpsc::Sender<InboundMessage>) -> std::io::Result<thread::JoinHandle<u64>> {
        thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                match read_messages(stdin.lock(), &tx) {
                    Ok(count) => count,
                    Err(e) => {
                        log::error!("❌ Reading reader messages from stdin failed: {}", e);
                        0
                    }
                }
            })
    }
}

#[async_trait]
impl ReaderDevice for StdioDevice {
    async fn send_output(&self, data: &[u8]) -> Result<(), DeviceError> {
        let mut out = self.out.lock().await;
        out.write_all(data).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Forward every non-blank line of `reader` as a JSON message
///
/// Blocks the calling thread; returns the number of messages forwarded.
pub fn read_messages<R: BufRead>(reader: R, tx: &mpsc::Sender<InboundMessage>) -> std::io::Result<u64> {
    let mut count = 0u64;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if tx.blocking_send(InboundMessage::json(line.as_bytes())).is_err() {
            log::debug!("Inbound channel closed, stop reading input");
            break;
        }
        count += 1;
    }

    log::info!("📭 Reader input ended after {} messages", count);
    Ok(count)
}
