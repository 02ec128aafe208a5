use async_trait::async_trait;
use chord_lib::messages::{ChordMessage, MAX_ENCODED_LEN};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

use crate::error::TransportError;

/// Fire-and-forget delivery of one message to a node address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, address: &str, message: ChordMessage) -> Result<(), TransportError>;
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECT_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One bincode frame per TCP connection. Nothing is read back.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    // Only connecting is retried; nothing is written before it succeeds.
    async fn connect_with_retry(&self, address: &str) -> Result<TcpStream, TransportError> {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut last_error = TransportError::Unreachable(address.to_string());

        for attempt in 0..MAX_CONNECT_RETRIES {
            if attempt > 0 {
                debug!(
                    "Retrying connection to {} (attempt {}/{})",
                    address,
                    attempt + 1,
                    MAX_CONNECT_RETRIES
                );
                tokio::time::sleep(delay).await;
                delay *= 2; // Exponential backoff
            }

            match timeout(self.timeout, TcpStream::connect(address)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => {
                    debug!("Failed to connect to {}: {}", address, e);
                    last_error = TransportError::Io {
                        address: address.to_string(),
                        source: e,
                    };
                }
                Err(_) => {
                    debug!("Connection to {} timed out after {:?}", address, self.timeout);
                    last_error = TransportError::Timeout {
                        address: address.to_string(),
                    };
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, address: &str, message: ChordMessage) -> Result<(), TransportError> {
        let encoded = message.encode()?;
        let mut stream = self.connect_with_retry(address).await?;
        debug!("Sending message to {}: {:?}", address, message);

        match timeout(self.timeout, stream.write_all(&encoded)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(TransportError::Io {
                    address: address.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                return Err(TransportError::Timeout {
                    address: address.to_string(),
                })
            }
        }

        match timeout(Duration::from_secs(1), stream.shutdown()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("Shutdown error (non-critical): {}", e),
            Err(_) => debug!("Shutdown timed out (non-critical)"),
        }
        Ok(())
    }
}

/// Accepts connections and pushes every decoded frame into `inbox`.
/// Returns once the inbox has been closed.
pub async fn serve(listener: TcpListener, inbox: UnboundedSender<ChordMessage>) {
    loop {
        let (mut socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };
        if inbox.is_closed() {
            return;
        }

        let inbox = inbox.clone();
        tokio::spawn(async move {
            let mut buffer = Vec::with_capacity(MAX_ENCODED_LEN + 1);
            // One byte past the limit is enough for decode to reject the frame
            let mut frame = (&mut socket).take(MAX_ENCODED_LEN as u64 + 1);
            match timeout(DEFAULT_TIMEOUT, frame.read_to_end(&mut buffer)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("Failed to read from {}: {}", peer, e);
                    return;
                }
                Err(_) => {
                    warn!("Read from {} timed out", peer);
                    return;
                }
            }

            match ChordMessage::decode(&buffer) {
                Ok(message) => {
                    if inbox.send(message).is_err() {
                        debug!("Inbox closed, dropping message from {}", peer);
                    }
                }
                Err(e) => warn!("Discarding bad frame from {}: {}", peer, e),
            }
        });
    }
}

/// In-process delivery over unbounded channels, keyed by address.
#[derive(Debug, Default)]
pub struct LocalTransport {
    routes: RwLock<HashMap<String, UnboundedSender<ChordMessage>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the inbox for `address`, replacing any previous one.
    pub fn register(&self, address: &str) -> UnboundedReceiver<ChordMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = match self.routes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        routes.insert(address.to_string(), tx);
        rx
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, address: &str, message: ChordMessage) -> Result<(), TransportError> {
        let sender = {
            let routes = match self.routes.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            routes.get(address).cloned()
        };
        match sender {
            Some(tx) => tx
                .send(message)
                .map_err(|_| TransportError::Unreachable(address.to_string())),
            None => Err(TransportError::Unreachable(address.to_string())),
        }
    }
}
