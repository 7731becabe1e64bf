//! Socket front-end and request scheduling.
//!
//! Clients connect over a Unix stream socket (or TCP when configured), write
//! one request frame and read one response frame. Frames are assembled with
//! two full reads: the 4-byte length word, then the rest; anything over the
//! frame cap drops the connection. Completed requests enter a strict FIFO
//! drained by a single dispatcher, so at most one request is ever in flight
//! against the modem.

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::rc::Rc;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::error::{status, Error};
use crate::message::{peek_length, MessageReader, HEADER_SIZE, MESSAGE_MAX_SIZE};
use crate::processor::Processor;
use crate::protocol::{self, Command, SOCKET_PATH};
use crate::qmi::QmiDevice;
use crate::wwan::PortData;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    /// Optional IPv4 TCP listener for remote clients.
    pub tcp_endpoint: Option<(Ipv4Addr, u16)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(SOCKET_PATH),
            tcp_endpoint: None,
        }
    }
}

/// A fully-read request waiting for the dispatcher; the connection is held
/// for the write-back.
struct Request {
    connection: Box<dyn AsyncWrite + Unpin>,
    frame: Vec<u8>,
}

/// The daemon front-end: listeners plus the request queue over an optional
/// processor.
pub struct Server<D: QmiDevice + 'static, P: PortData + 'static> {
    config: ServerConfig,
    processor: RefCell<Option<Rc<Processor<D, P>>>>,
}

impl<D: QmiDevice + 'static, P: PortData + 'static> Server<D, P> {
    pub fn new(config: ServerConfig) -> Rc<Self> {
        Rc::new(Self {
            config,
            processor: RefCell::new(None),
        })
    }

    /// Attaches (or detaches) the modem processor. Requests other than the
    /// availability probe fail with NoModem while detached.
    pub fn set_processor(&self, processor: Option<Rc<Processor<D, P>>>) {
        *self.processor.borrow_mut() = processor;
    }

    pub fn processor(&self) -> Option<Rc<Processor<D, P>>> {
        self.processor.borrow().clone()
    }

    /// Accepts connections and serves requests until `shutdown` fires. Must
    /// run inside a `LocalSet`.
    pub async fn run(self: Rc<Self>, mut shutdown: oneshot::Receiver<()>) -> Result<(), Error> {
        // A stale socket file from a previous run is ours to replace.
        let _ = std::fs::remove_file(&self.config.socket_path);
        debug!("creating UNIX socket service...");
        let unix = UnixListener::bind(&self.config.socket_path)
            .map_err(|e| Error::Unknown(format!("error creating UNIX socket service: {e}")))?;

        let tcp = match self.config.tcp_endpoint {
            Some((address, port)) => Some(
                TcpListener::bind((address, port))
                    .await
                    .map_err(|e| Error::Unknown(format!("error creating TCP service: {e}")))?,
            ),
            None => None,
        };

        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<Request>();

        // Single dispatcher: strict FIFO, one request in flight.
        let this = self.clone();
        let dispatcher = tokio::task::spawn_local(async move {
            while let Some(request) = queue_rx.recv().await {
                this.process_request(request).await;
            }
        });

        debug!("starting socket service...");
        loop {
            let tcp_accept = async {
                match &tcp {
                    Some(listener) => listener.accept().await.map(|(stream, _)| stream),
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = &mut shutdown => break,
                accepted = unix.accept() => match accepted {
                    Ok((stream, _)) => spawn_reader(stream, queue_tx.clone()),
                    Err(e) => warn!("error accepting connection: {e}"),
                },
                accepted = tcp_accept => match accepted {
                    Ok(stream) => spawn_reader(stream, queue_tx.clone()),
                    Err(e) => warn!("error accepting TCP connection: {e}"),
                },
            }
        }

        debug!("socket service stopped");
        // Reader tasks may still hold queue senders; don't wait for them.
        dispatcher.abort();
        let _ = std::fs::remove_file(&self.config.socket_path);
        Ok(())
    }

    async fn process_request(&self, mut request: Request) {
        let response = self.build_response(&request.frame).await;
        if let Err(e) = request.connection.write_all(&response).await {
            // The client may be long gone; nothing else to do.
            warn!("error writing to output stream: {e}");
        }
        let _ = request.connection.shutdown().await;
    }

    async fn build_response(&self, frame: &[u8]) -> Vec<u8> {
        let command_code = match MessageReader::new(frame) {
            Ok(reader) => reader.command(),
            Err(e) => {
                return protocol::error_response(0, e.wire_status(), &e.to_string());
            }
        };

        // Availability is answered without touching the modem.
        if Command::from_code(command_code) == Some(Command::IsModemAvailable) {
            let available = self.processor.borrow().is_some();
            return protocol::is_modem_available_response(available);
        }

        let processor = self.processor.borrow().clone();
        match processor {
            None => protocol::error_response(command_code, status::ERROR_NO_MODEM, "No modem"),
            Some(processor) => processor.run(frame).await,
        }
    }
}

/// Reads one frame off a fresh connection and queues it. Short reads, EOF
/// and oversized declarations drop the connection silently.
fn spawn_reader<S>(stream: S, queue: mpsc::UnboundedSender<Request>)
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    tokio::task::spawn_local(async move {
        let mut stream = stream;

        let mut length_word = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut length_word).await {
            warn!("error reading from input stream: {e}");
            return;
        }

        let length = match peek_length(&length_word) {
            Some(length) => length as usize,
            None => return,
        };
        if !(HEADER_SIZE..=MESSAGE_MAX_SIZE).contains(&length) {
            warn!("dropping connection: invalid frame length {length}");
            return;
        }

        let mut frame = vec![0u8; length];
        frame[..4].copy_from_slice(&length_word);
        if let Err(e) = stream.read_exact(&mut frame[4..]).await {
            warn!("error reading from input stream: {e}");
            return;
        }

        let _ = queue.send(Request {
            connection: Box::new(stream),
            frame,
        });
    });
}
