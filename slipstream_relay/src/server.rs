// TCP server and main event loop for the relay.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and spawns a connection thread for each.
// - **Connection threads** (one per client): read the `Hello` (with a short
//   timeout), assign the connection id and send `InternalEvent::Hello` with
//   the write half. Then call `framing::recv()` in a loop and send
//   `InternalEvent::MessageFrom` to the main thread. Frames that are not a
//   valid `ClientMessage` are skipped. On EOF, a broken stream or `Goodbye`,
//   send `InternalEvent::Disconnected`.
// - **Main thread**: owns the `Coordinator`, receives events from the
//   channel and dispatches them. The wait is bounded by the coordinator's
//   next timer deadline, so countdown ticks fire on time without a separate
//   timer thread.
//
// The main thread is the only writer to client TCP streams (through
// `TcpOutbox`), with a write timeout so a client that stops reading cannot
// hold it up for long. Connection threads only read. A connection only gets
// an id once it has introduced itself, and a slow or silent peer only ever
// blocks its own thread.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`; the main loop exits,
// shuts down every client socket (which unblocks their reader threads) and
// returns.

use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use slipstream_protocol::{ClientMessage, ConnectionId, FrameError, ServerMessage, recv, send};
use tracing::{debug, info, warn};

use crate::broadcast::Outbox;
use crate::config::RelayConfig;
use crate::coordinator::Coordinator;

/// Longest the main loop sleeps without checking `keep_running`.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// How long a new connection has to send `Hello`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long one write to a client may block the main thread.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Events sent from connection threads to the main thread.
enum InternalEvent {
    Hello {
        connection_id: ConnectionId,
        stream: TcpStream,
        protocol_version: u32,
        player_name: String,
    },
    MessageFrom {
        connection_id: ConnectionId,
        message: ClientMessage,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
}

/// Write halves of every live client socket.
#[derive(Default)]
struct TcpOutbox {
    writers: HashMap<ConnectionId, BufWriter<TcpStream>>,
}

impl TcpOutbox {
    fn attach(&mut self, id: ConnectionId, stream: TcpStream) {
        if let Err(err) = stream.set_write_timeout(Some(WRITE_TIMEOUT)) {
            warn!(player = %id, error = %err, "could not set write timeout");
        }
        self.writers.insert(id, BufWriter::new(stream));
    }

    /// Forget a connection and shut its socket down.
    fn detach(&mut self, id: ConnectionId) {
        if let Some(writer) = self.writers.remove(&id) {
            let _ = writer.get_ref().shutdown(Shutdown::Both);
        }
    }

    fn close_all(&mut self) {
        for (_, writer) in self.writers.drain() {
            let _ = writer.get_ref().shutdown(Shutdown::Both);
        }
    }
}

impl Outbox for TcpOutbox {
    fn deliver(&mut self, to: ConnectionId, msg: &ServerMessage) {
        let Some(writer) = self.writers.get_mut(&to) else {
            return;
        };
        // The connection thread notices a dead socket and reports it.
        if let Err(err) = send(writer, msg) {
            warn!(player = %to, error = %err, "write to client failed");
        }
    }
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Block until the relay stops on its own (it only does so when stopped
    /// from elsewhere or when its event channel breaks).
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Start the relay on a background thread. Returns a handle for stopping it
/// and the actual bound address (useful when port 0 is used to let the OS
/// pick a free port).
pub fn start_relay(config: RelayConfig) -> std::io::Result<(RelayHandle, SocketAddr)> {
    let listener = TcpListener::bind(config.bind_address())?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();

    let thread = thread::spawn(move || {
        run_relay(listener, config, keep_running_clone);
    });

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(listener: TcpListener, config: RelayConfig, keep_running: Arc<AtomicBool>) {
    let mut coordinator = Coordinator::new(TcpOutbox::default(), config.countdown)
        .with_protocol_version(config.protocol_version);
    let next_connection_id = Arc::new(AtomicU32::new(0));

    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    // Non-blocking so the accept thread can check keep_running periodically.
    listener.set_nonblocking(true).ok();

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "tcp connection accepted");
                    stream.set_nonblocking(false).ok();
                    let next_id = next_connection_id.clone();
                    let tx_connection = tx_listener.clone();
                    let keep_running_connection = keep_running_listener.clone();
                    thread::spawn(move || {
                        connection_thread(
                            stream,
                            next_id,
                            tx_connection,
                            keep_running_connection,
                        );
                    });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(err) => {
                    warn!(error = %err, "accept failed, listener stopping");
                    break;
                }
            }
        }
    });

    while keep_running.load(Ordering::SeqCst) {
        let wait = coordinator
            .next_deadline()
            .map_or(IDLE_WAIT, |deadline| {
                deadline
                    .saturating_duration_since(Instant::now())
                    .min(IDLE_WAIT)
            });
        match rx.recv_timeout(wait) {
            Ok(event) => {
                let mut next = Some(event);
                // Drain any additional events that arrived during handling.
                while let Some(event) = next {
                    handle_event(&mut coordinator, event);
                    next = rx.try_recv().ok();
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        coordinator.fire_due_timers(Instant::now());
    }

    coordinator.outbox_mut().close_all();
    info!("relay stopped");
}

/// Dispatch a single event to the coordinator.
fn handle_event(coordinator: &mut Coordinator<TcpOutbox>, event: InternalEvent) {
    match event {
        InternalEvent::Hello {
            connection_id,
            stream,
            protocol_version,
            player_name,
        } => {
            coordinator.outbox_mut().attach(connection_id, stream);
            if !coordinator.handshake(connection_id, protocol_version, player_name) {
                // Shutting the socket down ends the connection thread too.
                coordinator.outbox_mut().detach(connection_id);
            }
        }
        InternalEvent::MessageFrom {
            connection_id,
            message,
        } => {
            coordinator.handle_message(connection_id, message, Instant::now());
        }
        InternalEvent::Disconnected { connection_id } => {
            coordinator.disconnect(connection_id);
            coordinator.outbox_mut().detach(connection_id);
        }
    }
}

/// Per-connection thread: wait for `Hello`, hand the write half to the main
/// thread, then read messages until the connection ends.
fn connection_thread(
    stream: TcpStream,
    next_connection_id: Arc<AtomicU32>,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok();

    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    });

    let (protocol_version, player_name) = match recv::<_, ClientMessage>(&mut reader) {
        Ok(ClientMessage::Hello {
            protocol_version,
            player_name,
        }) => (protocol_version, player_name),
        Ok(other) => {
            debug!(message = ?other, "expected Hello as first message, dropping connection");
            return;
        }
        Err(err) => {
            debug!(error = %err, "handshake failed, dropping connection");
            return;
        }
    };

    // Clear read timeout for the long-lived reader loop.
    stream.set_read_timeout(None).ok();

    let connection_id = ConnectionId(next_connection_id.fetch_add(1, Ordering::SeqCst));
    let hello = InternalEvent::Hello {
        connection_id,
        stream,
        protocol_version,
        player_name,
    };
    if tx.send(hello).is_err() {
        return;
    }
    reader_loop(reader, connection_id, tx, keep_running);
}

/// Reader loop for a single client.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    connection_id: ConnectionId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match recv::<_, ClientMessage>(&mut reader) {
            Ok(ClientMessage::Goodbye) => break,
            Ok(message) => {
                let event = InternalEvent::MessageFrom {
                    connection_id,
                    message,
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            // The length prefix already consumed the whole frame, so the
            // stream is still in sync.
            Err(FrameError::Json(err)) => {
                debug!(player = %connection_id, error = %err, "unreadable message skipped");
            }
            Err(err) => {
                if !err.is_eof() {
                    debug!(player = %connection_id, error = %err, "read failed");
                }
                break;
            }
        }
    }
    let _ = tx.send(InternalEvent::Disconnected { connection_id });
}
