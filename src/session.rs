// src/session.rs
//
// Connection pump: bytes from a transport go through the protocol codec and
// come out as rendered rows on a channel; queued commands are encoded and
// written back. The transport itself (serial port, adapter) lives outside
// this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::dictionary::Dictionary;
use crate::logging::LogLevel;
use crate::protocol::{now_ms, slcan, Codec, Decoded, IncomingRecord, OutgoingCommand};
use crate::settings::AppSettings;
use crate::table::{FrameTable, RecordRenderer, RenderedCell};
use crate::tlog;

/// How often stale partial input is evicted and the stop flag checked.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Unterminated SimpleSerial text is emitted after this much silence.
const STALL_FLUSH: Duration = Duration::from_millis(250);

const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Byte transport under a session. Must deliver bytes in arrival order.
///
/// `read` is raced against other events and must be cancel safe: dropping
/// an unfinished read loses no data.
#[async_trait]
pub trait Transport: Send {
    /// Read available bytes; `Ok(0)` means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;
}

/// Messages from a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A decoded record and its rendered row.
    Record {
        record: IncomingRecord,
        cells: Vec<RenderedCell>,
    },
    /// A frame or command failed; the session continues.
    Error(String),
    /// The session stopped (reason).
    Ended(String),
}

// ============================================================================
// Session
// ============================================================================

struct Session<T: Transport> {
    transport: T,
    codec: Codec,
    renderer: RecordRenderer,
    events: mpsc::Sender<SessionEvent>,
}

impl<T: Transport> Session<T> {
    /// Returns false once nobody is listening.
    async fn emit(&mut self, event: SessionEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    async fn emit_record(&mut self, record: IncomingRecord) -> bool {
        let cells = self.renderer.render(&record);
        self.emit(SessionEvent::Record { record, cells }).await
    }

    async fn handle_bytes(&mut self, raw: &[u8]) -> bool {
        for result in self.codec.decode(raw) {
            let alive = match result {
                Ok(Decoded::Complete(record)) => self.emit_record(record).await,
                Ok(Decoded::Incomplete) => true,
                Err(e) => self.emit(SessionEvent::Error(e.to_string())).await,
            };
            if !alive {
                return false;
            }
        }
        true
    }

    async fn send_command(&mut self, command: &OutgoingCommand) -> Result<bool, TransportError> {
        let writes = match self.codec.encode(command) {
            Ok(w) => w,
            Err(e) => {
                tlog!(LogLevel::Warning, "[session] command rejected: {}", e);
                return Ok(self.emit(SessionEvent::Error(e.to_string())).await);
            }
        };
        for data in &writes {
            self.transport.write(data).await?;
        }
        tlog!(LogLevel::Debug, "[session] sent {} write(s)", writes.len());
        Ok(true)
    }

    async fn write_all(&mut self, writes: Vec<Vec<u8>>) -> Result<(), TransportError> {
        for data in &writes {
            self.transport.write(data).await?;
        }
        Ok(())
    }
}

/// Run a session until `stop` is set, the transport reaches end of stream,
/// or the event receiver is dropped.
///
/// For CAN protocols the adapter is opened with the configured bitrates
/// first and closed on the way out.
pub async fn run_session<T: Transport>(
    transport: T,
    settings: &AppSettings,
    dict: Arc<Dictionary>,
    events: mpsc::Sender<SessionEvent>,
    mut commands: mpsc::Receiver<OutgoingCommand>,
    stop: Arc<AtomicBool>,
) -> Result<(), TransportError> {
    let protocol = settings.serial.protocol;
    let mut session = Session {
        transport,
        codec: Codec::for_protocol(protocol, dict.clone(), settings),
        renderer: RecordRenderer::new(FrameTable::for_protocol(protocol, dict)),
        events,
    };

    if protocol.is_can() {
        let open = slcan::open_commands(&settings.serial)
            .map_err(|e| TransportError::Other(e.to_string()))?;
        session.write_all(open).await?;
    }
    tlog!(LogLevel::Info, "[session] started ({})", protocol);

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    let mut commands_open = true;
    let mut last_rx = Instant::now();

    let (reason, failure) = loop {
        if stop.load(Ordering::Relaxed) {
            break ("stopped", None);
        }

        tokio::select! {
            read = session.transport.read(&mut buf) => {
                match read {
                    Ok(0) => break ("end of stream", None),
                    Ok(n) => {
                        last_rx = Instant::now();
                        if !session.handle_bytes(&buf[..n]).await {
                            break ("receiver closed", None);
                        }
                    }
                    Err(e) => {
                        tlog!(LogLevel::Error, "[session] read failed: {}", e);
                        break ("read error", Some(e));
                    }
                }
            }
            cmd = commands.recv(), if commands_open => {
                match cmd {
                    Some(command) => match session.send_command(&command).await {
                        Ok(true) => {}
                        Ok(false) => break ("receiver closed", None),
                        Err(e) => {
                            tlog!(LogLevel::Error, "[session] write failed: {}", e);
                            break ("write error", Some(e));
                        }
                    },
                    None => commands_open = false,
                }
            }
            _ = tick.tick() => {
                let evicted = session.codec.evict_expired(now_ms());
                if evicted > 0 {
                    tlog!(LogLevel::Debug, "[session] evicted {} stale partial(s)", evicted);
                }
                if last_rx.elapsed() >= STALL_FLUSH {
                    if let Some(record) = session.codec.flush() {
                        if !session.emit_record(record).await {
                            break ("receiver closed", None);
                        }
                    }
                }
            }
        }
    };

    if let Some(e) = &failure {
        session.emit(SessionEvent::Error(e.to_string())).await;
    } else if let Some(record) = session.codec.flush() {
        session.emit_record(record).await;
    }
    session.codec.reset();

    // Off bus on every exit, transport errors included
    if protocol.is_can() {
        if let Err(e) = session.write_all(slcan::close_commands()).await {
            tlog!(LogLevel::Warning, "[session] failed to close adapter: {}", e);
        }
    }

    tlog!(LogLevel::Info, "[session] ended: {}", reason);
    session.emit(SessionEvent::Ended(reason.to_string())).await;
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
