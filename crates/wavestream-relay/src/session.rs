//! Per-connection session.
//!
//! A session owns at most one engine at a time. Every start or stop bumps the
//! run generation; reader tasks tag their events with the generation they
//! were spawned under, and events from an older generation are discarded.
//! That is what keeps a restarted run from inheriting bytes or analytics of
//! the run it replaced.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use wavestream_engine::TextMessage;

use crate::control::{engine_args, ClientMessage, ControlCommand, Outbound};
use crate::error::{RelayError, Result};
use crate::reassembly::FrameAssembler;
use crate::supervisor::{EngineHandle, EngineLauncher, EngineStream, LaunchedEngine};

/// Capacity of the engine event queue.
const EVENT_QUEUE: usize = 64;

/// Read size on the binary channel.
const READ_CHUNK: usize = 64 * 1024;

/// Something an engine reader task observed.
#[derive(Debug)]
struct EngineEvent {
    generation: u64,
    kind: EventKind,
}

#[derive(Debug)]
enum EventKind {
    Binary(Vec<u8>),
    Line(String),
    BinaryClosed,
    TextClosed,
}

/// The engine currently attached to a session.
struct ActiveRun {
    handle: Box<dyn EngineHandle>,
    readers: Vec<JoinHandle<()>>,
    open_streams: u8,
}

/// State for one client connection.
pub struct Session {
    id: u64,
    launcher: Arc<dyn EngineLauncher>,
    outbound: mpsc::Sender<Outbound>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: mpsc::Receiver<EngineEvent>,
    run: Option<ActiveRun>,
    generation: u64,
    assembler: FrameAssembler,
    dropped: u64,
}

impl Session {
    /// Create an idle session delivering to `outbound`.
    pub fn new(id: u64, launcher: Arc<dyn EngineLauncher>, outbound: mpsc::Sender<Outbound>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        Self {
            id,
            launcher,
            outbound,
            events_tx,
            events_rx,
            run: None,
            generation: 0,
            assembler: FrameAssembler::new(),
            dropped: 0,
        }
    }

    /// Session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether an engine is attached.
    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Current run generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bytes held by the frame assembler.
    pub fn buffered_bytes(&self) -> usize {
        self.assembler.buffered()
    }

    /// Frames and analytics skipped because the client was not keeping up.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped
    }

    /// Drive the session until the control stream ends or the client goes
    /// away, then tear down any active run.
    pub async fn serve<R>(mut self, control: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        tracing::info!(session = self.id, "session opened");
        let result = self.drive(control).await;
        self.close().await;
        result
    }

    async fn drive<R>(&mut self, mut control: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        // Bytes stay in `line` if the read is interrupted by an engine event.
        let mut line = Vec::new();
        loop {
            tokio::select! {
                read = control.read_until(b'\n', &mut line) => {
                    let eof = read? == 0;
                    if !line.is_empty() {
                        self.handle_raw_line(&line).await;
                        line.clear();
                    }
                    if eof {
                        return Ok(());
                    }
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event).await?,
            }
        }
    }

    async fn handle_raw_line(&mut self, raw: &[u8]) {
        match std::str::from_utf8(raw) {
            Ok(line) => self.handle_line(line).await,
            Err(e) => tracing::warn!(session = self.id, error = %e, "dropping control message that is not UTF-8"),
        }
    }

    /// Apply one control line. Malformed input is logged and dropped.
    pub async fn handle_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match ControlCommand::parse(line) {
            Ok(command) => self.handle_command(command).await,
            Err(e) => tracing::warn!(session = self.id, error = %e, "dropping control message"),
        }
    }

    /// Apply one parsed control command.
    pub async fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Start { config } => match engine_args(&config) {
                Ok(args) => self.start(args).await,
                Err(e) => tracing::warn!(session = self.id, error = %e, "rejecting start"),
            },
            ControlCommand::Stop => self.stop().await,
        }
    }

    /// Replace any active run with a new engine launched with `args`.
    ///
    /// The previous engine has exited before the new one is launched.
    pub async fn start(&mut self, args: Vec<String>) {
        self.stop_run().await;
        self.reset_stream_state();

        match self.launcher.launch(&args).await {
            Ok(engine) => {
                tracing::info!(
                    session = self.id,
                    generation = self.generation,
                    pid = ?engine.handle.id(),
                    "run started"
                );
                self.attach(engine);
            }
            Err(e) => {
                tracing::error!(session = self.id, error = %e, "engine launch failed");
            }
        }
    }

    /// Terminate the active run, if any, and discard partial frame state.
    pub async fn stop(&mut self) {
        let was_running = self.run.is_some();
        self.stop_run().await;
        self.reset_stream_state();
        tracing::info!(session = self.id, was_running, "run stopped");
    }

    /// Stop and release everything. Called when the client disconnects.
    pub async fn close(&mut self) {
        self.stop().await;
        tracing::info!(session = self.id, "session closed");
    }

    fn reset_stream_state(&mut self) {
        self.assembler.reset();
        self.generation += 1;
    }

    async fn stop_run(&mut self) {
        if let Some(mut run) = self.run.take() {
            if let Err(e) = run.handle.terminate().await {
                tracing::error!(session = self.id, error = %e, "failed to terminate engine");
            }
            for reader in run.readers {
                reader.abort();
            }
        }
    }

    fn attach(&mut self, engine: LaunchedEngine) {
        let LaunchedEngine {
            handle,
            binary,
            text,
        } = engine;
        let readers = vec![
            tokio::spawn(read_binary(binary, self.generation, self.events_tx.clone())),
            tokio::spawn(read_text(text, self.generation, self.events_tx.clone())),
        ];
        self.run = Some(ActiveRun {
            handle,
            readers,
            open_streams: 2,
        });
    }

    /// Queue a message the client must receive, waiting for room.
    async fn emit(&self, message: Outbound) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| RelayError::Disconnected)
    }

    /// Queue a periodic message without waiting. A full queue drops it so
    /// that control input is never starved by a slow client.
    fn offer(&mut self, message: Outbound) -> Result<()> {
        match self.outbound.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                tracing::trace!(session = self.id, dropped = self.dropped, "client behind, dropping message");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(RelayError::Disconnected),
        }
    }

    fn offer_frames(&mut self, frames: Vec<Vec<u8>>) -> Result<()> {
        for frame in frames {
            self.offer(Outbound::Frame(frame))?;
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: EngineEvent) -> Result<()> {
        if event.generation != self.generation {
            tracing::trace!(
                session = self.id,
                stale = event.generation,
                current = self.generation,
                "dropping stale engine event"
            );
            return Ok(());
        }

        match event.kind {
            EventKind::Binary(bytes) => {
                let frames = self.assembler.push(&bytes);
                self.offer_frames(frames)
            }
            EventKind::Line(line) => self.handle_message(TextMessage::parse(&line)).await,
            EventKind::BinaryClosed | EventKind::TextClosed => {
                self.stream_closed().await;
                Ok(())
            }
        }
    }

    async fn handle_message(&mut self, message: TextMessage) -> Result<()> {
        match message {
            TextMessage::Header {
                nx,
                ny,
                dt,
                frames_every,
            } => {
                tracing::debug!(session = self.id, nx, ny, dt, frames_every, "engine header");
                let Some(frame_len) = nx.checked_mul(ny).and_then(|cells| cells.checked_mul(4)) else {
                    tracing::warn!(session = self.id, nx, ny, "header frame size overflows");
                    return Ok(());
                };
                self.emit(Outbound::Message(ClientMessage::Metadata { nx, ny }))
                    .await?;
                let frames = self.assembler.set_frame_len(frame_len);
                self.offer_frames(frames)
            }
            TextMessage::Perf { step_ms_avg } => {
                self.offer(Outbound::Message(ClientMessage::perf(step_ms_avg)))
            }
            TextMessage::Energy { val } => self.offer(Outbound::Message(ClientMessage::energy(val))),
            TextMessage::Unrecognized(line) => {
                tracing::debug!(session = self.id, %line, "engine output");
                Ok(())
            }
        }
    }

    async fn stream_closed(&mut self) {
        let finished = match self.run.as_mut() {
            Some(run) => {
                run.open_streams = run.open_streams.saturating_sub(1);
                run.open_streams == 0
            }
            None => false,
        };
        if finished {
            // Both channels hit EOF; reap the process.
            self.stop_run().await;
            tracing::info!(session = self.id, generation = self.generation, "engine finished");
        }
    }
}

async fn read_binary(mut stream: EngineStream, generation: u64, events: mpsc::Sender<EngineEvent>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let kind = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => EventKind::Binary(buf[..n].to_vec()),
            Err(e) => {
                tracing::warn!(generation, error = %e, "binary channel read failed");
                break;
            }
        };
        if events.send(EngineEvent { generation, kind }).await.is_err() {
            return;
        }
    }
    let _ = events
        .send(EngineEvent {
            generation,
            kind: EventKind::BinaryClosed,
        })
        .await;
}

async fn read_text(stream: EngineStream, generation: u64, events: mpsc::Sender<EngineEvent>) {
    let mut reader = BufReader::new(stream);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        let kind = match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            // Invalid bytes become U+FFFD; the line then parses as unrecognized.
            Ok(_) => EventKind::Line(String::from_utf8_lossy(&raw).trim_end().to_string()),
            Err(e) => {
                tracing::warn!(generation, error = %e, "text channel read failed");
                break;
            }
        };
        if events.send(EngineEvent { generation, kind }).await.is_err() {
            return;
        }
    }
    let _ = events
        .send(EngineEvent {
            generation,
            kind: EventKind::TextClosed,
        })
        .await;
}
