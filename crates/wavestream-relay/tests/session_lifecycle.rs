//! Session lifecycle tests against a scripted in-memory engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{duplex, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wavestream_relay::{
    ClientMessage, EngineHandle, EngineLauncher, LaunchedEngine, Outbound, RelayError, Result,
    Session,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Record {
    log: Vec<String>,
    launches: Vec<Vec<String>>,
    alive: usize,
    max_alive: usize,
}

/// Engine side of a fake run.
struct FakeEngine {
    binary: DuplexStream,
    text: DuplexStream,
}

impl FakeEngine {
    async fn line(&mut self, line: &str) {
        let _ = self.text.write_all(format!("{}\n", line).as_bytes()).await;
    }

    async fn raw_text(&mut self, bytes: &[u8]) {
        let _ = self.text.write_all(bytes).await;
    }

    async fn bytes(&mut self, bytes: &[u8]) {
        let _ = self.binary.write_all(bytes).await;
    }
}

struct FakeLauncher {
    record: Arc<Mutex<Record>>,
    engines: mpsc::UnboundedSender<FakeEngine>,
}

#[async_trait]
impl EngineLauncher for FakeLauncher {
    async fn launch(&self, args: &[String]) -> Result<LaunchedEngine> {
        let index = {
            let mut record = self.record.lock();
            record.launches.push(args.to_vec());
            record.alive += 1;
            record.max_alive = record.max_alive.max(record.alive);
            let index = record.launches.len();
            record.log.push(format!("launch {}", index));
            index
        };

        let (binary_engine, binary) = duplex(1 << 16);
        let (text_engine, text) = duplex(1 << 16);
        let _ = self.engines.send(FakeEngine {
            binary: binary_engine,
            text: text_engine,
        });

        Ok(LaunchedEngine {
            handle: Box::new(FakeHandle {
                index,
                record: self.record.clone(),
                terminated: false,
            }),
            binary: Box::new(binary),
            text: Box::new(text),
        })
    }
}

struct FakeHandle {
    index: usize,
    record: Arc<Mutex<Record>>,
    terminated: bool,
}

#[async_trait]
impl EngineHandle for FakeHandle {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn terminate(&mut self) -> Result<()> {
        if !self.terminated {
            self.terminated = true;
            let mut record = self.record.lock();
            record.alive -= 1;
            record.log.push(format!("terminate {}", self.index));
        }
        Ok(())
    }
}

struct Harness {
    control: DuplexStream,
    outbound: mpsc::Receiver<Outbound>,
    engines: mpsc::UnboundedReceiver<FakeEngine>,
    record: Arc<Mutex<Record>>,
    task: JoinHandle<Result<()>>,
}

impl Harness {
    fn new() -> Self {
        let record = Arc::new(Mutex::new(Record::default()));
        let (engines_tx, engines) = mpsc::unbounded_channel();
        let launcher = Arc::new(FakeLauncher {
            record: record.clone(),
            engines: engines_tx,
        });

        let (control, session_side) = duplex(4096);
        let (tx, outbound) = mpsc::channel(64);
        let session = Session::new(1, launcher, tx);
        let task = tokio::spawn(session.serve(BufReader::new(session_side)));

        Self {
            control,
            outbound,
            engines,
            record,
            task,
        }
    }

    async fn send(&mut self, line: &str) {
        self.control
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    fn task_alive(&self) -> bool {
        !self.task.is_finished()
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.control.write_all(bytes).await.unwrap();
    }

    async fn start(&mut self, config: &str) -> FakeEngine {
        self.send(&format!(r#"{{"type":"start","config":{}}}"#, config))
            .await;
        self.next_engine().await
    }

    async fn next_engine(&mut self) -> FakeEngine {
        tokio::time::timeout(WAIT, self.engines.recv())
            .await
            .expect("engine launch timed out")
            .expect("launcher dropped")
    }

    async fn next_outbound(&mut self) -> Outbound {
        tokio::time::timeout(WAIT, self.outbound.recv())
            .await
            .expect("outbound timed out")
            .expect("session closed")
    }

    async fn wait_for_log(&self, entry: &str) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !self.record.lock().log.iter().any(|e| e == entry) {
            assert!(tokio::time::Instant::now() < deadline, "never saw {:?}", entry);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Close the control stream and collect everything the session sent.
    async fn finish(mut self) -> (Vec<Outbound>, Arc<Mutex<Record>>) {
        drop(self.control);
        let result = tokio::time::timeout(WAIT, self.task)
            .await
            .expect("session did not end")
            .unwrap();
        assert!(result.is_ok() || matches!(result, Err(RelayError::Disconnected)));

        let mut rest = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            rest.push(message);
        }
        (rest, self.record)
    }
}

fn header(nx: usize, ny: usize) -> String {
    format!("HEADER nx={} ny={} dt=0.001 frames_every=1", nx, ny)
}

fn frame_bytes(nx: usize, ny: usize, value: f32) -> Vec<u8> {
    (0..nx * ny).flat_map(|_| value.to_ne_bytes()).collect()
}

#[tokio::test]
async fn test_metadata_then_frames() {
    let mut h = Harness::new();
    let mut engine = h.start(r#"{"nx":4,"ny":2}"#).await;

    engine.line(&header(4, 2)).await;
    assert_eq!(
        h.next_outbound().await,
        Outbound::Message(ClientMessage::Metadata { nx: 4, ny: 2 })
    );

    let frame = frame_bytes(4, 2, 0.5);
    engine.bytes(&frame[..5]).await;
    engine.bytes(&frame[5..]).await;
    assert_eq!(h.next_outbound().await, Outbound::Frame(frame));

    assert_eq!(
        h.record.lock().launches[0],
        vec!["--nx".to_string(), "4".into(), "--ny".into(), "2".into()]
    );
    h.finish().await;
}

#[tokio::test]
async fn test_frames_before_header_are_withheld() {
    let mut h = Harness::new();
    let mut engine = h.start("{}").await;

    let first = frame_bytes(3, 3, 1.0);
    let second = frame_bytes(3, 3, 2.0);
    engine.bytes(&first).await;
    engine.bytes(&second).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.outbound.try_recv().is_err());

    engine.line(&header(3, 3)).await;
    assert_eq!(
        h.next_outbound().await,
        Outbound::Message(ClientMessage::Metadata { nx: 3, ny: 3 })
    );
    assert_eq!(h.next_outbound().await, Outbound::Frame(first));
    assert_eq!(h.next_outbound().await, Outbound::Frame(second));
    h.finish().await;
}

#[tokio::test]
async fn test_analytics_are_forwarded() {
    let mut h = Harness::new();
    let mut engine = h.start("{}").await;

    engine.line("PERF step_ms_avg=0.812").await;
    engine.line("some diagnostic the relay ignores").await;
    engine.line("ENERGY val=4.5e3").await;

    assert_eq!(
        h.next_outbound().await,
        Outbound::Message(ClientMessage::perf(0.812))
    );
    assert_eq!(
        h.next_outbound().await,
        Outbound::Message(ClientMessage::energy(4500.0))
    );
    h.finish().await;
}

#[tokio::test]
async fn test_restart_terminates_previous_run_first() {
    let mut h = Harness::new();
    let _first = h.start(r#"{"nx":8}"#).await;
    let _second = h.start(r#"{"nx":16}"#).await;
    let _third = h.start(r#"{"nx":32}"#).await;

    let (_, record) = h.finish().await;
    let record = record.lock();
    assert_eq!(
        record.log,
        vec![
            "launch 1",
            "terminate 1",
            "launch 2",
            "terminate 2",
            "launch 3",
            "terminate 3",
        ]
    );
    assert_eq!(record.max_alive, 1);
    assert_eq!(record.alive, 0);
}

#[tokio::test]
async fn test_restart_does_not_leak_old_bytes() {
    let mut h = Harness::new();
    let mut first = h.start("{}").await;
    first.line(&header(2, 2)).await;
    assert!(matches!(h.next_outbound().await, Outbound::Message(_)));
    // Half a frame from the old run.
    first.bytes(&[0xAA; 8]).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut second = h.start("{}").await;
    first.bytes(&[0xAA; 64]).await;

    second.line(&header(2, 2)).await;
    let frame = frame_bytes(2, 2, 3.0);
    second.bytes(&frame).await;

    assert_eq!(
        h.next_outbound().await,
        Outbound::Message(ClientMessage::Metadata { nx: 2, ny: 2 })
    );
    assert_eq!(h.next_outbound().await, Outbound::Frame(frame));
    let (rest, _) = h.finish().await;
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_stop_then_output_yields_nothing() {
    let mut h = Harness::new();
    let mut engine = h.start("{}").await;
    h.send(r#"{"type":"stop"}"#).await;
    h.wait_for_log("terminate 1").await;

    engine.line(&header(2, 2)).await;
    engine.bytes(&frame_bytes(2, 2, 1.0)).await;
    engine.line("PERF step_ms_avg=1.0").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (rest, _) = h.finish().await;
    assert!(rest.is_empty(), "unexpected output {:?}", rest);
}

#[tokio::test]
async fn test_stop_without_run_is_harmless() {
    let mut h = Harness::new();
    h.send(r#"{"type":"stop"}"#).await;
    h.send(r#"{"type":"stop"}"#).await;
    let _engine = h.start("{}").await;

    let (_, record) = h.finish().await;
    assert_eq!(record.lock().log, vec!["launch 1", "terminate 1"]);
}

#[tokio::test]
async fn test_malformed_control_keeps_session_usable() {
    let mut h = Harness::new();
    h.send("not json").await;
    h.send(r#"{"type":"pause"}"#).await;
    h.send(r#"{"type":"start","config":{"nx":[1,2]}}"#).await;
    h.send("").await;
    h.send_raw(b"{\"type\":\"st\xffop\"}\n").await;
    h.send_raw(b"\xfe\xfe\n").await;

    let mut engine = h.start(r#"{"ny":5}"#).await;
    engine.line(&header(1, 5)).await;
    assert_eq!(
        h.next_outbound().await,
        Outbound::Message(ClientMessage::Metadata { nx: 1, ny: 5 })
    );

    assert!(h.task_alive());

    let (_, record) = h.finish().await;
    assert_eq!(record.lock().launches.len(), 1);
}

#[tokio::test]
async fn test_invalid_utf8_engine_output_keeps_text_channel_alive() {
    let mut h = Harness::new();
    let mut engine = h.start("{}").await;

    engine.raw_text(b"panic at \xff\xfe\n").await;
    engine.line("PERF step_ms_avg=2.000").await;
    assert_eq!(
        h.next_outbound().await,
        Outbound::Message(ClientMessage::perf(2.0))
    );
    assert!(h.task_alive());
    h.finish().await;
}

#[tokio::test]
async fn test_engine_exit_is_reaped() {
    let mut h = Harness::new();
    let engine = h.start("{}").await;
    drop(engine);
    h.wait_for_log("terminate 1").await;
    assert_eq!(h.record.lock().alive, 0);

    // A later stop does not terminate twice.
    h.send(r#"{"type":"stop"}"#).await;
    let (_, record) = h.finish().await;
    assert_eq!(record.lock().log, vec!["launch 1", "terminate 1"]);
}

#[tokio::test]
async fn test_disconnect_terminates_run() {
    let mut h = Harness::new();
    let _engine = h.start("{}").await;
    let (_, record) = h.finish().await;
    let record = record.lock();
    assert_eq!(record.log, vec!["launch 1", "terminate 1"]);
    assert_eq!(record.alive, 0);
}
