#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serial_collector::{
    error_log::ErrorLog,
    forwarder::{Connector, Link},
    serial::PortSource,
    sink::Sink,
    status::{StatusRow, StatusView},
    ForwardTarget,
};
use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{duplex, AsyncWrite, DuplexStream},
    sync::mpsc,
    time::{sleep, Instant},
};

pub fn enabled_target(reconnect_interval: u64) -> ForwardTarget {
    ForwardTarget {
        enabled: true,
        reconnect_interval,
        ..ForwardTarget::default()
    }
}

/// Polls `cond` every 10 ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[derive(Default)]
pub struct RecordingLog {
    entries: Mutex<Vec<(String, String)>>,
}

impl RecordingLog {
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.entries()
            .iter()
            .filter(|(_, message)| message.contains(needle))
            .count()
    }
}

impl ErrorLog for RecordingLog {
    fn record(&self, source: &str, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((source.to_string(), message.to_string()));
    }
}

pub type ReadScript = mpsc::UnboundedSender<Result<Vec<u8>, String>>;

/// Port source fed by the test. Once the script sender is dropped, reads block forever.
pub struct ScriptedSource {
    open_failures: usize,
    reads: mpsc::UnboundedReceiver<Result<Vec<u8>, String>>,
}

pub fn scripted_source(open_failures: usize) -> (ScriptedSource, ReadScript) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ScriptedSource {
            open_failures,
            reads: rx,
        },
        tx,
    )
}

#[async_trait]
impl PortSource for ScriptedSource {
    async fn open(&mut self) -> Result<()> {
        if self.open_failures > 0 {
            self.open_failures -= 1;
            bail!("device not present");
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        match self.reads.recv().await {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(message)) => Err(anyhow!(message)),
            None => std::future::pending().await,
        }
    }
}

pub type Writes = Arc<Mutex<Vec<Vec<u8>>>>;

pub struct MemorySink {
    writes: Writes,
}

pub fn memory_sink() -> (MemorySink, Writes) {
    let writes = Writes::default();
    (
        MemorySink {
            writes: writes.clone(),
        },
        writes,
    )
}

#[async_trait]
impl Sink for MemorySink {
    async fn append(&mut self, payload: &[u8], _with_timestamp: bool) -> Result<()> {
        self.writes.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

/// Sink whose every append fails, counting the attempts.
pub struct FailingSink {
    calls: Arc<AtomicUsize>,
}

pub fn failing_sink() -> (FailingSink, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (
        FailingSink {
            calls: calls.clone(),
        },
        calls,
    )
}

#[async_trait]
impl Sink for FailingSink {
    async fn append(&mut self, _payload: &[u8], _with_timestamp: bool) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("disk full");
    }
}

/// Writer whose every write fails, standing in for a peer that reset the connection.
pub struct FailingLink;

impl AsyncWrite for FailingLink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Clone, Copy)]
pub enum LinkMode {
    Duplex,
    Failing,
}

/// Refuses the first `refusals` attempts, then hands out in-memory links. The far
/// end of every duplex link is delivered on the peers channel.
pub struct ScriptedConnector {
    refusals: AtomicUsize,
    attempts: AtomicUsize,
    mode: LinkMode,
    peers: mpsc::UnboundedSender<DuplexStream>,
}

impl ScriptedConnector {
    pub fn new(
        refusals: usize,
        mode: LinkMode,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                refusals: AtomicUsize::new(refusals),
                attempts: AtomicUsize::new(0),
                mode,
                peers: tx,
            }),
            rx,
        )
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Link> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            bail!("connection refused");
        }
        match self.mode {
            LinkMode::Failing => Ok(Box::new(FailingLink)),
            LinkMode::Duplex => {
                let (local, remote) = duplex(64 * 1024);
                self.peers.send(remote).ok();
                Ok(Box::new(local))
            }
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

pub type Frames = Arc<Mutex<Vec<Vec<StatusRow>>>>;

pub struct CapturingView {
    frames: Frames,
}

pub fn capturing_view() -> (CapturingView, Frames) {
    let frames = Frames::default();
    (
        CapturingView {
            frames: frames.clone(),
        },
        frames,
    )
}

impl StatusView for CapturingView {
    fn render(&mut self, rows: &[StatusRow]) -> Result<()> {
        self.frames.lock().unwrap().push(rows.to_vec());
        Ok(())
    }
}
