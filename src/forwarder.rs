use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::Notify,
    task::JoinHandle,
    time::timeout,
};

use crate::config::ForwardTarget;
use crate::error_log::ErrorLog;
use crate::shutdown::{Shutdown, Trigger};

/// How often the maintenance task re-checks the link.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Upper bound on a single payload write.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(2);
pub const MAX_PAYLOAD_LEN: usize = i32::MAX as usize;

const LOG_SOURCE: &str = "TCP";

pub type Link = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens the outbound link. Implementations must not retry internally.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Link>;
    fn describe(&self) -> String;
}

pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(target: &ForwardTarget) -> Self {
        Self {
            host: target.server.clone(),
            port: target.port,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Link> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("failed to connect to {}", self.describe()))?;
        stream.set_nodelay(true).context("failed to set TCP_NODELAY")?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Shared {
    port_name: String,
    target: ForwardTarget,
    connector: Arc<dyn Connector>,
    error_log: Arc<dyn ErrorLog>,
    max_payload: usize,
    queue: Mutex<VecDeque<Vec<u8>>>,
    wake: Notify,
    link: tokio::sync::Mutex<Option<Link>>,
    connected: AtomicBool,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the link and drops everything still queued. Idempotent.
    async fn disconnect(&self) {
        let link = self.link.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);
        self.queue().clear();
        if link.is_some() {
            tracing::debug!(port = %self.port_name, "forward link closed");
        }
    }

    async fn connect(&self) -> Result<()> {
        self.disconnect().await;
        let link = self.connector.connect().await?;
        *self.link.lock().await = Some(link);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn maintain(self: Arc<Self>, mut shutdown: Shutdown) {
        let retry = self.target.reconnect_interval();
        let mut failing = false;
        while !shutdown.is_stopped() {
            if !self.is_connected() {
                match shutdown.run(self.connect()).await {
                    None => break,
                    Some(Ok(())) => {
                        failing = false;
                        tracing::info!(
                            port = %self.port_name,
                            remote = %self.connector.describe(),
                            "forward link established"
                        );
                        self.wake.notify_one();
                    }
                    Some(Err(err)) => {
                        if !failing {
                            self.error_log.record(
                                LOG_SOURCE,
                                &format!(
                                    "{}: connect to {} failed, retrying every {}s",
                                    self.port_name,
                                    self.connector.describe(),
                                    retry.as_secs()
                                ),
                            );
                        }
                        failing = true;
                        tracing::debug!(port = %self.port_name, error = %err, "connect attempt failed");
                        if !shutdown.sleep(retry).await {
                            break;
                        }
                    }
                }
            }
            if !shutdown.sleep(POLL_INTERVAL).await {
                break;
            }
        }
        tracing::debug!(port = %self.port_name, "forward maintenance stopped");
    }

    async fn drain(self: Arc<Self>, mut shutdown: Shutdown) {
        while !shutdown.is_stopped() {
            let ready = self.is_connected() && !self.queue().is_empty();
            if !ready {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = self.wake.notified() => {}
                }
                continue;
            }

            while self.is_connected() {
                let Some(payload) = self.queue().pop_front() else {
                    break;
                };
                if payload.len() > self.max_payload {
                    self.error_log
                        .record(LOG_SOURCE, "Data size exceeds maximum send limit");
                    self.disconnect().await;
                    break;
                }

                let sent = {
                    let mut link = self.link.lock().await;
                    let Some(writer) = link.as_mut() else {
                        break;
                    };
                    let send = async {
                        writer.write_all(&payload).await?;
                        writer.flush().await
                    };
                    match shutdown.run(timeout(SEND_TIMEOUT, send)).await {
                        None => return,
                        Some(Ok(Ok(()))) => Ok(()),
                        Some(Ok(Err(err))) => Err(err.to_string()),
                        Some(Err(_)) => Err("send timed out".to_string()),
                    }
                };

                if let Err(reason) = sent {
                    tracing::warn!(port = %self.port_name, error = %reason, "forward send failed");
                    self.error_log
                        .record(LOG_SOURCE, "Send timeout or error, clearing queue");
                    self.disconnect().await;
                    break;
                }
            }
        }
        tracing::debug!(port = %self.port_name, "forward drain stopped");
    }
}

/// Mirrors one port's payloads to a fixed TCP endpoint.
///
/// Two tasks run once started: a maintenance task that (re)connects every
/// `reconnectInterval` seconds while the link is down, and a drain task that writes
/// queued payloads in FIFO order. Any send failure closes the link and discards
/// the whole queue; nothing is retried.
pub struct Forwarder {
    shared: Arc<Shared>,
    trigger: Trigger,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Forwarder {
    pub fn new(
        port_name: impl Into<String>,
        target: ForwardTarget,
        connector: Arc<dyn Connector>,
        error_log: Arc<dyn ErrorLog>,
    ) -> Self {
        Self::with_max_payload(port_name, target, connector, error_log, MAX_PAYLOAD_LEN)
    }

    fn with_max_payload(
        port_name: impl Into<String>,
        target: ForwardTarget,
        connector: Arc<dyn Connector>,
        error_log: Arc<dyn ErrorLog>,
        max_payload: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                port_name: port_name.into(),
                target,
                connector,
                error_log,
                max_payload,
                queue: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                link: tokio::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
            }),
            trigger: Trigger::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.target.enabled
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue().len()
    }

    /// Spawns the maintenance and drain tasks. Must be called at most once and
    /// from within a tokio runtime. Does nothing when forwarding is disabled.
    pub fn start(&self) {
        if !self.is_enabled() {
            return;
        }
        let shared = &self.shared;
        shared.error_log.record(
            &shared.port_name,
            &format!("TCP forwarding enabled -> {}", shared.target.address()),
        );
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.push(tokio::spawn(shared.clone().maintain(self.trigger.subscribe())));
        tasks.push(tokio::spawn(shared.clone().drain(self.trigger.subscribe())));
    }

    /// Queues `payload` for transmission. Returns `false`, leaving the queue
    /// untouched, when forwarding is disabled. Never waits on the network.
    pub fn enqueue(&self, payload: impl Into<Vec<u8>>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.shared.queue().push_back(payload.into());
        self.shared.wake.notify_one();
        true
    }

    /// Stops both tasks, then closes the link and discards pending payloads.
    /// Safe to call repeatedly and before [`Forwarder::start`].
    pub async fn stop(&self) {
        self.trigger.stop();
        self.shared.wake.notify_waiters();
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(port = %self.shared.port_name, error = %err, "forwarder task ended abnormally");
            }
        }
        self.shared.disconnect().await;
    }
}
