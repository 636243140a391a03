use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::PortSpec;
use crate::error_log::ErrorLog;
use crate::forwarder::Forwarder;
use crate::registry::Registry;
use crate::serial::PortSource;
use crate::shutdown::Shutdown;
use crate::sink::Sink;

/// Pause after every read that produced data or noise.
pub const READ_PACING: Duration = Duration::from_millis(10);
/// Back-off after a failed read.
pub const READ_RETRY: Duration = Duration::from_secs(1);
/// Back-off between attempts to open the device.
pub const REOPEN_INTERVAL: Duration = Duration::from_secs(5);

/// True for reads made only of ASCII whitespace, including empty reads.
pub fn is_blank(payload: &[u8]) -> bool {
    payload
        .iter()
        .all(|&b| matches!(b, b' ' | b'\t' | b'\n' | b'\x0B' | b'\x0C' | b'\r'))
}

/// Drains one port for the lifetime of the process.
pub struct Collector {
    pub index: usize,
    pub spec: PortSpec,
    pub source: Box<dyn PortSource>,
    pub sink: Box<dyn Sink>,
    pub forwarder: Arc<Forwarder>,
    pub registry: Arc<Registry>,
    pub error_log: Arc<dyn ErrorLog>,
}

impl Collector {
    pub async fn run(mut self, mut shutdown: Shutdown) {
        if !self.open(&mut shutdown).await {
            return;
        }

        let mut read_failed = false;
        let mut sink_failed = false;
        loop {
            let read = match shutdown.run(self.source.read()).await {
                Some(read) => read,
                None => break,
            };
            match read {
                Ok(payload) if is_blank(&payload) => {
                    if !shutdown.sleep(READ_PACING).await {
                        break;
                    }
                }
                Ok(payload) => {
                    if read_failed {
                        tracing::info!(port = %self.spec.name, "reads recovered");
                        read_failed = false;
                    }
                    self.registry.record(self.index, payload.len(), Instant::now());

                    match self.sink.append(&payload, self.spec.add_timestamp).await {
                        Ok(()) => sink_failed = false,
                        Err(err) => {
                            if !sink_failed {
                                self.error_log.record(
                                    &self.spec.name,
                                    &format!("Write failed - {err:#}"),
                                );
                            }
                            sink_failed = true;
                        }
                    }

                    if self.spec.forwarding_enabled() {
                        self.forwarder.enqueue(payload);
                    }

                    if !shutdown.sleep(READ_PACING).await {
                        break;
                    }
                }
                Err(err) => {
                    if !read_failed {
                        self.error_log.record(
                            &self.spec.name,
                            "Read failed - Further errors will be suppressed",
                        );
                        tracing::debug!(port = %self.spec.name, error = %err, "read failed");
                    }
                    read_failed = true;
                    if !shutdown.sleep(READ_RETRY).await {
                        break;
                    }
                }
            }
        }
        tracing::info!(port = %self.spec.name, "collector stopped");
    }

    /// Retries every [`REOPEN_INTERVAL`]; reports only the first failure.
    /// Returns `false` if stopped before the device opened.
    async fn open(&mut self, shutdown: &mut Shutdown) -> bool {
        let mut reported = false;
        loop {
            match shutdown.run(self.source.open()).await {
                None => return false,
                Some(Ok(())) => return true,
                Some(Err(err)) => {
                    if !reported {
                        self.error_log
                            .record(&self.spec.name, &format!("Failed to open port - {err:#}"));
                        reported = true;
                    }
                    if !shutdown.sleep(REOPEN_INTERVAL).await {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::is_blank;

    #[test]
    fn blank_detection() {
        assert!(is_blank(b""));
        assert!(is_blank(b"  \r\n\t"));
        assert!(is_blank(b"\x0B\x0C"));
        assert!(!is_blank(b" x "));
        assert!(!is_blank(b"\0"));
    }
}
