use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::PortSpec;
use crate::status::{DisplayState, StatusRow};

/// Shortest span a rate is ever computed over.
pub const MIN_WINDOW: Duration = Duration::from_secs(1);

/// Live counters for one port.
#[derive(Debug, Clone, PartialEq)]
pub struct PortStats {
    pub window_bytes: u64,
    pub window_start: Instant,
    /// Rate over the last completed window.
    pub bytes_per_second: f64,
    pub is_active: bool,
    pub last_data: Instant,
}

impl PortStats {
    fn new(now: Instant) -> Self {
        Self {
            window_bytes: 0,
            window_start: now,
            bytes_per_second: 0.0,
            is_active: false,
            last_data: now,
        }
    }

    fn roll_window(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= MIN_WINDOW {
            self.bytes_per_second = self.window_bytes as f64 / elapsed.as_secs_f64();
            self.window_bytes = 0;
            self.window_start = now;
        }
    }

    fn classify(&mut self, timeout: Duration, now: Instant) -> DisplayState {
        self.roll_window(now);
        let silence = now.saturating_duration_since(self.last_data);
        if silence >= timeout {
            self.is_active = false;
            self.bytes_per_second = 0.0;
            DisplayState::Offline
        } else if self.is_active {
            if silence > MIN_WINDOW {
                self.bytes_per_second = 0.0;
            }
            DisplayState::Active
        } else {
            self.bytes_per_second = 0.0;
            DisplayState::Waiting
        }
    }
}

/// Per-port statistics shared by the collector workers (each writes only its own
/// entry) and the status task (reads all entries). One lock guards every entry;
/// critical sections are field updates only.
pub struct Registry {
    ports: Mutex<Vec<PortStats>>,
}

impl Registry {
    pub fn new(port_count: usize, now: Instant) -> Self {
        Self {
            ports: Mutex::new(vec![PortStats::new(now); port_count]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PortStats>> {
        self.ports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Accounts a non-blank read of `len` bytes on port `index`.
    pub fn record(&self, index: usize, len: usize, now: Instant) {
        let mut ports = self.lock();
        if let Some(stats) = ports.get_mut(index) {
            stats.is_active = true;
            stats.last_data = now;
            stats.window_bytes += len as u64;
            stats.roll_window(now);
        }
    }

    pub fn stats(&self, index: usize) -> Option<PortStats> {
        self.lock().get(index).cloned()
    }

    /// Classifies every port and returns display rows in configuration order.
    /// `specs` must be indexed like the registry.
    pub fn snapshot(&self, specs: &[PortSpec], now: Instant) -> Vec<StatusRow> {
        let mut ports = self.lock();
        ports
            .iter_mut()
            .zip(specs)
            .enumerate()
            .map(|(i, (stats, spec))| {
                let state = stats.classify(spec.timeout(), now);
                StatusRow {
                    index: i + 1,
                    name: spec.name.clone(),
                    baud_rate: spec.baud_rate,
                    state,
                    bytes_per_second: stats.bytes_per_second,
                }
            })
            .collect()
    }
}
