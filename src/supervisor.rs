use std::sync::Arc;
use tokio::{task::JoinHandle, time::Instant};
use tracing::Instrument;

use crate::collector::Collector;
use crate::config::PortSpec;
use crate::error_log::ErrorLog;
use crate::forwarder::{Connector, Forwarder};
use crate::registry::Registry;
use crate::serial::PortSource;
use crate::shutdown::Trigger;
use crate::sink::Sink;
use crate::status::{run_status, StatusView};

/// Everything one port needs, wired by the caller.
pub struct PortBinding {
    pub spec: PortSpec,
    pub source: Box<dyn PortSource>,
    pub sink: Box<dyn Sink>,
    pub connector: Arc<dyn Connector>,
}

/// Owns one collector per port, their forwarders and the status task.
pub struct Supervisor {
    specs: Arc<Vec<PortSpec>>,
    registry: Arc<Registry>,
    forwarders: Vec<Arc<Forwarder>>,
    trigger: Trigger,
    workers: Vec<JoinHandle<()>>,
    status: JoinHandle<()>,
}

impl Supervisor {
    /// Spawns all tasks on the current tokio runtime.
    pub fn start(
        bindings: Vec<PortBinding>,
        view: Box<dyn StatusView>,
        error_log: Arc<dyn ErrorLog>,
    ) -> Self {
        let trigger = Trigger::new();
        let specs: Arc<Vec<PortSpec>> =
            Arc::new(bindings.iter().map(|binding| binding.spec.clone()).collect());
        let registry = Arc::new(Registry::new(bindings.len(), Instant::now()));

        let mut forwarders = Vec::with_capacity(bindings.len());
        let mut workers = Vec::with_capacity(bindings.len());
        for (index, binding) in bindings.into_iter().enumerate() {
            let PortBinding {
                spec,
                source,
                sink,
                connector,
            } = binding;

            let forwarder = Arc::new(Forwarder::new(
                spec.name.clone(),
                spec.tcp_forward.clone(),
                connector,
                error_log.clone(),
            ));
            forwarder.start();
            forwarders.push(forwarder.clone());

            let span = tracing::info_span!("collector", port = %spec.name);
            tracing::info!(
                port = %spec.name,
                baud = spec.baud_rate,
                forwarding = spec.forwarding_enabled(),
                "starting collector"
            );
            let collector = Collector {
                index,
                spec,
                source,
                sink,
                forwarder,
                registry: registry.clone(),
                error_log: error_log.clone(),
            };
            workers.push(tokio::spawn(
                collector.run(trigger.subscribe()).instrument(span),
            ));
        }

        let status = tokio::spawn(run_status(
            specs.clone(),
            registry.clone(),
            view,
            trigger.subscribe(),
        ));

        Self {
            specs,
            registry,
            forwarders,
            trigger,
            workers,
            status,
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn forwarder(&self, index: usize) -> Option<Arc<Forwarder>> {
        self.forwarders.get(index).cloned()
    }

    /// Signals every task, then waits for collectors, the status task and
    /// forwarders, in that order.
    pub async fn stop(self) {
        tracing::info!(ports = self.specs.len(), "supervisor stopping");
        self.trigger.stop();
        for handle in self.workers {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "collector task ended abnormally");
            }
        }
        if let Err(err) = self.status.await {
            tracing::error!(error = %err, "status task ended abnormally");
        }
        for forwarder in &self.forwarders {
            forwarder.stop().await;
        }
        tracing::info!("supervisor stopped");
    }
}
