use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;

use crate::config::AppConfig;
use crate::error_log::{ErrorLog, FileErrorLog};
use crate::forwarder::TcpConnector;
use crate::serial::SerialPortSource;
use crate::sink::FileSink;
use crate::status::{LogStatusView, StatusView, TerminalStatusView};
use crate::supervisor::{PortBinding, Supervisor};

pub struct Service {
    config: AppConfig,
    headless: bool,
}

impl Service {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            headless: false,
        }
    }

    /// Render status as log events instead of a full-screen table.
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Builds real serial sources, capture files and TCP connectors for every
    /// configured port.
    pub async fn bindings(config: &AppConfig) -> Result<Vec<PortBinding>> {
        let mut bindings = Vec::with_capacity(config.ports.len());
        for spec in &config.ports {
            let sink = FileSink::new(&config.data_directory, &spec.name)
                .await
                .with_context(|| format!("prepare capture files for {}", spec.name))?;
            bindings.push(PortBinding {
                source: Box::new(SerialPortSource::new(spec.clone())),
                sink: Box::new(sink),
                connector: Arc::new(TcpConnector::new(&spec.tcp_forward)),
                spec: spec.clone(),
            });
        }
        Ok(bindings)
    }

    pub async fn run(self) -> Result<()> {
        let bindings = Self::bindings(&self.config).await?;
        let error_log: Arc<dyn ErrorLog> =
            Arc::new(FileErrorLog::new(&self.config.error_directory));
        let view: Box<dyn StatusView> = if self.headless {
            Box::new(LogStatusView)
        } else {
            Box::new(TerminalStatusView::new().context("initialise status display")?)
        };

        tracing::info!(
            ports = bindings.len(),
            data_dir = %self.config.data_directory,
            "serial capture starting"
        );
        let supervisor = Supervisor::start(bindings, view, error_log);

        signal::ctrl_c().await.ok();
        tracing::info!("ctrl-c received, requesting shutdown");
        supervisor.stop().await;
        Ok(())
    }
}
