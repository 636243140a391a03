use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_serial::{DataBits, SerialPortBuilderExt, SerialStream, StopBits};

#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;

use crate::config::{Parity, PortSpec};

const READ_CHUNK: usize = 1024;

/// A byte-producing device. `read` returns whatever arrived since the last call;
/// an empty chunk is a successful read with nothing to report.
#[async_trait]
pub trait PortSource: Send {
    async fn open(&mut self) -> Result<()>;
    async fn read(&mut self) -> Result<Vec<u8>>;
}

enum ReaderSource {
    Serial(SerialStream),
    File(File),
}

/// Serial device opened through `tokio-serial`. Names that resolve to an existing
/// FIFO or regular file are read as plain files, which is how captures are replayed.
pub struct SerialPortSource {
    spec: PortSpec,
    reader: Option<ReaderSource>,
    buffer: Vec<u8>,
}

impl SerialPortSource {
    pub fn new(spec: PortSpec) -> Self {
        Self {
            spec,
            reader: None,
            buffer: vec![0; READ_CHUNK],
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    fn open_serial(&self) -> Result<SerialStream> {
        let spec = &self.spec;
        tokio_serial::new(&spec.name, spec.baud_rate)
            .data_bits(data_bits(spec.data_bits)?)
            .stop_bits(stop_bits(spec.stop_bits)?)
            .parity(parity(spec.parity))
            .open_native_async()
            .with_context(|| format!("failed to open serial port {}", spec.name))
    }
}

fn is_fifo_or_file(name: &str) -> bool {
    match std::fs::metadata(name) {
        Ok(meta) => {
            #[cfg(unix)]
            {
                meta.file_type().is_fifo() || meta.is_file()
            }
            #[cfg(not(unix))]
            {
                meta.is_file()
            }
        }
        Err(_) => false,
    }
}

fn data_bits(bits: u8) -> Result<DataBits> {
    Ok(match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        8 => DataBits::Eight,
        other => bail!("unsupported data bits {other}"),
    })
}

fn stop_bits(bits: u8) -> Result<StopBits> {
    Ok(match bits {
        1 => StopBits::One,
        2 => StopBits::Two,
        other => bail!("unsupported stop bits {other}"),
    })
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

#[async_trait]
impl PortSource for SerialPortSource {
    async fn open(&mut self) -> Result<()> {
        let reader = if is_fifo_or_file(&self.spec.name) {
            let file = File::open(&self.spec.name)
                .await
                .with_context(|| format!("failed to open FIFO/file {}", self.spec.name))?;
            ReaderSource::File(file)
        } else {
            ReaderSource::Serial(self.open_serial()?)
        };
        self.reader = Some(reader);
        tracing::info!(port = %self.spec.name, baud = self.spec.baud_rate, "port opened");
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("port {} is not open", self.spec.name))?;
        let n = match reader {
            ReaderSource::Serial(stream) => stream.read(&mut self.buffer).await?,
            ReaderSource::File(file) => file.read(&mut self.buffer).await?,
        };
        Ok(self.buffer[..n].to_vec())
    }
}
