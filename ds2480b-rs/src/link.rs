use onewire_host::{OwError, OwResult};
use serialport::{ClearBuffer, SerialPort};
use std::{io::Read, io::Write, time::Duration};

/// Per-read timeout as a function of the expected payload length.
pub fn read_timeout(len: usize) -> Duration {
    Duration::from_millis(800 + 20 * len as u64)
}

/// Synchronous byte pipe to the adapter over the UART.
///
/// The driver is written against this trait so the protocol engine can be
/// exercised against a simulated adapter; [`SerialPortLink`] is the real
/// implementation.
pub trait SerialLink {
    /// The platform name of the port, for error context.
    fn port_name(&self) -> &str;

    /// Writes the whole buffer.
    fn write_all(&mut self, bytes: &[u8]) -> OwResult<()>;

    /// Reads exactly `buf.len()` bytes, failing once
    /// [`read_timeout`] of the length expires.
    fn read_exact(&mut self, buf: &mut [u8]) -> OwResult<()>;

    /// Blocks until everything written has left the UART.
    fn flush(&mut self) -> OwResult<()>;

    /// Discards any received bytes not yet read.
    fn purge(&mut self) -> OwResult<()>;

    /// Holds the TX line in break condition for at least 2 ms.
    fn send_break(&mut self) -> OwResult<()>;

    /// Changes the UART rate.
    fn set_baud(&mut self, baud: u32) -> OwResult<()>;

    /// Drives DTR and RTS together; dropping both powers the adapter down.
    fn set_dtr_rts(&mut self, asserted: bool) -> OwResult<()>;

    /// Waits for `duration`. On the real link this sleeps the thread; a
    /// simulated link may skip time instead.
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// [`SerialLink`] over a real serial port.
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
    name: String,
    bytebang_read: bool,
}

impl SerialPortLink {
    /// Opens `path` at 9600 baud, 8N1.
    ///
    /// `bytebang_read` polls the port one byte at a time instead of
    /// issuing one sized read, working around UART drivers that misreport
    /// their receive queue.
    pub fn open(path: &str, bytebang_read: bool) -> OwResult<Self> {
        let port = serialport::new(path, crate::state::DEFAULT_BAUD)
            .timeout(read_timeout(1))
            .open()
            .map_err(|e| OwError::io(e.into(), path))?;
        Ok(SerialPortLink {
            port,
            name: path.to_string(),
            bytebang_read,
        })
    }

    fn io_err(&self, source: std::io::Error) -> OwError {
        OwError::io(source, self.name.clone())
    }
}

impl SerialLink for SerialPortLink {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, bytes: &[u8]) -> OwResult<()> {
        log::trace!("tx {bytes:02x?}");
        self.port
            .write_all(bytes)
            .map_err(|e| OwError::io(e, self.name.clone()))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> OwResult<()> {
        self.port
            .set_timeout(read_timeout(buf.len()))
            .map_err(|e| OwError::io(e.into(), self.name.clone()))?;
        if self.bytebang_read {
            for i in 0..buf.len() {
                self.port
                    .read_exact(&mut buf[i..i + 1])
                    .map_err(|e| OwError::io(e, self.name.clone()))?;
            }
        } else {
            self.port
                .read_exact(buf)
                .map_err(|e| OwError::io(e, self.name.clone()))?;
        }
        log::trace!("rx {buf:02x?}");
        Ok(())
    }

    fn flush(&mut self) -> OwResult<()> {
        let name = self.name.clone();
        self.port.flush().map_err(|e| OwError::io(e, name))
    }

    fn purge(&mut self) -> OwResult<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| self.io_err(e.into()))
    }

    fn send_break(&mut self) -> OwResult<()> {
        self.port.set_break().map_err(|e| self.io_err(e.into()))?;
        std::thread::sleep(Duration::from_millis(2));
        self.port.clear_break().map_err(|e| self.io_err(e.into()))
    }

    fn set_baud(&mut self, baud: u32) -> OwResult<()> {
        self.port
            .set_baud_rate(baud)
            .map_err(|e| self.io_err(e.into()))
    }

    fn set_dtr_rts(&mut self, asserted: bool) -> OwResult<()> {
        self.port
            .write_data_terminal_ready(asserted)
            .map_err(|e| self.io_err(e.into()))?;
        self.port
            .write_request_to_send(asserted)
            .map_err(|e| self.io_err(e.into()))
    }
}

/// The serial ports the platform reports.
pub fn port_names() -> OwResult<Vec<String>> {
    Ok(serialport::available_ports()
        .map_err(|e| OwError::Io {
            source: e.into(),
            port: None,
        })?
        .into_iter()
        .map(|info| info.port_name)
        .collect())
}

/// Environment variable naming the adapter port for [`default_port`].
pub const PORT_ENV: &str = "ONEWIRE_PORT";

/// The port named by the `ONEWIRE_PORT` environment variable.
pub fn default_port() -> OwResult<String> {
    std::env::var(PORT_ENV).map_err(|_| {
        OwError::InvalidArgument(format!("no port given and {PORT_ENV} is not set"))
    })
}
