#![deny(missing_docs)]

/*! # DS2480B
 *
 * Driver for the Dallas/Maxim DS2480B serial 1-Wire line driver, the chip
 * inside DS9097U-class adapters. Implements the
 * [`OneWireMaster`](onewire_host::OneWireMaster) trait from `onewire-host`
 * over any serial port the `serialport` crate can open.
 *
 * The adapter speaks a packetized framing over the UART: a command mode for
 * resets, single bits, pulses and parameters, and a data mode that shifts
 * raw bytes onto the 1-Wire. Primitives are batched into single write
 * bursts to amortize UART latency, which matters most for the ROM search
 * (one 64-bit pass per 16-byte frame through the chip's search
 * accelerator).
 */

mod bus;
pub mod framer;
mod link;
mod lock;
mod ops;
mod packet;
mod search;
mod state;

pub use bus::OneWireBus;
pub use link::{default_port, port_names, read_timeout, SerialLink, SerialPortLink, PORT_ENV};
pub use lock::{ExclusiveGuard, ExclusiveLock};
pub use ops::{Ds2480b, MAX_BLOCK_CHUNK};
pub use packet::{BitArm, PacketBuilder, PrimitiveKind, PrimitiveRecord, ReplySlot};
pub use state::{AdapterState, ParameterSet, DEFAULT_BAUD};

use onewire_host::{FamilyRegistry, OwError, OwResult};

/// Builder for opening an adapter with custom configuration.
pub struct Ds2480bBuilder {
    bytebang_read: bool,
    max_streaming_baud: u32,
    detect_retries: u8,
    default_baud: u32,
    registry: FamilyRegistry,
}

impl Default for Ds2480bBuilder {
    fn default() -> Self {
        Ds2480bBuilder {
            bytebang_read: false,
            max_streaming_baud: 115_200,
            detect_retries: 2,
            default_baud: DEFAULT_BAUD,
            registry: FamilyRegistry::with_defaults(),
        }
    }
}

impl Ds2480bBuilder {
    /// Polls reads one byte at a time, for UART drivers that misreport
    /// their receive queue.
    pub fn with_bytebang_read(mut self, bytebang: bool) -> Self {
        self.bytebang_read = bytebang;
        self
    }

    /// Highest UART rate large block transfers may escalate to. Set to
    /// 9600 to disable streaming escalation.
    pub fn with_max_streaming_baud(mut self, baud: u32) -> Self {
        self.max_streaming_baud = baud;
        self
    }

    /// Master-reset attempts before a power reset is tried.
    pub fn with_detect_retries(mut self, retries: u8) -> Self {
        self.detect_retries = retries;
        self
    }

    /// The UART rate the port is opened at. The DS2480B calibrates to its
    /// first byte at 9600 baud, so any other value is rejected.
    pub fn with_default_baud(mut self, baud: u32) -> Self {
        self.default_baud = baud;
        self
    }

    /// Registers additional device families for the container cache.
    pub fn with_registry(mut self, registry: FamilyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Opens `path` and brings the adapter up.
    pub fn open(self, path: &str) -> OwResult<OneWireBus<SerialPortLink>> {
        let link = SerialPortLink::open(path, self.bytebang_read)?;
        self.attach(link)
    }

    /// Opens the port named by the `ONEWIRE_PORT` environment variable.
    pub fn open_default(self) -> OwResult<OneWireBus<SerialPortLink>> {
        let port = default_port()?;
        self.open(&port)
    }

    /// Brings the adapter up over an already-open link.
    pub fn attach<L: SerialLink>(self, link: L) -> OwResult<OneWireBus<L>> {
        if self.default_baud != DEFAULT_BAUD {
            return Err(OwError::InvalidArgument(format!(
                "the DS2480B master-resets at {DEFAULT_BAUD} baud, not {}",
                self.default_baud
            )));
        }
        if framer::baud_code(self.max_streaming_baud).is_none() {
            return Err(OwError::InvalidArgument(format!(
                "unsupported streaming baud {}",
                self.max_streaming_baud
            )));
        }
        let dev = Ds2480b::attach(link, self.max_streaming_baud, self.detect_retries)?;
        Ok(OneWireBus::with_registry(dev, self.registry))
    }
}
