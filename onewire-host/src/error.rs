use crate::rom::RomAddress;
use thiserror::Error;

/// Result of 1-Wire operations.
pub type OwResult<T> = Result<T, OwError>;

/// One wire communication error type.
///
/// A single taxonomy shared by every layer of the workspace. Where a failure
/// concerns one particular slave or port, the variant carries it so callers
/// can log or restart the affected subtree.
#[derive(Debug, Error)]
pub enum OwError {
    /// Underlying serial read/write failure, timeout, or port not open.
    #[error("serial i/o failed{}", fmt_port(.port))]
    Io {
        /// The operating-system level failure.
        #[source]
        source: std::io::Error,
        /// Port the adapter was opened on, when known.
        port: Option<String>,
    },
    /// The adapter reply had wrong reserved bits, wrong length, or
    /// disagreed with the command sent.
    #[error("adapter echo mismatch during {context}: expected {expected:#04x}, got {got:#04x}")]
    ProtocolEcho {
        /// Reply byte the protocol requires.
        expected: u8,
        /// Reply byte actually received.
        got: u8,
        /// The operation that was underway.
        context: &'static str,
    },
    /// A 1-Wire reset returned no presence pulse when a slave was required.
    #[error("no presence pulse on the bus{}", fmt_rom(.rom))]
    NoPresence {
        /// The slave that was being addressed, when applicable.
        rom: Option<RomAddress>,
    },
    /// A 1-Wire reset reported the bus shorted to ground.
    #[error("1-Wire bus is shorted")]
    BusShort,
    /// CRC verification over received data failed.
    #[error("crc check failed (computed {computed:#04x}){}", fmt_rom(.rom))]
    Crc {
        /// Remainder left by the check; zero means valid.
        computed: u8,
        /// The slave involved, when applicable.
        rom: Option<RomAddress>,
    },
    /// The capability is not available on this adapter.
    #[error("not supported by this adapter: {0}")]
    NotSupported(&'static str),
    /// A programming bug on the caller's side, surfaced with context.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Repeated verify failure; the port must be closed and reopened
    /// before any further use.
    #[error("adapter lost on port {port}")]
    AdapterLost {
        /// Port the adapter was opened on.
        port: String,
    },
}

impl OwError {
    /// Wraps an I/O failure together with the port it happened on.
    pub fn io(source: std::io::Error, port: impl Into<String>) -> Self {
        OwError::Io {
            source,
            port: Some(port.into()),
        }
    }

    /// True for the transient kinds that warrant one silent re-verify and
    /// retry inside the same locked region.
    pub fn is_transient(&self) -> bool {
        matches!(self, OwError::Io { .. } | OwError::ProtocolEcho { .. })
    }
}

impl From<std::io::Error> for OwError {
    fn from(source: std::io::Error) -> Self {
        OwError::Io { source, port: None }
    }
}

fn fmt_port(port: &Option<String>) -> String {
    match port {
        Some(p) => format!(" on port {p}"),
        None => String::new(),
    }
}

fn fmt_rom(rom: &Option<RomAddress>) -> String {
    match rom {
        Some(r) => format!(" (rom {r})"),
        None => String::new(),
    }
}
