//! Command constants for 1-Wire communication.

/// Command to read the ROM of the only slave on a single-drop bus.
pub const ONEWIRE_READ_ROM_CMD: u8 = 0x33;

/// Command to match a specific ROM address in 1-Wire communication (non-overdrive mode)
pub const ONEWIRE_MATCH_ROM_CMD: u8 = 0x55;

/// Command to skip ROM address in 1-Wire communication (non-overdrive mode)
pub const ONEWIRE_SKIP_ROM_CMD: u8 = 0xcc;

/// The Overdrive-Match ROM command followed by a 64-bit ROM sequence allows
/// the bus master to address a specific slave on a multidrop bus and to
/// simultaneously set it in overdrive mode. Slaves already in overdrive mode
/// from a previous Overdrive-Skip ROM or successful Overdrive-Match ROM
/// command remain in overdrive mode. All overdrive-capable slaves return to
/// standard speed at the next reset pulse of minimum 480us duration.
pub const ONEWIRE_MATCH_ROM_CMD_OD: u8 = 0x69;

/// On a single-drop bus this command can save time by allowing the bus
/// master to access the control functions without providing the 64-bit ROM
/// code. Unlike the normal Skip ROM command, the Overdrive-Skip ROM sets the
/// slave in overdrive mode (OD = 1). All communication following this
/// command has to occur at overdrive speed until a reset pulse of minimum
/// 480us duration resets all devices on the bus to standard speed (OD = 0).
pub const ONEWIRE_SKIP_ROM_CMD_OD: u8 = 0x3c;

/// Command to search for devices on the 1-Wire bus
pub const ONEWIRE_SEARCH_CMD: u8 = 0xf0;

/// Command to search for devices in alarm state on the 1-Wire bus
pub const ONEWIRE_CONDITIONAL_SEARCH_CMD: u8 = 0xec;

/// Family code of the DS2409 MicroLAN coupler.
pub const FAMILY_COUPLER: u8 = 0x1f;
