#![deny(missing_docs)]

/*! # DS2409
 *
 * Container for the DS2409 MicroLAN coupler, the slave that switches a
 * downstream 1-Wire segment onto the main bus. Couplers make tree-shaped
 * networks possible; [`OwPath`] names a route through them and knows how to
 * open and close it.
 */

use bitfield_struct::bitfield;
use onewire_host::{
    consts::FAMILY_COUPLER, OneWireMaster, OneWireSearch, OwError, OwResult, RomAddress,
    SearchKind,
};
use std::fmt;

mod path;

pub use path::{OwPath, PathElement};

/// Status Read/Write command.
pub const COMMAND_STATUS_READ_WRITE: u8 = 0x5a;
/// Unconditionally switch both outputs off.
pub const COMMAND_ALL_LINES_OFF: u8 = 0x66;
/// Discharge both branch lines, clearing stuck parasite charge.
pub const COMMAND_DISCHARGE_LINES: u8 = 0x99;
/// Switch the main output on without a branch reset.
pub const COMMAND_DIRECT_ON_MAIN: u8 = 0xa5;
/// Switch the main output on, relaying a reset to the branch.
pub const COMMAND_SMART_ON_MAIN: u8 = 0xcc;
/// Switch the auxiliary output on, relaying a reset to the branch.
pub const COMMAND_SMART_ON_AUX: u8 = 0x33;

/// Control byte for a status read that changes nothing.
const CONTROL_READ_ONLY: u8 = 0xff;

/// The two switched outputs of a coupler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CouplerChannel {
    /// The main output.
    Main,
    /// The auxiliary output.
    Aux,
}

impl CouplerChannel {
    /// Builds a channel from its number; couplers have channels 0 and 1.
    pub fn from_number(channel: u8) -> OwResult<Self> {
        match channel {
            0 => Ok(CouplerChannel::Main),
            1 => Ok(CouplerChannel::Aux),
            other => Err(OwError::InvalidArgument(format!(
                "couplers have channels 0 and 1, not {other}"
            ))),
        }
    }

    /// The channel number.
    pub fn number(self) -> u8 {
        match self {
            CouplerChannel::Main => 0,
            CouplerChannel::Aux => 1,
        }
    }

    /// The smart-on command switching this channel.
    fn smart_on_command(self) -> u8 {
        match self {
            CouplerChannel::Main => COMMAND_SMART_ON_MAIN,
            CouplerChannel::Aux => COMMAND_SMART_ON_AUX,
        }
    }
}

impl fmt::Display for CouplerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Status snapshot of one coupler.
///
/// The snapshot read from the device is authoritative; latch decisions are
/// made against it, never against previously cached level bits.
#[bitfield(u8)]
pub struct CouplerStatus {
    /// Main output is switched on.
    pub main_on: bool,
    /// Auxiliary output is switched on.
    pub aux_on: bool,
    /// Control output is conducting.
    pub control_out: bool,
    /// A presence event was latched on the main branch.
    pub main_event: bool,
    /// A presence event was latched on the auxiliary branch.
    pub aux_event: bool,
    /// Unused.
    #[bits(3)]
    reserved: u8,
}

impl CouplerStatus {
    /// Whether `channel` is switched on in this snapshot.
    pub const fn channel_on(self, channel: CouplerChannel) -> bool {
        match channel {
            CouplerChannel::Main => self.main_on(),
            CouplerChannel::Aux => self.aux_on(),
        }
    }
}

/// One DS2409 coupler on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ds2409 {
    rom: RomAddress,
}

impl Ds2409 {
    /// The coupler family code.
    pub const fn family() -> u8 {
        FAMILY_COUPLER
    }

    /// Wraps a ROM address, requiring the coupler family code.
    pub fn new(rom: RomAddress) -> OwResult<Self> {
        if rom.family() != Self::family() {
            return Err(OwError::InvalidArgument(format!(
                "rom {rom} is not a DS2409 coupler"
            )));
        }
        Ok(Ds2409 { rom })
    }

    /// The coupler's ROM address.
    pub fn rom(&self) -> RomAddress {
        self.rom
    }

    /// Finds every coupler on the bus.
    pub fn enumerate<T: OneWireMaster>(bus: &mut T) -> OwResult<Vec<Ds2409>> {
        let mut search = OneWireSearch::with_family(bus, SearchKind::Normal, Self::family());
        let mut couplers = Vec::new();
        while let Some(rom) = search.next()? {
            couplers.push(Ds2409 { rom });
        }
        Ok(couplers)
    }

    /// Reads the status snapshot without changing anything.
    pub fn read_status<T: OneWireMaster>(&self, bus: &mut T) -> OwResult<CouplerStatus> {
        bus.assert_select(self.rom)?;
        let mut buffer = [COMMAND_STATUS_READ_WRITE, CONTROL_READ_ONLY, 0xff];
        bus.block(&mut buffer)?;
        Ok(CouplerStatus::from(buffer[2]))
    }

    /// Switches `channel` on via smart-on: the coupler relays a reset to
    /// the branch and answers with a confirmation byte.
    pub fn smart_on<T: OneWireMaster>(
        &self,
        bus: &mut T,
        channel: CouplerChannel,
    ) -> OwResult<()> {
        bus.assert_select(self.rom)?;
        let command = channel.smart_on_command();
        bus.write_byte(command)?;
        // Reset stimulus for the branch, then the confirmation byte.
        let mut buffer = [0xff, 0xff];
        bus.block(&mut buffer)?;
        if buffer[1] != command {
            return Err(OwError::ProtocolEcho {
                expected: command,
                got: buffer[1],
                context: "coupler smart-on confirmation",
            });
        }
        log::debug!("coupler {} channel {channel} on", self.rom);
        Ok(())
    }

    /// Switches both outputs off.
    pub fn all_lines_off<T: OneWireMaster>(&self, bus: &mut T) -> OwResult<()> {
        self.confirmed_command(bus, COMMAND_ALL_LINES_OFF)?;
        log::debug!("coupler {} all lines off", self.rom);
        Ok(())
    }

    /// Discharges the branch lines.
    pub fn discharge_lines<T: OneWireMaster>(&self, bus: &mut T) -> OwResult<()> {
        self.confirmed_command(bus, COMMAND_DISCHARGE_LINES)
    }

    /// Switches the main output on without disturbing the branch.
    pub fn direct_on_main<T: OneWireMaster>(&self, bus: &mut T) -> OwResult<()> {
        self.confirmed_command(bus, COMMAND_DIRECT_ON_MAIN)
    }

    fn confirmed_command<T: OneWireMaster>(&self, bus: &mut T, command: u8) -> OwResult<()> {
        bus.assert_select(self.rom)?;
        bus.write_byte(command)?;
        let confirmation = bus.read_byte()?;
        if confirmation != command {
            return Err(OwError::ProtocolEcho {
                expected: command,
                got: confirmation,
                context: "coupler confirmation",
            });
        }
        Ok(())
    }
}
