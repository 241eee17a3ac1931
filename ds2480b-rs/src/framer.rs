//! DS2480B wire framing.
//!
//! The adapter accepts bytes in one of two modes. In data mode every byte is
//! shifted onto the 1-Wire as-is (0xE3 doubled to escape it); in command
//! mode the low bits of each byte select a function. The framer owns the
//! current-mode bookkeeping and the command/response byte layouts.

use bitfield_struct::bitfield;
use onewire_host::{PowerDeliveryDuration, ProgramPulseDuration, ResetStatus, Speed};

/// Switch the adapter from command mode to data mode.
pub const MODE_DATA: u8 = 0xe1;
/// Switch the adapter from data mode to command mode. Escaped by doubling
/// when it occurs inside a data payload.
pub const MODE_COMMAND: u8 = 0xe3;
/// Terminate a running or armed pulse.
pub const MODE_STOP_PULSE: u8 = 0xf1;

/// Marker bits of a communication command byte.
pub const CMD_COMM: u8 = 0x81;
/// Marker bit of a configuration command byte.
pub const CMD_CONFIG: u8 = 0x01;

/// Function select: single bit I/O.
pub const FUNCTSEL_BIT: u8 = 0x00;
/// Function select: search accelerator off.
pub const FUNCTSEL_SEARCHOFF: u8 = 0x20;
/// Function select: search accelerator on.
pub const FUNCTSEL_SEARCHON: u8 = 0x30;
/// Function select: 1-Wire reset.
pub const FUNCTSEL_RESET: u8 = 0x40;
/// Function select: pulse control.
pub const FUNCTSEL_CHMOD: u8 = 0x60;

/// Bit polarity one / 12V pulse select.
pub const BITPOL_ONE: u8 = 0x10;
/// 5V pulse select.
pub const BITPOL_5V: u8 = 0x00;
/// 12V pulse select.
pub const BITPOL_12V: u8 = 0x10;
/// Arm the pulse to fire with the next bit instead of now.
pub const PRIME5V: u8 = 0x02;

/// Speed bits reserved for pulse commands.
pub const SPEEDSEL_PULSE: u8 = 0x0c;

/// The speed bits of a communication command.
pub const fn speed_bits(speed: Speed) -> u8 {
    match speed {
        Speed::Regular => 0x00,
        Speed::Flex => 0x04,
        Speed::Overdrive => 0x08,
    }
}

/// Adapter parameters addressable through configuration commands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    /// Pulldown slew rate (flex speed).
    PulldownSlew = 0x10,
    /// 12V program pulse duration.
    ProgramPulseTime = 0x20,
    /// 5V strong pullup duration.
    PowerDeliveryTime = 0x30,
    /// Write-1 low time.
    Write1LowTime = 0x40,
    /// Data sample offset / write-0 recovery time.
    SampleOffset = 0x50,
    /// Active pullup on time.
    ActivePullupTime = 0x60,
    /// UART baud rate.
    Baud = 0x70,
}

/// Pulldown slew-rate codes (V/us), flex speed only.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum PulldownSlew {
    V15 = 0x00,
    V2p2 = 0x02,
    V1p65 = 0x04,
    #[default]
    V1p37 = 0x06,
    V1p1 = 0x08,
    V0p83 = 0x0a,
    V0p7 = 0x0c,
    V0p55 = 0x0e,
}

/// Write-1 low time codes (us).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum Write1LowTime {
    Us8 = 0x00,
    Us9 = 0x02,
    #[default]
    Us10 = 0x04,
    Us11 = 0x06,
    Us12 = 0x08,
    Us13 = 0x0a,
    Us14 = 0x0c,
    Us15 = 0x0e,
}

/// Data sample offset / write-0 recovery time codes (us).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum SampleOffset {
    Us3 = 0x00,
    Us4 = 0x02,
    Us5 = 0x04,
    Us6 = 0x06,
    Us7 = 0x08,
    #[default]
    Us8 = 0x0a,
    Us9 = 0x0c,
    Us10 = 0x0e,
}

/// Voltage source of a pulse command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseKind {
    /// 5V strong pullup.
    Strong5V,
    /// 12V program pulse.
    Program12V,
}

/// Code for the UART baud rate parameter, for the rates the DS2480B knows.
pub const fn baud_code(baud: u32) -> Option<u8> {
    match baud {
        9600 => Some(0x00),
        19200 => Some(0x02),
        57600 => Some(0x04),
        115200 => Some(0x06),
        _ => None,
    }
}

/// Parameter code for a strong-pullup duration.
pub const fn power_delivery_code(duration: PowerDeliveryDuration) -> u8 {
    match duration {
        PowerDeliveryDuration::Ms16 => 0x00,
        PowerDeliveryDuration::Ms65 => 0x02,
        PowerDeliveryDuration::Ms131 => 0x04,
        PowerDeliveryDuration::Ms262 => 0x06,
        PowerDeliveryDuration::Ms524 => 0x08,
        PowerDeliveryDuration::Ms1048 => 0x0a,
        PowerDeliveryDuration::Infinite => 0x0c,
    }
}

/// Parameter code for a 12V program-pulse duration.
pub const fn program_pulse_code(duration: ProgramPulseDuration) -> u8 {
    match duration {
        ProgramPulseDuration::Us32 => 0x00,
        ProgramPulseDuration::Us64 => 0x02,
        ProgramPulseDuration::Us128 => 0x04,
        ProgramPulseDuration::Us256 => 0x06,
        ProgramPulseDuration::Us512 => 0x08,
        ProgramPulseDuration::Us1024 => 0x0a,
        ProgramPulseDuration::Us2048 => 0x0c,
        ProgramPulseDuration::Infinite => 0x0e,
    }
}

/// Builds a single-bit I/O command.
pub const fn bit_command(bit: bool, speed: Speed, arm_power: bool) -> u8 {
    CMD_COMM
        | FUNCTSEL_BIT
        | speed_bits(speed)
        | if bit { BITPOL_ONE } else { 0 }
        | if arm_power { PRIME5V } else { 0 }
}

/// Builds a 1-Wire reset command.
pub const fn reset_command(speed: Speed) -> u8 {
    CMD_COMM | FUNCTSEL_RESET | speed_bits(speed)
}

/// Builds a search accelerator on/off command.
pub const fn search_accel_command(on: bool, speed: Speed) -> u8 {
    CMD_COMM
        | if on { FUNCTSEL_SEARCHON } else { FUNCTSEL_SEARCHOFF }
        | speed_bits(speed)
}

/// Builds a pulse command.
pub const fn pulse_command(kind: PulseKind, prime: bool) -> u8 {
    CMD_COMM
        | FUNCTSEL_CHMOD
        | SPEEDSEL_PULSE
        | match kind {
            PulseKind::Strong5V => BITPOL_5V,
            PulseKind::Program12V => BITPOL_12V,
        }
        | if prime { PRIME5V } else { 0 }
}

/// Builds a parameter write command.
pub const fn config_write(parameter: Parameter, code: u8) -> u8 {
    CMD_CONFIG | parameter as u8 | code
}

/// Builds a parameter read command; the parameter select moves into the
/// value field.
pub const fn config_read(parameter: Parameter) -> u8 {
    CMD_CONFIG | (parameter as u8 >> 3)
}

/// The reply the adapter echoes for a configuration command: the command
/// byte shifted right once.
pub const fn config_reply(command: u8) -> u8 {
    command >> 1
}

/// The reply expected when reading back `parameter` set to `code`.
pub const fn config_read_reply(parameter: Parameter, code: u8) -> u8 {
    (parameter as u8 | code) >> 1
}

/// Reply to a 1-Wire reset command.
#[bitfield(u8)]
pub struct ResetResponse {
    /// Bus outcome: 00 short, 01 presence, 10 alarming presence, 11 none.
    #[bits(2)]
    pub outcome: u8,
    /// Chip revision.
    #[bits(3)]
    pub revision: u8,
    /// A 12V program-pulse supply is wired up.
    pub program_voltage: bool,
    /// Always 0b11 on a well-formed reply.
    #[bits(2)]
    pub frame: u8,
}

impl ResetResponse {
    /// Whether the frame marker bits identify a reset reply.
    pub const fn well_formed(self) -> bool {
        self.frame() == 0b11
    }

    /// The bus outcome the reply encodes.
    pub const fn status(self) -> ResetStatus {
        match self.outcome() {
            0b00 => ResetStatus::Short,
            0b01 => ResetStatus::Presence,
            0b10 => ResetStatus::Alarm,
            _ => ResetStatus::NoPresence,
        }
    }
}

/// Reply to a single-bit I/O command.
#[bitfield(u8)]
pub struct BitResponse {
    /// 0b00 for a read-back of 0, 0b11 for 1.
    #[bits(2)]
    pub readback: u8,
    /// Echo of the command's speed bits.
    #[bits(2)]
    pub speed: u8,
    /// Echo of the command's high nibble.
    #[bits(4)]
    pub frame: u8,
}

impl BitResponse {
    /// Whether this is a well-formed reply to `command`.
    pub const fn matches(self, command: u8) -> bool {
        self.frame() == command >> 4
            && self.speed() == (command & 0x0c) >> 2
            && (self.readback() == 0b00 || self.readback() == 0b11)
    }

    /// The bit read back from the bus.
    pub const fn bit(self) -> bool {
        self.readback() == 0b11
    }
}

/// Which of the two input modes the adapter currently decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Bytes are function commands.
    #[default]
    Command,
    /// Bytes are shifted onto the 1-Wire.
    Data,
}

/// Mode bookkeeping for one outgoing burst.
///
/// Appends the switch byte whenever the requested mode differs from the one
/// the adapter is in, and escapes [`MODE_COMMAND`] inside data payloads.
#[derive(Debug)]
pub struct Framer {
    mode: Mode,
}

impl Framer {
    /// Starts framing with the adapter known to be in `mode`.
    pub fn new(mode: Mode) -> Self {
        Framer { mode }
    }

    /// The mode the adapter is left in after everything framed so far.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Ensures the adapter will interpret what follows as commands.
    pub fn enter_command(&mut self, out: &mut Vec<u8>) {
        if self.mode == Mode::Data {
            out.push(MODE_COMMAND);
            self.mode = Mode::Command;
        }
    }

    /// Ensures the adapter will shift what follows onto the 1-Wire.
    pub fn enter_data(&mut self, out: &mut Vec<u8>) {
        if self.mode == Mode::Command {
            out.push(MODE_DATA);
            self.mode = Mode::Data;
        }
    }

    /// Appends a data payload, doubling every embedded [`MODE_COMMAND`].
    pub fn push_data(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        self.enter_data(out);
        for &byte in payload {
            out.push(byte);
            if byte == MODE_COMMAND {
                out.push(MODE_COMMAND);
            }
        }
    }
}

/// Removes the data-mode escaping from a raw burst, recovering the payload.
///
/// The inverse of [`Framer::push_data`] over a pure data-mode stream.
pub fn unescape_data(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter();
    while let Some(&byte) = bytes.next() {
        if byte == MODE_COMMAND {
            if bytes.next().is_some() {
                out.push(MODE_COMMAND);
            }
        } else {
            out.push(byte);
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn data_escaping_round_trips() {
        let payload = [0x44u8, 0xe3, 0x00, 0xe3, 0xe3, 0xff];
        let mut framer = Framer::new(Mode::Data);
        let mut out = Vec::new();
        framer.push_data(&payload, &mut out);
        assert_eq!(unescape_data(&out), payload);
    }

    #[test]
    fn mode_switches_emitted_once() {
        let mut framer = Framer::new(Mode::Command);
        let mut out = Vec::new();
        framer.push_data(&[0x55], &mut out);
        framer.push_data(&[0xaa], &mut out);
        framer.enter_command(&mut out);
        framer.enter_command(&mut out);
        assert_eq!(out, vec![MODE_DATA, 0x55, 0xaa, MODE_COMMAND]);
        assert_eq!(framer.mode(), Mode::Command);
    }

    #[test]
    fn command_encodings() {
        assert_eq!(reset_command(Speed::Regular), 0xc1);
        assert_eq!(reset_command(Speed::Flex), 0xc5);
        assert_eq!(reset_command(Speed::Overdrive), 0xc9);
        assert_eq!(bit_command(true, Speed::Regular, false), 0x91);
        assert_eq!(bit_command(false, Speed::Regular, false), 0x81);
        assert_eq!(bit_command(true, Speed::Regular, true), 0x93);
        assert_eq!(search_accel_command(true, Speed::Regular), 0xb1);
        assert_eq!(search_accel_command(false, Speed::Regular), 0xa1);
        assert_eq!(pulse_command(PulseKind::Strong5V, false), 0xed);
        assert_eq!(pulse_command(PulseKind::Program12V, false), 0xfd);
        assert_eq!(config_write(Parameter::Baud, 0x06), 0x77);
        assert_eq!(config_read(Parameter::Baud), 0x0f);
        assert_eq!(config_reply(0x77), 0x3b);
    }

    #[test]
    fn reset_response_decodes() {
        let r = ResetResponse::from(0xcd);
        assert!(r.well_formed());
        assert_eq!(r.status(), onewire_host::ResetStatus::Presence);
        assert!(!r.program_voltage());
        let r = ResetResponse::from(0xef);
        assert!(r.well_formed());
        assert_eq!(r.status(), onewire_host::ResetStatus::NoPresence);
        assert!(r.program_voltage());
    }

    #[test]
    fn bit_response_decodes() {
        let cmd = bit_command(true, Speed::Regular, false);
        let r = BitResponse::from(0x93);
        assert!(r.matches(cmd));
        assert!(r.bit());
        let r = BitResponse::from(0x90);
        assert!(r.matches(cmd));
        assert!(!r.bit());
        assert!(!BitResponse::from(0x53).matches(cmd));
    }
}
