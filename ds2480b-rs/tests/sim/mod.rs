//! A simulated DS2480B with a 1-Wire bus behind it.
//!
//! Implements [`SerialLink`] well enough to exercise the whole protocol
//! engine: command/data modes with 0xE3 escaping, the timing-byte
//! handshake, parameter echoes, single bits, pulses, the search
//! accelerator, baud changes (replies turn to garbage while the two ends
//! disagree), and a population of slaves with scratchpads.

use ds2480b::SerialLink;
use onewire_host::{OwError, OwResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const MODE_DATA: u8 = 0xe1;
const MODE_COMMAND: u8 = 0xe3;
const MODE_STOP_PULSE: u8 = 0xf1;

/// Chip revision the simulator reports in reset replies.
pub const SIM_REVISION: u8 = 0x03;

#[derive(Debug, Clone)]
pub struct SimDevice {
    pub rom: [u8; 8],
    pub alarming: bool,
    pub scratchpad: Vec<u8>,
    pub latch_main: bool,
    pub latch_aux: bool,
}

impl SimDevice {
    pub fn new(rom: [u8; 8]) -> Self {
        SimDevice {
            rom,
            alarming: false,
            scratchpad: Vec::new(),
            latch_main: false,
            latch_aux: false,
        }
    }

    pub fn alarming(mut self) -> Self {
        self.alarming = true;
        self
    }

    pub fn with_scratchpad(mut self, scratchpad: &[u8]) -> Self {
        self.scratchpad = scratchpad.to_vec();
        self
    }

    fn bit(&self, index: usize) -> bool {
        self.rom[index / 8] & (1 << (index % 8)) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Command,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WireState {
    /// Nothing selected; a reset must come first.
    Idle,
    /// Reset seen; the next data byte is a ROM command.
    RomCommand,
    /// Collecting the eight bytes of a match-ROM.
    MatchRom(Vec<u8>),
    /// Waiting for accelerator frames of a running search.
    Search,
    /// Reading the lone slave's ROM.
    ReadRom(usize),
    /// A slave (or all of them) is addressed.
    Selected(Option<usize>),
}

pub struct SimState {
    devices: Vec<SimDevice>,
    // adapter side
    mode: Mode,
    powered: bool,
    awaiting_timing: bool,
    uart_baud: u32,
    adapter_baud: u32,
    params: [u8; 8],
    escape_pending: bool,
    accel_on: bool,
    accel_frame: Vec<u8>,
    pulse_primed: Option<u8>,
    pulse_active: bool,
    out: VecDeque<u8>,
    // 1-Wire side
    wire: WireState,
    search_alarm_only: bool,
    participants: Vec<usize>,
    read_queue: VecDeque<u8>,
    // observability
    pub wire_log: Vec<u8>,
    pub breaks: usize,
    pub power_cycles: usize,
}

impl SimState {
    pub fn device(&self, index: usize) -> &SimDevice {
        &self.devices[index]
    }

    fn push_reply(&mut self, byte: u8) {
        // A rate mismatch between the two ends garbles every reply.
        if self.uart_baud == self.adapter_baud {
            self.out.push_back(byte);
        } else {
            self.out.push_back(0x00);
        }
    }

    fn pulse_response(kind: u8) -> u8 {
        // Echo of the pulse command that fired.
        0x81 | 0x60 | 0x0c | kind
    }

    fn process(&mut self, byte: u8) {
        if !self.powered {
            return;
        }
        if self.awaiting_timing {
            // The first byte after power-up or break only calibrates.
            self.awaiting_timing = false;
            return;
        }
        match self.mode {
            Mode::Command => self.process_command(byte),
            Mode::Data => self.process_data(byte),
        }
    }

    fn process_command(&mut self, byte: u8) {
        if byte == MODE_DATA {
            self.mode = Mode::Data;
            return;
        }
        if byte == MODE_STOP_PULSE {
            self.pulse_active = false;
            self.pulse_primed = None;
            self.push_reply(MODE_STOP_PULSE);
            return;
        }
        if byte & 0x81 == 0x81 {
            match byte & 0x60 {
                0x00 => self.command_bit(byte),
                // Accelerator control; bit 4 carries on/off.
                0x20 => self.accel_on = byte & 0x10 != 0,
                0x40 => self.command_reset(),
                0x60 => self.command_pulse(byte),
                _ => unreachable!(),
            }
            return;
        }
        if byte & 0x81 == 0x01 {
            self.command_config(byte);
        }
    }

    fn command_bit(&mut self, byte: u8) {
        let value = byte & 0x10 != 0;
        // No slave drives single-bit slots in this model.
        let readback = if value { 0b11 } else { 0b00 };
        self.push_reply((byte & 0xfc) | readback);
        let armed_5v = byte & 0x02 != 0;
        if armed_5v {
            self.pulse_active = true;
            self.push_reply(Self::pulse_response(0x00));
        } else if let Some(kind) = self.pulse_primed.take() {
            self.pulse_active = true;
            self.push_reply(Self::pulse_response(kind));
        }
    }

    fn command_reset(&mut self) {
        let outcome = if self.devices.is_empty() {
            0b11
        } else if self.devices.iter().any(|d| d.alarming) {
            0b10
        } else {
            0b01
        };
        self.wire = WireState::RomCommand;
        self.read_queue.clear();
        self.accel_on = false;
        self.accel_frame.clear();
        self.push_reply(0xc0 | (SIM_REVISION << 2) | outcome);
    }

    fn command_pulse(&mut self, byte: u8) {
        let kind = byte & 0x10;
        if byte & 0x02 != 0 {
            self.pulse_primed = Some(kind);
        } else {
            self.pulse_active = true;
            self.push_reply(Self::pulse_response(kind));
        }
    }

    fn command_config(&mut self, byte: u8) {
        let select = (byte >> 4) & 0x07;
        if select == 0 {
            // Parameter read; the target code sits in the value field.
            let target = ((byte >> 1) & 0x07) as usize;
            let reply = (((target as u8) << 4) | self.params[target]) >> 1;
            self.push_reply(reply);
        } else {
            let code = byte & 0x0e;
            self.params[select as usize] = code;
            if select == 7 {
                self.adapter_baud = match code {
                    0x00 => 9600,
                    0x02 => 19_200,
                    0x04 => 57_600,
                    _ => 115_200,
                };
            }
            self.push_reply(byte >> 1);
        }
    }

    fn process_data(&mut self, byte: u8) {
        if byte == MODE_COMMAND && !self.escape_pending {
            self.escape_pending = true;
            return;
        }
        if self.escape_pending {
            self.escape_pending = false;
            if byte != MODE_COMMAND {
                // The lone 0xE3 was a mode switch.
                self.mode = Mode::Command;
                self.process_command(byte);
                return;
            }
            // Doubled 0xE3 is a data byte; fall through with it.
        }
        if self.accel_on {
            self.accel_frame.push(byte);
            if self.accel_frame.len() == 16 {
                let response = self.run_accelerator();
                for b in response {
                    self.push_reply(b);
                }
                self.accel_frame.clear();
            }
            return;
        }
        self.wire_log.push(byte);
        let reply = self.wire_byte(byte);
        self.push_reply(reply);
    }

    /// One data byte shifted onto the simulated 1-Wire; returns the
    /// concurrent read-back.
    fn wire_byte(&mut self, byte: u8) -> u8 {
        match std::mem::replace(&mut self.wire, WireState::Idle) {
            WireState::Idle => {
                self.wire = WireState::Idle;
                byte
            }
            WireState::RomCommand => {
                match byte {
                    0xf0 | 0xec => {
                        self.search_alarm_only = byte == 0xec;
                        self.participants = self
                            .devices
                            .iter()
                            .enumerate()
                            .filter(|(_, d)| !self.search_alarm_only || d.alarming)
                            .map(|(i, _)| i)
                            .collect();
                        self.wire = WireState::Search;
                    }
                    0x55 | 0x69 => self.wire = WireState::MatchRom(Vec::new()),
                    0xcc | 0x3c => self.wire = WireState::Selected(None),
                    0x33 => self.wire = WireState::ReadRom(0),
                    _ => self.wire = WireState::Idle,
                }
                byte
            }
            WireState::MatchRom(mut seen) => {
                seen.push(byte);
                if seen.len() == 8 {
                    let device = self.devices.iter().position(|d| d.rom[..] == seen[..]);
                    self.read_queue.clear();
                    self.wire = WireState::Selected(device);
                } else {
                    self.wire = WireState::MatchRom(seen);
                }
                byte
            }
            WireState::ReadRom(pos) => {
                let mut readback = byte;
                if let Some(device) = self.devices.first() {
                    readback &= device.rom[pos.min(7)];
                }
                self.wire = if pos + 1 < 8 {
                    WireState::ReadRom(pos + 1)
                } else {
                    WireState::Selected(if self.devices.len() == 1 {
                        Some(0)
                    } else {
                        None
                    })
                };
                readback
            }
            WireState::Selected(device) => {
                self.wire = WireState::Selected(device);
                if let Some(out) = self.read_queue.pop_front() {
                    return byte & out;
                }
                let Some(index) = device else { return byte };
                // Read-scratchpad arms the slave's transmit queue.
                if byte == 0xbe {
                    self.read_queue = self.devices[index].scratchpad.iter().copied().collect();
                    return byte;
                }
                if self.devices[index].rom[0] == 0x1f {
                    self.coupler_command(index, byte);
                }
                byte
            }
            WireState::Search => {
                self.wire = WireState::Search;
                byte
            }
        }
    }

    /// DS2409 control functions of a selected coupler.
    fn coupler_command(&mut self, index: usize, byte: u8) {
        let device = &mut self.devices[index];
        match byte {
            // Smart-on relays a branch reset: presence, then confirmation.
            0xcc => {
                device.latch_main = true;
                device.latch_aux = false;
                self.read_queue = VecDeque::from([0x00, byte]);
            }
            0x33 => {
                device.latch_aux = true;
                device.latch_main = false;
                self.read_queue = VecDeque::from([0x00, byte]);
            }
            0x66 => {
                device.latch_main = false;
                device.latch_aux = false;
                self.read_queue = VecDeque::from([byte]);
            }
            0x99 => {
                self.read_queue = VecDeque::from([byte]);
            }
            0xa5 => {
                device.latch_main = true;
                device.latch_aux = false;
                self.read_queue = VecDeque::from([byte]);
            }
            // Status read/write: control byte echo, then the snapshot.
            0x5a => {
                let status = device.latch_main as u8 | (device.latch_aux as u8) << 1;
                self.read_queue = VecDeque::from([0xff, status]);
            }
            _ => {}
        }
    }

    /// One full search pass from the 16-byte accelerator frame.
    fn run_accelerator(&mut self) -> [u8; 16] {
        fn get(buf: &[u8], n: usize) -> bool {
            buf[n / 8] & (1 << (n % 8)) != 0
        }
        fn set(buf: &mut [u8], n: usize) {
            buf[n / 8] |= 1 << (n % 8);
        }
        let frame = self.accel_frame.clone();
        let mut response = [0u8; 16];
        let mut candidates = self.participants.clone();
        for i in 0..64 {
            let id = candidates.iter().all(|&d| self.devices[d].bit(i));
            let cmp = candidates.iter().all(|&d| !self.devices[d].bit(i));
            if id && cmp {
                // Read slots idle: the chip writes a one and moves on.
                set(&mut response, 2 * i + 1);
                continue;
            }
            let direction = if id != cmp { id } else { get(&frame, 2 * i + 1) };
            if !id && !cmp {
                set(&mut response, 2 * i);
            }
            if direction {
                set(&mut response, 2 * i + 1);
            }
            candidates.retain(|&d| self.devices[d].bit(i) == direction);
        }
        response
    }
}

/// Handle to the simulator, cloneable so tests can inspect the state the
/// driver side owns.
#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    pub fn new(devices: Vec<SimDevice>) -> Self {
        SimBus {
            state: Arc::new(Mutex::new(SimState {
                devices,
                mode: Mode::Command,
                powered: true,
                awaiting_timing: false,
                uart_baud: 9600,
                adapter_baud: 9600,
                params: [0; 8],
                escape_pending: false,
                accel_on: false,
                accel_frame: Vec::new(),
                pulse_primed: None,
                pulse_active: false,
                out: VecDeque::new(),
                wire: WireState::Idle,
                search_alarm_only: false,
                participants: Vec::new(),
                read_queue: VecDeque::new(),
                wire_log: Vec::new(),
                breaks: 0,
                power_cycles: 0,
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn uart_baud(&self) -> u32 {
        self.state().uart_baud
    }

    pub fn breaks(&self) -> usize {
        self.state().breaks
    }

    pub fn pulse_active(&self) -> bool {
        self.state().pulse_active
    }

    pub fn wire_log(&self) -> Vec<u8> {
        self.state().wire_log.clone()
    }

    pub fn clear_wire_log(&self) {
        self.state().wire_log.clear();
    }
}

impl SerialLink for SimBus {
    fn port_name(&self) -> &str {
        "sim0"
    }

    fn write_all(&mut self, bytes: &[u8]) -> OwResult<()> {
        let mut state = self.state();
        for &byte in bytes {
            state.process(byte);
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> OwResult<()> {
        let mut state = self.state();
        for slot in buf.iter_mut() {
            match state.out.pop_front() {
                Some(byte) => *slot = byte,
                None => {
                    return Err(OwError::io(
                        std::io::Error::new(std::io::ErrorKind::TimedOut, "simulator has no reply"),
                        "sim0",
                    ));
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> OwResult<()> {
        Ok(())
    }

    fn purge(&mut self) -> OwResult<()> {
        self.state().out.clear();
        Ok(())
    }

    fn send_break(&mut self) -> OwResult<()> {
        let mut state = self.state();
        state.breaks += 1;
        state.mode = Mode::Command;
        state.awaiting_timing = true;
        state.adapter_baud = 9600;
        state.params = [0; 8];
        state.escape_pending = false;
        state.accel_on = false;
        state.pulse_active = false;
        state.pulse_primed = None;
        state.out.clear();
        Ok(())
    }

    fn set_baud(&mut self, baud: u32) -> OwResult<()> {
        self.state().uart_baud = baud;
        Ok(())
    }

    fn set_dtr_rts(&mut self, asserted: bool) -> OwResult<()> {
        let mut state = self.state();
        if !asserted {
            state.powered = false;
        } else if !state.powered {
            state.powered = true;
            state.power_cycles += 1;
            state.mode = Mode::Command;
            state.awaiting_timing = true;
            state.adapter_baud = 9600;
            state.params = [0; 8];
            state.out.clear();
        }
        Ok(())
    }

    fn delay(&mut self, _duration: Duration) {}
}
