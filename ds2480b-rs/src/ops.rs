use crate::{
    framer::{
        self, BitResponse, Parameter, PulseKind, ResetResponse,
    },
    link::SerialLink,
    packet::{BitArm, PacketBuilder, ReplySlot},
    search as accel,
    state::{AdapterState, DEFAULT_BAUD},
};
use onewire_host::{
    consts::{ONEWIRE_MATCH_ROM_CMD_OD, ONEWIRE_SKIP_ROM_CMD_OD},
    Crc8, OneWireMaster, OwError, OwResult, PowerArming, PowerDeliveryDuration, PowerLevel,
    ProgramPulseDuration, ResetStatus, RomAddress, SearchCursor, SearchKind, Speed,
};
use std::time::Duration;

/// Data-mode transfers are cut into chunks of this many logical bytes.
pub const MAX_BLOCK_CHUNK: usize = 128;

/// Blocks at least this large try to escalate the UART rate first.
const STREAMING_THRESHOLD: usize = 128;

/// Pulse responses carry these high bits.
const PULSE_RESPONSE_MASK: u8 = 0xe0;

/// Driver for one DS2480B-based adapter on one serial port.
///
/// All methods take `&mut self`; shared multi-thread access goes through
/// [`OneWireBus`](crate::OneWireBus), which adds the transaction lock and
/// the transient-failure retry policy around this type.
pub struct Ds2480b<L> {
    link: L,
    state: AdapterState,
    max_streaming_baud: u32,
    detect_retries: u8,
}

impl<L: SerialLink> Ds2480b<L> {
    pub(crate) fn attach(
        link: L,
        max_streaming_baud: u32,
        detect_retries: u8,
    ) -> OwResult<Self> {
        let mut dev = Ds2480b {
            link,
            state: AdapterState::default(),
            max_streaming_baud,
            detect_retries,
        };
        dev.detect()?;
        Ok(dev)
    }

    /// The platform name of the underlying port.
    pub fn port_name(&self) -> &str {
        self.link.port_name()
    }

    /// The reset reply recorded on first contact, for diagnostics.
    pub fn revision(&self) -> Option<u8> {
        self.state.revision.map(|raw| ResetResponse::from(raw).revision())
    }

    /// Current UART rate.
    pub fn baud(&self) -> u32 {
        self.state.baud
    }

    /// Consumes the driver, releasing the port.
    pub fn into_link(self) -> L {
        self.link
    }

    // ---- detection and recovery ----

    /// Brings the adapter to a known state and proves it is there.
    ///
    /// Two master-reset attempts; a third failure escalates to a power
    /// reset over DTR/RTS before the final try.
    pub fn detect(&mut self) -> OwResult<()> {
        let attempts = self.detect_retries.max(1);
        for attempt in 0..=attempts {
            if attempt == attempts {
                self.power_reset()?;
            }
            match self.master_reset().and_then(|()| self.verify()) {
                Ok(()) => {
                    self.state.needs_verify = false;
                    return Ok(());
                }
                Err(e) => log::warn!(
                    "adapter detect attempt {}/{} on {} failed: {e}",
                    attempt + 1,
                    attempts + 1,
                    self.link.port_name()
                ),
            }
        }
        Err(OwError::AdapterLost {
            port: self.link.port_name().to_string(),
        })
    }

    /// Serial-line break plus the timing byte, leaving the adapter in
    /// command mode at 9600 baud and regular speed. No reply is expected.
    fn master_reset(&mut self) -> OwResult<()> {
        self.state.after_master_reset();
        self.link.set_baud(DEFAULT_BAUD)?;
        self.link.send_break()?;
        self.link.delay(Duration::from_millis(2));
        self.link.purge()?;
        self.link
            .write_all(&[framer::reset_command(Speed::Regular)])?;
        self.link.flush()?;
        self.link.delay(Duration::from_millis(4));
        self.link.purge()?;
        Ok(())
    }

    /// Power-cycles the adapter by dropping DTR and RTS.
    fn power_reset(&mut self) -> OwResult<()> {
        log::warn!("power-resetting adapter on {}", self.link.port_name());
        self.link.set_dtr_rts(false)?;
        self.link.delay(Duration::from_millis(300));
        self.link.set_dtr_rts(true)?;
        self.link.delay(Duration::from_millis(10));
        Ok(())
    }

    /// Proves the adapter answers: writes the regular-speed waveform
    /// parameters and an infinite strong-pullup duration, reads the baud
    /// parameter back, and runs one bit that must read as 1.
    fn verify(&mut self) -> OwResult<()> {
        let params = self.state.params_for(Speed::Regular);
        let mut packet = PacketBuilder::new(self.state.mode);
        let writes = [
            (
                packet.config_write(Parameter::PulldownSlew, params.slew as u8),
                framer::config_write(Parameter::PulldownSlew, params.slew as u8),
            ),
            (
                packet.config_write(Parameter::Write1LowTime, params.write1_low as u8),
                framer::config_write(Parameter::Write1LowTime, params.write1_low as u8),
            ),
            (
                packet.config_write(Parameter::SampleOffset, params.sample_offset as u8),
                framer::config_write(Parameter::SampleOffset, params.sample_offset as u8),
            ),
            (
                packet.config_write(
                    Parameter::PowerDeliveryTime,
                    framer::power_delivery_code(PowerDeliveryDuration::Infinite),
                ),
                framer::config_write(
                    Parameter::PowerDeliveryTime,
                    framer::power_delivery_code(PowerDeliveryDuration::Infinite),
                ),
            ),
        ];
        let baud_slot = packet.config_read(Parameter::Baud);
        let bit_cmd = framer::bit_command(true, Speed::Regular, false);
        let bit_slot = packet.bit(true, Speed::Regular, BitArm::None);
        let reply = self.transfer(packet)?;
        for (slot, cmd) in writes {
            expect_echo(&reply, slot, framer::config_reply(cmd), "verify parameter write")?;
        }
        let code = framer::baud_code(self.state.baud).ok_or_else(|| {
            OwError::InvalidArgument(format!("unrepresentable baud {}", self.state.baud))
        })?;
        expect_echo(
            &reply,
            baud_slot,
            framer::config_read_reply(Parameter::Baud, code),
            "verify baud read",
        )?;
        let bit = BitResponse::from(bit_slot.byte(&reply));
        if !bit.matches(bit_cmd) || !bit.bit() {
            return Err(OwError::ProtocolEcho {
                expected: bit_cmd | 0x03,
                got: bit_slot.byte(&reply),
                context: "verify bit",
            });
        }
        Ok(())
    }

    fn ensure_ready(&mut self) -> OwResult<()> {
        if self.state.needs_verify {
            log::debug!("re-verifying adapter on {}", self.link.port_name());
            self.detect()?;
        }
        Ok(())
    }

    /// One write burst and the matching sized read. A failed round trip
    /// flags the adapter for re-verification.
    fn transfer(&mut self, packet: PacketBuilder) -> OwResult<Vec<u8>> {
        let (tx, expected, records, mode) = packet.finish();
        self.state.mode = mode;
        if tx.is_empty() {
            return Ok(Vec::new());
        }
        log::trace!(
            "burst: {} primitives, {} tx bytes, {} reply bytes",
            records.len(),
            tx.len(),
            expected
        );
        let outcome = self.round_trip(&tx, expected);
        if outcome.is_err() {
            self.state.needs_verify = true;
        }
        outcome
    }

    fn round_trip(&mut self, tx: &[u8], expected: usize) -> OwResult<Vec<u8>> {
        self.link.write_all(tx)?;
        self.link.flush()?;
        let mut reply = vec![0u8; expected];
        self.link.read_exact(&mut reply)?;
        Ok(reply)
    }

    // ---- primitives ----

    /// Issues a 1-Wire reset at the current speed, clearing any armed
    /// power state first.
    pub fn reset(&mut self) -> OwResult<ResetStatus> {
        self.ensure_ready()?;
        if self.state.power != PowerLevel::Normal
            || self.state.arm_on_next_bit
            || self.state.arm_on_next_byte
        {
            self.set_power_normal()?;
        }
        let mut packet = PacketBuilder::new(self.state.mode);
        let slot = packet.reset(self.state.speed);
        let reply = self.transfer(packet)?;
        let raw = slot.byte(&reply);
        let response = ResetResponse::from(raw);
        if !response.well_formed() {
            self.state.needs_verify = true;
            return Err(OwError::ProtocolEcho {
                expected: 0xc0,
                got: raw,
                context: "reset",
            });
        }
        if self.state.revision.is_none() {
            self.state.revision = Some(raw);
            self.state.program_voltage = response.program_voltage();
            log::debug!(
                "adapter revision {:#04x}, 12V supply {}",
                response.revision(),
                if response.program_voltage() { "present" } else { "absent" }
            );
        }
        Ok(response.status())
    }

    fn consume_bit_arm(&mut self) -> BitArm {
        if !self.state.arm_on_next_bit {
            return BitArm::None;
        }
        if self.state.armed_level == PowerLevel::StrongPullup {
            BitArm::Strong5V
        } else {
            BitArm::Primed
        }
    }

    fn touch_bit(&mut self, bit: bool) -> OwResult<bool> {
        self.ensure_ready()?;
        let arm = self.consume_bit_arm();
        let cmd = framer::bit_command(bit, self.state.speed, arm == BitArm::Strong5V);
        let mut packet = PacketBuilder::new(self.state.mode);
        let slot = packet.bit(bit, self.state.speed, arm);
        let reply = self.transfer(packet)?;
        let response = BitResponse::from(slot.byte(&reply));
        if !response.matches(cmd) {
            self.state.needs_verify = true;
            return Err(OwError::ProtocolEcho {
                expected: cmd,
                got: slot.byte(&reply),
                context: "bit",
            });
        }
        if arm != BitArm::None {
            let pulse = reply[slot.offset + 1];
            if pulse & PULSE_RESPONSE_MASK != PULSE_RESPONSE_MASK {
                self.state.needs_verify = true;
                return Err(OwError::ProtocolEcho {
                    expected: PULSE_RESPONSE_MASK,
                    got: pulse,
                    context: "armed pulse",
                });
            }
            self.state.arm_on_next_bit = false;
            self.state.power = self.state.armed_level;
            self.state.armed_level = PowerLevel::Normal;
        }
        Ok(response.bit())
    }

    /// Writes one bit; an armed power transition fires with it.
    pub fn put_bit(&mut self, bit: bool) -> OwResult<()> {
        let readback = self.touch_bit(bit)?;
        if readback != bit {
            return Err(OwError::ProtocolEcho {
                expected: bit as u8,
                got: readback as u8,
                context: "bit write readback",
            });
        }
        Ok(())
    }

    /// Reads one bit; an armed power transition fires with it.
    pub fn get_bit(&mut self) -> OwResult<bool> {
        self.touch_bit(true)
    }

    /// Sends one byte as eight bit commands, the armed transition firing
    /// with the last; returns the assembled read-back.
    fn touch_byte_bitwise(&mut self, byte: u8) -> OwResult<u8> {
        self.ensure_ready()?;
        let level = self.state.armed_level;
        let mut packet = PacketBuilder::new(self.state.mode);
        let mut slots: Vec<(ReplySlot, u8)> = Vec::with_capacity(8);
        for i in 0..8 {
            let bit = byte >> i & 1 != 0;
            let arm = if i < 7 {
                BitArm::None
            } else if level == PowerLevel::StrongPullup {
                BitArm::Strong5V
            } else {
                BitArm::Primed
            };
            let cmd = framer::bit_command(bit, self.state.speed, arm == BitArm::Strong5V);
            slots.push((packet.bit(bit, self.state.speed, arm), cmd));
        }
        let reply = self.transfer(packet)?;
        let mut readback = 0u8;
        for (i, (slot, cmd)) in slots.iter().enumerate() {
            let response = BitResponse::from(slot.byte(&reply));
            if !response.matches(*cmd) {
                self.state.needs_verify = true;
                return Err(OwError::ProtocolEcho {
                    expected: *cmd,
                    got: slot.byte(&reply),
                    context: "byte-wise bit",
                });
            }
            readback |= (response.bit() as u8) << i;
        }
        let (last, _) = slots[7];
        let pulse = reply[last.offset + 1];
        if pulse & PULSE_RESPONSE_MASK != PULSE_RESPONSE_MASK {
            self.state.needs_verify = true;
            return Err(OwError::ProtocolEcho {
                expected: PULSE_RESPONSE_MASK,
                got: pulse,
                context: "armed pulse",
            });
        }
        self.state.arm_on_next_byte = false;
        self.state.power = level;
        self.state.armed_level = PowerLevel::Normal;
        Ok(readback)
    }

    /// Writes one byte; an armed power transition fires on its boundary.
    pub fn put_byte(&mut self, byte: u8) -> OwResult<()> {
        if self.state.arm_on_next_byte {
            let readback = self.touch_byte_bitwise(byte)?;
            if readback != byte {
                return Err(OwError::ProtocolEcho {
                    expected: byte,
                    got: readback,
                    context: "byte write readback",
                });
            }
            return Ok(());
        }
        self.ensure_ready()?;
        let mut packet = PacketBuilder::new(self.state.mode);
        let slot = packet.data(&[byte]);
        let reply = self.transfer(packet)?;
        let echo = slot.byte(&reply);
        if echo != byte {
            return Err(OwError::ProtocolEcho {
                expected: byte,
                got: echo,
                context: "byte write readback",
            });
        }
        Ok(())
    }

    /// Reads one byte; an armed power transition fires on its boundary.
    pub fn get_byte(&mut self) -> OwResult<u8> {
        if self.state.arm_on_next_byte {
            return self.touch_byte_bitwise(0xff);
        }
        self.ensure_ready()?;
        let mut packet = PacketBuilder::new(self.state.mode);
        let slot = packet.data(&[0xff]);
        let reply = self.transfer(packet)?;
        Ok(slot.byte(&reply))
    }

    /// Bidirectional transfer of the whole buffer, split into chunks of
    /// [`MAX_BLOCK_CHUNK`]. Large blocks first try to raise the UART rate.
    pub fn block(&mut self, buf: &mut [u8]) -> OwResult<()> {
        self.ensure_ready()?;
        if buf.len() >= STREAMING_THRESHOLD && self.max_streaming_baud > self.state.baud {
            if let Err(e) = self.change_baud(self.max_streaming_baud) {
                log::warn!("streaming baud escalation failed, staying at {}: {e}", self.state.baud);
                self.ensure_ready()?;
            }
        }
        for chunk in buf.chunks_mut(MAX_BLOCK_CHUNK) {
            let mut packet = PacketBuilder::new(self.state.mode);
            let slot = packet.data(chunk);
            let reply = self.transfer(packet)?;
            chunk.copy_from_slice(slot.slice(&reply));
        }
        Ok(())
    }

    // ---- speed and baud ----

    /// Changes the UART rate on both ends, verifying by reading the baud
    /// parameter back and reverting to 9600 when that fails.
    pub fn change_baud(&mut self, target: u32) -> OwResult<()> {
        if target == self.state.baud {
            return Ok(());
        }
        let code = framer::baud_code(target)
            .ok_or_else(|| OwError::InvalidArgument(format!("unsupported baud {target}")))?;
        let mut packet = PacketBuilder::new(self.state.mode);
        packet.config_write(Parameter::Baud, code);
        let (tx, _, _, mode) = packet.finish();
        self.state.mode = mode;
        self.link.write_all(&tx)?;
        self.link.flush()?;
        self.link.delay(Duration::from_millis(5));
        self.link.set_baud(target)?;
        self.state.baud = target;
        self.link.delay(Duration::from_millis(5));
        // The echo of the set command arrived at an indeterminate rate.
        self.link.purge()?;

        let mut packet = PacketBuilder::new(self.state.mode);
        let slot = packet.config_read(Parameter::Baud);
        let expected = framer::config_read_reply(Parameter::Baud, code);
        let verdict = self.transfer(packet).map(|reply| slot.byte(&reply));
        match verdict {
            Ok(got) if got == expected => {
                log::debug!("uart now at {target} baud");
                Ok(())
            }
            other => {
                log::warn!("baud readback after change to {target} failed, reverting to {DEFAULT_BAUD}");
                self.link.set_baud(DEFAULT_BAUD)?;
                self.state.baud = DEFAULT_BAUD;
                self.state.needs_verify = true;
                match other {
                    Ok(got) => Err(OwError::ProtocolEcho {
                        expected,
                        got,
                        context: "baud change",
                    }),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Changes the speed class, writing that class's waveform parameters.
    pub fn set_speed(&mut self, speed: Speed) -> OwResult<()> {
        self.ensure_ready()?;
        if speed == self.state.speed {
            return Ok(());
        }
        let params = self.state.params_for(speed);
        let mut packet = PacketBuilder::new(self.state.mode);
        let writes = [
            (
                packet.config_write(Parameter::PulldownSlew, params.slew as u8),
                framer::config_write(Parameter::PulldownSlew, params.slew as u8),
            ),
            (
                packet.config_write(Parameter::Write1LowTime, params.write1_low as u8),
                framer::config_write(Parameter::Write1LowTime, params.write1_low as u8),
            ),
            (
                packet.config_write(Parameter::SampleOffset, params.sample_offset as u8),
                framer::config_write(Parameter::SampleOffset, params.sample_offset as u8),
            ),
        ];
        let reply = self.transfer(packet)?;
        for (slot, cmd) in writes {
            expect_echo(&reply, slot, framer::config_reply(cmd), "speed parameter write")?;
        }
        self.state.speed = speed;
        Ok(())
    }

    /// Moves the bus (and adapter) into or out of overdrive.
    ///
    /// Engaging sends the overdrive-skip command at the current speed so
    /// every overdrive-capable slave follows, then switches the adapter
    /// timing; `rom` narrows the transition to one slave via
    /// overdrive-match.
    pub fn set_overdrive_mode(&mut self, enable: bool, rom: Option<RomAddress>) -> OwResult<()> {
        if enable == (self.state.speed == Speed::Overdrive) {
            return Ok(());
        }
        if enable {
            match self.reset()? {
                ResetStatus::Short => return Err(OwError::BusShort),
                ResetStatus::NoPresence => return Err(OwError::NoPresence { rom }),
                _ => {}
            }
            match rom {
                None => self.put_byte(ONEWIRE_SKIP_ROM_CMD_OD)?,
                Some(r) => {
                    self.put_byte(ONEWIRE_MATCH_ROM_CMD_OD)?;
                    self.set_speed(Speed::Overdrive)?;
                    for &b in r.bytes() {
                        self.put_byte(b)?;
                    }
                    return Ok(());
                }
            }
            self.set_speed(Speed::Overdrive)
        } else {
            self.set_speed(Speed::Regular)?;
            // A regular-speed reset returns every slave to standard speed.
            self.reset().map(|_| ())
        }
    }

    // ---- power ----

    /// Drive currently applied to the line.
    pub fn power_level(&self) -> PowerLevel {
        self.state.power
    }

    /// Programs the duration of subsequent strong pullups.
    pub fn set_power_duration(&mut self, duration: PowerDeliveryDuration) -> OwResult<()> {
        self.ensure_ready()?;
        let code = framer::power_delivery_code(duration);
        let mut packet = PacketBuilder::new(self.state.mode);
        let slot = packet.config_write(Parameter::PowerDeliveryTime, code);
        let cmd = framer::config_write(Parameter::PowerDeliveryTime, code);
        let reply = self.transfer(packet)?;
        expect_echo(&reply, slot, framer::config_reply(cmd), "power duration")?;
        self.state.power_duration = duration;
        Ok(())
    }

    /// Starts the strong pullup now, or arms it on the next primitive.
    pub fn start_power_delivery(&mut self, arming: PowerArming) -> OwResult<()> {
        match arming {
            PowerArming::Now => {
                self.ensure_ready()?;
                let mut packet = PacketBuilder::new(self.state.mode);
                let slot = packet.pulse(PulseKind::Strong5V, false);
                let reply = self.transfer(packet)?;
                let got = slot.byte(&reply);
                if got & PULSE_RESPONSE_MASK != PULSE_RESPONSE_MASK {
                    self.state.needs_verify = true;
                    return Err(OwError::ProtocolEcho {
                        expected: PULSE_RESPONSE_MASK,
                        got,
                        context: "start pulse",
                    });
                }
                self.state.power = PowerLevel::StrongPullup;
            }
            PowerArming::AfterNextBit => {
                self.state.arm_on_next_bit = true;
                self.state.armed_level = PowerLevel::StrongPullup;
            }
            PowerArming::AfterNextByte => {
                self.state.arm_on_next_byte = true;
                self.state.armed_level = PowerLevel::StrongPullup;
            }
        }
        Ok(())
    }

    /// Programs the duration of subsequent 12V program pulses.
    pub fn set_program_pulse_duration(&mut self, duration: ProgramPulseDuration) -> OwResult<()> {
        if !self.can_program() {
            return Err(OwError::NotSupported("12V program pulse"));
        }
        self.ensure_ready()?;
        let code = framer::program_pulse_code(duration);
        let mut packet = PacketBuilder::new(self.state.mode);
        let slot = packet.config_write(Parameter::ProgramPulseTime, code);
        let cmd = framer::config_write(Parameter::ProgramPulseTime, code);
        let reply = self.transfer(packet)?;
        expect_echo(&reply, slot, framer::config_reply(cmd), "program pulse duration")?;
        self.state.program_pulse_duration = duration;
        Ok(())
    }

    /// Fires a 12V program pulse now, or arms it on the next primitive.
    pub fn start_program_pulse(&mut self, arming: PowerArming) -> OwResult<()> {
        if !self.can_program() {
            return Err(OwError::NotSupported("12V program pulse"));
        }
        match arming {
            PowerArming::Now => {
                self.ensure_ready()?;
                let mut packet = PacketBuilder::new(self.state.mode);
                let slot = packet.pulse(PulseKind::Program12V, false);
                let reply = self.transfer(packet)?;
                let got = slot.byte(&reply);
                if got & PULSE_RESPONSE_MASK != PULSE_RESPONSE_MASK {
                    self.state.needs_verify = true;
                    return Err(OwError::ProtocolEcho {
                        expected: PULSE_RESPONSE_MASK,
                        got,
                        context: "program pulse",
                    });
                }
                if self.state.program_pulse_duration == ProgramPulseDuration::Infinite {
                    self.state.power = PowerLevel::ProgramPulse;
                }
            }
            PowerArming::AfterNextBit => {
                self.ensure_ready()?;
                let mut packet = PacketBuilder::new(self.state.mode);
                packet.pulse(PulseKind::Program12V, true);
                self.transfer(packet)?;
                self.state.arm_on_next_bit = true;
                self.state.armed_level = PowerLevel::ProgramPulse;
            }
            PowerArming::AfterNextByte => {
                self.ensure_ready()?;
                let mut packet = PacketBuilder::new(self.state.mode);
                packet.pulse(PulseKind::Program12V, true);
                self.transfer(packet)?;
                self.state.arm_on_next_byte = true;
                self.state.armed_level = PowerLevel::ProgramPulse;
            }
        }
        Ok(())
    }

    /// Forces the line to 0V by dropping DTR and RTS.
    pub fn start_break(&mut self) -> OwResult<()> {
        self.link.set_dtr_rts(false)?;
        self.link.delay(Duration::from_millis(200));
        self.state.power = PowerLevel::Break;
        Ok(())
    }

    /// Returns the line to the normal idle level.
    ///
    /// Leaving a strong pullup needs a stop pulse on each side of a fresh
    /// start pulse; the final echo proves the adapter followed. Leaving a
    /// break re-powers the adapter and re-runs detection.
    pub fn set_power_normal(&mut self) -> OwResult<()> {
        self.state.arm_on_next_bit = false;
        self.state.arm_on_next_byte = false;
        self.state.armed_level = PowerLevel::Normal;
        match self.state.power {
            PowerLevel::Normal => Ok(()),
            PowerLevel::StrongPullup => {
                let mut packet = PacketBuilder::new(self.state.mode);
                let first = packet.stop_pulse();
                let start = packet.pulse(PulseKind::Strong5V, false);
                let last = packet.stop_pulse();
                let reply = self.transfer(packet)?;
                for slot in [first, start, last] {
                    let got = slot.byte(&reply);
                    if got & PULSE_RESPONSE_MASK != PULSE_RESPONSE_MASK {
                        self.state.needs_verify = true;
                        return Err(OwError::ProtocolEcho {
                            expected: PULSE_RESPONSE_MASK,
                            got,
                            context: "stop pulse",
                        });
                    }
                }
                expect_echo(&reply, last, framer::MODE_STOP_PULSE, "stop pulse")?;
                self.state.power = PowerLevel::Normal;
                Ok(())
            }
            PowerLevel::ProgramPulse => {
                let mut packet = PacketBuilder::new(self.state.mode);
                let slot = packet.stop_pulse();
                let reply = self.transfer(packet)?;
                expect_echo(&reply, slot, framer::MODE_STOP_PULSE, "stop pulse")?;
                self.state.power = PowerLevel::Normal;
                Ok(())
            }
            PowerLevel::Break => {
                self.link.set_dtr_rts(true)?;
                self.link.delay(Duration::from_millis(300));
                self.state.power = PowerLevel::Normal;
                self.detect()
            }
        }
    }

    // ---- enumeration ----

    /// Restarts enumeration and returns the first admitted slave.
    pub fn search_first(&mut self) -> OwResult<Option<RomAddress>> {
        self.state.cursor.reset();
        self.search_next()
    }

    /// Returns the next admitted slave, or `None` when the bus is
    /// exhausted (after which the enumeration restarts).
    pub fn search_next(&mut self) -> OwResult<Option<RomAddress>> {
        self.ensure_ready()?;
        let kind = if self.state.only_alarming {
            SearchKind::Alarmed
        } else {
            SearchKind::Normal
        };
        if self.state.cursor == SearchCursor::default() {
            if let Some(family) = self.state.filter.single_target() {
                self.state.cursor.seed_family(family);
            }
        }
        loop {
            if self.state.cursor.done {
                self.state.cursor.reset();
                return Ok(None);
            }
            let Some(rom) = self.search_pass(kind)? else {
                return Ok(None);
            };
            if self.state.filter.admits(rom.family()) {
                return Ok(Some(rom));
            }
            if self.state.cursor.done {
                self.state.cursor.reset();
                return Ok(None);
            }
        }
    }

    /// The slave found by the most recent search pass.
    pub fn address(&self) -> Option<RomAddress> {
        RomAddress::from_bytes(self.state.cursor.last_rom).ok()
    }

    /// One accelerator pass from the current cursor.
    fn search_pass(&mut self, kind: SearchKind) -> OwResult<Option<RomAddress>> {
        if !self.state.skip_reset_on_search {
            match self.reset()? {
                ResetStatus::Short => return Err(OwError::BusShort),
                ResetStatus::NoPresence => {
                    self.state.cursor.reset();
                    return Ok(None);
                }
                ResetStatus::Presence | ResetStatus::Alarm => {}
            }
        }
        let frame = accel::pack_frame(&self.state.cursor);
        let mut packet = PacketBuilder::new(self.state.mode);
        let (echo, result) = packet.search(kind.command(), self.state.speed, &frame);
        let reply = self.transfer(packet)?;
        expect_echo(&reply, echo, kind.command(), "search command echo")?;
        let mut returned = [0u8; 16];
        returned.copy_from_slice(result.slice(&reply));
        let out = accel::interpret_frame(&returned);
        if out.rom[0] == 0 {
            self.state.cursor.reset();
            return Ok(None);
        }
        if !Crc8::validate(&out.rom) {
            log::warn!("search pass produced a rom with bad crc, treating as no device");
            self.state.cursor.reset();
            return Ok(None);
        }
        self.state.cursor.record(&out.rom, out.last_zero);
        if out.family_zero != 0 {
            self.state.cursor.last_family_discrepancy = out.family_zero;
        }
        RomAddress::from_bytes(out.rom).map(Some)
    }

    /// Non-disturbing presence check that leaves the enumeration cursor
    /// untouched.
    pub fn is_present(&mut self, rom: RomAddress) -> OwResult<bool> {
        self.device_check(rom, SearchKind::Normal)
    }

    /// Non-disturbing check that the slave is there and alarming.
    pub fn is_alarming(&mut self, rom: RomAddress) -> OwResult<bool> {
        self.device_check(rom, SearchKind::Alarmed)
    }

    fn device_check(&mut self, rom: RomAddress, kind: SearchKind) -> OwResult<bool> {
        self.ensure_ready()?;
        if self.state.speed == Speed::Overdrive {
            return self.strong_access(rom, kind);
        }
        let saved = self.state.cursor.clone();
        self.state.cursor.seed_rom(rom);
        let found = self.search_pass(kind);
        self.state.cursor = saved;
        Ok(found? == Some(rom))
    }

    /// Directed 24-byte search pattern: the slave only participates while
    /// the written bits match its ROM, so eight clean triplets at the tail
    /// prove it is there without touching anyone's search state.
    fn strong_access(&mut self, rom: RomAddress, kind: SearchKind) -> OwResult<bool> {
        match self.reset()? {
            ResetStatus::Short => return Err(OwError::BusShort),
            ResetStatus::NoPresence => return Ok(false),
            ResetStatus::Presence | ResetStatus::Alarm => {}
        }
        self.put_byte(kind.command())?;
        let mut pattern = accel::strong_access_frame(&rom);
        for chunk in pattern.chunks_mut(MAX_BLOCK_CHUNK) {
            let mut packet = PacketBuilder::new(self.state.mode);
            let slot = packet.data(chunk);
            let reply = self.transfer(packet)?;
            chunk.copy_from_slice(slot.slice(&reply));
        }
        Ok(accel::strong_access_present(&rom, &pattern))
    }

    // ---- search modifiers ----

    /// Restricts enumeration to `family` (additive).
    pub fn target_family(&mut self, family: u8) {
        self.state.filter.target_family(family);
    }

    /// Skips every slave of `family` during enumeration.
    pub fn exclude_family(&mut self, family: u8) {
        self.state.filter.exclude_family(family);
    }

    /// Clears the family filters.
    pub fn target_all(&mut self) {
        self.state.filter.target_all();
    }

    /// Enumerate only slaves in alarm state.
    pub fn set_search_only_alarming(&mut self, only: bool) {
        self.state.only_alarming = only;
    }

    /// Enumerate every slave again (clears the alarm restriction).
    pub fn set_search_all(&mut self) {
        self.state.only_alarming = false;
    }

    /// Skip the leading bus reset of each search pass.
    pub fn set_no_reset_search(&mut self, skip: bool) {
        self.state.skip_reset_on_search = skip;
    }
}

fn expect_echo(reply: &[u8], slot: ReplySlot, expected: u8, context: &'static str) -> OwResult<()> {
    let got = slot.byte(reply);
    if got != expected {
        return Err(OwError::ProtocolEcho {
            expected,
            got,
            context,
        });
    }
    Ok(())
}

impl<L: SerialLink> OneWireMaster for Ds2480b<L> {
    fn reset(&mut self) -> OwResult<ResetStatus> {
        Ds2480b::reset(self)
    }

    fn write_bit(&mut self, bit: bool) -> OwResult<()> {
        // No echo check: during a search, slaves legitimately pull a
        // written 1 low.
        self.touch_bit(bit).map(|_| ())
    }

    fn read_bit(&mut self) -> OwResult<bool> {
        self.get_bit()
    }

    fn write_byte(&mut self, byte: u8) -> OwResult<()> {
        self.put_byte(byte)
    }

    fn read_byte(&mut self) -> OwResult<u8> {
        self.get_byte()
    }

    fn block(&mut self, buf: &mut [u8]) -> OwResult<()> {
        Ds2480b::block(self, buf)
    }

    fn speed(&self) -> Speed {
        self.state.speed
    }

    fn set_speed(&mut self, speed: Speed) -> OwResult<()> {
        Ds2480b::set_speed(self, speed)
    }

    fn power_level(&self) -> PowerLevel {
        Ds2480b::power_level(self)
    }

    fn set_power_duration(&mut self, duration: PowerDeliveryDuration) -> OwResult<()> {
        Ds2480b::set_power_duration(self, duration)
    }

    fn start_power_delivery(&mut self, arming: PowerArming) -> OwResult<()> {
        Ds2480b::start_power_delivery(self, arming)
    }

    fn set_program_pulse_duration(&mut self, duration: ProgramPulseDuration) -> OwResult<()> {
        Ds2480b::set_program_pulse_duration(self, duration)
    }

    fn start_program_pulse(&mut self, arming: PowerArming) -> OwResult<()> {
        Ds2480b::start_program_pulse(self, arming)
    }

    fn start_break(&mut self) -> OwResult<()> {
        Ds2480b::start_break(self)
    }

    fn set_power_normal(&mut self) -> OwResult<()> {
        Ds2480b::set_power_normal(self)
    }

    fn can_overdrive(&self) -> bool {
        true
    }

    fn can_flex(&self) -> bool {
        true
    }

    fn can_program(&self) -> bool {
        self.state.program_voltage
    }

    fn can_deliver_power(&self) -> bool {
        true
    }

    fn can_break(&self) -> bool {
        true
    }
}
