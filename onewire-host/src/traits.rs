use crate::{
    consts::{
        ONEWIRE_MATCH_ROM_CMD, ONEWIRE_MATCH_ROM_CMD_OD, ONEWIRE_READ_ROM_CMD,
        ONEWIRE_SKIP_ROM_CMD, ONEWIRE_SKIP_ROM_CMD_OD,
    },
    error::{OwError, OwResult},
    rom::RomAddress,
};

/// Outcome of a 1-Wire reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStatus {
    /// No slave answered with a presence pulse.
    NoPresence,
    /// At least one slave answered.
    Presence,
    /// At least one slave answered and is in alarm state.
    Alarm,
    /// The data line is shorted to ground.
    Short,
}

impl ResetStatus {
    /// True if any slave acknowledged the reset.
    pub fn presence(self) -> bool {
        matches!(self, ResetStatus::Presence | ResetStatus::Alarm)
    }
}

/// 1-Wire signalling speed class.
///
/// `Regular` is the initial value after any adapter reset. `Flex` keeps
/// regular timing with tunable slew for long or noisy lines; `Overdrive` is
/// the ~10x mode slaves must be commanded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Speed {
    /// Standard timing.
    #[default]
    Regular,
    /// Standard timing with adjustable waveforms.
    Flex,
    /// Accelerated timing for overdrive-capable slaves.
    Overdrive,
}

/// Current drive applied to the 1-Wire line by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerLevel {
    /// Idle: weak pullup only.
    #[default]
    Normal,
    /// Active high drive powering a slave through an internal operation.
    StrongPullup,
    /// Full 0V condition force-resetting parasite-powered slaves.
    Break,
    /// 12V programming pulse for EPROM slaves.
    ProgramPulse,
}

/// When an armed power transition takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerArming {
    /// Immediately.
    Now,
    /// Together with the next bit primitive.
    AfterNextBit,
    /// Together with the next byte primitive.
    AfterNextByte,
}

/// Strong-pullup durations the line driver can time on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerDeliveryDuration {
    /// 16.4 ms
    Ms16,
    /// 65.5 ms
    Ms65,
    /// 131 ms
    Ms131,
    /// 262 ms
    Ms262,
    /// 524 ms
    Ms524,
    /// 1.05 s
    Ms1048,
    /// Until explicitly returned to normal.
    #[default]
    Infinite,
}

/// 12V program-pulse durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramPulseDuration {
    /// 32 us
    Us32,
    /// 64 us
    Us64,
    /// 128 us
    Us128,
    /// 256 us
    Us256,
    /// 512 us
    Us512,
    /// 1024 us
    Us1024,
    /// 2048 us
    Us2048,
    /// Until explicitly returned to normal.
    Infinite,
}

/// Trait for a host-side 1-Wire bus master.
///
/// This trait defines the primitive operations device layers build their
/// transactions from: resetting the bus, bit and byte transfers, block
/// transfers, slave selection, and the speed/power surface. Adapters without
/// a given power capability keep the `NotSupported` defaults.
pub trait OneWireMaster {
    /// Resets the 1-Wire bus and reports what answered.
    ///
    /// # Errors
    /// Fails with [`OwError::Io`] when the adapter produces no reply within
    /// the timeout.
    fn reset(&mut self) -> OwResult<ResetStatus>;

    /// Write a single bit to the slave addressed via [`OneWireMaster::select`].
    ///
    /// If a power transition is armed on the next bit, this bit triggers it.
    fn write_bit(&mut self, bit: bool) -> OwResult<()>;

    /// Reads a single bit from the addressed slave.
    fn read_bit(&mut self) -> OwResult<bool>;

    /// Writes a byte to the addressed slave.
    ///
    /// If a power transition is armed on the next byte, this byte triggers it.
    fn write_byte(&mut self, byte: u8) -> OwResult<()>;

    /// Reads a byte from the addressed slave.
    ///
    /// # Note
    /// With multiple slaves on the bus and none selected, the read returns
    /// garbage data.
    fn read_byte(&mut self) -> OwResult<u8>;

    /// Bidirectional transfer: every byte of `buf` is sent, and each
    /// position is overwritten with the concurrent slave read-back.
    fn block(&mut self, buf: &mut [u8]) -> OwResult<()>;

    /// Generates two read time slots and one write time slot, the search
    /// primitive of the ROM search algorithm. The write slot sends
    /// `direction` when both read slots return 0, otherwise the bit value
    /// implied by the read slots.
    ///
    /// Returns `(id_bit, complement_bit, direction_taken)`.
    ///
    /// Adapters without a native triplet primitive keep the default; the
    /// search engine falls back to two bit reads and a bit write.
    fn read_triplet(&mut self, direction: bool) -> OwResult<(bool, bool, bool)> {
        let _ = direction;
        Err(OwError::NotSupported("triplet read"))
    }

    /// The current signalling speed class.
    fn speed(&self) -> Speed;

    /// Changes the signalling speed class.
    fn set_speed(&mut self, speed: Speed) -> OwResult<()>;

    /// Addresses one slave: issues a reset and, when a presence pulse is
    /// seen, a (overdrive-)match-ROM command with the address bytes.
    ///
    /// Returns whether presence was observed.
    fn select(&mut self, rom: RomAddress) -> OwResult<bool> {
        let cmd = if self.speed() == Speed::Overdrive {
            ONEWIRE_MATCH_ROM_CMD_OD
        } else {
            ONEWIRE_MATCH_ROM_CMD
        };
        match self.reset()? {
            ResetStatus::Short => Err(OwError::BusShort),
            ResetStatus::NoPresence => Ok(false),
            ResetStatus::Presence | ResetStatus::Alarm => {
                self.write_byte(cmd)?;
                for &b in rom.bytes() {
                    self.write_byte(b)?;
                }
                Ok(true)
            }
        }
    }

    /// Like [`OneWireMaster::select`], but requires the slave to be there.
    fn assert_select(&mut self, rom: RomAddress) -> OwResult<()> {
        if self.select(rom)? {
            Ok(())
        } else {
            Err(OwError::NoPresence { rom: Some(rom) })
        }
    }

    /// Addresses every slave at once via (overdrive-)skip-ROM.
    fn select_all(&mut self) -> OwResult<()> {
        let cmd = if self.speed() == Speed::Overdrive {
            ONEWIRE_SKIP_ROM_CMD_OD
        } else {
            ONEWIRE_SKIP_ROM_CMD
        };
        match self.reset()? {
            ResetStatus::Short => Err(OwError::BusShort),
            ResetStatus::NoPresence => Err(OwError::NoPresence { rom: None }),
            _ => self.write_byte(cmd),
        }
    }

    /// Reads the ROM of the only slave on a single-drop bus.
    ///
    /// # Errors
    /// Fails with [`OwError::Crc`] when more than one slave answers and the
    /// wired-AND of their replies corrupts the address.
    fn read_rom(&mut self) -> OwResult<RomAddress> {
        match self.reset()? {
            ResetStatus::Short => return Err(OwError::BusShort),
            ResetStatus::NoPresence => return Err(OwError::NoPresence { rom: None }),
            _ => {}
        }
        self.write_byte(ONEWIRE_READ_ROM_CMD)?;
        let mut bytes = [0u8; 8];
        for byte in bytes.iter_mut() {
            *byte = self.read_byte()?;
        }
        RomAddress::from_bytes(bytes)
    }

    /// The drive currently applied to the line.
    fn power_level(&self) -> PowerLevel {
        PowerLevel::Normal
    }

    /// Sets how long a strong pullup lasts once delivered.
    fn set_power_duration(&mut self, duration: PowerDeliveryDuration) -> OwResult<()> {
        let _ = duration;
        Err(OwError::NotSupported("power delivery"))
    }

    /// Arms or starts strong-pullup power delivery.
    fn start_power_delivery(&mut self, arming: PowerArming) -> OwResult<()> {
        let _ = arming;
        Err(OwError::NotSupported("power delivery"))
    }

    /// Sets how long a 12V program pulse lasts.
    fn set_program_pulse_duration(&mut self, duration: ProgramPulseDuration) -> OwResult<()> {
        let _ = duration;
        Err(OwError::NotSupported("program pulse"))
    }

    /// Arms or starts a 12V program pulse.
    fn start_program_pulse(&mut self, arming: PowerArming) -> OwResult<()> {
        let _ = arming;
        Err(OwError::NotSupported("program pulse"))
    }

    /// Forces the line to 0V to reset parasite-powered slaves.
    fn start_break(&mut self) -> OwResult<()> {
        Err(OwError::NotSupported("break"))
    }

    /// Returns the line to the normal weak-pullup idle level.
    fn set_power_normal(&mut self) -> OwResult<()> {
        Ok(())
    }

    /// Whether the adapter can signal at overdrive speed.
    fn can_overdrive(&self) -> bool {
        false
    }

    /// Whether the adapter supports flexible regular-speed waveforms.
    fn can_flex(&self) -> bool {
        false
    }

    /// Whether a 12V program-pulse supply is available.
    fn can_program(&self) -> bool {
        false
    }

    /// Whether the adapter can deliver strong-pullup power.
    fn can_deliver_power(&self) -> bool {
        false
    }

    /// Whether power delivery can be throttled per-slave ("smart" power).
    fn can_deliver_smart_power(&self) -> bool {
        false
    }

    /// Whether the adapter can force the line to 0V.
    fn can_break(&self) -> bool {
        false
    }

    /// Whether the adapter supports hyperdrive signalling.
    fn can_hyperdrive(&self) -> bool {
        false
    }
}
