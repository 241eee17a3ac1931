use crate::framer::{Mode, PulldownSlew, SampleOffset, Write1LowTime};
use onewire_host::{
    PowerDeliveryDuration, PowerLevel, ProgramPulseDuration, SearchCursor, SearchFilter, Speed,
};

/// The UART rate both ends speak after any master reset.
pub const DEFAULT_BAUD: u32 = 9600;

/// Waveform parameter group for one speed class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSet {
    /// Pulldown slew rate.
    pub slew: PulldownSlew,
    /// Write-1 low time.
    pub write1_low: Write1LowTime,
    /// Data sample offset.
    pub sample_offset: SampleOffset,
}

impl ParameterSet {
    /// Timing for regular speed.
    pub const fn regular() -> Self {
        ParameterSet {
            slew: PulldownSlew::V1p37,
            write1_low: Write1LowTime::Us10,
            sample_offset: SampleOffset::Us8,
        }
    }

    /// Timing for flex speed: slower edges, wider slots for long lines.
    pub const fn flex() -> Self {
        ParameterSet {
            slew: PulldownSlew::V0p83,
            write1_low: Write1LowTime::Us12,
            sample_offset: SampleOffset::Us10,
        }
    }

    /// Timing for overdrive speed.
    pub const fn overdrive() -> Self {
        ParameterSet {
            slew: PulldownSlew::V15,
            write1_low: Write1LowTime::Us8,
            sample_offset: SampleOffset::Us3,
        }
    }
}

/// Mutable per-adapter state, one per opened port.
///
/// Everything here is only touched while the transaction lock is held.
#[derive(Debug)]
pub struct AdapterState {
    /// Current UART rate.
    pub baud: u32,
    /// Input mode the adapter is decoding.
    pub mode: Mode,
    /// Current 1-Wire speed class.
    pub speed: Speed,
    /// Drive currently applied to the line.
    pub power: PowerLevel,
    /// A power transition fires with the next bit primitive.
    pub arm_on_next_bit: bool,
    /// A power transition fires with the next byte primitive.
    pub arm_on_next_byte: bool,
    /// The level an armed transition switches to.
    pub armed_level: PowerLevel,
    /// Strong-pullup duration currently programmed.
    pub power_duration: PowerDeliveryDuration,
    /// Program-pulse duration currently programmed.
    pub program_pulse_duration: ProgramPulseDuration,
    /// Waveform parameters per speed class.
    pub params: [ParameterSet; 3],
    /// Reset reply of the first successful reset, for diagnostics.
    pub revision: Option<u8>,
    /// A 12V program-pulse supply was reported present.
    pub program_voltage: bool,
    /// A timeout or echo mismatch was seen; re-verify before the next
    /// operation.
    pub needs_verify: bool,
    /// Position of the ROM search.
    pub cursor: SearchCursor,
    /// Family admission filter for enumeration.
    pub filter: SearchFilter,
    /// Enumerate only slaves in alarm state.
    pub only_alarming: bool,
    /// Skip the leading bus reset of each search pass.
    pub skip_reset_on_search: bool,
}

impl Default for AdapterState {
    fn default() -> Self {
        AdapterState {
            baud: DEFAULT_BAUD,
            mode: Mode::Command,
            speed: Speed::Regular,
            power: PowerLevel::Normal,
            arm_on_next_bit: false,
            arm_on_next_byte: false,
            armed_level: PowerLevel::Normal,
            power_duration: PowerDeliveryDuration::Infinite,
            program_pulse_duration: ProgramPulseDuration::Infinite,
            params: [
                ParameterSet::regular(),
                ParameterSet::flex(),
                ParameterSet::overdrive(),
            ],
            revision: None,
            program_voltage: false,
            needs_verify: false,
            cursor: SearchCursor::default(),
            filter: SearchFilter::default(),
            only_alarming: false,
            skip_reset_on_search: false,
        }
    }
}

impl AdapterState {
    /// The waveform parameters of `speed`.
    pub fn params_for(&self, speed: Speed) -> ParameterSet {
        self.params[match speed {
            Speed::Regular => 0,
            Speed::Flex => 1,
            Speed::Overdrive => 2,
        }]
    }

    /// Returns the adapter-side state to its post-master-reset values.
    ///
    /// Search cursor, filters and durations survive; they are host-side.
    pub fn after_master_reset(&mut self) {
        self.baud = DEFAULT_BAUD;
        self.mode = Mode::Command;
        self.speed = Speed::Regular;
        self.power = PowerLevel::Normal;
        self.arm_on_next_bit = false;
        self.arm_on_next_byte = false;
        self.armed_level = PowerLevel::Normal;
    }
}
