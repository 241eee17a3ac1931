//! Request batching.
//!
//! UART latency dominates the cost of talking to the adapter, so primitives
//! are accumulated into a single write burst answered by one contiguous
//! reply. Each primitive records where in the reply its result will land;
//! after the round-trip the recorded slots are sliced back out.

use crate::framer::{
    self, Framer, Mode, Parameter, PulseKind, MODE_STOP_PULSE,
};
use onewire_host::Speed;

/// Pulse consumption of a queued bit primitive.
///
/// A bit that consumes an armed pulse is answered by two bytes: its own
/// reply and the pulse response. The strong pullup is armed inside the bit
/// command itself; a primed 12V pulse was armed by an earlier pulse command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitArm {
    /// Plain bit, one reply byte.
    None,
    /// Carry the prime flag, starting the strong pullup with this bit.
    Strong5V,
    /// A previously primed pulse fires with this bit.
    Primed,
}

/// What a queued primitive was, for decoding and tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    /// 1-Wire reset.
    Reset,
    /// Single bit I/O.
    Bit,
    /// Data-mode byte transfer.
    Data,
    /// Search-accelerator data frame.
    SearchAccel,
    /// Parameter write.
    ConfigWrite,
    /// Parameter read.
    ConfigRead,
    /// Pulse control.
    Pulse,
    /// Pulse termination.
    StopPulse,
}

/// One queued primitive and where its reply lands.
#[derive(Debug, Clone, Copy)]
pub struct PrimitiveRecord {
    /// The primitive.
    pub kind: PrimitiveKind,
    /// Offset of its reply in the response buffer.
    pub offset: usize,
    /// Reply length in bytes.
    pub len: usize,
}

/// Reply location handed back to the caller when a primitive is queued.
#[derive(Debug, Clone, Copy)]
pub struct ReplySlot {
    /// Offset into the reply buffer.
    pub offset: usize,
    /// Length of this primitive's reply.
    pub len: usize,
}

impl ReplySlot {
    /// This primitive's slice of the reply buffer.
    pub fn slice<'a>(&self, reply: &'a [u8]) -> &'a [u8] {
        &reply[self.offset..self.offset + self.len]
    }

    /// First reply byte, for the single-byte primitives.
    pub fn byte(&self, reply: &[u8]) -> u8 {
        reply[self.offset]
    }
}

/// Accumulates framed primitives into one write burst.
pub struct PacketBuilder {
    framer: Framer,
    tx: Vec<u8>,
    expected: usize,
    records: Vec<PrimitiveRecord>,
}

impl PacketBuilder {
    /// Starts a batch with the adapter known to be in `mode`.
    pub fn new(mode: Mode) -> Self {
        PacketBuilder {
            framer: Framer::new(mode),
            tx: Vec::new(),
            expected: 0,
            records: Vec::new(),
        }
    }

    fn record(&mut self, kind: PrimitiveKind, len: usize) -> ReplySlot {
        let slot = ReplySlot {
            offset: self.expected,
            len,
        };
        self.records.push(PrimitiveRecord {
            kind,
            offset: slot.offset,
            len,
        });
        self.expected += len;
        slot
    }

    /// Queues a 1-Wire reset at `speed`.
    pub fn reset(&mut self, speed: Speed) -> ReplySlot {
        self.framer.enter_command(&mut self.tx);
        self.tx.push(framer::reset_command(speed));
        self.record(PrimitiveKind::Reset, 1)
    }

    /// Queues a single-bit transfer. An armed pulse consumed by this bit
    /// appends its own response byte.
    pub fn bit(&mut self, bit: bool, speed: Speed, arm: BitArm) -> ReplySlot {
        self.framer.enter_command(&mut self.tx);
        self.tx
            .push(framer::bit_command(bit, speed, arm == BitArm::Strong5V));
        self.record(PrimitiveKind::Bit, if arm == BitArm::None { 1 } else { 2 })
    }

    /// Queues a data-mode transfer; the reply is the concurrent read-back,
    /// one byte per payload byte.
    pub fn data(&mut self, payload: &[u8]) -> ReplySlot {
        self.framer.push_data(payload, &mut self.tx);
        self.record(PrimitiveKind::Data, payload.len())
    }

    /// Queues a parameter write.
    pub fn config_write(&mut self, parameter: Parameter, code: u8) -> ReplySlot {
        self.framer.enter_command(&mut self.tx);
        self.tx.push(framer::config_write(parameter, code));
        self.record(PrimitiveKind::ConfigWrite, 1)
    }

    /// Queues a parameter read.
    pub fn config_read(&mut self, parameter: Parameter) -> ReplySlot {
        self.framer.enter_command(&mut self.tx);
        self.tx.push(framer::config_read(parameter));
        self.record(PrimitiveKind::ConfigRead, 1)
    }

    /// Queues a pulse command. A primed pulse replies only once it fires,
    /// so its byte is accounted to the primitive that consumes the arm.
    pub fn pulse(&mut self, kind: PulseKind, prime: bool) -> ReplySlot {
        self.framer.enter_command(&mut self.tx);
        self.tx.push(framer::pulse_command(kind, prime));
        self.record(PrimitiveKind::Pulse, if prime { 0 } else { 1 })
    }

    /// Queues a pulse termination.
    pub fn stop_pulse(&mut self) -> ReplySlot {
        self.framer.enter_command(&mut self.tx);
        self.tx.push(MODE_STOP_PULSE);
        self.record(PrimitiveKind::StopPulse, 1)
    }

    /// Queues one search-accelerator pass: the search command byte in data
    /// mode, accelerator on, the 16 preloaded frame bytes, accelerator off.
    ///
    /// Returns the slots of the command echo and of the returned frame.
    pub fn search(
        &mut self,
        command: u8,
        speed: Speed,
        frame: &[u8; 16],
    ) -> (ReplySlot, ReplySlot) {
        self.framer.push_data(&[command], &mut self.tx);
        let echo = self.record(PrimitiveKind::Data, 1);
        self.framer.enter_command(&mut self.tx);
        // Accelerator on/off generate no response bytes.
        self.tx.push(framer::search_accel_command(true, speed));
        self.framer.push_data(frame, &mut self.tx);
        let result = self.record(PrimitiveKind::SearchAccel, 16);
        self.framer.enter_command(&mut self.tx);
        self.tx.push(framer::search_accel_command(false, speed));
        (echo, result)
    }

    /// Total reply length the queued primitives will produce.
    pub fn expected_len(&self) -> usize {
        self.expected
    }

    /// True when nothing was queued.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Finishes the batch: the raw bytes to send, the expected reply
    /// length, the per-primitive records, and the mode the adapter is left
    /// in.
    pub fn finish(self) -> (Vec<u8>, usize, Vec<PrimitiveRecord>, Mode) {
        (self.tx, self.expected, self.records, self.framer.mode())
    }
}

#[cfg(test)]
mod test {
    use super::PacketBuilder;
    use crate::framer::{Mode, MODE_COMMAND, MODE_DATA};
    use onewire_host::Speed;

    #[test]
    fn offsets_accumulate_in_order() {
        let mut packet = PacketBuilder::new(Mode::Command);
        let r = packet.reset(Speed::Regular);
        let d = packet.data(&[0x55, 0xe3]);
        let b = packet.bit(true, Speed::Regular, super::BitArm::None);
        assert_eq!((r.offset, r.len), (0, 1));
        assert_eq!((d.offset, d.len), (1, 2));
        assert_eq!((b.offset, b.len), (3, 1));
        let (tx, expected, records, mode) = packet.finish();
        // reset, switch, 0x55, 0xe3 doubled, switch, bit
        assert_eq!(
            tx,
            vec![0xc1, MODE_DATA, 0x55, 0xe3, 0xe3, MODE_COMMAND, 0x91]
        );
        assert_eq!(expected, 4);
        assert_eq!(records.len(), 3);
        assert_eq!(mode, Mode::Command);
    }

    #[test]
    fn search_pass_layout() {
        let mut packet = PacketBuilder::new(Mode::Command);
        let (echo, result) = packet.search(0xf0, Speed::Regular, &[0; 16]);
        assert_eq!((echo.offset, echo.len), (0, 1));
        assert_eq!((result.offset, result.len), (1, 16));
        let (tx, expected, _, _) = packet.finish();
        assert_eq!(expected, 17);
        // data switch + cmd + command switch + accel-on + data switch
        // + 16 frame bytes + command switch + accel-off
        assert_eq!(tx.len(), 1 + 1 + 1 + 1 + 1 + 16 + 1 + 1);
        assert_eq!(tx[0], MODE_DATA);
        assert_eq!(tx[1], 0xf0);
        assert_eq!(tx[3], 0xb1);
        assert_eq!(*tx.last().unwrap(), 0xa1);
    }
}
