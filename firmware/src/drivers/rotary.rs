//! Rotary encoder decoding.
//!
//! Edge interrupts on CLK and DT feed a Gray-code state machine; each
//! full detent pushes one bit into a lock-free queue (true for
//! clockwise, false for counter-clockwise). The polled `read` side
//! turns queued detents into input "pulses" stretched over one or more
//! sampling cycles so the host cannot miss them.

use std::sync::atomic::{AtomicU16, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::gpio::Gpio;
use crate::hal::Hal;
use crate::types::{InputNumber, PulseWidthMultiplier};

use super::DigitalInput;

const QUEUE_SLOTS: usize = 64;

/// Single-producer single-consumer queue of bits.
///
/// The producer is an interrupt handler, the consumer the input
/// sampler. A plain ring over one 64-bit word with atomic head/tail
/// indices; overflow discards the new bit.
#[derive(Debug, Default)]
pub struct BitQueue {
    bits: AtomicU64,
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl BitQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a bit. Discarded when the queue is full.
    pub fn enqueue(&self, value: bool) {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) % QUEUE_SLOTS;
        if next == self.head.load(Ordering::Acquire) {
            // Full: overflow discards the new event.
            return;
        }
        let slot = 1u64 << tail;
        if value {
            self.bits.fetch_or(slot, Ordering::Relaxed);
        } else {
            self.bits.fetch_and(!slot, Ordering::Relaxed);
        }
        self.tail.store(next, Ordering::Release);
    }

    /// Pop the oldest bit, if any.
    pub fn dequeue(&self) -> Option<bool> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let value = self.bits.load(Ordering::Relaxed) & (1u64 << head) != 0;
        self.head.store((head + 1) % QUEUE_SLOTS, Ordering::Release);
        Some(value)
    }
}

/// Interrupt-side decoder state, shared with the HAL edge handlers.
struct Decoder {
    hal: Arc<dyn Hal>,
    clk_pin: Gpio,
    dt_pin: Gpio,
    alternate: bool,
    code: AtomicU8,
    sequence: AtomicU16,
    queue: BitQueue,
}

// Valid Gray-code transitions, indexed by (previous << 2) | current.
const VALID_CODE: [bool; 16] = [
    false, true, true, false, true, false, false, true, true, false, false, true, false, true,
    true, false,
];

impl Decoder {
    fn on_edge(&self) {
        let clk = u8::from(self.hal.get_level(self.clk_pin));
        let dt = u8::from(self.hal.get_level(self.dt_pin));
        if self.alternate {
            self.on_edge_alternate(clk, dt);
        } else {
            self.on_edge_standard(clk, dt);
        }
    }

    fn on_edge_standard(&self, clk: u8, dt: u8) {
        let mut code = self.code.load(Ordering::Relaxed);
        code = ((code << 2) | (dt << 1) | clk) & 0x0f;
        self.code.store(code, Ordering::Relaxed);

        if VALID_CODE[code as usize] {
            let mut sequence = self.sequence.load(Ordering::Relaxed);
            sequence = (sequence << 4) | u16::from(code);
            self.sequence.store(sequence, Ordering::Relaxed);
            match sequence & 0xff {
                // Counter-clockwise detent
                0x2b => self.queue.enqueue(false),
                // Clockwise detent
                0x17 => self.queue.enqueue(true),
                _ => {}
            }
        }
    }

    // State machine for ALPS RKJX series: both resting states (0b00
    // and 0b11) terminate a detent.
    fn on_edge_alternate(&self, clk: u8, dt: u8) {
        let code = self.code.load(Ordering::Relaxed);
        let reading = (clk << 1) | dt;
        let next_code = ((code << 2) | reading) & 0b1111;
        let transition = (code << 4) | next_code;

        match transition {
            0b1101_0100 => {
                self.code.store(0, Ordering::Relaxed);
                self.queue.enqueue(true);
            }
            0b0010_1011 => {
                self.code.store(0b11, Ordering::Relaxed);
                self.queue.enqueue(true);
            }
            0b1110_1000 => {
                self.code.store(0, Ordering::Relaxed);
                self.queue.enqueue(false);
            }
            0b0001_0111 => {
                self.code.store(0b11, Ordering::Relaxed);
                self.queue.enqueue(false);
            }
            0b0011_1101 | 0b0000_0010 | 0b0011_1110 | 0b0000_0001 => {
                self.code.store(next_code, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

/// A quadrature rotary encoder exposed as two momentary inputs, one
/// for each rotation direction.
pub struct RotaryEncoderInput {
    decoder: Arc<Decoder>,
    cw_bitmap: u64,
    ccw_bitmap: u64,
    mask: u64,
    pulse_multiplier: Arc<AtomicU8>,
    current_pulse_width: u8,
    press_event_notified: bool,
}

impl RotaryEncoderInput {
    /// Attach an encoder to its CLK/DT pins.
    ///
    /// `pulse_multiplier` is shared by every encoder on the device and
    /// stretches each detent over that many sampling cycles.
    pub fn new(
        hal: Arc<dyn Hal>,
        clk_pin: Gpio,
        dt_pin: Gpio,
        cw_number: InputNumber,
        ccw_number: InputNumber,
        alternate_encoding: bool,
        pulse_multiplier: Arc<AtomicU8>,
    ) -> Self {
        hal.configure_input(clk_pin, false, true);
        hal.configure_input(dt_pin, false, true);

        let decoder = Arc::new(Decoder {
            hal: Arc::clone(&hal),
            clk_pin,
            dt_pin,
            alternate: alternate_encoding,
            code: AtomicU8::new(if alternate_encoding { 0b11 } else { 0 }),
            sequence: AtomicU16::new(0),
            queue: BitQueue::new(),
        });

        // Settle the state machine on the current pin levels.
        decoder.on_edge();
        decoder.on_edge();

        for pin in [dt_pin, clk_pin] {
            let isr_decoder = Arc::clone(&decoder);
            hal.enable_isr(pin, Arc::new(move || isr_decoder.on_edge()));
        }

        let cw_bitmap = cw_number.bitmap();
        let ccw_bitmap = ccw_number.bitmap();
        Self {
            decoder,
            cw_bitmap,
            ccw_bitmap,
            mask: !(cw_bitmap | ccw_bitmap),
            pulse_multiplier,
            current_pulse_width: 0,
            press_event_notified: false,
        }
    }

    fn multiplier(&self) -> u8 {
        self.pulse_multiplier
            .load(Ordering::Relaxed)
            .clamp(1, PulseWidthMultiplier::MAX)
    }
}

impl DigitalInput for RotaryEncoderInput {
    fn mask(&self) -> u64 {
        self.mask
    }

    fn read(&mut self, previous: u64) -> u64 {
        if self.current_pulse_width > 0 {
            self.current_pulse_width -= 1;
            if self.current_pulse_width == 0 {
                if self.press_event_notified {
                    // Insert a release between consecutive pulses.
                    self.press_event_notified = false;
                    self.current_pulse_width = self.multiplier();
                }
                return 0;
            }
            // Pulse in progress
            return previous & !self.mask;
        }
        match self.decoder.queue.dequeue() {
            Some(clockwise) => {
                self.press_event_notified = true;
                self.current_pulse_width = self.multiplier();
                if clockwise {
                    self.cw_bitmap
                } else {
                    self.ccw_bitmap
                }
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHal;

    #[test]
    fn bit_queue_is_fifo() {
        let queue = BitQueue::new();
        queue.enqueue(true);
        queue.enqueue(false);
        queue.enqueue(true);
        assert_eq!(queue.dequeue(), Some(true));
        assert_eq!(queue.dequeue(), Some(false));
        assert_eq!(queue.dequeue(), Some(true));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn bit_queue_discards_on_overflow() {
        let queue = BitQueue::new();
        for _ in 0..QUEUE_SLOTS - 1 {
            queue.enqueue(true);
        }
        // Full: this one is lost.
        queue.enqueue(false);
        let mut drained = 0;
        while let Some(bit) = queue.dequeue() {
            assert!(bit);
            drained += 1;
        }
        assert_eq!(drained, QUEUE_SLOTS - 1);
    }

    fn feed(hal: &FakeHal, clk_pin: Gpio, dt_pin: Gpio, clk: bool, dt: bool) {
        hal.set_input_level(clk_pin, clk);
        hal.set_input_level(dt_pin, dt);
        hal.trigger_edge(clk_pin);
    }

    #[test]
    fn clockwise_detent_produces_one_pulse_per_direction_bit() {
        let hal = Arc::new(FakeHal::new());
        let clk = Gpio::new(10);
        let dt = Gpio::new(11);
        hal.set_input_level(clk, true);
        hal.set_input_level(dt, true);
        let multiplier = Arc::new(AtomicU8::new(1));
        let cw = InputNumber::new(3).unwrap();
        let ccw = InputNumber::new(4).unwrap();
        let mut encoder = RotaryEncoderInput::new(
            Arc::clone(&hal) as Arc<dyn Hal>,
            clk,
            dt,
            cw,
            ccw,
            false,
            multiplier,
        );

        // One clockwise detent: CLK falls first, then DT, then both rise.
        feed(&hal, clk, dt, false, true);
        feed(&hal, clk, dt, false, false);
        feed(&hal, clk, dt, true, false);
        feed(&hal, clk, dt, true, true);

        let first = encoder.read(0);
        assert_eq!(first, cw.bitmap());
        // Pulse of width one: next cycle is a release.
        assert_eq!(encoder.read(first), 0);
        assert_eq!(encoder.read(0), 0);
    }
}
