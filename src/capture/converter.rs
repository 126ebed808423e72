//! Real-time format conversion: channel normalization and sample-rate
//! conversion between a device's native capture format and the fixed
//! 48 kHz / stereo ring format.
//!
//! All buffers are allocated at construction; `push` and `produce` are
//! allocation-free and lock-free so they can run inside the audio callback.
//! Conversion is a pull model: `push` stages native frames in an SPSC FIFO
//! and `produce` hands out at most the frames currently buffered, signalling
//! end-of-input for the cycle by returning fewer frames than requested.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::ring::{RING_CHANNELS, RING_SAMPLE_RATE};

/// Target sample rate of the converted stream.
pub const TARGET_SAMPLE_RATE: u32 = RING_SAMPLE_RATE;

/// Target channel count of the converted stream.
pub const TARGET_CHANNELS: u16 = RING_CHANNELS as u16;

/// FIFO capacity: one second of stereo audio at the native rate.
fn fifo_capacity(native_rate: u32) -> usize {
    native_rate.max(TARGET_SAMPLE_RATE) as usize * TARGET_CHANNELS as usize
}

/// Streaming converter from a device-native format to 48 kHz stereo.
///
/// Channel handling: mono input is upmixed by duplicating each sample into
/// both channels, writing into the FIFO rather than back into the source
/// buffer (no in-place aliasing). Inputs with more than two channels keep
/// their first two.
///
/// Rate handling: linear interpolation with persistent fractional phase, so
/// conversion is continuous across callback invocations.
pub struct FormatConverter {
    native_rate: u32,
    native_channels: u16,
    fifo_prod: HeapProd<f32>,
    fifo_cons: HeapCons<f32>,
    /// Source-frame step per output frame.
    step: f64,
    /// Fractional position between `cur` and `next`.
    phase: f64,
    cur: [f32; 2],
    next: [f32; 2],
    have_cur: bool,
    have_next: bool,
}

impl FormatConverter {
    /// Creates a converter for the given native capture format.
    pub fn new(native_rate: u32, native_channels: u16) -> Self {
        let rb = HeapRb::<f32>::new(fifo_capacity(native_rate));
        let (fifo_prod, fifo_cons) = rb.split();
        Self {
            native_rate,
            native_channels,
            fifo_prod,
            fifo_cons,
            step: f64::from(native_rate) / f64::from(TARGET_SAMPLE_RATE),
            phase: 0.0,
            cur: [0.0; 2],
            next: [0.0; 2],
            have_cur: false,
            have_next: false,
        }
    }

    /// Returns `true` when no resampling is needed.
    pub fn is_passthrough_rate(&self) -> bool {
        self.native_rate == TARGET_SAMPLE_RATE
    }

    /// Stages native interleaved samples as stereo frames in the FIFO.
    ///
    /// Frames that do not fit are dropped (the FIFO holds a full second of
    /// audio, so this only happens if `produce` is not being called).
    pub fn push(&mut self, input: &[f32]) {
        match self.native_channels {
            1 => {
                for &sample in input {
                    if self.fifo_prod.try_push(sample).is_err() {
                        return;
                    }
                    let _ = self.fifo_prod.try_push(sample);
                }
            }
            2 => {
                let _ = self.fifo_prod.push_slice(input);
            }
            n => {
                for frame in input.chunks_exact(n as usize) {
                    if self.fifo_prod.try_push(frame[0]).is_err() {
                        return;
                    }
                    let _ = self.fifo_prod.try_push(frame[1]);
                }
            }
        }
    }

    /// Stereo frames currently staged in the FIFO.
    pub fn buffered_frames(&self) -> usize {
        self.fifo_cons.occupied_len() / TARGET_CHANNELS as usize
    }

    /// Converts staged frames into `out` (interleaved stereo at 48 kHz).
    ///
    /// Returns the number of frames produced, which is less than the
    /// capacity of `out` when the staged input is exhausted for this cycle.
    pub fn produce(&mut self, out: &mut [f32]) -> usize {
        let capacity = out.len() / TARGET_CHANNELS as usize;

        if self.is_passthrough_rate() {
            let wanted = capacity * TARGET_CHANNELS as usize;
            let buffered = self.fifo_cons.occupied_len() / 2 * 2;
            let take = wanted.min(buffered);
            let popped = self.fifo_cons.pop_slice(&mut out[..take]);
            return popped / TARGET_CHANNELS as usize;
        }

        let mut produced = 0;
        while produced < capacity {
            while self.phase >= 1.0 {
                if !self.shift() {
                    return produced;
                }
                self.phase -= 1.0;
            }
            if !self.prime() {
                return produced;
            }

            let t = self.phase as f32;
            out[produced * 2] = self.cur[0] + (self.next[0] - self.cur[0]) * t;
            out[produced * 2 + 1] = self.cur[1] + (self.next[1] - self.cur[1]) * t;
            produced += 1;
            self.phase += self.step;
        }
        produced
    }

    /// Ensures `cur` and `next` hold consecutive source frames.
    fn prime(&mut self) -> bool {
        if !self.have_cur {
            match self.pop_frame() {
                Some(frame) => {
                    self.cur = frame;
                    self.have_cur = true;
                }
                None => return false,
            }
        }
        if !self.have_next {
            match self.pop_frame() {
                Some(frame) => {
                    self.next = frame;
                    self.have_next = true;
                }
                None => return false,
            }
        }
        true
    }

    /// Advances the interpolation window by one source frame.
    fn shift(&mut self) -> bool {
        if !self.have_next {
            return self.prime() && self.shift_inner();
        }
        self.shift_inner()
    }

    fn shift_inner(&mut self) -> bool {
        match self.pop_frame() {
            Some(frame) => {
                self.cur = self.next;
                self.next = frame;
                true
            }
            None => false,
        }
    }

    fn pop_frame(&mut self) -> Option<[f32; 2]> {
        if self.fifo_cons.occupied_len() < 2 {
            return None;
        }
        let left = self.fifo_cons.try_pop()?;
        let right = self.fifo_cons.try_pop()?;
        Some([left, right])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_copies_exactly() {
        let mut conv = FormatConverter::new(48_000, 2);
        let input: Vec<f32> = (0..200).map(|i| i as f32 / 200.0).collect();
        conv.push(&input);

        let mut out = vec![0.0_f32; input.len()];
        let frames = conv.produce(&mut out);
        assert_eq!(frames, 100);
        assert_eq!(out, input);
    }

    #[test]
    fn test_mono_upmix_duplicates_each_sample() {
        let mut conv = FormatConverter::new(48_000, 1);
        conv.push(&[0.1, 0.2, 0.3]);

        let mut out = vec![0.0_f32; 6];
        let frames = conv.produce(&mut out);
        assert_eq!(frames, 3);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_multichannel_keeps_first_two() {
        let mut conv = FormatConverter::new(48_000, 4);
        conv.push(&[0.1, 0.2, 0.9, 0.9, 0.3, 0.4, 0.9, 0.9]);

        let mut out = vec![0.0_f32; 4];
        let frames = conv.produce(&mut out);
        assert_eq!(frames, 2);
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_produce_stops_at_staged_input() {
        let mut conv = FormatConverter::new(48_000, 2);
        conv.push(&[0.5; 20]); // 10 frames staged

        let mut out = vec![0.0_f32; 64];
        assert_eq!(conv.produce(&mut out), 10);
        assert_eq!(conv.produce(&mut out), 0);
    }

    #[test]
    fn test_downsample_halves_frame_count() {
        let mut conv = FormatConverter::new(96_000, 2);
        let input = vec![0.25_f32; 2000]; // 1000 frames at 96k
        conv.push(&input);

        let mut out = vec![0.0_f32; 2000];
        let frames = conv.produce(&mut out);
        // 1000 source frames at a step of 2.0 yield ~500 output frames.
        assert!((495..=500).contains(&frames));
        assert!(out[..frames * 2].iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_upsample_interpolates_between_frames() {
        let mut conv = FormatConverter::new(24_000, 2);
        conv.push(&[0.0, 0.0, 1.0, 1.0]); // two frames: 0.0 then 1.0

        let mut out = vec![0.0_f32; 8];
        let frames = conv.produce(&mut out);
        // step = 0.5: outputs at source positions 0.0 and 0.5.
        assert_eq!(frames, 2);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_phase_is_continuous_across_cycles() {
        let mut conv = FormatConverter::new(24_000, 2);
        conv.push(&[0.0, 0.0, 1.0, 1.0]);
        let mut out = vec![0.0_f32; 4];
        assert_eq!(conv.produce(&mut out), 2);

        // Next source frame arrives in a later callback; interpolation picks
        // up at source position 1.0 (value 1.0 toward 2.0).
        conv.push(&[2.0, 2.0]);
        let mut out2 = vec![0.0_f32; 4];
        let frames = conv.produce(&mut out2);
        assert_eq!(frames, 2);
        assert!((out2[0] - 1.0).abs() < 1e-6);
        assert!((out2[2] - 1.5).abs() < 1e-6);
    }
}
