//! Fixed-point mixing kernels
//!
//! Gains are Q16 fixed point (`1.0` == 65536). Track samples are scaled and
//! summed into an `i32` accumulator; the master stage scales through an
//! `i64` intermediate, hard-clips to ±32767 and encodes to the output byte
//! order. Both scaling steps round to nearest, halves away from zero, so
//! positive and negative samples are treated alike.

use crate::sequence::clamp_gain;
use crate::types::{ByteOrder, BYTES_PER_SAMPLE, SAMPLE_MAX, SAMPLE_MIN};

/// Q16 representation of unity gain
pub const UNITY_GAIN_Q16: i32 = 1 << 16;

/// Convert a 0.0..=1.0 gain to Q16, rounded to nearest
#[inline]
pub fn gain_to_q16(gain: f32) -> i32 {
    (clamp_gain(gain) * UNITY_GAIN_Q16 as f32).round() as i32
}

/// `value * gain_q16 / 65536`, rounded to nearest with halves away from zero
#[inline]
fn scale_q16(value: i64, gain_q16: i32) -> i64 {
    const HALF: i64 = 1 << 15;
    let product = value * gain_q16 as i64;
    if product >= 0 {
        (product + HALF) >> 16
    } else {
        -((-product + HALF) >> 16)
    }
}

/// Scale encoded samples by `gain_q16` and add them into `acc`
///
/// `src` holds interleaved 16-bit samples in `order`; extra samples on
/// either side are ignored.
#[inline]
pub fn accumulate(acc: &mut [i32], src: &[u8], order: ByteOrder, gain_q16: i32) {
    for (slot, pair) in acc.iter_mut().zip(src.chunks_exact(BYTES_PER_SAMPLE)) {
        let sample = order.decode([pair[0], pair[1]]);
        *slot = slot.saturating_add(scale_q16(sample as i64, gain_q16) as i32);
    }
}

/// Apply the master gain, clip and append the encoded samples to `out`
#[inline]
pub fn render(acc: &[i32], master_q16: i32, order: ByteOrder, out: &mut Vec<u8>) {
    out.reserve(acc.len() * BYTES_PER_SAMPLE);
    for &value in acc {
        let scaled = scale_q16(value as i64, master_q16);
        let clipped = scaled.clamp(SAMPLE_MIN as i64, SAMPLE_MAX as i64) as i16;
        out.extend_from_slice(&order.encode(clipped));
    }
}

/// Append `samples` samples of silence to `out`
#[inline]
pub fn render_silence(samples: usize, out: &mut Vec<u8>) {
    out.resize(out.len() + samples * BYTES_PER_SAMPLE, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: i16, samples: usize, order: ByteOrder) -> Vec<u8> {
        order.encode_all(&vec![value; samples])
    }

    #[test]
    fn test_gain_conversion() {
        assert_eq!(gain_to_q16(1.0), UNITY_GAIN_Q16);
        assert_eq!(gain_to_q16(0.5), 32768);
        assert_eq!(gain_to_q16(2.0), UNITY_GAIN_Q16);
        assert_eq!(gain_to_q16(-1.0), 0);
    }

    #[test]
    fn test_overlapping_tracks_sum_scaled() {
        let mut acc = vec![0i32; 4];
        accumulate(&mut acc, &constant(1000, 4, ByteOrder::Little), ByteOrder::Little, gain_to_q16(0.5));
        accumulate(&mut acc, &constant(2000, 4, ByteOrder::Big), ByteOrder::Big, gain_to_q16(0.25));

        let mut out = Vec::new();
        render(&acc, UNITY_GAIN_Q16, ByteOrder::Little, &mut out);
        assert_eq!(ByteOrder::Little.decode_all(&out), vec![1000; 4]);
    }

    #[test]
    fn test_unity_gain_is_exact() {
        let samples = [-32768i16, -1, 0, 1, 12345, 32767];
        let mut acc = vec![0i32; samples.len()];
        accumulate(&mut acc, &ByteOrder::Little.encode_all(&samples), ByteOrder::Little, UNITY_GAIN_Q16);
        assert_eq!(acc, vec![-32768, -1, 0, 1, 12345, 32767]);
    }

    #[test]
    fn test_clip_to_symmetric_range() {
        let mut acc = vec![0i32; 2];
        let loud = ByteOrder::Little.encode_all(&[30000, -30000]);
        accumulate(&mut acc, &loud, ByteOrder::Little, UNITY_GAIN_Q16);
        accumulate(&mut acc, &loud, ByteOrder::Little, UNITY_GAIN_Q16);

        let mut out = Vec::new();
        render(&acc, UNITY_GAIN_Q16, ByteOrder::Big, &mut out);
        assert_eq!(ByteOrder::Big.decode_all(&out), vec![32767, -32767]);
    }

    #[test]
    fn test_master_gain_and_silence() {
        let mut out = Vec::new();
        render(&[10000, -10000], gain_to_q16(0.5), ByteOrder::Little, &mut out);
        assert_eq!(ByteOrder::Little.decode_all(&out), vec![5000, -5000]);

        render_silence(3, &mut out);
        assert_eq!(out.len(), 10);
        assert!(out[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_inexact_gain_rounds_symmetrically() {
        assert_eq!(gain_to_q16(0.3), 19661);

        let samples = [1000i16, 10, -1000, -10, 1, -1];
        let mut acc = vec![0i32; samples.len()];
        accumulate(&mut acc, &ByteOrder::Little.encode_all(&samples), ByteOrder::Little, gain_to_q16(0.3));
        assert_eq!(acc, vec![300, 3, -300, -3, 0, 0]);

        let mut acc = vec![0i32; 2];
        accumulate(&mut acc, &ByteOrder::Little.encode_all(&[1, -1]), ByteOrder::Little, gain_to_q16(0.5));
        assert_eq!(acc, vec![1, -1]);

        let mut out = Vec::new();
        render(&[1000, -1000, 3, -3], gain_to_q16(0.3), ByteOrder::Little, &mut out);
        assert_eq!(ByteOrder::Little.decode_all(&out), vec![300, -300, 1, -1]);
    }

    #[test]
    fn test_accumulate_stops_at_shorter_input() {
        let mut acc = vec![0i32; 4];
        accumulate(&mut acc, &ByteOrder::Little.encode_all(&[7, 7]), ByteOrder::Little, UNITY_GAIN_Q16);
        assert_eq!(acc, vec![7, 7, 0, 0]);
    }
}
