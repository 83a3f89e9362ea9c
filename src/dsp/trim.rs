//! Leading and trailing silence removal
//!
//! Energy is measured as mean-square power over centered frames, zero padded
//! at the edges. A frame is non-silent when its power is within `top_db` of
//! the loudest frame.

/// Analysis frame length in samples
pub const FRAME_LENGTH: usize = 2048;

/// Distance between frame centers in samples
pub const HOP_LENGTH: usize = 512;

/// Power floor for the dB conversion
const AMIN: f64 = 1e-10;

/// Mean-square power of every centered frame
fn frame_powers(samples: &[f32]) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }

    // Prefix sums of squares make each frame O(1)
    let mut prefix = Vec::with_capacity(samples.len() + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for &s in samples {
        acc += s as f64 * s as f64;
        prefix.push(acc);
    }

    let half = FRAME_LENGTH / 2;
    let n_frames = 1 + samples.len() / HOP_LENGTH;
    (0..n_frames)
        .map(|i| {
            let center = i * HOP_LENGTH;
            let start = center.saturating_sub(half);
            let end = (center + half).min(samples.len());
            let energy = if end > start {
                prefix[end] - prefix[start]
            } else {
                0.0
            };
            energy / FRAME_LENGTH as f64
        })
        .collect()
}

/// Sample range `[start, end)` between the first and last non-silent frames.
///
/// Returns `(0, 0)` when no frame carries any energy.
pub fn non_silent_span(samples: &[f32], top_db: f64) -> (usize, usize) {
    let powers = frame_powers(samples);
    let max_power = powers.iter().copied().fold(0.0f64, f64::max);
    if max_power <= 0.0 {
        return (0, 0);
    }

    let reference_db = 10.0 * max_power.max(AMIN).log10();
    let is_loud = |p: &f64| *p > 0.0 && 10.0 * p.max(AMIN).log10() - reference_db > -top_db;

    let (Some(first), Some(last)) = (powers.iter().position(is_loud), powers.iter().rposition(is_loud))
    else {
        return (0, 0);
    };

    let start = (first * HOP_LENGTH).min(samples.len());
    let end = ((last + 1) * HOP_LENGTH).min(samples.len());
    (start, end.max(start))
}

/// Drop leading and trailing spans quieter than `top_db` below the peak frame
///
/// Cutting on a hop boundary removes energy the edge frames were measured
/// with, so the span is re-measured on the cut until it stops shrinking.
/// The result is a fixed point: trimming it again returns it unchanged.
pub fn trim_silence(samples: &[f32], top_db: f64) -> Vec<f32> {
    let mut kept = samples;
    loop {
        let (start, end) = non_silent_span(kept, top_db);
        if start == 0 && end == kept.len() {
            return kept.to_vec();
        }
        // Each pass either returns or strictly shrinks the span
        kept = &kept[start..end];
    }
}
