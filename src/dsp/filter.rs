//! Butterworth high-pass filter
//!
//! The analog prototype is pre-warped and mapped through the bilinear
//! transform, then realized as a cascade of second-order sections plus a
//! first-order section for odd orders.

use std::f64::consts::PI;

/// One biquad in transposed direct form II. First-order sections keep b2 = a2 = 0.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Section {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Section {
    /// Second-order high-pass with quality factor `q`, `k = tan(pi * fc / fs)`
    fn second_order(k: f64, q: f64) -> Self {
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);
        Self {
            b0: norm,
            b1: -2.0 * norm,
            b2: norm,
            a1: 2.0 * (k2 - 1.0) * norm,
            a2: (1.0 - k / q + k2) * norm,
        }
    }

    fn first_order(k: f64) -> Self {
        let norm = 1.0 / (1.0 + k);
        Self {
            b0: norm,
            b1: -norm,
            b2: 0.0,
            a1: (k - 1.0) * norm,
            a2: 0.0,
        }
    }

    fn process(&self, input: &[f64], output: &mut Vec<f64>) {
        output.clear();
        output.reserve(input.len());
        let (mut z1, mut z2) = (0.0f64, 0.0f64);
        for &x in input {
            let y = self.b0 * x + z1;
            z1 = self.b1 * x - self.a1 * y + z2;
            z2 = self.b2 * x - self.a2 * y;
            output.push(y);
        }
    }
}

/// Causal Butterworth high-pass
#[derive(Debug, Clone, PartialEq)]
pub struct HighPass {
    sections: Vec<Section>,
}

impl HighPass {
    /// Design an order-`order` Butterworth high-pass.
    ///
    /// Parameters are assumed valid; see [`super::DspParams::validate`].
    pub fn butterworth(order: usize, cutoff_hz: f64, sample_rate: u32) -> Self {
        let k = (PI * cutoff_hz / sample_rate as f64).tan();
        let mut sections = Vec::with_capacity(order / 2 + order % 2);

        // Conjugate pole pairs sit at angles pi * (2i + 1) / (2n) from the negative real axis
        for i in 0..order / 2 {
            let theta = PI * (2 * i + 1) as f64 / (2 * order) as f64;
            let q = 1.0 / (2.0 * theta.cos());
            sections.push(Section::second_order(k, q));
        }
        if order % 2 == 1 {
            sections.push(Section::first_order(k));
        }

        Self { sections }
    }

    #[cfg(test)]
    pub fn order(&self) -> usize {
        self.sections
            .iter()
            .map(|s| if s.b2 == 0.0 && s.a2 == 0.0 { 1 } else { 2 })
            .sum()
    }

    /// Filter a whole buffer from a zero initial state. Output length equals input length.
    pub fn apply(&self, samples: &[f32]) -> Vec<f32> {
        let mut current: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        let mut next = Vec::with_capacity(current.len());
        for section in &self.sections {
            section.process(&current, &mut next);
            std::mem::swap(&mut current, &mut next);
        }
        current.into_iter().map(|s| s as f32).collect()
    }
}
