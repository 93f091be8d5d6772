//! Seeded, reproducible exploration primitives.
//!
//! Everything here is a pure function of its inputs. The hash and the
//! generator are fixed bit-for-bit so that a decision logged by any client of
//! the platform can be replayed offline and produce the same action and
//! probabilities.
//!
//! ```text
//! seed = uniform_hash(event_id) + uniform_hash(app_id)     (wrapping)
//! state' = 0xeece66d5deece66d * state + 2147483647         (wrapping)
//! draw  = f32 with mantissa = (state' >> 25) & 0x7FFFFF, in [1,2), minus 1
//! ```

use crate::error::{LiveModelError, Result};

const LCG_MULTIPLIER: u64 = 0xeece_66d5_deec_e66d;
const LCG_INCREMENT: u64 = 2_147_483_647;
const FLOAT_EXPONENT_BIAS: u32 = 127 << 23;
const MANTISSA_MASK: u64 = 0x7F_FFFF;

const MURMUR_C1: u32 = 0xcc9e_2d51;
const MURMUR_C2: u32 = 0x1b87_3593;

/// MurmurHash3 (x86, 32-bit) of `key`, widened to `u64`.
///
/// Blocks are read little-endian regardless of host byte order.
pub fn uniform_hash(key: &[u8], seed: u32) -> u64 {
    let mut h1 = seed;
    let mut blocks = key.chunks_exact(4);

    for block in &mut blocks {
        let mut k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k1 = k1.wrapping_mul(MURMUR_C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(MURMUR_C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    let mut k1: u32 = 0;
    if tail.len() >= 3 {
        k1 ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        k1 ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        k1 ^= tail[0] as u32;
        k1 = k1.wrapping_mul(MURMUR_C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(MURMUR_C2);
        h1 ^= k1;
    }

    h1 ^= key.len() as u32;
    u64::from(fmix32(h1))
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Per-application salt mixed into every event seed.
pub fn application_salt(app_id: &str) -> u64 {
    uniform_hash(app_id.as_bytes(), 0)
}

/// Derive the exploration seed for `key` (normally an event id) under a salt.
#[inline]
pub fn seed_for(namespace_salt: u64, key: &str) -> u64 {
    uniform_hash(key.as_bytes(), 0).wrapping_add(namespace_salt)
}

/// Advance `state` in place and return a draw in `[0, 1)`.
#[inline]
pub fn next_uniform(state: &mut u64) -> f32 {
    *state = LCG_MULTIPLIER
        .wrapping_mul(*state)
        .wrapping_add(LCG_INCREMENT);
    let bits = ((*state >> 25) & MANTISSA_MASK) as u32 | FLOAT_EXPONENT_BIAS;
    f32::from_bits(bits) - 1.0
}

/// Single integer draw in `[low, high]` from `seed`.
///
/// Only a local copy of the seed is advanced.
pub fn uniform_int(seed: u64, low: u64, high: u64) -> Result<u64> {
    if high < low {
        return Err(LiveModelError::Exploration(format!(
            "empty range [{low}, {high}]"
        )));
    }
    let mut state = seed;
    next_uniform(&mut state);
    let draw = state >> 25;
    Ok(match (high - low).checked_add(1) {
        Some(span) => low + draw % span,
        // full u64 range
        None => draw,
    })
}

/// Epsilon-greedy distribution over `action_count` actions.
///
/// Every action receives `epsilon / action_count` and `top_action` receives an
/// extra `1 - epsilon`. A `top_action` past the end is clamped to the last
/// action.
pub fn epsilon_greedy(epsilon: f32, top_action: usize, action_count: usize) -> Result<Vec<f32>> {
    if action_count == 0 {
        return Err(LiveModelError::Exploration(
            "action count must be at least 1".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&epsilon) {
        return Err(LiveModelError::Exploration(format!(
            "epsilon {epsilon} outside [0, 1]"
        )));
    }

    let base = epsilon / action_count as f32;
    let mut pdf = vec![base; action_count];
    let top = top_action.min(action_count - 1);
    pdf[top] += 1.0 - epsilon;
    Ok(pdf)
}

/// Sample an index from an unnormalized pdf using one draw from `seed`.
pub fn sample_from_pdf(seed: u64, pdf: &[f32]) -> Result<usize> {
    if pdf.is_empty() {
        return Err(LiveModelError::Exploration("empty pdf".to_string()));
    }
    if pdf.iter().any(|p| p.is_nan() || *p < 0.0) {
        return Err(LiveModelError::Exploration(
            "pdf contains a negative or NaN probability".to_string(),
        ));
    }
    let total: f32 = pdf.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return Err(LiveModelError::Exploration(format!(
            "pdf total {total} is not positive"
        )));
    }

    let mut state = seed;
    let draw = next_uniform(&mut state) * total;
    let mut cumulative = 0.0f32;
    for (index, p) in pdf.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return Ok(index);
        }
    }
    // rounding left the draw past the final bucket
    Ok(pdf.iter().rposition(|p| *p > 0.0).unwrap_or(pdf.len() - 1))
}
