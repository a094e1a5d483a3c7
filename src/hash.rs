//! 128-bit hash keyspace arithmetic.
//!
//! The stream partitions a keyspace of `[0, 2^128 - 1]` across shards. This
//! module provides the primitive operations the rest of the crate builds on:
//! converting a hash range to a share of the keyspace, locating the hash at
//! a percentage offset into a range, and the fuzzy share comparison that
//! makes "equally balanced" well defined.
//!
//! # Why fuzzy comparison
//!
//! A target shard count N rarely divides `2^128` evenly, so perfectly
//! balanced shards differ by one hash unit. A stream of 3 shards holds
//! shares of roughly 33%, 33% and 34% of the keyspace - these must all
//! compare as equal or the rebalance pass would split and merge forever.
//! [`soft_cmp`] therefore rounds both operands half-down at
//! [`PCT_COMPARISON_SCALE`](crate::constants::PCT_COMPARISON_SCALE) decimal
//! places and treats a variation under one unit at a scale one order of
//! magnitude coarser as equality.

use std::cmp::Ordering;

use crate::constants::PCT_COMPARISON_SCALE;

/// Highest hash key in the keyspace: `2^128 - 1`.
pub const MAX_HASH: u128 = u128::MAX;

/// Size of the keyspace (`2^128`) as a float, for share arithmetic.
///
/// An f64 carries 53 bits of mantissa, so shares computed against this
/// constant are exact to roughly 1 part in 9e15 - far inside the 1e-9
/// tolerance used by [`soft_cmp`].
const KEYSPACE_SIZE: f64 = 340_282_366_920_938_463_463_374_607_431_768_211_456.0;

/// The share of the keyspace covered by the inclusive range
/// `[start_hash, end_hash]`.
///
/// The `+1` for inclusivity is applied in float space so that the
/// full-keyspace range yields exactly `1.0` without overflowing `u128`.
pub fn pct_of_keyspace(start_hash: u128, end_hash: u128) -> f64 {
    debug_assert!(start_hash <= end_hash);
    ((end_hash - start_hash) as f64 + 1.0) / KEYSPACE_SIZE
}

/// The hash key at `pct` of the keyspace beyond `start_hash`.
///
/// Used to compute split points: splitting a shard so its lower child holds
/// `pct` of the keyspace places the child boundary at this hash. Saturates
/// at [`MAX_HASH`] for offsets that would run off the end of the keyspace.
pub fn hash_at_pct_offset(start_hash: u128, pct: f64) -> u128 {
    debug_assert!(pct >= 0.0);
    // f64 -> u128 casts saturate, which is exactly the edge behavior we want.
    let offset = (pct * KEYSPACE_SIZE) as u128;
    start_hash.saturating_add(offset)
}

/// Round `value` at `scale` decimal places, resolving ties toward zero
/// (half-down), matching the comparison semantics used for share math.
fn round_half_down(value: f64, scale: i32) -> f64 {
    let factor = 10f64.powi(scale);
    let scaled = value * factor;
    let floor = scaled.floor();
    let frac = scaled - floor;
    // Ties (exactly .5) round down.
    if frac > 0.5 {
        (floor + 1.0) / factor
    } else {
        floor / factor
    }
}

/// Fuzzy comparison of two keyspace shares.
///
/// Both operands are rounded half-down at the comparison scale; if they then
/// differ by less than one unit at `10^-(scale-1)` (i.e. `1e-9`) they are
/// deemed equal, otherwise the result is the sign of `a - b`.
pub fn soft_cmp(a: f64, b: f64) -> Ordering {
    let accepted_variation = 10f64.powi(-(PCT_COMPARISON_SCALE - 1));

    let first = round_half_down(a, PCT_COMPARISON_SCALE);
    let second = round_half_down(b, PCT_COMPARISON_SCALE);

    if (first - second).abs() < accepted_variation {
        Ordering::Equal
    } else if first < second {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}
