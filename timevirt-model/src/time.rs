/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Virtual time values, POSIX time structures, and cycle/nanosecond conversion.

use std::fmt;
use std::num::NonZeroU64;

use bytemuck::Pod;
use bytemuck::Zeroable;
use serde::Deserialize;
use serde::Serialize;

/// Nanoseconds in one second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;
const NANOS_PER_MICRO: u64 = 1_000;

/// Largest legal value of `tv_nsec`.
pub const MAX_TV_NSEC: i64 = 999_999_999;

/// Largest legal value of `tv_usec`.
pub const MAX_TV_USEC: i64 = 999_999;

// Cycle/nanosecond conversion:
//--------------------------------------------------------------------------------

/// The simulated core frequency, which fixes how many simulated cycles make a
/// nanosecond.
///
/// Conversions are deliberately asymmetric: cycles to nanoseconds rounds down
/// and nanoseconds to cycles rounds up. Going nanoseconds -> cycles ->
/// nanoseconds therefore never shrinks a duration, so a sleep computed this
/// way can only end late, never early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoreFrequency {
    mhz: NonZeroU64,
}

impl CoreFrequency {
    /// Create a frequency from a number of MHz (cycles per microsecond).
    pub const fn from_mhz(mhz: NonZeroU64) -> Self {
        CoreFrequency { mhz }
    }

    /// Cycles per microsecond.
    pub fn mhz(&self) -> u64 {
        self.mhz.get()
    }

    /// Convert simulated cycles to nanoseconds, rounding down.
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        saturate(cycles as u128 * NANOS_PER_MICRO as u128 / self.mhz.get() as u128)
    }

    /// Convert nanoseconds to simulated cycles, rounding up.
    pub fn ns_to_cycles(&self, ns: u64) -> u64 {
        saturate((ns as u128 * self.mhz.get() as u128).div_ceil(NANOS_PER_MICRO as u128))
    }
}

fn saturate(x: u128) -> u64 {
    u64::try_from(x).unwrap_or(u64::MAX)
}

// Virtual time:
//--------------------------------------------------------------------------------

/// An absolute point in virtual time, in nanoseconds since the Unix epoch (for
/// the realtime clock) or since an arbitrary origin (for the others).
///
/// Parts of this API are largely inspired by `std::time::Duration`.
#[derive(
    Default,
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    Ord,
    PartialOrd,
    Eq,
    PartialEq,
    Hash
)]
pub struct VirtualTime(u64);

impl VirtualTime {
    /// 0 integer nanoseconds.
    pub const ZERO: VirtualTime = VirtualTime(0);

    /// Creates a new `VirtualTime` from the specified number of nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        VirtualTime(nanos)
    }

    /// The value of a clock whose offset is `offset_ns` after `sim_ns` nanoseconds
    /// of simulated progress. Clamped at zero: a clock never reads before its origin.
    pub fn from_offset(offset_ns: i64, sim_ns: u64) -> Self {
        let ns = offset_ns as i128 + sim_ns as i128;
        VirtualTime(ns.clamp(0, u64::MAX as i128) as u64)
    }

    /// Returns the total number of nanoseconds contained by this `VirtualTime`.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Returns the total number of *whole* seconds contained by this `VirtualTime`.
    pub fn as_secs(&self) -> u64 {
        self.0 / NANOS_PER_SEC
    }

    /// Returns the fractional part of this `VirtualTime`, in microseconds.
    pub fn subsec_micros(&self) -> u32 {
        ((self.0 % NANOS_PER_SEC) / NANOS_PER_MICRO) as u32
    }

    /// Returns the fractional part of this `VirtualTime`, in nanoseconds.
    pub fn subsec_nanos(&self) -> u32 {
        (self.0 % NANOS_PER_SEC) as u32
    }

    /// Nanoseconds from `self` until `later`, or zero if `later` is not later.
    pub fn nanos_until(&self, later: VirtualTime) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Start with the raw characters for printed u64:
        let chars = format!("{}", self.0);
        let mut remain = chars.len();
        let mut first_char = true;
        for ch in chars.chars() {
            if !first_char && remain % 3 == 0 {
                if remain == 9 {
                    write!(f, ".")?;
                } else {
                    write!(f, "_")?;
                }
            }
            first_char = false;
            remain -= 1;
            write!(f, "{}", ch)?;
        }
        if chars.len() <= 9 {
            write!(f, "ns")
        } else {
            write!(f, "s")
        }
    }
}

impl From<VirtualTime> for Timespec {
    fn from(t: VirtualTime) -> Timespec {
        Timespec {
            tv_sec: t.as_secs() as i64,
            tv_nsec: t.subsec_nanos() as i64,
        }
    }
}

impl From<VirtualTime> for Timeval {
    fn from(t: VirtualTime) -> Timeval {
        Timeval {
            tv_sec: t.as_secs() as i64,
            tv_usec: t.subsec_micros() as i64,
        }
    }
}

// POSIX structures, in native layout:
//--------------------------------------------------------------------------------

/// `struct timespec`, with serialize/deserialize instances.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Pod, Zeroable, Serialize, Deserialize)]
pub struct Timespec {
    /// seconds
    pub tv_sec: i64,
    /// nanoseconds
    pub tv_nsec: i64,
}

impl Timespec {
    /// Split a nanosecond count into seconds and nanoseconds.
    pub fn from_nanos(ns: u64) -> Self {
        Timespec {
            tv_sec: (ns / NANOS_PER_SEC) as i64,
            tv_nsec: (ns % NANOS_PER_SEC) as i64,
        }
    }

    /// Total nanoseconds, or `None` if the structure is not a valid
    /// non-negative duration (negative seconds, or `tv_nsec` outside
    /// `[0, 999_999_999]`). Valid durations beyond `u64` saturate.
    pub fn to_nanos(&self) -> Option<u64> {
        if self.tv_sec < 0 || !(0..=MAX_TV_NSEC).contains(&self.tv_nsec) {
            return None;
        }
        Some(
            (self.tv_sec as u64)
                .saturating_mul(NANOS_PER_SEC)
                .saturating_add(self.tv_nsec as u64),
        )
    }
}

/// `struct timeval`, with serialize/deserialize instances.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Pod, Zeroable, Serialize, Deserialize)]
pub struct Timeval {
    /// seconds
    pub tv_sec: i64,
    /// microseconds
    pub tv_usec: i64,
}

impl Timeval {
    /// Split a nanosecond count into seconds and microseconds, truncating the
    /// sub-microsecond part.
    pub fn from_nanos(ns: u64) -> Self {
        Timeval {
            tv_sec: (ns / NANOS_PER_SEC) as i64,
            tv_usec: ((ns % NANOS_PER_SEC) / NANOS_PER_MICRO) as i64,
        }
    }

    /// Total nanoseconds, or `None` if the structure is not a valid
    /// non-negative duration. Valid durations beyond `u64` saturate.
    pub fn to_nanos(&self) -> Option<u64> {
        if self.tv_sec < 0 || !(0..=MAX_TV_USEC).contains(&self.tv_usec) {
            return None;
        }
        Some(
            (self.tv_sec as u64)
                .saturating_mul(NANOS_PER_SEC)
                .saturating_add(self.tv_usec as u64 * NANOS_PER_MICRO),
        )
    }
}

/// `struct itimerval`: the reload interval and the time until next expiry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[derive(Pod, Zeroable, Serialize, Deserialize)]
pub struct Itimerval {
    /// Reload value applied after each expiry.
    pub it_interval: Timeval,
    /// Time until the next expiry; zero means disarmed.
    pub it_value: Timeval,
}

impl Itimerval {
    /// A timer that is not armed and will not reload.
    pub const DISARMED: Itimerval = Itimerval {
        it_interval: Timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        it_value: Timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
    };
}
