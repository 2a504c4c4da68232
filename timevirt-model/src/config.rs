/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Time virtualization configuration.

use std::num::NonZeroU64;
use std::num::NonZeroUsize;

use clap::ArgAction;
use clap::Parser;
use serde::Deserialize;
use serde::Serialize;

use crate::time::CoreFrequency;

/// Configuration options for time virtualization.
#[derive(Debug, Serialize, Deserialize, Clone, Parser)]
#[clap(name = "timevirt")]
pub struct Config {
    /// Disable time virtualization. Every intercepted time syscall then runs
    /// against the host clock unmodified.
    #[clap(long = "no-virtualize-time", action = ArgAction::SetFalse)]
    pub virtualize_time: bool,

    /// Frequency of the simulated cores, in MHz. This fixes how simulated cycles
    /// convert to the nanoseconds a guest observes.
    #[clap(
        long,
        env = "TIMEVIRT_FREQ_MHZ",
        default_value = "2000",
        value_name = "uint64"
    )]
    pub freq_mhz: NonZeroU64,

    /// Simulated cycles per phase. Guest sleeps are rounded up to whole phases,
    /// with a minimum of one.
    #[clap(
        long,
        env = "TIMEVIRT_PHASE_LENGTH",
        default_value = "10000",
        value_name = "cycles"
    )]
    pub phase_length: NonZeroU64,

    /// Number of clock domains. Processes in the same domain share one mapping
    /// from simulated cycles to host time.
    #[clap(long, default_value = "1", value_name = "count")]
    pub clock_domains: NonZeroUsize,

    /// Stay quiet when `CLOCK_THREAD_CPUTIME_ID` is approximated by the
    /// process clock.
    #[clap(long = "no-warn-thread-cputime", action = ArgAction::SetFalse)]
    pub warn_thread_cputime: bool,
}

impl Config {
    /// The cycle/nanosecond conversion implied by `freq_mhz`.
    pub fn frequency(&self) -> CoreFrequency {
        CoreFrequency::from_mhz(self.freq_mhz)
    }

    /// Simulated cycles per phase.
    pub fn phase_length(&self) -> u64 {
        self.phase_length.get()
    }
}

/// N.B. we don't want to specify two different notions of "default", so we use the
/// `Parser` instance above.
impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["timevirt"])
    }
}
