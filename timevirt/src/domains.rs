/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Clock domains: groups of processes sharing one mapping from simulated
//! cycles to host time.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use nix::errno::Errno;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::error::Error;
use crate::sim::HostClock;
use crate::sim::HostClockId;
use crate::types::CoreFrequency;
use crate::types::VirtualTime;
use crate::virtlog;

/// Offsets of one clock domain.
///
/// A clock reads `offset + cycles_to_ns(sim_cycles)`, the cycle counter reads
/// `rdtsc_offset + sim_cycles`. A zero `realtime_offset_ns` means the offsets
/// were never captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDomainInfo {
    /// Offset of `CLOCK_REALTIME`, in nanoseconds.
    pub realtime_offset_ns: i64,
    /// Offset of `CLOCK_MONOTONIC`, in nanoseconds.
    pub monotonic_offset_ns: i64,
    /// Offset of `CLOCK_PROCESS_CPUTIME_ID`, in nanoseconds.
    pub process_offset_ns: i64,
    /// Offset of the hardware cycle counter, in cycles.
    pub rdtsc_offset: u64,
}

impl ClockDomainInfo {
    /// Have the offsets been captured?
    pub fn is_captured(&self) -> bool {
        self.realtime_offset_ns != 0
    }

    /// The nanosecond offset of one clock.
    pub fn offset_ns(&self, clock: HostClockId) -> i64 {
        match clock {
            HostClockId::Realtime => self.realtime_offset_ns,
            HostClockId::Monotonic => self.monotonic_offset_ns,
            HostClockId::ProcessCputime => self.process_offset_ns,
        }
    }

    /// The value of `clock` after `sim_ns` nanoseconds of simulated time.
    pub fn clock_value(&self, clock: HostClockId, sim_ns: u64) -> VirtualTime {
        VirtualTime::from_offset(self.offset_ns(clock), sim_ns)
    }

    /// The cycle counter after `sim_cycles` simulated cycles.
    pub fn rdtsc_value(&self, sim_cycles: u64) -> u64 {
        self.rdtsc_offset.wrapping_add(sim_cycles)
    }
}

fn offset_from(host_ns: u64, sim_ns: u64) -> i64 {
    (host_ns as i128 - sim_ns as i128).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// The fixed set of clock domains, allocated once at simulator init.
#[derive(Debug)]
pub struct ClockDomains {
    domains: Vec<Mutex<ClockDomainInfo>>,
}

impl ClockDomains {
    /// Allocate `count` domains, none of them captured.
    pub fn new(count: NonZeroUsize) -> Self {
        ClockDomains {
            domains: (0..count.get())
                .map(|_| Mutex::new(ClockDomainInfo::default()))
                .collect(),
        }
    }

    /// Number of domains.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Always false: there is at least one domain.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    fn get(&self, domain: usize) -> Result<&Mutex<ClockDomainInfo>, Error> {
        self.domains.get(domain).ok_or(Error::UnknownClockDomain {
            domain,
            count: self.domains.len(),
        })
    }

    /// Anchor the domain's clocks to the host's, so that at the current
    /// simulated cycle count every virtual clock reads what the host clock
    /// reads now.
    ///
    /// Only does anything on first use of the domain, or when `force` is set
    /// (a process leaving fast-forward, where simulated time jumps ahead and the
    /// virtual clocks must jump with it). Returns whether offsets were written.
    ///
    /// `sim_cycles` is only called with the domain locked, so the cycle count
    /// and the host readings are taken together.
    pub fn capture_clocks(
        &self,
        domain: usize,
        force: bool,
        host: &dyn HostClock,
        freq: CoreFrequency,
        sim_cycles: impl FnOnce() -> u64,
    ) -> Result<bool, Error> {
        let mut dom = self.get(domain)?.lock().unwrap();
        if !force && dom.is_captured() {
            return Ok(false);
        }
        info!("Adjusting clocks, domain {}, de-ffwd {}", domain, force);
        let sim_cycles = sim_cycles();

        let read = |clock: HostClockId| -> Result<u64, Error> {
            let ts = host
                .clock_gettime(clock)
                .map_err(|errno| Error::HostClock { clock, errno })?;
            ts.to_nanos().ok_or(Error::HostClock {
                clock,
                errno: Errno::ERANGE,
            })
        };
        let realtime_ns = read(HostClockId::Realtime)?;
        let monotonic_ns = read(HostClockId::Monotonic)?;
        let process_ns = read(HostClockId::ProcessCputime)?;
        let real_rdtsc = host.rdtsc();

        let sim_ns = freq.cycles_to_ns(sim_cycles);
        *dom = ClockDomainInfo {
            realtime_offset_ns: offset_from(realtime_ns, sim_ns),
            monotonic_offset_ns: offset_from(monotonic_ns, sim_ns),
            process_offset_ns: offset_from(process_ns, sim_ns),
            rdtsc_offset: real_rdtsc.wrapping_sub(sim_cycles),
        };
        virtlog!(
            "domain {} clocks captured at {} simulated cycles",
            domain,
            sim_cycles
        );
        Ok(true)
    }

    /// A snapshot of the domain's offsets.
    pub fn offsets(&self, domain: usize) -> Result<ClockDomainInfo, Error> {
        Ok(*self.get(domain)?.lock().unwrap())
    }

    /// What the hardware cycle counter reads in `domain` at `sim_cycles`.
    pub fn phase_rdtsc(&self, domain: usize, sim_cycles: u64) -> Result<u64, Error> {
        Ok(self.offsets(domain)?.rdtsc_value(sim_cycles))
    }
}
