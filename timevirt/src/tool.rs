/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The time virtualization tool and the simulator state it consults.

use std::sync::Arc;

use syscalls::Sysno;
use tracing::info;

use crate::config::Config;
use crate::domains::ClockDomains;
use crate::error::Error;
use crate::guest::Guest;
use crate::sim::HostClock;
use crate::sim::HostClockId;
use crate::sim::PhaseScheduler;
use crate::sim::SimCore;
use crate::types::CoreFrequency;
use crate::types::ProcIdx;
use crate::types::VirtualTime;

/// Virtualizes the time-related syscalls of simulated processes.
///
/// One instance is shared by every intercepted thread. All handlers take
/// `&self`; the only mutable state is the clock domain registry, which locks
/// each domain individually.
pub struct TimeVirt {
    pub(crate) cfg: Config,
    pub(crate) freq: CoreFrequency,
    pub(crate) domains: ClockDomains,
    pub(crate) sim: Arc<dyn SimCore>,
    pub(crate) sched: Arc<dyn PhaseScheduler>,
    pub(crate) host: Arc<dyn HostClock>,
}

impl TimeVirt {
    /// Create the tool, allocating `cfg.clock_domains` uncaptured domains.
    pub fn new(
        cfg: Config,
        sim: Arc<dyn SimCore>,
        sched: Arc<dyn PhaseScheduler>,
        host: Arc<dyn HostClock>,
    ) -> Self {
        TimeVirt {
            freq: cfg.frequency(),
            domains: ClockDomains::new(cfg.clock_domains),
            cfg,
            sim,
            sched,
            host,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The clock domain registry.
    pub fn domains(&self) -> &ClockDomains {
        &self.domains
    }

    /// Capture the clock offsets of `proc`'s domain. The simulator calls this when
    /// a process starts (capturing only if the domain is fresh) and when it leaves
    /// fast-forward (always recapturing).
    pub fn capture_clocks(&self, proc: ProcIdx, leaving_fast_forward: bool) -> Result<bool, Error> {
        let domain = self.sim.clock_domain(proc);
        let captured = self.domains.capture_clocks(
            domain,
            leaving_fast_forward,
            self.host.as_ref(),
            self.freq,
            || self.sim.glob_phase_cycles(),
        )?;
        if captured {
            info!("[{}] Adjusted clocks of domain {}", proc, domain);
        }
        Ok(captured)
    }

    /// What the hardware cycle counter reads for `proc` right now. Used wherever
    /// the guest reads the TSC directly.
    pub fn phase_rdtsc(&self, proc: ProcIdx) -> Result<u64, Error> {
        self.domains
            .phase_rdtsc(self.sim.clock_domain(proc), self.sim.glob_phase_cycles())
    }

    /// What `clock` reads for `proc` right now.
    pub fn virtual_now(&self, proc: ProcIdx, clock: HostClockId) -> Result<VirtualTime, Error> {
        let dom = self.domains.offsets(self.sim.clock_domain(proc))?;
        let sim_ns = self.freq.cycles_to_ns(self.sim.glob_phase_cycles());
        Ok(dom.clock_value(clock, sim_ns))
    }

    /// Time virtualization stays off for helper threads, for processes that are
    /// fast-forwarding, and when disabled by configuration. Checking both the
    /// thread and the process keeps a call that straddles a fast-forward toggle
    /// from being half-virtualized.
    pub(crate) fn skip_time_virt<G: Guest>(&self, guest: &G) -> bool {
        !self.cfg.virtualize_time
            || guest.is_helper_thread()
            || self.sim.in_fast_forward(guest.proc_idx())
    }

    /// Handlers are only ever routed their own syscalls; anything else is a bug
    /// in the patch table.
    pub(crate) fn expect_sysno<G: Guest>(&self, guest: &G, handler: &str, allowed: &[Sysno]) -> Sysno {
        match guest.sysno() {
            Some(sysno) if allowed.contains(&sysno) => sysno,
            other => panic!(
                "{} invoked for syscall {:?} (raw {}), expected one of {:?}",
                handler,
                other,
                guest.syscall_number(),
                allowed
            ),
        }
    }
}
