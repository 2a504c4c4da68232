/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Collaborators owned by the rest of the simulator: the phase clock and
//! process table, the scheduler that parks sleeping threads, and the host's
//! real clocks.

use nix::errno::Errno;
use nix::time::ClockId;
use nix::unistd::Pid;

use crate::types::Itimerval;
use crate::types::ProcIdx;
use crate::types::SimTid;
use crate::types::Timespec;

/// The simulator core's view of simulated progress and of its processes.
///
/// The counters only ever move forward. Reading a stale value can delay a
/// wakeup but never make it early.
pub trait SimCore: Send + Sync {
    /// Cycles of phase-aligned simulated time elapsed so far.
    fn glob_phase_cycles(&self) -> u64;

    /// Number of completed phases.
    fn num_phases(&self) -> u64;

    /// The clock domain a process belongs to.
    fn clock_domain(&self, proc: ProcIdx) -> usize;

    /// Is the process currently fast-forwarding?
    fn in_fast_forward(&self, proc: ProcIdx) -> bool;
}

/// Handle to a futex word the scheduler releases when the sleeping thread's
/// wakeup phase is reached. The word holds 1 while the thread must keep
/// sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SleepToken(usize);

impl SleepToken {
    /// Wrap the guest address of the futex word.
    pub const fn from_addr(addr: usize) -> Self {
        SleepToken(addr)
    }

    /// The guest address of the futex word.
    pub fn addr(&self) -> usize {
        self.0
    }
}

/// The scheduler's phase-driven blocking service.
pub trait PhaseScheduler: Send + Sync {
    /// Park `tid` until simulated progress reaches `wakeup_phase`.
    fn mark_for_sleep(&self, proc: ProcIdx, tid: SimTid, wakeup_phase: u64) -> SleepToken;

    /// The per-process alarm and interval-timer bookkeeping.
    fn interval_timer(&self) -> &dyn IntervalTimer;
}

/// Alarm and interval-timer bookkeeping, kept in phase space by the scheduler.
pub trait IntervalTimer: Send + Sync {
    /// Arm an alarm for `secs` seconds (0 cancels), returning the seconds that
    /// were left on the previous alarm.
    fn set_alarm(&self, pid: Pid, secs: u32) -> u32;

    /// Install `new` as timer `which`, storing the previous setting in `old`.
    /// Returns the syscall status code.
    fn set_interval_timer(&self, pid: Pid, which: i32, new: &Itimerval, old: &mut Itimerval)
    -> i32;
}

/// Host clocks that offsets are captured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostClockId {
    /// `CLOCK_REALTIME`
    Realtime,
    /// `CLOCK_MONOTONIC`
    Monotonic,
    /// `CLOCK_PROCESS_CPUTIME_ID`
    ProcessCputime,
}

impl HostClockId {
    /// Map a guest `clockid_t` onto the clock whose offset virtualizes it.
    /// `CLOCK_THREAD_CPUTIME_ID` is approximated by the process clock.
    pub fn from_guest(clock_id: libc::clockid_t) -> Option<Self> {
        match clock_id {
            libc::CLOCK_REALTIME => Some(HostClockId::Realtime),
            libc::CLOCK_MONOTONIC => Some(HostClockId::Monotonic),
            libc::CLOCK_PROCESS_CPUTIME_ID | libc::CLOCK_THREAD_CPUTIME_ID => {
                Some(HostClockId::ProcessCputime)
            }
            _ => None,
        }
    }
}

/// The real clocks of the machine running the simulator.
pub trait HostClock: Send + Sync {
    /// Read a host clock.
    fn clock_gettime(&self, clock: HostClockId) -> Result<Timespec, Errno>;

    /// Read the hardware cycle counter.
    fn rdtsc(&self) -> u64;
}

/// `HostClock` backed by the actual system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostClock;

impl HostClock for SystemHostClock {
    fn clock_gettime(&self, clock: HostClockId) -> Result<Timespec, Errno> {
        let id = match clock {
            HostClockId::Realtime => ClockId::CLOCK_REALTIME,
            HostClockId::Monotonic => ClockId::CLOCK_MONOTONIC,
            HostClockId::ProcessCputime => ClockId::CLOCK_PROCESS_CPUTIME_ID,
        };
        let ts = nix::time::clock_gettime(id)?;
        Ok(Timespec {
            tv_sec: ts.tv_sec() as i64,
            tv_nsec: ts.tv_nsec() as i64,
        })
    }

    #[cfg(target_arch = "x86_64")]
    fn rdtsc(&self) -> u64 {
        // SAFETY: rdtsc has no preconditions on x86_64.
        unsafe { core::arch::x86_64::_rdtsc() }
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn rdtsc(&self) -> u64 {
        self.clock_gettime(HostClockId::Monotonic)
            .ok()
            .and_then(|ts| ts.to_nanos())
            .unwrap_or(0)
    }
}
