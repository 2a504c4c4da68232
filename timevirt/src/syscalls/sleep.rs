/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! nanosleep and clock_nanosleep, turned into waits on simulated phases.
//!
//! The requested duration becomes a wakeup phase registered with the
//! scheduler, and the syscall itself becomes an untimed `FUTEX_WAIT` on the
//! word the scheduler hands back. The host thread therefore blocks until the
//! scheduler releases it at that phase; no host timer is involved.

use nix::errno::Errno;
use syscalls::Sysno;
use tracing::info;
use tracing::trace;

use crate::guest::Addr;
use crate::guest::Guest;
use crate::patch::Pending;
use crate::patch::PostPatch;
use crate::patch::PrePatch;
use crate::sim::HostClockId;
use crate::syscalls::helpers::neg_errno;
use crate::syscalls::helpers::read_guest;
use crate::syscalls::helpers::write_guest;
use crate::tool::TimeVirt;
use crate::types::Timespec;
use crate::virtlog;

/// Number of syscall arguments saved across the futex rewrite.
const SAVED_ARGS: usize = 4;

/// What a sleeping thread needs after its futex wait returns.
#[derive(Debug)]
pub(crate) struct SleepState {
    sysno: Sysno,
    wakeup_phase: u64,
    saved_args: [usize; SAVED_ARGS],
    /// Where to report the unslept time; never set for absolute sleeps.
    rem: Option<Addr<Timespec>>,
}

/// The argument layout of the two sleep syscalls.
struct SleepRequest {
    req: Option<Addr<Timespec>>,
    rem: Option<Addr<Timespec>>,
    /// For absolute sleeps, the clock the deadline is measured on.
    deadline_clock: Option<HostClockId>,
}

impl TimeVirt {
    /// Phases to wait for `wait_ns` nanoseconds: the cycle count rounded up to
    /// whole phases, and never less than one phase.
    pub fn phases_for_wait(&self, wait_ns: u64) -> u64 {
        let wait_cycles = self.freq.ns_to_cycles(wait_ns);
        wait_cycles.div_ceil(self.cfg.phase_length()).max(1)
    }

    /// Time left until `wakeup_phase` when `now_phase` has been reached.
    pub fn remaining_until_phase(&self, wakeup_phase: u64, now_phase: u64) -> Timespec {
        assert!(
            wakeup_phase >= now_phase,
            "sleep interrupted at phase {} after its wakeup phase {}",
            now_phase,
            wakeup_phase
        );
        let remaining_cycles = (wakeup_phase - now_phase).saturating_mul(self.cfg.phase_length());
        Timespec::from_nanos(self.freq.cycles_to_ns(remaining_cycles))
    }

    fn sleep_request<G: Guest>(&self, guest: &G, sysno: Sysno) -> Option<SleepRequest> {
        if sysno == Sysno::nanosleep {
            trace!("[{}] Pre-patching SYS_nanosleep", guest.tid());
            return Some(SleepRequest {
                req: Addr::from_raw(guest.arg(0)),
                rem: Addr::from_raw(guest.arg(1)),
                deadline_clock: None,
            });
        }

        trace!("[{}] Pre-patching SYS_clock_nanosleep", guest.tid());
        let clock_id = guest.arg(0) as libc::clockid_t;
        let flags = guest.arg(1) as libc::c_int;
        let deadline_clock = match flags {
            0 => None,
            libc::TIMER_ABSTIME => {
                trace!(
                    "[{}] SYS_clock_nanosleep requests TIMER_ABSTIME, offsetting",
                    guest.tid()
                );
                Some(match clock_id {
                    libc::CLOCK_MONOTONIC => HostClockId::Monotonic,
                    _ => HostClockId::Realtime,
                })
            }
            _ => {
                trace!(
                    "Unhandled clock_nanosleep flags {:#x}, letting syscall through...",
                    flags
                );
                return None;
            }
        };
        Some(SleepRequest {
            req: Addr::from_raw(guest.arg(2)),
            rem: Addr::from_raw(guest.arg(3)),
            deadline_clock,
        })
    }

    /// nanosleep and clock_nanosleep
    pub fn patch_nanosleep<G: Guest>(&self, guest: &mut G) -> PrePatch {
        let sysno = self.expect_sysno(
            guest,
            "patch_nanosleep",
            &[Sysno::nanosleep, Sysno::clock_nanosleep],
        );
        if self.skip_time_virt(guest) {
            return PrePatch::Skip;
        }
        let Some(request) = self.sleep_request(guest, sysno) else {
            return PrePatch::Skip;
        };

        // The kernel answers EFAULT for a null request, and EINVAL for a malformed one.
        let Some(req) = request.req else {
            return PrePatch::Skip;
        };
        let ts = match read_guest(guest, req) {
            Ok(ts) => ts,
            Err(err) => {
                info!("Failed read of nanosleep() request: {}", err);
                return PrePatch::Skip;
            }
        };
        let Some(requested_ns) = ts.to_nanos() else {
            trace!("Invalid sleep request {:?}, letting syscall through", ts);
            return PrePatch::Skip;
        };

        let offset_ns = match request.deadline_clock {
            None => 0,
            Some(clock) => match self.virtual_now(guest.proc_idx(), clock) {
                Ok(now) => now.as_nanos(),
                Err(err) => {
                    info!("Not virtualizing absolute sleep: {}", err);
                    return PrePatch::Skip;
                }
            },
        };
        let wait_ns = requested_ns.saturating_sub(offset_ns);
        let wakeup_phase = self
            .sim
            .num_phases()
            .saturating_add(self.phases_for_wait(wait_ns));

        let token = self
            .sched
            .mark_for_sleep(guest.proc_idx(), guest.tid(), wakeup_phase);
        virtlog!(
            "[{}] sleeping {}ns, until phase {}",
            guest.tid(),
            wait_ns,
            wakeup_phase
        );

        let mut saved_args = [0; SAVED_ARGS];
        for (i, arg) in saved_args.iter_mut().enumerate() {
            *arg = guest.arg(i);
        }
        let rem = match request.deadline_clock {
            None => request.rem,
            Some(_) => None,
        };

        // Turn this into a non-timed FUTEX_WAIT syscall. The scheduler leaves the
        // word at 1 until the wakeup phase.
        guest.set_syscall_number(Sysno::futex.id() as usize);
        guest.set_arg(0, token.addr());
        guest.set_arg(1, libc::FUTEX_WAIT as usize);
        guest.set_arg(2, 1);
        guest.set_arg(3, 0);

        PrePatch::Continue(PostPatch::new(Pending::Sleep(SleepState {
            sysno,
            wakeup_phase,
            saved_args,
            rem,
        })))
    }

    pub(crate) fn post_nanosleep<G: Guest>(&self, guest: &mut G, state: SleepState) {
        trace!("[{}] Post-patching SYS_{}", guest.tid(), state.sysno.name());

        let ret = guest.return_value();

        // Restore pre-call syscall. This clobbers the result register.
        guest.set_syscall_number(state.sysno.id() as usize);
        for (i, arg) in state.saved_args.iter().enumerate() {
            guest.set_arg(i, *arg);
        }

        let interrupted = if ret == neg_errno(Errno::EWOULDBLOCK) {
            // The wakeup phase had already passed; a very very short sleep.
            trace!("Fixing EWOULDBLOCK --> 0");
            guest.set_return_value(0);
            false
        } else if ret == neg_errno(Errno::EINTR) {
            guest.set_return_value(ret);
            true
        } else {
            assert_eq!(ret, 0, "unexpected result of a phase sleep: {}", ret);
            guest.set_return_value(0);
            false
        };

        let Some(rem) = state.rem else {
            return;
        };
        let remaining = if interrupted {
            let remaining = self.remaining_until_phase(state.wakeup_phase, self.sim.num_phases());
            info!(
                "[{}] [interrupted] sleep until phase {}, {:?} early",
                guest.tid(),
                state.wakeup_phase,
                remaining
            );
            remaining
        } else {
            Timespec::default()
        };
        if let Err(err) = write_guest(guest, rem, &remaining) {
            info!("Failed write of nanosleep() remaining time: {}", err);
        }
    }
}
