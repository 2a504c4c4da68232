/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! alarm and setitimer. The scheduler keeps these timers in phase space; the
//! host syscall is neutralized so no real signal is ever armed.

use syscalls::Sysno;
use tracing::info;
use tracing::trace;

use crate::guest::Addr;
use crate::guest::Guest;
use crate::patch::Pending;
use crate::patch::PostPatch;
use crate::patch::PrePatch;
use crate::syscalls::helpers::read_guest;
use crate::syscalls::helpers::write_guest;
use crate::tool::TimeVirt;
use crate::types::Itimerval;

#[derive(Debug)]
pub(crate) struct AlarmState {
    orig_secs: usize,
    remaining: u32,
}

#[derive(Debug)]
pub(crate) struct SetitimerState {
    orig_new: usize,
    scratch: Addr<Itimerval>,
    old: Itimerval,
    status: i32,
}

impl TimeVirt {
    /// alarm
    pub fn patch_alarm<G: Guest>(&self, guest: &mut G) -> PrePatch {
        self.expect_sysno(guest, "patch_alarm", &[Sysno::alarm]);
        if self.skip_time_virt(guest) {
            return PrePatch::Skip;
        }
        trace!("[{}] Patching SYS_alarm", guest.tid());

        let orig_secs = guest.arg(0);
        let remaining = self
            .sched
            .interval_timer()
            .set_alarm(guest.pid(), orig_secs as u32);

        // alarm(0) only clears whatever the host had pending.
        guest.set_arg(0, 0);
        PrePatch::Continue(PostPatch::new(Pending::Alarm(AlarmState {
            orig_secs,
            remaining,
        })))
    }

    pub(crate) fn post_alarm<G: Guest>(&self, guest: &mut G, state: AlarmState) {
        guest.set_arg(0, state.orig_secs);
        trace!(
            "[{}] alarm({}) returns {} remaining",
            guest.tid(),
            state.orig_secs,
            state.remaining
        );
        guest.set_return_value(i64::from(state.remaining));
    }

    /// getitimer is not virtualized.
    pub fn patch_getitimer<G: Guest>(&self, guest: &mut G) -> PrePatch {
        self.expect_sysno(guest, "patch_getitimer", &[Sysno::getitimer]);
        PrePatch::Skip
    }

    /// setitimer
    pub fn patch_setitimer<G: Guest>(&self, guest: &mut G) -> PrePatch {
        self.expect_sysno(guest, "patch_setitimer", &[Sysno::setitimer]);
        if self.skip_time_virt(guest) {
            return PrePatch::Skip;
        }
        trace!("[{}] Patching SYS_setitimer", guest.tid());

        let which = guest.arg(0) as i32;
        let orig_new = guest.arg(1);
        let new = match Addr::<Itimerval>::from_raw(orig_new) {
            None => Itimerval::DISARMED,
            Some(addr) => match read_guest(guest, addr) {
                Ok(new) => new,
                Err(err) => {
                    info!("Failed read of setitimer() new value: {}", err);
                    return PrePatch::Skip;
                }
            },
        };
        let scratch = match guest.stash(&Itimerval::DISARMED) {
            Ok(scratch) => scratch,
            Err(errno) => {
                info!("No scratch space to neutralize setitimer(): {}", errno);
                return PrePatch::Skip;
            }
        };

        let mut old = Itimerval::DISARMED;
        let status = self
            .sched
            .interval_timer()
            .set_interval_timer(guest.pid(), which, &new, &mut old);
        trace!(
            "setitimer({}, {:?}) -> {}, previously {:?}",
            which, new, status, old
        );

        // The host call installs a disarmed timer.
        guest.set_arg(1, scratch.as_raw());
        PrePatch::Continue(PostPatch::new(Pending::Setitimer(SetitimerState {
            orig_new,
            scratch,
            old,
            status,
        })))
    }

    pub(crate) fn post_setitimer<G: Guest>(&self, guest: &mut G, state: SetitimerState) {
        guest.set_arg(1, state.orig_new);

        if let Some(old) = Addr::from_raw(guest.arg(2)) {
            if let Err(err) = write_guest(guest, old, &state.old) {
                info!("Failed write of setitimer() old value: {}", err);
            }
        }
        guest.free_scratch(state.scratch.as_raw());

        guest.set_return_value(i64::from(state.status));
    }
}
