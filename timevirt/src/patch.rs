/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The two-step contract between the instrumentation runtime and the syscall
//! virtualizers.
//!
//! 1. Before a syscall runs, `TimeVirt::pre_patch` inspects it. It either
//!    declines (`PrePatch::Skip`, the syscall runs untouched) or returns a
//!    `PostPatch` continuation, possibly after rewriting the syscall number and
//!    arguments in place.
//! 2. The syscall runs on the host.
//! 3. `TimeVirt::post_patch` consumes the continuation, fixing up the result
//!    and guest memory.

use syscalls::Sysno;

use crate::guest::Guest;
use crate::syscalls::sleep::SleepState;
use crate::syscalls::timers::AlarmState;
use crate::syscalls::timers::SetitimerState;
use crate::tool::TimeVirt;

/// Outcome of the pre-syscall step.
#[derive(Debug)]
#[must_use = "a continuation must be run after the syscall completes"]
pub enum PrePatch {
    /// Leave the syscall alone; there is nothing to do afterwards.
    Skip,
    /// Run the syscall (as possibly rewritten), then run this continuation.
    Continue(PostPatch),
}

impl PrePatch {
    /// Did the pre-patch step decline?
    pub fn is_skip(&self) -> bool {
        matches!(self, PrePatch::Skip)
    }
}

/// Outcome of the post-syscall step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostPatchAction {
    /// The syscall is complete.
    Nothing,
    /// Run the syscall again. Part of the runtime's contract for other patchers;
    /// time virtualization never asks for it.
    Reissue,
}

/// State captured before a syscall and consumed, exactly once, after it.
#[derive(Debug)]
pub struct PostPatch {
    pending: Pending,
}

#[derive(Debug)]
pub(crate) enum Pending {
    Gettimeofday,
    Time,
    ClockGettime,
    Sleep(SleepState),
    Alarm(AlarmState),
    Setitimer(SetitimerState),
}

impl PostPatch {
    pub(crate) fn new(pending: Pending) -> Self {
        PostPatch { pending }
    }
}

impl TimeVirt {
    /// Route a syscall to its pre-patch handler. Syscalls that are not
    /// virtualized are skipped.
    pub fn pre_patch<G: Guest>(&self, guest: &mut G) -> PrePatch {
        match guest.sysno() {
            Some(Sysno::gettimeofday) => self.patch_gettimeofday(guest),
            Some(Sysno::time) => self.patch_time(guest),
            Some(Sysno::clock_gettime) => self.patch_clock_gettime(guest),
            Some(Sysno::nanosleep | Sysno::clock_nanosleep) => self.patch_nanosleep(guest),
            Some(Sysno::alarm) => self.patch_alarm(guest),
            Some(Sysno::setitimer) => self.patch_setitimer(guest),
            Some(Sysno::getitimer) => self.patch_getitimer(guest),
            _ => PrePatch::Skip,
        }
    }

    /// Run the continuation returned by `pre_patch`, after the syscall has
    /// executed on the host.
    pub fn post_patch<G: Guest>(&self, guest: &mut G, patch: PostPatch) -> PostPatchAction {
        match patch.pending {
            Pending::Gettimeofday => self.post_gettimeofday(guest),
            Pending::Time => self.post_time(guest),
            Pending::ClockGettime => self.post_clock_gettime(guest),
            Pending::Sleep(state) => self.post_nanosleep(guest, state),
            Pending::Alarm(state) => self.post_alarm(guest, state),
            Pending::Setitimer(state) => self.post_setitimer(guest, state),
        }
        PostPatchAction::Nothing
    }
}
