/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Syscalls that read the clocks: gettimeofday, time and clock_gettime.
//!
//! These all let the host syscall run, then overwrite its answer with the
//! virtual time of the caller's clock domain.

use nix::errno::Errno;
use syscalls::Sysno;
use tracing::info;
use tracing::trace;
use tracing::warn;

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
use crate::types::Timeval;

impl TimeVirt {
    /// gettimeofday
    pub fn patch_gettimeofday<G: Guest>(&self, guest: &mut G) -> PrePatch {
        self.expect_sysno(guest, "patch_gettimeofday", &[Sysno::gettimeofday]);
        if self.skip_time_virt(guest) {
            return PrePatch::Skip;
        }
        PrePatch::Continue(PostPatch::new(Pending::Gettimeofday))
    }

    /// time
    pub fn patch_time<G: Guest>(&self, guest: &mut G) -> PrePatch {
        self.expect_sysno(guest, "patch_time", &[Sysno::time]);
        if self.skip_time_virt(guest) {
            return PrePatch::Skip;
        }
        PrePatch::Continue(PostPatch::new(Pending::Time))
    }

    /// clock_gettime
    pub fn patch_clock_gettime<G: Guest>(&self, guest: &mut G) -> PrePatch {
        self.expect_sysno(guest, "patch_clock_gettime", &[Sysno::clock_gettime]);
        if self.skip_time_virt(guest) {
            return PrePatch::Skip;
        }
        PrePatch::Continue(PostPatch::new(Pending::ClockGettime))
    }

    pub(crate) fn post_gettimeofday<G: Guest>(&self, guest: &mut G) {
        trace!("[{}] Post-patching SYS_gettimeofday", guest.tid());
        let tv = Addr::from_raw(guest.arg(0));
        self.virt_gettimeofday(guest, tv);
    }

    pub(crate) fn post_time<G: Guest>(&self, guest: &mut G) {
        trace!("[{}] Post-patching SYS_time", guest.tid());
        let tloc = Addr::from_raw(guest.arg(0));
        self.virt_time(guest, tloc);
    }

    pub(crate) fn post_clock_gettime<G: Guest>(&self, guest: &mut G) {
        trace!("[{}] Post-patching SYS_clock_gettime", guest.tid());
        let ret = guest.return_value();
        if ret < 0 {
            trace!("clock_gettime() failed on the host ({}), leaving it", ret);
            return;
        }
        let clock_id = guest.arg(0) as libc::clockid_t;
        let tp = Addr::from_raw(guest.arg(1));
        self.virt_clock_gettime(guest, clock_id, tp);
    }

    /// Overwrite the `timeval` at `tv` with the virtual realtime clock. A null
    /// pointer is left to the host's own handling.
    ///
    /// This also serves vDSO virtualization, where there is no syscall to patch.
    pub fn virt_gettimeofday<G: Guest>(&self, guest: &mut G, tv: Option<Addr<Timeval>>) {
        let Some(tv) = tv else {
            return;
        };
        let orig = match read_guest(guest, tv) {
            Ok(orig) => orig,
            Err(err) => {
                info!("Failed read of gettimeofday() input: {}", err);
                return;
            }
        };
        let now = match self.virtual_now(guest.proc_idx(), HostClockId::Realtime) {
            Ok(now) => now,
            Err(err) => {
                info!("Not virtualizing gettimeofday(): {}", err);
                return;
            }
        };
        let patched = Timeval::from(now);
        trace!("Orig {:?}, patched {:?} ({})", orig, patched, now);
        if let Err(err) = write_guest(guest, tv, &patched) {
            info!("Failed write of gettimeofday() output: {}", err);
        }
    }

    /// Replace the result of `time()` with virtual whole seconds, also storing
    /// them through `tloc` when it is non-null. Error results are left alone.
    pub fn virt_time<G: Guest>(&self, guest: &mut G, tloc: Option<Addr<i64>>) {
        let orig = guest.return_value();
        // glibc will return -1; the raw syscall will return -EFAULT
        if orig == -1 || orig == neg_errno(Errno::EFAULT) {
            info!(
                "[{}] post-patch time(), returned error or EFAULT ({})",
                guest.tid(),
                orig
            );
            return;
        }
        let secs = match self.virtual_now(guest.proc_idx(), HostClockId::Realtime) {
            Ok(now) => now.as_secs() as i64,
            Err(err) => {
                info!("Not virtualizing time(): {}", err);
                return;
            }
        };
        trace!(
            "[{}] Post-patching time(), orig {}, new {}",
            guest.tid(),
            orig,
            secs
        );
        guest.set_return_value(secs);
        if let Some(tloc) = tloc {
            if let Err(err) = write_guest(guest, tloc, &secs) {
                info!("Failed write of time() output: {}", err);
            }
        }
    }

    /// Overwrite the `timespec` at `tp` with the virtual value of `clock_id`.
    /// Clocks without a virtual counterpart keep the host's answer.
    pub fn virt_clock_gettime<G: Guest>(
        &self,
        guest: &mut G,
        clock_id: libc::clockid_t,
        tp: Option<Addr<Timespec>>,
    ) {
        let Some(clock) = HostClockId::from_guest(clock_id) else {
            trace!("clock_gettime() on unvirtualized clock {}", clock_id);
            return;
        };
        if clock_id == libc::CLOCK_THREAD_CPUTIME_ID && self.cfg.warn_thread_cputime {
            warn!(
                "clock_gettime() called with CLOCK_THREAD_CPUTIME_ID, faking with CLOCK_PROCESS_CPUTIME_ID"
            );
        }
        let Some(tp) = tp else {
            return;
        };
        let orig = match read_guest(guest, tp) {
            Ok(orig) => orig,
            Err(err) => {
                info!("Failed read of clock_gettime() input: {}", err);
                return;
            }
        };
        let now = match self.virtual_now(guest.proc_idx(), clock) {
            Ok(now) => now,
            Err(err) => {
                info!("Not virtualizing clock_gettime(): {}", err);
                return;
            }
        };
        let patched = Timespec::from(now);
        trace!("Orig {:?}, patched {:?} ({:?})", orig, patched, clock);
        if let Err(err) = write_guest(guest, tp, &patched) {
            info!("Failed write of clock_gettime() output: {}", err);
        }
    }
}
