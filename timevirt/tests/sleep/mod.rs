/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Tests nanosleep and clock_nanosleep as waits on simulated phases.

use std::num::NonZeroU64;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use syscalls::Sysno;
use timevirt::Config;
use timevirt::PostPatch;
use timevirt::PrePatch;
use timevirt::types::ProcIdx;
use timevirt::types::SimTid;
use timevirt::types::Timespec;
use timevirt_testutils::FakeGuest;
use timevirt_testutils::Fixture;
use timevirt_testutils::HOST_MONOTONIC_SECS;
use timevirt_testutils::HOST_REALTIME_SECS;
use timevirt_testutils::TEST_CFG;

const REQ: usize = 0x3000;
const REM: usize = 0x4000;

/// Pre-filled into `rem` to tell whether it was written.
const UNTOUCHED: Timespec = Timespec {
    tv_sec: 9,
    tv_nsec: 9,
};

fn ts(tv_sec: i64, tv_nsec: i64) -> Timespec {
    Timespec { tv_sec, tv_nsec }
}

fn nanosleep(req: Timespec) -> FakeGuest {
    let mut guest = FakeGuest::new(Sysno::nanosleep, &[REQ, REM]);
    guest.mem.put(REQ, req);
    guest.mem.put(REM, UNTOUCHED);
    guest
}

fn clock_nanosleep(clock: libc::clockid_t, flags: libc::c_int, req: Timespec) -> FakeGuest {
    let mut guest = FakeGuest::new(
        Sysno::clock_nanosleep,
        &[clock as usize, flags as usize, REQ, REM],
    );
    guest.mem.put(REQ, req);
    guest.mem.put(REM, UNTOUCHED);
    guest
}

fn pre(f: &Fixture, guest: &mut FakeGuest) -> PostPatch {
    match f.tool.pre_patch(guest) {
        PrePatch::Continue(post) => post,
        PrePatch::Skip => panic!("sleep was not virtualized"),
    }
}

fn post(f: &Fixture, guest: &mut FakeGuest, post: PostPatch, host_ret: i64) {
    guest.ret = host_ret;
    let _ = f.tool.post_patch(guest, post);
}

fn only_wakeup_phase(f: &Fixture) -> u64 {
    let marks = f.sched.marks();
    assert_eq!(marks.len(), 1, "expected one sleeper, got {:?}", marks);
    marks[0].wakeup_phase
}

#[test]
fn relative_sleep_waits_whole_phases() {
    let f = Fixture::new(TEST_CFG.clone());
    f.sim.set_phase(7);
    let mut guest = nanosleep(ts(0, 500_000_000));
    let pending = pre(&f, &mut guest);

    // 500ms is 1e9 cycles at 2GHz: 100_000 phases of 10_000 cycles.
    let marks = f.sched.marks();
    assert_eq!(marks.len(), 1);
    assert_eq!(marks[0].wakeup_phase, 100_007);
    assert_eq!(marks[0].proc, ProcIdx::from_raw(0));
    assert_eq!(marks[0].tid, SimTid::from_raw(100));
    assert_eq!(f.tool.phases_for_wait(500_000_000), 100_000);

    // The host now sees an untimed futex wait.
    assert_eq!(guest.current_sysno(), Some(Sysno::futex));
    assert_eq!(
        guest.args[..4],
        [marks[0].token.addr(), libc::FUTEX_WAIT as usize, 1, 0]
    );

    assert_eq!(f.sched.wake_until(100_006), vec![]);
    assert_eq!(
        f.sched.wake_until(100_007),
        vec![(100_007, SimTid::from_raw(100))]
    );
    f.sim.set_phase(100_007);
    post(&f, &mut guest, pending, 0);

    assert_eq!(guest.ret, 0);
    assert_eq!(guest.current_sysno(), Some(Sysno::nanosleep));
    assert_eq!(guest.args[..4], [REQ, REM, 0, 0]);
    assert_eq!(guest.mem.get::<Timespec>(REM), ts(0, 0));
}

#[test]
fn short_sleeps_take_at_least_one_phase() {
    let f = Fixture::new(TEST_CFG.clone());
    // 5_000ns is exactly one phase.
    let cases = [(ts(0, 0), 1), (ts(0, 1), 1), (ts(0, 5_000), 1), (ts(0, 5_001), 2)];
    for (i, (req, phases)) in cases.into_iter().enumerate() {
        let mut guest = nanosleep(req);
        guest.tid = SimTid::from_raw(i as i32);
        let pending = pre(&f, &mut guest);
        assert_eq!(f.sched.marks()[i].wakeup_phase, phases, "{:?}", req);
        post(&f, &mut guest, pending, 0);
    }
}

#[test]
fn invalid_requests_are_not_virtualized() {
    let f = Fixture::new(TEST_CFG.clone());
    for req in [ts(-1, 0), ts(0, -1), ts(0, 1_000_000_000)] {
        let mut guest = nanosleep(req);
        assert!(f.tool.pre_patch(&mut guest).is_skip(), "{:?}", req);
        assert_eq!(guest.current_sysno(), Some(Sysno::nanosleep));
    }

    let mut null = FakeGuest::new(Sysno::nanosleep, &[0, REM]);
    assert!(f.tool.pre_patch(&mut null).is_skip());

    let mut unmapped = FakeGuest::new(Sysno::nanosleep, &[0xdead_0000, REM]);
    assert!(f.tool.pre_patch(&mut unmapped).is_skip());

    assert_eq!(f.sched.marks(), vec![]);
}

#[test]
fn interrupted_sleep_reports_remaining_phases() {
    // 1GHz and 30ms phases.
    let f = Fixture::new(Config {
        freq_mhz: NonZeroU64::new(1000).unwrap(),
        phase_length: NonZeroU64::new(30_000_000).unwrap(),
        ..TEST_CFG.clone()
    });
    let mut guest = nanosleep(ts(30, 0));
    let pending = pre(&f, &mut guest);
    assert_eq!(only_wakeup_phase(&f), 1000);

    f.sim.set_phase(960);
    post(&f, &mut guest, pending, -(libc::EINTR as i64));

    assert_eq!(guest.ret, -(libc::EINTR as i64));
    assert_eq!(guest.current_sysno(), Some(Sysno::nanosleep));
    // 40 phases of 30ms.
    assert_eq!(guest.mem.get::<Timespec>(REM), ts(1, 200_000_000));
    assert_eq!(f.tool.remaining_until_phase(1000, 1000), ts(0, 0));
}

#[test]
fn unwritable_rem_keeps_the_result() {
    let f = Fixture::new(TEST_CFG.clone());
    let mut guest = nanosleep(ts(1, 0));
    let pending = pre(&f, &mut guest);
    guest.mem.unmap(REM);
    f.sim.set_phase(10);
    post(&f, &mut guest, pending, -(libc::EINTR as i64));

    assert_eq!(guest.ret, -(libc::EINTR as i64));
    assert_eq!(guest.current_sysno(), Some(Sysno::nanosleep));
    assert_eq!(guest.args[..2], [REQ, REM]);
}

#[test]
fn longest_sleep_is_still_virtualized() {
    let f = Fixture::new(TEST_CFG.clone());
    f.sim.set_phase(3);
    // What `std::thread::sleep(Duration::MAX)` passes down.
    let mut guest = nanosleep(ts(i64::MAX, 999_999_999));
    let pending = pre(&f, &mut guest);

    assert_eq!(
        only_wakeup_phase(&f),
        3 + f.tool.phases_for_wait(u64::MAX)
    );
    assert_eq!(guest.current_sysno(), Some(Sysno::futex));
    post(&f, &mut guest, pending, -(libc::EINTR as i64));
    assert_eq!(guest.ret, -(libc::EINTR as i64));
}

#[test]
#[should_panic(expected = "after its wakeup phase")]
fn interrupted_after_wakeup_phase_is_fatal() {
    let f = Fixture::new(TEST_CFG.clone());
    let mut guest = nanosleep(ts(0, 5_000));
    let pending = pre(&f, &mut guest);
    f.sim.set_phase(2);
    post(&f, &mut guest, pending, -(libc::EINTR as i64));
}

#[test]
fn passed_wakeup_phase_is_success() {
    let f = Fixture::new(TEST_CFG.clone());
    let mut guest = nanosleep(ts(0, 10));
    let pending = pre(&f, &mut guest);
    f.sim.set_phase(3);
    post(&f, &mut guest, pending, -(libc::EWOULDBLOCK as i64));
    assert_eq!(guest.ret, 0);
    assert_eq!(guest.mem.get::<Timespec>(REM), ts(0, 0));
}

#[test]
#[should_panic(expected = "unexpected result of a phase sleep")]
fn unexpected_futex_result_is_fatal() {
    let f = Fixture::new(TEST_CFG.clone());
    let mut guest = nanosleep(ts(1, 0));
    let pending = pre(&f, &mut guest);
    post(&f, &mut guest, pending, -(libc::EINVAL as i64));
}

#[test]
fn absolute_sleep_waits_for_the_deadline() {
    let f = Fixture::captured();
    f.sim.set_phase(10);
    let deadline = ts(HOST_MONOTONIC_SECS + 1, 0);
    let mut guest = clock_nanosleep(libc::CLOCK_MONOTONIC, libc::TIMER_ABSTIME, deadline);
    let pending = pre(&f, &mut guest);

    // Virtual monotonic time is 50us past the host's at phase 10, leaving
    // 999_950_000ns: 199_990 phases.
    assert_eq!(only_wakeup_phase(&f), 200_000);

    f.sim.set_phase(100);
    post(&f, &mut guest, pending, -(libc::EINTR as i64));
    assert_eq!(guest.ret, -(libc::EINTR as i64));
    assert_eq!(guest.current_sysno(), Some(Sysno::clock_nanosleep));
    assert_eq!(
        guest.args[..4],
        [
            libc::CLOCK_MONOTONIC as usize,
            libc::TIMER_ABSTIME as usize,
            REQ,
            REM
        ]
    );
    // Absolute sleeps have nothing to report.
    assert_eq!(guest.mem.get::<Timespec>(REM), UNTOUCHED);
}

#[test]
fn absolute_deadline_in_the_past_takes_one_phase() {
    let f = Fixture::captured();
    f.sim.set_phase(50);
    let mut guest = clock_nanosleep(
        libc::CLOCK_REALTIME,
        libc::TIMER_ABSTIME,
        ts(HOST_REALTIME_SECS - 1, 0),
    );
    let pending = pre(&f, &mut guest);
    assert_eq!(only_wakeup_phase(&f), 51);
    post(&f, &mut guest, pending, 0);
    assert_eq!(guest.ret, 0);
}

#[test]
fn absolute_deadline_on_other_clocks_uses_realtime() {
    let f = Fixture::captured();
    let mut guest = clock_nanosleep(
        libc::CLOCK_BOOTTIME,
        libc::TIMER_ABSTIME,
        ts(HOST_REALTIME_SECS + 1, 0),
    );
    let _pending = pre(&f, &mut guest);
    assert_eq!(only_wakeup_phase(&f), 200_000);
}

#[test]
fn relative_clock_nanosleep_matches_nanosleep() {
    let f = Fixture::new(TEST_CFG.clone());
    let mut guest = clock_nanosleep(libc::CLOCK_REALTIME, 0, ts(0, 500_000_000));
    let pending = pre(&f, &mut guest);
    assert_eq!(only_wakeup_phase(&f), 100_000);
    post(&f, &mut guest, pending, 0);
    assert_eq!(guest.current_sysno(), Some(Sysno::clock_nanosleep));
    assert_eq!(
        guest.args[..4],
        [libc::CLOCK_REALTIME as usize, 0, REQ, REM]
    );
    assert_eq!(guest.mem.get::<Timespec>(REM), ts(0, 0));
}

#[test]
fn unknown_flags_pass_through() {
    let f = Fixture::new(TEST_CFG.clone());
    let mut guest = clock_nanosleep(libc::CLOCK_REALTIME, 0x10, ts(1, 0));
    assert!(f.tool.pre_patch(&mut guest).is_skip());
    assert_eq!(f.sched.marks(), vec![]);
}

#[test]
fn helpers_and_fast_forward_sleep_on_the_host() {
    let f = Fixture::new(TEST_CFG.clone());

    let mut helper = nanosleep(ts(1, 0));
    helper.helper = true;
    assert!(f.tool.pre_patch(&mut helper).is_skip());

    f.sim.set_fast_forward(ProcIdx::from_raw(0), true);
    let mut ffwd = nanosleep(ts(1, 0));
    assert!(f.tool.pre_patch(&mut ffwd).is_skip());

    assert_eq!(f.sched.marks(), vec![]);
    assert_eq!(f.sched.sleeping(), 0);
}

proptest! {
    #[test]
    fn wakeup_is_never_early(
        wait_ns in 0u64..(1 << 50),
        mhz in 1u64..8000,
        phase_length in 1u64..1_000_000,
    ) {
        let f = Fixture::new(Config {
            freq_mhz: NonZeroU64::new(mhz).unwrap(),
            phase_length: NonZeroU64::new(phase_length).unwrap(),
            ..TEST_CFG.clone()
        });
        let phases = f.tool.phases_for_wait(wait_ns);
        prop_assert!(phases >= 1);
        let slept_ns = f.tool.config().frequency().cycles_to_ns(phases * phase_length);
        prop_assert!(slept_ns >= wait_ns, "{} phases sleep {}ns < {}ns", phases, slept_ns, wait_ns);
    }
}
