/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Tests alarm and setitimer delegation to the scheduler's interval timers.

use nix::unistd::Pid;
use pretty_assertions::assert_eq;
use syscalls::Sysno;
use timevirt::PostPatch;
use timevirt::PrePatch;
use timevirt::types::Itimerval;
use timevirt::types::Timeval;
use timevirt_testutils::FakeGuest;
use timevirt_testutils::Fixture;
use timevirt_testutils::SCRATCH_BASE;
use timevirt_testutils::TEST_CFG;
use timevirt_testutils::TimerCall;

const NEW: usize = 0x5000;
const OLD: usize = 0x6000;

fn pid() -> Pid {
    Pid::from_raw(100)
}

fn every(tv_sec: i64) -> Itimerval {
    let tv = Timeval { tv_sec, tv_usec: 0 };
    Itimerval {
        it_interval: tv,
        it_value: tv,
    }
}

fn pre(f: &Fixture, guest: &mut FakeGuest) -> PostPatch {
    match f.tool.pre_patch(guest) {
        PrePatch::Continue(post) => post,
        PrePatch::Skip => panic!("timer was not virtualized"),
    }
}

fn setitimer(which: libc::c_int, new: Option<Itimerval>, old: bool) -> FakeGuest {
    let new_addr = if new.is_some() { NEW } else { 0 };
    let old_addr = if old { OLD } else { 0 };
    let mut guest = FakeGuest::new(Sysno::setitimer, &[which as usize, new_addr, old_addr]);
    if let Some(new) = new {
        guest.mem.put(NEW, new);
    }
    if old {
        guest.mem.put(OLD, every(77));
    }
    guest
}

#[test]
fn alarm_reports_what_the_scheduler_reports() {
    let f = Fixture::new(TEST_CFG.clone());

    let mut first = FakeGuest::new(Sysno::alarm, &[5]);
    let pending = pre(&f, &mut first);
    // The host only gets to cancel.
    assert_eq!(first.args[0], 0);
    first.ret = 17;
    let _ = f.tool.post_patch(&mut first, pending);
    assert_eq!(first.args[0], 5);
    assert_eq!(first.ret, 0);

    let mut second = FakeGuest::new(Sysno::alarm, &[3]);
    assert!(f.run(&mut second, 0));
    assert_eq!(second.args[0], 3);
    assert_eq!(second.ret, 5);

    assert_eq!(
        f.sched.timer().calls(),
        vec![TimerCall::Alarm(pid(), 5), TimerCall::Alarm(pid(), 3)]
    );
}

#[test]
fn setitimer_runs_a_disarmed_host_call() {
    let f = Fixture::new(TEST_CFG.clone());
    let mut guest = setitimer(libc::ITIMER_REAL, Some(every(1)), false);
    let pending = pre(&f, &mut guest);

    assert_eq!(guest.args[1], SCRATCH_BASE);
    assert_eq!(guest.mem.get::<Itimerval>(SCRATCH_BASE), Itimerval::DISARMED);
    assert_eq!(guest.live_scratch(), 1);

    // A null old pointer means nothing is written back.
    let writes = guest.mem.writes();
    guest.ret = 0;
    let _ = f.tool.post_patch(&mut guest, pending);
    assert_eq!(guest.mem.writes(), writes);

    assert_eq!(guest.args[..3], [libc::ITIMER_REAL as usize, NEW, 0]);
    assert_eq!(guest.live_scratch(), 0);
    assert_eq!(guest.ret, 0);
    assert_eq!(
        f.sched.timer().calls(),
        vec![TimerCall::Interval(pid(), libc::ITIMER_REAL, every(1))]
    );
}

#[test]
fn setitimer_writes_back_the_previous_timer() {
    let f = Fixture::new(TEST_CFG.clone());
    let mut first = setitimer(libc::ITIMER_PROF, Some(every(1)), false);
    assert!(f.run(&mut first, 0));

    let mut second = setitimer(libc::ITIMER_PROF, Some(every(2)), true);
    assert!(f.run(&mut second, 0));
    assert_eq!(second.ret, 0);
    assert_eq!(second.mem.get::<Itimerval>(OLD), every(1));
}

#[test]
fn setitimer_null_new_value_disarms() {
    let f = Fixture::new(TEST_CFG.clone());
    let mut guest = setitimer(libc::ITIMER_REAL, None, true);
    assert!(f.run(&mut guest, 0));
    assert_eq!(guest.mem.get::<Itimerval>(OLD), Itimerval::DISARMED);
    assert_eq!(
        f.sched.timer().calls(),
        vec![TimerCall::Interval(
            pid(),
            libc::ITIMER_REAL,
            Itimerval::DISARMED
        )]
    );
}

#[test]
fn setitimer_status_keeps_its_sign() {
    let f = Fixture::new(TEST_CFG.clone());
    let mut guest = setitimer(99, Some(every(1)), true);
    assert!(f.run(&mut guest, 0));
    assert_eq!(guest.ret, -(libc::EINVAL as i64));
    assert_eq!(guest.live_scratch(), 0);
}

#[test]
fn setitimer_without_input_or_scratch_is_not_virtualized() {
    let f = Fixture::new(TEST_CFG.clone());

    let mut unreadable = FakeGuest::new(
        Sysno::setitimer,
        &[libc::ITIMER_REAL as usize, 0xdead_0000, 0],
    );
    assert!(f.tool.pre_patch(&mut unreadable).is_skip());
    assert_eq!(unreadable.args[1], 0xdead_0000);

    let mut no_scratch = setitimer(libc::ITIMER_REAL, Some(every(1)), false);
    no_scratch.scratch_exhausted = true;
    assert!(f.tool.pre_patch(&mut no_scratch).is_skip());
    assert_eq!(no_scratch.args[1], NEW);

    assert_eq!(f.sched.timer().calls(), vec![]);
}

#[test]
fn getitimer_and_helpers_pass_through() {
    let f = Fixture::new(TEST_CFG.clone());

    let mut getitimer = FakeGuest::new(Sysno::getitimer, &[libc::ITIMER_REAL as usize, OLD]);
    assert!(f.tool.pre_patch(&mut getitimer).is_skip());

    let mut helper = FakeGuest::new(Sysno::alarm, &[5]);
    helper.helper = true;
    assert!(f.tool.pre_patch(&mut helper).is_skip());
    assert_eq!(helper.args[0], 5);

    assert_eq!(f.sched.timer().calls(), vec![]);
}

#[test]
#[should_panic(expected = "patch_setitimer invoked for syscall")]
fn setitimer_handler_rejects_alarm() {
    let f = Fixture::new(TEST_CFG.clone());
    let _ = f
        .tool
        .patch_setitimer(&mut FakeGuest::new(Sysno::alarm, &[1]));
}
