/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Timevirt makes the processes of a cycle-level simulator see simulated time.
//!
//! Clock queries (`gettimeofday`, `time`, `clock_gettime`) return the host's
//! clock as it stood when the process's clock domain was captured, advanced by
//! simulated cycles. Sleeps and timers block on simulated phases rather than on
//! the host clock.

#![deny(clippy::all)]
#![deny(missing_docs)]
#![allow(clippy::uninlined_format_args)]

mod config;
mod domains;
mod error;
mod guest;
mod patch;
mod sim;
mod syscalls;
mod tool;

pub mod types;
pub mod virtlog;

pub use config::Config;
pub use domains::ClockDomainInfo;
pub use domains::ClockDomains;
pub use error::Error;
pub use guest::Addr;
pub use guest::Guest;
pub use guest::MemoryAccess;
pub use patch::PostPatch;
pub use patch::PostPatchAction;
pub use patch::PrePatch;
pub use sim::HostClock;
pub use sim::HostClockId;
pub use sim::IntervalTimer;
pub use sim::PhaseScheduler;
pub use sim::SimCore;
pub use sim::SleepToken;
pub use sim::SystemHostClock;
pub use tool::TimeVirt;
