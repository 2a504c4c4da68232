/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use nix::errno::Errno;
use thiserror::Error;

use crate::sim::HostClockId;

/// Failures of time virtualization. None of these are fatal to the guest: the
/// affected syscall simply keeps its unvirtualized result.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Copying to or from guest memory failed.
    #[error("guest memory access at {addr:#x} failed: {errno}")]
    GuestMemory {
        /// The guest address.
        addr: usize,
        /// Why the copy failed.
        errno: Errno,
    },

    /// Reading a host clock failed.
    #[error("failed to read host clock {clock:?}: {errno}")]
    HostClock {
        /// The clock being read.
        clock: HostClockId,
        /// Why the read failed.
        errno: Errno,
    },

    /// A process was assigned a clock domain that was never allocated.
    #[error("clock domain {domain} out of range, only {count} configured")]
    UnknownClockDomain {
        /// The requested domain.
        domain: usize,
        /// The number of allocated domains.
        count: usize,
    },
}
