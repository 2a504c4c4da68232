/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;
use std::str::FromStr;

use nix::unistd;
use serde::Deserialize;
use serde::Serialize;

// Simulated process and thread identities:
//--------------------------------------------------------------------------------

/// Index of a simulated process in the simulator's process table.
#[derive(
    PartialEq, // Silly protection from rustfmt disagreements.
    Debug,
    Eq,
    Clone,
    Copy,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Default,
)]
pub struct ProcIdx(u32);

impl ProcIdx {
    /// Create a `ProcIdx` from a raw table index.
    pub const fn from_raw(idx: u32) -> ProcIdx {
        ProcIdx(idx)
    }

    /// Convert to a raw integer.
    pub fn as_raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcIdx {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ProcIdx {
    type Err = <u32 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_raw(s.parse::<u32>()?))
    }
}

/// Thread id of a guest thread, as seen by the instrumentation runtime.
#[derive(
    PartialEq,
    Debug,
    Eq,
    Clone,
    Copy,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Default,
)]
pub struct SimTid(i32);

impl SimTid {
    /// Create a `SimTid` from a raw thread id.
    pub const fn from_raw(tid: i32) -> SimTid {
        SimTid(tid)
    }

    /// Convert to a raw integer.
    pub fn as_raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for SimTid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<unistd::Pid> for SimTid {
    fn from(p: unistd::Pid) -> Self {
        SimTid(p.into())
    }
}

// implementing From<SimTid> for unistd::Pid would violate foreign trait rules
#[allow(clippy::from_over_into)]
impl Into<unistd::Pid> for SimTid {
    fn into(self) -> unistd::Pid {
        unistd::Pid::from_raw(self.0)
    }
}
