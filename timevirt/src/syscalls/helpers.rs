/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytemuck::Pod;

use crate::error::Error;
use crate::guest::Addr;
use crate::guest::Guest;
use crate::guest::MemoryAccess;

/// Copy a value out of guest memory, tagging a failure with the address.
pub(crate) fn read_guest<G: Guest, T: Pod>(guest: &G, addr: Addr<T>) -> Result<T, Error> {
    guest
        .memory()
        .read_value(addr)
        .map_err(|errno| Error::GuestMemory {
            addr: addr.as_raw(),
            errno,
        })
}

/// Copy a value into guest memory, tagging a failure with the address.
pub(crate) fn write_guest<G: Guest, T: Pod>(
    guest: &mut G,
    addr: Addr<T>,
    value: &T,
) -> Result<(), Error> {
    guest
        .memory_mut()
        .write_value(addr, value)
        .map_err(|errno| Error::GuestMemory {
            addr: addr.as_raw(),
            errno,
        })
}

/// Errors come back from the kernel as negated errno values.
pub(crate) fn neg_errno(errno: nix::errno::Errno) -> i64 {
    -(errno as i64)
}
