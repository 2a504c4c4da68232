/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The view of an intercepted guest thread offered by the instrumentation
//! runtime: its identity, the registers of the in-flight syscall, and checked
//! access to its memory.

use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::num::NonZeroUsize;

use bytemuck::Pod;
use nix::errno::Errno;
use nix::unistd::Pid;
use syscalls::Sysno;

use crate::types::ProcIdx;
use crate::types::SimTid;

/// A non-null address in the guest's address space holding a `T`.
pub struct Addr<T> {
    raw: NonZeroUsize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Addr<T> {
    /// Wrap a raw syscall argument. Null yields `None`.
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(|raw| Addr {
            raw,
            _marker: PhantomData,
        })
    }

    /// The raw address, suitable for a syscall argument.
    pub fn as_raw(&self) -> usize {
        self.raw.get()
    }
}

impl<T> Clone for Addr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Addr<T> {}

impl<T> PartialEq for Addr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Addr<T> {}

impl<T> fmt::Debug for Addr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.raw)
    }
}

/// Fallible copies between the guest's address space and ours. An invalid
/// guest pointer is an `Err`, never a crash.
pub trait MemoryAccess {
    /// Fill `buf` from guest memory starting at `addr`.
    fn read_bytes(&self, addr: usize, buf: &mut [u8]) -> Result<(), Errno>;

    /// Copy `buf` into guest memory starting at `addr`.
    fn write_bytes(&mut self, addr: usize, buf: &[u8]) -> Result<(), Errno>;

    /// Read a value out of guest memory.
    fn read_value<T: Pod>(&self, addr: Addr<T>) -> Result<T, Errno> {
        let mut value = T::zeroed();
        self.read_bytes(addr.as_raw(), bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    /// Write a value into guest memory.
    fn write_value<T: Pod>(&mut self, addr: Addr<T>, value: &T) -> Result<(), Errno> {
        self.write_bytes(addr.as_raw(), bytemuck::bytes_of(value))
    }
}

/// A guest thread stopped at a syscall boundary.
///
/// Before the syscall runs, the number and arguments may be rewritten; after it
/// runs, the return value is available and may be replaced.
pub trait Guest {
    /// The guest's memory.
    type Memory: MemoryAccess;

    /// Thread id of the calling thread.
    fn tid(&self) -> SimTid;

    /// Host process id of the calling process.
    fn pid(&self) -> Pid;

    /// The simulator's index for the calling process.
    fn proc_idx(&self) -> ProcIdx;

    /// Is this a helper thread the simulator does not model?
    fn is_helper_thread(&self) -> bool;

    /// The raw syscall number.
    fn syscall_number(&self) -> usize;

    /// Replace the syscall number of the pending syscall.
    ///
    /// On x86_64 the number and the result share `rax`, so after the syscall
    /// has run the result must be set after the number is restored.
    fn set_syscall_number(&mut self, nr: usize);

    /// Read syscall argument `index` (0-based).
    fn arg(&self, index: usize) -> usize;

    /// Replace syscall argument `index` (0-based).
    fn set_arg(&mut self, index: usize, value: usize);

    /// The syscall's result register. Errors are negative errno values.
    fn return_value(&self) -> i64;

    /// Replace the syscall's result register.
    fn set_return_value(&mut self, value: i64);

    /// Shared access to guest memory.
    fn memory(&self) -> &Self::Memory;

    /// Exclusive access to guest memory.
    fn memory_mut(&mut self) -> &mut Self::Memory;

    /// Reserve `len` bytes of guest-addressable scratch space, live until
    /// `free_scratch`.
    fn alloc_scratch(&mut self, len: usize) -> Result<usize, Errno>;

    /// Release scratch space obtained from `alloc_scratch`.
    fn free_scratch(&mut self, addr: usize);

    /// The syscall number, decoded.
    fn sysno(&self) -> Option<Sysno> {
        Sysno::new(self.syscall_number())
    }

    /// Copy `value` into fresh scratch space and return its guest address.
    fn stash<T: Pod>(&mut self, value: &T) -> Result<Addr<T>, Errno> {
        let raw = self.alloc_scratch(size_of::<T>())?;
        let addr = Addr::from_raw(raw).ok_or(Errno::EFAULT)?;
        if let Err(errno) = self.memory_mut().write_value(addr, value) {
            self.free_scratch(raw);
            return Err(errno);
        }
        Ok(addr)
    }
}
