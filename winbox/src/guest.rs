// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Typed views onto guest memory and the guest-space bump allocator.
//!
//! Guest memory belongs to the emulator; the host never holds a reference
//! into it. [`GuestRef`] is therefore a cursor, not a pointer: reads copy the
//! whole value out, writes copy it back, and [`GuestRef::access`] composes
//! the two around a host-side mutation.

use core::marker::PhantomData;

use thiserror::Error;
use winbox_common_nt::nt::UnicodeString;
use zerocopy::{FromBytes, FromZeros as _, Immutable, IntoBytes};

use crate::cpu::{EmulatorError, GuestMemory};

/// A typed reference to a `T`-shaped range of guest memory.
pub struct GuestRef<T> {
    address: u64,
    _marker: PhantomData<T>,
}

// Derived impls would bound on `T`; the reference is Copy regardless.
impl<T> Clone for GuestRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GuestRef<T> {}

impl<T> GuestRef<T> {
    pub fn new(address: u64) -> Self {
        Self {
            address,
            _marker: PhantomData,
        }
    }

    /// The guest address this reference designates.
    pub fn value(&self) -> u64 {
        self.address
    }

    /// `size_of::<T>()`.
    pub fn size(&self) -> usize {
        size_of::<T>()
    }
}

impl<T: FromBytes + IntoBytes + Immutable> GuestRef<T> {
    /// Copy the value out of guest memory.
    pub fn read(&self, mem: &mut dyn GuestMemory) -> Result<T, EmulatorError> {
        let mut value = T::new_zeroed();
        mem.read_memory(self.address, value.as_mut_bytes())?;
        Ok(value)
    }

    /// Copy `value` into guest memory.
    pub fn write(&self, mem: &mut dyn GuestMemory, value: &T) -> Result<(), EmulatorError> {
        mem.write_memory(self.address, value.as_bytes())
    }

    /// Read, mutate on the host, write back.
    pub fn access<R>(
        &self,
        mem: &mut dyn GuestMemory,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, EmulatorError> {
        let mut value = self.read(mem)?;
        let result = f(&mut value);
        self.write(mem, &value)?;
        Ok(result)
    }
}

/// Bump allocation failed.
#[derive(Debug, Error)]
pub enum GuestAllocError {
    #[error(
        "guest region exhausted: {requested:#x} bytes requested, {remaining:#x} remaining of {size:#x}"
    )]
    Exhausted {
        requested: u64,
        remaining: u64,
        size: u64,
    },

    #[error(transparent)]
    Emulator(#[from] EmulatorError),
}

/// Monotonic bump allocator over a fixed guest region.
///
/// There is no free: the region is carved front to back and the watermark
/// only ever advances. Used for the GS segment, whose contents live for the
/// whole process.
pub struct GuestAllocator {
    base: u64,
    size: u64,
    watermark: u64,
}

impl GuestAllocator {
    pub fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            watermark: base,
        }
    }

    /// Base address of the managed region.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Current watermark (first unreserved guest address).
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Reserve `size` bytes at `align` alignment and return their address.
    pub fn reserve_raw(&mut self, size: u64, align: u64) -> Result<u64, GuestAllocError> {
        debug_assert!(align.is_power_of_two());
        let address = self.watermark.next_multiple_of(align);
        let end = address.checked_add(size).ok_or(GuestAllocError::Exhausted {
            requested: size,
            remaining: self.base + self.size - self.watermark,
            size: self.size,
        })?;
        if end > self.base + self.size {
            return Err(GuestAllocError::Exhausted {
                requested: size,
                remaining: self.base + self.size - self.watermark,
                size: self.size,
            });
        }
        self.watermark = end;
        Ok(address)
    }

    /// Reserve a naturally-aligned `T` and return a typed reference to it.
    pub fn reserve<T>(&mut self) -> Result<GuestRef<T>, GuestAllocError> {
        let address = self.reserve_raw(size_of::<T>() as u64, align_of::<T>() as u64)?;
        Ok(GuestRef::new(address))
    }

    /// Reserve a UTF-16 buffer for `s`, copy it NUL-terminated into guest
    /// memory, and fill `out` to describe it.
    pub fn make_unicode_string(
        &mut self,
        mem: &mut dyn GuestMemory,
        out: &mut UnicodeString,
        s: &str,
    ) -> Result<(), GuestAllocError> {
        let units: Vec<u16> = s.encode_utf16().chain([0]).collect();
        let buffer = self.reserve_raw((units.len() * 2) as u64, align_of::<u16>() as u64)?;
        mem.write_memory(buffer, units.as_bytes())?;

        // Length excludes the terminator, MaximumLength includes it.
        out.Length = ((units.len() - 1) * 2) as u16;
        out.MaximumLength = (units.len() * 2) as u16;
        out.Buffer = buffer;
        Ok(())
    }
}
