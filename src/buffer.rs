//! Memory buffers
//!
//! Two owned buffer types move data through the loading pipeline:
//!
//! - [`Buffer`] - pool memory with a committed length and a read cursor,
//!   used for file contents and decompressed images
//! - [`AlignedBuffer`] - page memory from the firmware page allocator, used
//!   for the relocated image that is handed to the firmware
//!
//! Both release their memory on drop, so every early return in the pipeline
//! frees what it allocated.

use alloc::vec::Vec;

use r_efi::efi::{MemoryType, PhysicalAddress, Status};

use crate::efi::{Firmware, PAGE_SIZE, pages_for};

/// Owned pool buffer with a cursor
///
/// Invariant: `pos <= len <= capacity`.
#[derive(Debug, Default)]
pub struct Buffer {
    /// Backing storage, fully initialized to the capacity
    storage: Vec<u8>,
    /// Committed length
    len: usize,
    /// Read cursor
    pos: usize,
}

impl Buffer {
    /// Allocate an empty buffer able to hold `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Result<Self, Status> {
        let mut storage = Vec::new();
        storage.try_reserve_exact(capacity).map_err(|_| {
            log::error!("Failed to allocate {} byte buffer", capacity);
            Status::OUT_OF_RESOURCES
        })?;
        storage.resize(capacity, 0);

        Ok(Self {
            storage,
            len: 0,
            pos: 0,
        })
    }

    /// Wrap already committed bytes
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            storage: data,
            len,
            pos: 0,
        }
    }

    /// Grow the capacity to at least `capacity` bytes, keeping the contents
    pub fn grow_to(&mut self, capacity: usize) -> Result<(), Status> {
        if capacity <= self.storage.len() {
            return Ok(());
        }

        self.storage
            .try_reserve_exact(capacity - self.storage.len())
            .map_err(|_| {
                log::error!("Failed to grow buffer to {} bytes", capacity);
                Status::OUT_OF_RESOURCES
            })?;
        self.storage.resize(capacity, 0);
        Ok(())
    }

    /// Committed length
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated size
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Cursor position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// All committed bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// Committed bytes from the cursor on
    pub fn remaining(&self) -> &[u8] {
        &self.storage[self.pos..self.len]
    }

    /// Uncommitted space after the committed bytes
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.len..]
    }

    /// Committed bytes and the uncommitted tail, split
    pub fn split_filled_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        self.storage.split_at_mut(self.len)
    }

    /// Mark `count` more bytes of the unfilled space as committed
    pub fn commit(&mut self, count: usize) -> Result<(), Status> {
        let len = self
            .len
            .checked_add(count)
            .filter(|&len| len <= self.storage.len())
            .ok_or(Status::INVALID_PARAMETER)?;
        self.len = len;
        Ok(())
    }

    /// Move the cursor forward by `count` bytes
    pub fn advance(&mut self, count: usize) -> Result<(), Status> {
        let pos = self
            .pos
            .checked_add(count)
            .filter(|&pos| pos <= self.len)
            .ok_or(Status::INVALID_PARAMETER)?;
        self.pos = pos;
        Ok(())
    }

    /// Drop all committed bytes and rewind the cursor
    pub fn clear(&mut self) {
        self.len = 0;
        self.pos = 0;
    }
}

/// Page-granular buffer owned by the firmware page allocator
///
/// The base handed out is aligned to the requested alignment, which may
/// require allocating more pages than the size alone needs. The pages are
/// freed on drop unless ownership is passed on with [`AlignedBuffer::into_raw`].
pub struct AlignedBuffer<'fw> {
    firmware: &'fw dyn Firmware,
    /// Address returned by the page allocator
    raw: PhysicalAddress,
    /// Number of pages allocated at `raw`
    pages: usize,
    /// Aligned base address
    base: PhysicalAddress,
    /// Requested size in bytes
    size: usize,
    memory_type: MemoryType,
}

/// Page allocation released from an [`AlignedBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAllocation {
    pub address: PhysicalAddress,
    pub pages: usize,
    pub memory_type: MemoryType,
}

impl PageAllocation {
    /// Address of the last byte of the allocation
    pub fn end(&self) -> PhysicalAddress {
        self.address + (self.pages as u64 * PAGE_SIZE) - 1
    }
}

impl<'fw> AlignedBuffer<'fw> {
    /// Allocate a zeroed region of `size` bytes whose base is aligned to `alignment`
    pub fn allocate(
        firmware: &'fw dyn Firmware,
        size: usize,
        alignment: u64,
        memory_type: MemoryType,
    ) -> Result<Self, Status> {
        if size == 0 || alignment == 0 {
            return Err(Status::INVALID_PARAMETER);
        }

        // Page allocations are page aligned, anything else needs slack
        let padding = if PAGE_SIZE % alignment == 0 {
            0
        } else {
            alignment - 1
        };
        let total = (size as u64)
            .checked_add(padding)
            .ok_or(Status::OUT_OF_RESOURCES)?;
        let pages = usize::try_from(pages_for(total)).map_err(|_| Status::OUT_OF_RESOURCES)?;

        let raw = firmware.allocate_pages(memory_type, pages).inspect_err(|status| {
            log::error!("Failed to allocate {} pages: {:?}", pages, status);
        })?;

        let mut buffer = Self {
            firmware,
            raw,
            pages,
            base: raw,
            size,
            memory_type,
        };

        buffer.base = raw
            .checked_next_multiple_of(alignment)
            .ok_or(Status::OUT_OF_RESOURCES)?;
        let base = buffer.base;

        log::debug!(
            "Allocated {} pages at {:#x}, aligned base {:#x}",
            pages,
            raw,
            base
        );

        buffer.as_mut_slice().fill(0);
        Ok(buffer)
    }

    /// Aligned base address
    pub fn base_address(&self) -> u64 {
        self.base
    }

    /// Requested size in bytes
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Bytes available from the aligned base to the end of the allocation
    pub fn allocated(&self) -> usize {
        (self.raw + self.pages as u64 * PAGE_SIZE - self.base) as usize
    }

    /// The page allocation backing this buffer
    pub fn allocation(&self) -> PageAllocation {
        PageAllocation {
            address: self.raw,
            pages: self.pages,
            memory_type: self.memory_type,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: base..base+size lies inside the page allocation owned by self
        unsafe { core::slice::from_raw_parts(self.base as usize as *const u8, self.size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: base..base+size lies inside the page allocation owned by self
        unsafe { core::slice::from_raw_parts_mut(self.base as usize as *mut u8, self.size) }
    }

    /// Give up ownership of the pages without freeing them
    pub fn into_raw(self) -> PageAllocation {
        let allocation = self.allocation();
        core::mem::forget(self);
        allocation
    }
}

impl Drop for AlignedBuffer<'_> {
    fn drop(&mut self) {
        let status = self.firmware.free_pages(self.raw, self.pages);
        if status != Status::SUCCESS {
            log::warn!("Failed to free pages at {:#x}: {:?}", self.raw, status);
        }
    }
}
