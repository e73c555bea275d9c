use crate::error::BuildError;

use sage_app_api::StateCapsule;

use std::alloc::{self, Layout};

const MIN_ALIGN: usize = 16;

/// Engine-owned, address-stable memory block handed to the application by pointer.
///
/// Allocated zero-filled at first application boot and freed only when the capsule is
/// dropped at shutdown. Reloads reinterpret the bytes in place.
pub struct Capsule {
    descriptor: Box<StateCapsule>,
    layout: Layout,
}

impl Capsule {
    /// Allocates at least `max(size, min_capacity)` zeroed bytes aligned to `max(align, 16)`.
    ///
    /// Fails with [`BuildError::InvalidStateLayout`] when no layout can describe the request
    /// and with [`BuildError::CapsuleAllocation`] when the allocator has no memory for it.
    pub fn allocate(size: usize, align: usize, min_capacity: usize) -> Result<Self, BuildError> {
        let capacity = size.max(min_capacity).max(1);
        let layout = Layout::from_size_align(capacity, align.max(MIN_ALIGN)).map_err(|_| {
            BuildError::InvalidStateLayout {
                size: size as u64,
                align: align as u64,
            }
        })?;

        // SAFETY: layout has a non-zero size.
        let data = unsafe { alloc::alloc_zeroed(layout) };
        if data.is_null() {
            return Err(BuildError::CapsuleAllocation {
                size: layout.size() as u64,
                align: layout.align() as u64,
            });
        }

        log::debug!(
            target: "sage::boot",
            "capsule: allocated {} bytes (align {}) at {:p}",
            layout.size(),
            layout.align(),
            data
        );

        Ok(Self {
            descriptor: Box::new(StateCapsule {
                data,
                capacity: layout.size(),
                align: layout.align(),
            }),
            layout,
        })
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.descriptor.data as usize
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Whether a state of the given layout fits without reallocation.
    #[inline]
    pub fn fits(&self, size: u64, align: u64) -> bool {
        size <= self.capacity() as u64 && align <= self.align() as u64
    }

    /// Pointer handed across the boundary. Stable for the life of the capsule.
    #[inline]
    pub fn as_raw(&mut self) -> *mut StateCapsule {
        &mut *self.descriptor as *mut StateCapsule
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `data` owns `capacity` initialized bytes for the life of `self`.
        unsafe { std::slice::from_raw_parts(self.descriptor.data, self.layout.size()) }
    }
}

impl Drop for Capsule {
    fn drop(&mut self) {
        // SAFETY: allocated in `allocate` with the same layout.
        unsafe { alloc::dealloc(self.descriptor.data, self.layout) };
        log::debug!(target: "sage::boot", "capsule: released");
    }
}

impl std::fmt::Debug for Capsule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capsule")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("capacity", &self.capacity())
            .field("align", &self.align())
            .finish()
    }
}
