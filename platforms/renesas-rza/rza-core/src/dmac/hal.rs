//! Platform services the DMAC driver depends on.
use super::descriptor::{LinkDescriptor, Ring};
use core::{alloc::Layout, ptr::NonNull};

/// The DMAC's register windows.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Window {
    /// Channel registers and the per-group common registers.
    Dmac,
    /// The extended block holding the `DMARS` request-source registers.
    Ext,
}

/// A DMA-visible descriptor ring buffer.
///
/// Holds [`Ring::LEN`] [`LinkDescriptor`]s. `bus_addr` is the address the
/// DMAC uses to reach the first descriptor.
#[derive(Copy, Clone, Debug)]
pub struct CoherentRing {
    /// CPU address of the first descriptor.
    pub ptr: NonNull<LinkDescriptor>,
    /// DMAC address of the first descriptor.
    pub bus_addr: u32,
}

/// Register access and coherent memory for a DMAC instance.
///
/// # Safety
///
/// Implementations must ensure that:
///
/// - `read32` and `write32` access the DMAC's registers (or a faithful model
///   of them), and
/// - every [`CoherentRing`] returned by `alloc_ring` points to
///   [`Ring::LEN`] writable, 32-byte aligned descriptors that the DMAC can
///   read and write at `bus_addr`, and remains valid until it is passed to
///   `free_ring`.
pub unsafe trait DmacHal {
    /// Reads a 32-bit register at `offset` within `window`.
    fn read32(&self, window: Window, offset: usize) -> u32;

    /// Writes a 32-bit register at `offset` within `window`.
    fn write32(&self, window: Window, offset: usize, value: u32);

    /// Allocates memory for one channel's descriptor ring.
    ///
    /// Returns [`None`] if no memory is available.
    fn alloc_ring(&self) -> Option<CoherentRing>;

    /// Releases a ring returned by [`alloc_ring`](Self::alloc_ring).
    ///
    /// # Safety
    ///
    /// `ring` must have come from this HAL's `alloc_ring`, and must not be
    /// used by the DMAC or the CPU afterwards.
    unsafe fn free_ring(&self, ring: CoherentRing);
}

unsafe impl<H: DmacHal + ?Sized> DmacHal for &H {
    #[inline]
    fn read32(&self, window: Window, offset: usize) -> u32 {
        H::read32(self, window, offset)
    }

    #[inline]
    fn write32(&self, window: Window, offset: usize, value: u32) {
        H::write32(self, window, offset, value)
    }

    #[inline]
    fn alloc_ring(&self) -> Option<CoherentRing> {
        H::alloc_ring(self)
    }

    #[inline]
    unsafe fn free_ring(&self, ring: CoherentRing) {
        H::free_ring(self, ring)
    }
}

/// Memory-mapped DMAC registers, with descriptor rings allocated from the
/// global allocator.
///
/// The heap must be identity mapped and either uncached or otherwise
/// coherent with the DMAC. Ring allocations above 4 GiB are refused.
#[derive(Debug)]
pub struct Mmio {
    dmac: NonNull<u8>,
    ext: NonNull<u8>,
}

// Safety: the register block pointers are only used for volatile access.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

// === impl Mmio ===

impl Mmio {
    /// # Safety
    ///
    /// `dmac` and `ext` must be the base addresses of the DMAC's main and
    /// extended register windows, and nothing else may access those
    /// registers while this `Mmio` exists.
    #[must_use]
    pub const unsafe fn new(dmac: NonNull<u8>, ext: NonNull<u8>) -> Self {
        Self { dmac, ext }
    }

    fn reg(&self, window: Window, offset: usize) -> *mut u32 {
        let base = match window {
            Window::Dmac => self.dmac,
            Window::Ext => self.ext,
        };
        base.as_ptr().wrapping_add(offset).cast()
    }

    fn ring_layout() -> Layout {
        Layout::new::<[LinkDescriptor; Ring::LEN]>()
    }
}

unsafe impl DmacHal for Mmio {
    fn read32(&self, window: Window, offset: usize) -> u32 {
        unsafe { self.reg(window, offset).read_volatile() }
    }

    fn write32(&self, window: Window, offset: usize, value: u32) {
        unsafe { self.reg(window, offset).write_volatile(value) }
    }

    fn alloc_ring(&self) -> Option<CoherentRing> {
        let layout = Self::ring_layout();
        let ptr = NonNull::new(unsafe { alloc::alloc::alloc_zeroed(layout) })?;
        let Some(bus_addr) = bus_addr(ptr.as_ptr() as usize, layout.size()) else {
            tracing::warn!(addr = ?ptr, "DMA ring is not addressable by the DMAC");
            unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
            return None;
        };
        Some(CoherentRing {
            ptr: ptr.cast(),
            bus_addr,
        })
    }

    unsafe fn free_ring(&self, ring: CoherentRing) {
        alloc::alloc::dealloc(ring.ptr.as_ptr().cast(), Self::ring_layout());
    }
}

/// Returns the bus address of a `size`-byte buffer at `addr`, if all of it
/// lies below 4 GiB.
fn bus_addr(addr: usize, size: usize) -> Option<u32> {
    let last = addr.checked_add(size.checked_sub(1)?)?;
    u32::try_from(last).ok()?;
    u32::try_from(addr).ok()
}
