//! Link-mode descriptors and the per-channel descriptor ring.
//!
//! In link mode, the DMAC fetches its transfer parameters from a chain of
//! [`LinkDescriptor`]s in memory rather than from its `N0`/`N1` register
//! sets. Each channel owns a fixed [`Ring`] of descriptors whose `next`
//! fields form a circle. Software arms a slot by writing it and setting
//! [`Header::LV`]; the DMAC clears `LV` again when it writes the descriptor
//! back after executing it, which hands the slot back to software.
use super::{
    hal::CoherentRing,
    regs::{ChCfg, DataSize},
};
use core::{
    fmt, mem,
    ptr::{addr_of, addr_of_mut},
    sync::atomic::{fence, Ordering},
};
use mycelium_bitfield::bitfield;

bitfield! {
    /// The header word of a [`LinkDescriptor`].
    #[derive(Eq, PartialEq)]
    pub struct Header<u32> {
        /// Link valid: the descriptor is armed and owned by the DMAC.
        pub const LV: bool;
        /// Link end: stop after this descriptor.
        pub const LE: bool;
        /// Write-back disable.
        pub const WBD: bool;
        /// Descriptor interrupt mask.
        pub const DIM: bool;
    }
}

/// A link-mode descriptor, as read by the DMAC.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[repr(C, align(32))]
pub struct LinkDescriptor {
    /// See [`Header`].
    pub header: u32,
    /// Source address.
    pub src: u32,
    /// Destination address.
    pub dst: u32,
    /// Transfer length in bytes.
    pub byte_count: u32,
    /// Channel configuration; see [`ChCfg`].
    pub chcfg: u32,
    /// Channel interval.
    pub chitvl: u32,
    /// Channel extension.
    pub chext: u32,
    /// Bus address of the next descriptor.
    pub next: u32,
}

/// The contents of a descriptor about to be armed.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Link {
    pub(crate) src: u32,
    pub(crate) dst: u32,
    pub(crate) len: u32,
    pub(crate) chcfg: ChCfg,
    pub(crate) header: Header,
}

/// A run of consecutive ring slots belonging to one transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct RingSpan {
    pub(crate) start: usize,
    pub(crate) len: usize,
}

/// A channel's circular descriptor ring.
///
/// Slots from `head` up to (but not including) `tail` are owned: they were
/// written by software and have not been recycled yet. `valid` counts the
/// owned slots, so a full ring is distinguished from an empty one.
pub struct Ring {
    mem: CoherentRing,
    head: usize,
    tail: usize,
    valid: usize,
}

// Safety: the ring memory is owned by the `Ring` and only reached through it
// (and the DMAC).
unsafe impl Send for Ring {}

// === impl Header ===

impl Header {
    /// The header of an armed descriptor.
    #[must_use]
    pub fn armed(link_end: bool) -> Self {
        Self::new().with(Self::LV, true).with(Self::LE, link_end)
    }
}

// === impl LinkDescriptor ===

impl LinkDescriptor {
    /// The size of a descriptor as seen by the DMAC.
    pub const SIZE: usize = mem::size_of::<Self>();

    /// Reads a descriptor the DMAC may be writing concurrently.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads.
    #[must_use]
    pub unsafe fn load(ptr: *const Self) -> Self {
        Self {
            header: addr_of!((*ptr).header).read_volatile(),
            src: addr_of!((*ptr).src).read_volatile(),
            dst: addr_of!((*ptr).dst).read_volatile(),
            byte_count: addr_of!((*ptr).byte_count).read_volatile(),
            chcfg: addr_of!((*ptr).chcfg).read_volatile(),
            chitvl: addr_of!((*ptr).chitvl).read_volatile(),
            chext: addr_of!((*ptr).chext).read_volatile(),
            next: addr_of!((*ptr).next).read_volatile(),
        }
    }

    /// Reads only the header of a descriptor.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads.
    #[must_use]
    pub unsafe fn load_header(ptr: *const Self) -> Header {
        Header::from_bits(addr_of!((*ptr).header).read_volatile())
    }

    /// Overwrites the header of a descriptor.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes.
    pub unsafe fn store_header(ptr: *mut Self, header: Header) {
        addr_of_mut!((*ptr).header).write_volatile(header.bits());
    }

    /// Returns this descriptor's configuration word.
    #[must_use]
    pub fn config(&self) -> ChCfg {
        ChCfg::from_bits(self.chcfg)
    }
}

impl fmt::Display for LinkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#010x} -> {:#010x} ({} bytes), header={:#x}, chcfg={:#010x}, next={:#010x}",
            self.src, self.dst, self.byte_count, self.header, self.chcfg, self.next
        )
    }
}

// === impl Ring ===

impl Ring {
    /// The number of descriptors in each channel's ring.
    pub const LEN: usize = 64;

    /// Takes ownership of `mem` and chains its descriptors into a ring.
    pub(crate) fn new(mem: CoherentRing) -> Self {
        let mut ring = Self {
            mem,
            head: 0,
            tail: 0,
            valid: 0,
        };
        ring.init();
        ring
    }

    /// Zeroes every descriptor and links each one to its successor, with the
    /// last linking back to the first.
    pub(crate) fn init(&mut self) {
        for idx in 0..Self::LEN {
            let next = self.bus_addr_of((idx + 1) % Self::LEN);
            unsafe {
                self.slot(idx).write_volatile(LinkDescriptor {
                    next,
                    ..LinkDescriptor::default()
                });
            }
        }
        self.head = 0;
        self.tail = 0;
        self.valid = 0;
        fence(Ordering::SeqCst);
    }

    /// Reclaims slots the DMAC has finished with.
    ///
    /// Walks forward from `head` over owned slots whose `LV` bit has been
    /// cleared, zeroing their headers, and stops at the first slot the DMAC
    /// still owns or at `tail`. Returns the number of reclaimed slots.
    pub(crate) fn recycle(&mut self) -> usize {
        let mut reclaimed = 0;
        while self.valid > 0 {
            let slot = self.slot(self.head);
            // Safety: `head` is always in bounds.
            let header = unsafe { LinkDescriptor::load_header(slot) };
            if header.get(Header::LV) {
                break;
            }
            unsafe { LinkDescriptor::store_header(slot, Header::new()) };
            self.head = (self.head + 1) % Self::LEN;
            self.valid -= 1;
            reclaimed += 1;
        }
        reclaimed
    }

    /// Returns the number of slots available to [`push`](Self::push).
    #[must_use]
    pub fn free_slots(&self) -> usize {
        Self::LEN - self.valid
    }

    /// Returns the number of slots currently owned.
    #[must_use]
    pub fn valid(&self) -> usize {
        self.valid
    }

    /// Returns the bus address of the oldest owned slot, which is where the
    /// DMAC should start if it is idle.
    #[must_use]
    pub fn head_bus_addr(&self) -> u32 {
        self.bus_addr_of(self.head)
    }

    /// Returns the index of the slot the next [`push`](Self::push) writes.
    pub(crate) fn tail(&self) -> usize {
        self.tail
    }

    /// Writes `link` to the tail slot and arms it.
    ///
    /// The header is written last, so the DMAC never observes a valid slot
    /// with a stale body. Returns the slot index, or [`None`] if the ring is
    /// full.
    pub(crate) fn push(&mut self, link: Link) -> Option<usize> {
        if self.free_slots() == 0 {
            return None;
        }
        let idx = self.tail;
        let slot = self.slot(idx);
        unsafe {
            addr_of_mut!((*slot).src).write_volatile(link.src);
            addr_of_mut!((*slot).dst).write_volatile(link.dst);
            addr_of_mut!((*slot).byte_count).write_volatile(link.len);
            addr_of_mut!((*slot).chcfg).write_volatile(link.chcfg.bits());
            addr_of_mut!((*slot).chitvl).write_volatile(0);
            addr_of_mut!((*slot).chext).write_volatile(0);
            fence(Ordering::Release);
            LinkDescriptor::store_header(slot, link.header);
        }
        self.tail = (self.tail + 1) % Self::LEN;
        self.valid += 1;
        Some(idx)
    }

    /// Disarms every slot in `span` that the DMAC has not consumed.
    ///
    /// Used after a transfer error, so that the failed transfer's remaining
    /// descriptors are recycled rather than executed.
    pub(crate) fn discard(&mut self, span: RingSpan) {
        for i in 0..span.len {
            let slot = self.slot((span.start + i) % Self::LEN);
            unsafe {
                let header = LinkDescriptor::load_header(slot);
                LinkDescriptor::store_header(slot, header.with(Header::LV, false));
            }
        }
        fence(Ordering::SeqCst);
    }

    /// Zeroes every header, discarding anything in flight, and empties the
    /// ring. The channel must be stopped first.
    pub(crate) fn clear(&mut self) {
        for idx in 0..Self::LEN {
            unsafe { LinkDescriptor::store_header(self.slot(idx), Header::new()) };
        }
        self.head = 0;
        self.tail = 0;
        self.valid = 0;
        fence(Ordering::SeqCst);
    }

    /// Returns a copy of the descriptor in slot `idx`.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<LinkDescriptor> {
        if idx >= Self::LEN {
            return None;
        }
        Some(unsafe { LinkDescriptor::load(self.slot(idx)) })
    }

    pub(crate) fn memory(&self) -> CoherentRing {
        self.mem
    }

    fn bus_addr_of(&self, idx: usize) -> u32 {
        self.mem.bus_addr + (idx * LinkDescriptor::SIZE) as u32
    }

    fn slot(&self, idx: usize) -> *mut LinkDescriptor {
        debug_assert!(idx < Self::LEN);
        // Safety: the ring memory holds `LEN` descriptors.
        unsafe { self.mem.ptr.as_ptr().add(idx) }
    }
}

impl fmt::Debug for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("bus_addr", &format_args!("{:#010x}", self.mem.bus_addr))
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("valid", &self.valid)
            .finish()
    }
}

// === impl Link ===

impl Link {
    /// A memory-to-memory copy descriptor using 32-bit accesses.
    pub(crate) fn memcpy(channel: u8, src: u32, dst: u32, len: u32, link_end: bool) -> Self {
        let chcfg = ChCfg::new()
            .with(ChCfg::SEL, u32::from(channel % 8))
            .with(ChCfg::SDS, DataSize::Bits32)
            .with(ChCfg::DDS, DataSize::Bits32)
            .with(ChCfg::TM, true)
            .with(ChCfg::DMS, true);
        Self {
            src,
            dst,
            len,
            chcfg,
            header: Header::armed(link_end),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::{boxed::Box, vec};
    use core::ptr::NonNull;
    use proptest::prelude::*;

    /// A heap-backed ring that pretends to live at `bus_addr`.
    pub(crate) struct TestRing {
        pub(crate) ring: Ring,
        mem: *mut [LinkDescriptor],
    }

    impl TestRing {
        pub(crate) fn new(bus_addr: u32) -> Self {
            let mem = Box::into_raw(vec![LinkDescriptor::default(); Ring::LEN].into_boxed_slice());
            let ptr = NonNull::new(mem.cast::<LinkDescriptor>()).unwrap();
            Self {
                ring: Ring::new(CoherentRing { ptr, bus_addr }),
                mem,
            }
        }

        /// Does what the DMAC does when it finishes slot `idx`.
        pub(crate) fn consume(&mut self, idx: usize) {
            let slot = self.ring.slot(idx);
            unsafe {
                let header = LinkDescriptor::load_header(slot);
                LinkDescriptor::store_header(slot, header.with(Header::LV, false));
            }
        }
    }

    impl Drop for TestRing {
        fn drop(&mut self) {
            drop(unsafe { Box::from_raw(self.mem) });
        }
    }

    fn link(n: u32) -> Link {
        Link {
            src: 0x1000 * n,
            dst: 0x2000 * n,
            len: n,
            chcfg: ChCfg::new().with(ChCfg::DMS, true),
            header: Header::armed(false),
        }
    }

    #[test]
    fn descriptor_layout() {
        assert_eq!(LinkDescriptor::SIZE, 32);
        assert_eq!(mem::align_of::<LinkDescriptor>(), 32);
        Header::assert_valid();
        assert_eq!(Header::armed(false).bits(), 0b01);
        assert_eq!(Header::armed(true).bits(), 0b11);
        assert_eq!(Header::new().with(Header::DIM, true).bits(), 1 << 3);
    }

    #[test]
    fn init_links_ring() {
        let test = TestRing::new(0x4000_0000);
        let ring = &test.ring;
        for idx in 0..Ring::LEN {
            let desc = ring.get(idx).unwrap();
            assert_eq!(desc.header, 0);
            let expected = 0x4000_0000 + (((idx + 1) % Ring::LEN) * 32) as u32;
            assert_eq!(desc.next, expected, "slot {idx}");
        }
        assert_eq!(ring.get(Ring::LEN), None);
        assert_eq!(ring.head_bus_addr(), 0x4000_0000);
        assert_eq!(ring.free_slots(), Ring::LEN);
    }

    #[test]
    fn push_and_recycle() {
        let mut test = TestRing::new(0x4000_0000);
        assert_eq!(test.ring.push(link(1)), Some(0));
        assert_eq!(test.ring.push(link(2)), Some(1));
        assert_eq!(test.ring.valid(), 2);

        let desc = test.ring.get(1).unwrap();
        assert_eq!((desc.src, desc.dst, desc.byte_count), (0x2000, 0x4000, 2));
        assert_eq!(Header::from_bits(desc.header), Header::armed(false));

        // nothing consumed yet
        assert_eq!(test.ring.recycle(), 0);
        assert_eq!(test.ring.head_bus_addr(), 0x4000_0000);

        test.consume(0);
        assert_eq!(test.ring.recycle(), 1);
        assert_eq!(test.ring.valid(), 1);
        assert_eq!(test.ring.head_bus_addr(), 0x4000_0020);
        // recycling twice with no new completions changes nothing
        assert_eq!(test.ring.recycle(), 0);
        assert_eq!(test.ring.valid(), 1);

        test.consume(1);
        assert_eq!(test.ring.recycle(), 1);
        assert_eq!(test.ring.recycle(), 0);
        assert_eq!(test.ring.valid(), 0);
        assert_eq!(test.ring.head_bus_addr(), 0x4000_0040);
    }

    #[test]
    fn recycle_stops_at_tail() {
        let mut test = TestRing::new(0);
        // an unowned slot with LV clear must not be reclaimed
        assert_eq!(test.ring.recycle(), 0);
        assert_eq!(test.ring.valid(), 0);
        assert_eq!(test.ring.head_bus_addr(), 0);
    }

    #[test]
    fn full_ring_refuses_push() {
        let mut test = TestRing::new(0);
        for n in 0..Ring::LEN {
            assert_eq!(test.ring.push(link(n as u32)), Some(n));
        }
        assert_eq!(test.ring.free_slots(), 0);
        assert_eq!(test.ring.push(link(99)), None);

        test.consume(0);
        test.ring.recycle();
        assert_eq!(test.ring.push(link(99)), Some(0));
    }

    #[test]
    fn discard_disarms_span() {
        let mut test = TestRing::new(0);
        for n in 0..3 {
            test.ring.push(link(n));
        }
        test.consume(0);
        test.ring.discard(RingSpan { start: 0, len: 3 });
        assert_eq!(test.ring.recycle(), 3);
        assert_eq!(test.ring.valid(), 0);
    }

    #[test]
    fn clear_resets() {
        let mut test = TestRing::new(0x100);
        for n in 0..5 {
            test.ring.push(link(n));
        }
        test.ring.clear();
        assert_eq!(test.ring.valid(), 0);
        assert_eq!(test.ring.head_bus_addr(), 0x100);
        for idx in 0..Ring::LEN {
            let desc = test.ring.get(idx).unwrap();
            assert_eq!(desc.header, 0);
            // the chain itself is untouched
            assert_eq!(desc.next, 0x100 + (((idx + 1) % Ring::LEN) * 32) as u32);
        }
    }

    #[test]
    fn memcpy_link() {
        let link = Link::memcpy(9, 0x10, 0x20, 64, false);
        assert_eq!(link.chcfg.get(ChCfg::SEL), 1);
        assert_eq!(link.chcfg.get(ChCfg::SDS), DataSize::Bits32);
        assert!(link.chcfg.get(ChCfg::DMS));
        assert!(link.chcfg.get(ChCfg::TM));
        assert!(!link.chcfg.get(ChCfg::DEM));
    }

    proptest! {
        #[test]
        fn owned_slots_are_accounted(ops in proptest::collection::vec(0u8..3, 0..256)) {
            let mut test = TestRing::new(0);
            // slots pushed but not yet consumed by the "hardware"
            let mut pending = alloc::collections::VecDeque::new();
            for op in ops {
                match op {
                    0 => {
                        if let Some(idx) = test.ring.push(link(1)) {
                            pending.push_back(idx);
                        }
                    }
                    1 => {
                        if let Some(idx) = pending.pop_front() {
                            test.consume(idx);
                        }
                    }
                    _ => {
                        test.ring.recycle();
                    }
                }
                prop_assert!(test.ring.valid() <= Ring::LEN);
                prop_assert!(test.ring.valid() >= pending.len());
                prop_assert_eq!(test.ring.free_slots() + test.ring.valid(), Ring::LEN);
            }
            test.ring.recycle();
            prop_assert_eq!(test.ring.valid(), pending.len());
        }
    }
}
