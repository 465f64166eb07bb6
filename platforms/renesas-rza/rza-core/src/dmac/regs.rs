//! RZ/A DMAC register layout.
//!
//! The DMAC is split into two register windows. The main window holds the
//! per-channel registers, 0x40 bytes apart, and two "common" areas shared by
//! a group of eight channels. The extended window holds the `DMARS`
//! request-source selection registers.
// Field and register names follow the hardware manual.
#![allow(missing_docs)]

use super::hal::{DmacHal, Window};
use core::sync::atomic::{fence, Ordering};
use mycelium_bitfield::{bitfield, enum_from_bits, FromBits};

/// Channel register offsets, relative to a channel's base.
pub mod chan {
    pub const N0SA: usize = 0x00;
    pub const N0DA: usize = 0x04;
    pub const N0TB: usize = 0x08;
    pub const N1SA: usize = 0x0c;
    pub const N1DA: usize = 0x10;
    pub const N1TB: usize = 0x14;
    pub const CRSA: usize = 0x18;
    pub const CRDA: usize = 0x1c;
    pub const CRTB: usize = 0x20;
    pub const CHSTAT: usize = 0x24;
    pub const CHCTRL: usize = 0x28;
    pub const CHCFG: usize = 0x2c;
    pub const CHITVL: usize = 0x30;
    pub const CHEXT: usize = 0x34;
    pub const NXLA: usize = 0x38;
    pub const CRLA: usize = 0x3c;
}

/// Common register offsets, relative to a channel group's common base.
pub mod common {
    pub const DCTRL: usize = 0x00;
    pub const DSTAT_EN: usize = 0x10;
    pub const DSTAT_ER: usize = 0x14;
    pub const DSTAT_END: usize = 0x18;
    pub const DSTAT_TC: usize = 0x1c;
    pub const DSTAT_SUS: usize = 0x20;
}

/// Distance between two consecutive channels' registers.
pub const CHANNEL_STRIDE: usize = 0x40;

/// Channel groups: (first channel register offset, common base).
const GROUPS: [(usize, usize); 2] = [(0x000, 0x300), (0x400, 0x700)];

/// Number of channels in each group.
pub const CHANNELS_PER_GROUP: u8 = 8;

enum_from_bits! {
    /// Source and destination data sizes.
    #[derive(Debug, Eq, PartialEq)]
    #[cfg_attr(test, derive(proptest_derive::Arbitrary))]
    pub enum DataSize<u8> {
        Bits8 = 0b000,
        Bits16 = 0b001,
        Bits32 = 0b010,
        Bits64 = 0b011,
        Bits128 = 0b100,
        Bits256 = 0b101,
        Bits512 = 0b110,
        Bits1024 = 0b111,
    }
}

bitfield! {
    /// Channel status (`CHSTAT`).
    #[derive(Eq, PartialEq)]
    pub struct ChStat<u32> {
        pub const EN: bool;
        pub const RQST: bool;
        pub const TACT: bool;
        pub const SUS: bool;
        pub const ER: bool;
        pub const END: bool;
        pub const TC: bool;
        pub const SR: bool;
        pub const DL: bool;
        pub const DW: bool;
        pub const DER: bool;
        pub const MODE: bool;
        const _RESERVED_0 = 4;
        pub const INTMSK: bool;
        pub const DMARQM: bool;
        pub const SWPRQ: bool;
        const _RESERVED_1 = 5;
        pub const DNUM = 8;
    }
}

bitfield! {
    /// Channel control (`CHCTRL`).
    ///
    /// Every bit is a command: writing a one performs the operation, writing
    /// a zero does nothing.
    #[derive(Eq, PartialEq)]
    pub struct ChCtrl<u32> {
        pub const SETEN: bool;
        pub const CLREN: bool;
        pub const STG: bool;
        pub const SWRST: bool;
        pub const CLRRQ: bool;
        pub const CLREND: bool;
        pub const CLRTC: bool;
        const _RESERVED_0 = 1;
        pub const SETSUS: bool;
        pub const CLRSUS: bool;
        const _RESERVED_1 = 6;
        pub const SETINTMSK: bool;
        pub const CLRINTMSK: bool;
    }
}

bitfield! {
    /// Channel configuration (`CHCFG`).
    ///
    /// This is also the layout of the configuration word in a link-mode
    /// descriptor.
    #[derive(Eq, PartialEq)]
    pub struct ChCfg<u32> {
        /// Channel number within its group.
        pub const SEL = 3;
        /// Request direction: set when the destination requests.
        pub const REQD: bool;
        pub const LOEN: bool;
        pub const HIEN: bool;
        /// Level (rather than edge) request detection.
        pub const LVL: bool;
        const _RESERVED_0 = 1;
        /// `DACK` output mode.
        pub const AM = 3;
        const _RESERVED_1 = 1;
        /// Source data size.
        pub const SDS: DataSize;
        const _RESERVED_2 = 1;
        /// Destination data size.
        pub const DDS: DataSize;
        const _RESERVED_3 = 1;
        /// Source address is fixed.
        pub const SAD: bool;
        /// Destination address is fixed.
        pub const DAD: bool;
        /// Block (rather than single) transfer mode.
        pub const TM: bool;
        const _RESERVED_4 = 1;
        /// DMA end interrupt mask.
        pub const DEM: bool;
        pub const SBE: bool;
        pub const RSEL: bool;
        pub const RSW: bool;
        pub const REN: bool;
        const _RESERVED_5 = 2;
        /// Link mode.
        pub const DMS: bool;
    }
}

bitfield! {
    /// DMA control (`DCTRL`), one per channel group.
    #[derive(Eq, PartialEq)]
    pub struct Dctrl<u32> {
        /// Round-robin channel priority.
        pub const PR: bool;
        /// Raise an interrupt when a link descriptor is found invalid.
        pub const LVINT: bool;
    }
}

bitfield! {
    /// Request-source selection for one channel (half of a `DMARS` register).
    #[derive(Eq, PartialEq)]
    pub struct Dmars<u16> {
        /// Resource ID.
        pub const RID = 2;
        /// Module ID.
        pub const MID = 7;
    }
}

/// Register access for a single channel.
pub(crate) struct ChannelRegs<'a, H> {
    hal: &'a H,
    idx: u8,
    base: usize,
    common: usize,
}

// === impl DataSize ===

impl DataSize {
    /// Returns the data size for a bus width in bytes.
    #[must_use]
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        if !bytes.is_power_of_two() || bytes > 128 {
            return None;
        }
        <Self as FromBits<u8>>::try_from_bits(bytes.trailing_zeros() as u8).ok()
    }
}

// === impl ChCtrl ===

impl ChCtrl {
    /// The pattern written to stop a channel and return it to its reset
    /// state.
    #[must_use]
    pub fn disable() -> Self {
        Self::new()
            .with(Self::CLRINTMSK, true)
            .with(Self::CLRSUS, true)
            .with(Self::CLRTC, true)
            .with(Self::CLREND, true)
            .with(Self::CLRRQ, true)
            .with(Self::SWRST, true)
            .with(Self::CLREN, true)
    }

    /// Acknowledges a channel's end-of-transfer status.
    #[must_use]
    pub fn ack_end() -> Self {
        Self::new().with(Self::CLREND, true).with(Self::CLRRQ, true)
    }
}

// === impl Dctrl ===

impl Dctrl {
    #[must_use]
    pub fn default_config() -> Self {
        Self::new().with(Self::LVINT, true).with(Self::PR, true)
    }
}

/// Returns the (channel base, common base) offsets for channel `idx`.
#[must_use]
pub(crate) fn channel_offsets(idx: u8) -> (usize, usize) {
    let group = (idx / CHANNELS_PER_GROUP) as usize;
    let (first, common) = GROUPS[group];
    let within = (idx % CHANNELS_PER_GROUP) as usize;
    (first + within * CHANNEL_STRIDE, common)
}

/// Returns the common base offsets of both channel groups.
pub(crate) fn common_bases() -> impl Iterator<Item = usize> {
    GROUPS.iter().map(|&(_, common)| common)
}

/// Returns the `DMARS` register offset and bit shift for channel `idx`.
///
/// Each 32-bit `DMARS` register holds the selection for two channels; odd
/// channels use the upper half.
#[must_use]
pub(crate) fn dmars_location(idx: u8) -> (usize, u32) {
    let offset = (idx as usize / 2) * 4;
    let shift = if idx % 2 == 1 { 16 } else { 0 };
    (offset, shift)
}

// === impl ChannelRegs ===

impl<'a, H: DmacHal> ChannelRegs<'a, H> {
    pub(crate) fn new(hal: &'a H, idx: u8) -> Self {
        let (base, common) = channel_offsets(idx);
        Self {
            hal,
            idx,
            base,
            common,
        }
    }

    pub(crate) fn status(&self) -> ChStat {
        ChStat::from_bits(self.hal.read32(Window::Dmac, self.base + chan::CHSTAT))
    }

    pub(crate) fn control(&self, ctrl: ChCtrl) {
        self.hal
            .write32(Window::Dmac, self.base + chan::CHCTRL, ctrl.bits());
    }

    pub(crate) fn set_config(&self, cfg: ChCfg) {
        self.hal
            .write32(Window::Dmac, self.base + chan::CHCFG, cfg.bits());
    }

    pub(crate) fn set_next_link(&self, addr: u32) {
        self.hal.write32(Window::Dmac, self.base + chan::NXLA, addr);
    }

    pub(crate) fn current_link(&self) -> u32 {
        self.hal.read32(Window::Dmac, self.base + chan::CRLA)
    }

    /// Returns the channel's bit in its group's `DSTAT_*` registers.
    pub(crate) fn group_bit(&self) -> u32 {
        1 << (self.idx % CHANNELS_PER_GROUP)
    }

    pub(crate) fn common_status(&self, offset: usize) -> u32 {
        self.hal.read32(Window::Dmac, self.common + offset)
    }

    /// Writes the default control pattern, unconditionally stopping the
    /// channel.
    pub(crate) fn disable(&self) {
        fence(Ordering::SeqCst);
        self.control(ChCtrl::disable());
        fence(Ordering::SeqCst);
    }

    /// Programs this channel's half of the shared `DMARS` register.
    ///
    /// This is a read-modify-write of a register shared with the neighboring
    /// channel, so it must be called inside a critical section.
    pub(crate) fn set_request_source(&self, dmars: Dmars) {
        let (offset, shift) = dmars_location(self.idx);
        let mask = 0xffff_u32 << shift;
        let cur = self.hal.read32(Window::Ext, offset);
        let val = (cur & !mask) | (u32::from(dmars.bits()) << shift);
        self.hal.write32(Window::Ext, offset, val);
    }
}
