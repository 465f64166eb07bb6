//! A simulated DMAC for host tests.
//!
//! Registers live in a map. Writes to `CHCTRL` are interpreted as commands,
//! and [`SimHal::complete_transfer`] plays the part of the link-mode engine,
//! executing armed descriptors from a channel's ring.
use super::{
    descriptor::{Header, LinkDescriptor, Ring},
    hal::{CoherentRing, DmacHal, Window},
    regs::{self, chan, ChCfg, ChCtrl, ChStat, CHANNELS_PER_GROUP, CHANNEL_STRIDE},
};
use std::{boxed::Box, collections::HashMap, ptr::NonNull, sync::Mutex, vec, vec::Vec};

const RING_BUS_BASE: u32 = 0x8000_0000;
const RING_BUS_STRIDE: u32 = 0x1000;

#[derive(Default)]
pub(crate) struct SimHal {
    state: Mutex<SimState>,
}

/// A descriptor executed by the simulated engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Executed {
    pub(crate) src: u32,
    pub(crate) dst: u32,
    pub(crate) len: u32,
    pub(crate) chcfg: ChCfg,
}

#[derive(Default)]
struct SimState {
    regs: HashMap<(Window, usize), u32>,
    /// Live rings, by bus address, holding their CPU address.
    rings: HashMap<u32, usize>,
    allocated: u32,
    /// Fail ring allocation once this many rings have been allocated.
    alloc_limit: Option<u32>,
    executed: HashMap<u8, Vec<Executed>>,
    controls: HashMap<u8, Vec<ChCtrl>>,
}

impl SimHal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes ring allocation fail after `n` rings.
    pub(crate) fn with_alloc_limit(n: u32) -> Self {
        let sim = Self::new();
        sim.lock().alloc_limit = Some(n);
        sim
    }

    pub(crate) fn live_rings(&self) -> usize {
        self.lock().rings.len()
    }

    pub(crate) fn chstat(&self, idx: u8) -> ChStat {
        ChStat::from_bits(self.read32(Window::Dmac, chan_reg(idx, chan::CHSTAT)))
    }

    pub(crate) fn executed(&self, idx: u8) -> Vec<Executed> {
        self.lock().executed.get(&idx).cloned().unwrap_or_default()
    }

    /// Every value written to channel `idx`'s `CHCTRL`.
    pub(crate) fn controls(&self, idx: u8) -> Vec<ChCtrl> {
        self.lock().controls.get(&idx).cloned().unwrap_or_default()
    }

    /// Runs channel `idx` until it reaches a descriptor that raises the end
    /// interrupt, or stops. Returns `false` if the channel was not enabled or
    /// executed nothing.
    pub(crate) fn complete_transfer(&self, idx: u8) -> bool {
        let mut state = self.lock();
        let stat_reg = (Window::Dmac, chan_reg(idx, chan::CHSTAT));
        let crla_reg = (Window::Dmac, chan_reg(idx, chan::CRLA));
        let mut stat = ChStat::from_bits(state.reg(stat_reg));
        if !stat.get(ChStat::EN) {
            return false;
        }

        let mut addr = state.reg(crla_reg);
        let mut ran = false;
        loop {
            let Some(ptr) = state.descriptor(addr) else {
                stat.set(ChStat::EN, false);
                break;
            };
            let desc = unsafe { LinkDescriptor::load(ptr) };
            let header = Header::from_bits(desc.header);
            if !header.get(Header::LV) {
                // invalid link: the engine stops here
                stat.set(ChStat::EN, false);
                break;
            }

            let chcfg = desc.config();
            state.executed.entry(idx).or_default().push(Executed {
                src: desc.src,
                dst: desc.dst,
                len: desc.byte_count,
                chcfg,
            });
            // write back
            unsafe { LinkDescriptor::store_header(ptr, header.with(Header::LV, false)) };
            ran = true;
            addr = desc.next;

            if header.get(Header::LE) {
                stat.set(ChStat::EN, false).set(ChStat::END, true);
                break;
            }
            if !chcfg.get(ChCfg::DEM) {
                stat.set(ChStat::END, true);
                let next_valid = state
                    .descriptor(addr)
                    .map(|next| unsafe { LinkDescriptor::load_header(next) }.get(Header::LV))
                    .unwrap_or(false);
                if !next_valid {
                    stat.set(ChStat::EN, false);
                }
                break;
            }
        }

        state.regs.insert(crla_reg, addr);
        state.regs.insert(stat_reg, stat.bits());
        ran
    }

    /// Makes channel `idx` report a transfer error.
    pub(crate) fn inject_error(&self, idx: u8) {
        let mut state = self.lock();
        let stat_reg = (Window::Dmac, chan_reg(idx, chan::CHSTAT));
        let stat = ChStat::from_bits(state.reg(stat_reg))
            .with(ChStat::ER, true)
            .with(ChStat::EN, false);
        state.regs.insert(stat_reg, stat.bits());

        let er_reg = (Window::Dmac, er_reg(idx));
        let er = state.reg(er_reg) | (1 << (idx % CHANNELS_PER_GROUP));
        state.regs.insert(er_reg, er);
    }

    /// Sets `END` on channel `idx` without running anything.
    pub(crate) fn raise_end(&self, idx: u8) {
        let mut state = self.lock();
        let stat_reg = (Window::Dmac, chan_reg(idx, chan::CHSTAT));
        let stat = ChStat::from_bits(state.reg(stat_reg)).with(ChStat::END, true);
        state.regs.insert(stat_reg, stat.bits());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }
}

impl SimState {
    fn reg(&self, key: (Window, usize)) -> u32 {
        self.regs.get(&key).copied().unwrap_or(0)
    }

    fn descriptor(&self, addr: u32) -> Option<*mut LinkDescriptor> {
        let span = (Ring::LEN * LinkDescriptor::SIZE) as u32;
        self.rings.iter().find_map(|(&base, &ptr)| {
            let off = addr.checked_sub(base).filter(|&off| off < span)?;
            assert_eq!(off as usize % LinkDescriptor::SIZE, 0, "misaligned link address {addr:#x}");
            let idx = off as usize / LinkDescriptor::SIZE;
            Some(unsafe { (ptr as *mut LinkDescriptor).add(idx) })
        })
    }

    fn command(&mut self, idx: u8, ctrl: ChCtrl) {
        self.controls.entry(idx).or_default().push(ctrl);
        let stat_reg = (Window::Dmac, chan_reg(idx, chan::CHSTAT));
        let mut stat = ChStat::from_bits(self.reg(stat_reg));

        if ctrl.get(ChCtrl::SWRST) {
            stat = ChStat::new();
            let er_reg = (Window::Dmac, er_reg(idx));
            let er = self.reg(er_reg) & !(1 << (idx % CHANNELS_PER_GROUP));
            self.regs.insert(er_reg, er);
        }
        if ctrl.get(ChCtrl::CLREN) {
            stat.set(ChStat::EN, false);
        }
        if ctrl.get(ChCtrl::CLREND) {
            stat.set(ChStat::END, false);
        }
        if ctrl.get(ChCtrl::CLRTC) {
            stat.set(ChStat::TC, false);
        }
        if ctrl.get(ChCtrl::CLRRQ) {
            stat.set(ChStat::RQST, false);
        }
        if ctrl.get(ChCtrl::SETEN) {
            stat.set(ChStat::EN, true);
            let nxla = self.reg((Window::Dmac, chan_reg(idx, chan::NXLA)));
            self.regs
                .insert((Window::Dmac, chan_reg(idx, chan::CRLA)), nxla);
        }
        self.regs.insert(stat_reg, stat.bits());
    }
}

unsafe impl DmacHal for SimHal {
    fn read32(&self, window: Window, offset: usize) -> u32 {
        self.lock().reg((window, offset))
    }

    fn write32(&self, window: Window, offset: usize, value: u32) {
        let mut state = self.lock();
        if window == Window::Dmac {
            if let Some((idx, chan::CHCTRL)) = decode_chan_reg(offset) {
                state.command(idx, ChCtrl::from_bits(value));
                return;
            }
        }
        state.regs.insert((window, offset), value);
    }

    fn alloc_ring(&self) -> Option<CoherentRing> {
        let mut state = self.lock();
        if state.alloc_limit.map_or(false, |limit| state.allocated >= limit) {
            return None;
        }
        let mem = Box::into_raw(vec![LinkDescriptor::default(); Ring::LEN].into_boxed_slice());
        let ptr = NonNull::new(mem.cast::<LinkDescriptor>())?;
        let bus_addr = RING_BUS_BASE + state.allocated * RING_BUS_STRIDE;
        state.allocated += 1;
        state.rings.insert(bus_addr, ptr.as_ptr() as usize);
        Some(CoherentRing { ptr, bus_addr })
    }

    unsafe fn free_ring(&self, ring: CoherentRing) {
        let ptr = self
            .lock()
            .rings
            .remove(&ring.bus_addr)
            .expect("freed a ring that was not allocated");
        assert_eq!(ptr, ring.ptr.as_ptr() as usize);
        let slice = core::ptr::slice_from_raw_parts_mut(ptr as *mut LinkDescriptor, Ring::LEN);
        drop(Box::from_raw(slice));
    }
}

impl Drop for SimHal {
    fn drop(&mut self) {
        let rings = core::mem::take(&mut self.lock().rings);
        for (_, ptr) in rings {
            let slice = core::ptr::slice_from_raw_parts_mut(ptr as *mut LinkDescriptor, Ring::LEN);
            drop(unsafe { Box::from_raw(slice) });
        }
    }
}

fn chan_reg(idx: u8, reg: usize) -> usize {
    regs::channel_offsets(idx).0 + reg
}

fn er_reg(idx: u8) -> usize {
    regs::channel_offsets(idx).1 + regs::common::DSTAT_ER
}

/// Maps a main-window offset back to (channel, register).
fn decode_chan_reg(offset: usize) -> Option<(u8, usize)> {
    (0..super::MAX_CHANNELS as u8).find_map(|idx| {
        let base = regs::channel_offsets(idx).0;
        (base..base + CHANNEL_STRIDE)
            .contains(&offset)
            .then(|| (idx, offset - base))
    })
}
