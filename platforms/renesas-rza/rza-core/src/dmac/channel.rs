//! Per-channel transfer state.
//!
//! Each channel owns a pool of software descriptors, each of which is on
//! exactly one of three lists:
//!
//! - **free**: available to be prepared,
//! - **queued**: submitted, waiting for the hardware,
//! - **active**: written to the descriptor ring and armed.
//!
//! Everything in here runs with the channel's lock held; the [`Dmac`] takes
//! care of locking and of calling completion callbacks after the lock is
//! released.
//!
//! [`Dmac`]: super::Dmac
use super::{
    descriptor::{Header, Link, Ring, RingSpan},
    errors::DmaError,
    hal::DmacHal,
    regs::{ChCfg, ChCtrl, ChStat, ChannelRegs, DataSize, Dmars},
    slave::Slave,
};
use alloc::vec::Vec;
use core::fmt;
use heapless::Deque;

/// Number of software descriptors allocated for each channel.
pub const MAX_CHAN_DESCRIPTORS: usize = 16;

/// Number of failed or abandoned cookies remembered for
/// [`TxStatus::Error`] reporting.
pub(crate) const FAILED_HISTORY: usize = 32;

/// Whether the last descriptor of each transfer stops the DMAC.
const LINK_END: bool = cfg!(feature = "link-end");

/// Identifies a submitted transfer on its channel.
///
/// Cookies are assigned in increasing order starting from 1. Zero is never a
/// valid cookie.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Cookie(pub(crate) u32);

/// The state of a submitted transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TxStatus {
    /// The transfer completed.
    Complete,
    /// The transfer is queued or running.
    InProgress,
    /// The transfer failed with a hardware error, or was abandoned by
    /// [`terminate_all`](super::Channel::terminate_all).
    Error,
    /// The cookie was never issued by this channel.
    Unknown,
}

/// Passed to a transfer's [`Callback`] when it completes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Completion {
    /// The completed transfer.
    pub cookie: Cookie,
    /// How it completed.
    pub status: TxStatus,
}

/// A function called when a transfer completes, along with a context value
/// passed back to it.
///
/// Callbacks run from the channel's completion handler after the channel
/// lock is released, so they may submit and issue more work on the same
/// channel.
#[derive(Copy, Clone)]
pub struct Callback {
    func: fn(usize, Completion),
    ctx: usize,
}

/// Direction of a transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Memory to memory.
    MemToMem,
    /// Memory to a peripheral.
    MemToDev,
    /// A peripheral to memory.
    DevToMem,
}

/// One contiguous buffer of a scatter-gather list.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    /// Bus address of the buffer.
    pub addr: u32,
    /// Length of the buffer in bytes.
    pub len: u32,
}

/// Peripheral-side parameters for slave transfers in one direction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SlaveTransferConfig {
    /// The direction these parameters apply to.
    pub direction: Direction,
    /// Bus address of the peripheral's data register.
    pub addr: u32,
    /// Access width at the peripheral.
    pub width: DataSize,
}

/// A channel's coarse state, derived from its descriptor lists.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelPhase {
    /// No descriptors are allocated.
    Unconfigured,
    /// Descriptors are allocated but no peripheral is bound.
    Idle,
    /// A peripheral is bound and nothing is queued or running.
    Configured,
    /// Transfers are queued but nothing is running.
    Prepared,
    /// A transfer is running.
    Active,
}

/// How a channel's descriptors are distributed across its lists.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DescriptorCounts {
    /// Descriptors available for new transfers.
    pub free: usize,
    /// Submitted transfers not yet started.
    pub queued: usize,
    /// Transfers written to the ring.
    pub active: usize,
    /// Free descriptors held by an unsubmitted [`Transaction`](super::Transaction).
    pub reserved: usize,
}

/// Per-channel counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[allow(missing_docs)]
pub struct ChannelStats {
    pub prepared: u64,
    pub submitted: u64,
    pub issued: u64,
    pub completed: u64,
    pub errors: u64,
    /// Calls to `terminate_all`.
    pub terminated: u64,
}

/// The work a descriptor describes.
#[derive(Debug)]
pub(crate) enum Transfer {
    Memcpy {
        src: u32,
        dst: u32,
        len: u32,
    },
    SlaveSg {
        segments: Vec<Segment>,
        direction: Direction,
    },
}

/// A finished transfer, handed back so its callback can run unlocked.
#[derive(Debug)]
pub(crate) struct Finished {
    pub(crate) callback: Option<Callback>,
    pub(crate) completion: Completion,
}

pub(crate) struct ChannelState {
    idx: u8,
    ring: Ring,
    slave: Option<Slave>,
    rx: Option<SlaveTransferConfig>,
    tx: Option<SlaveTransferConfig>,
    pool: Option<Pool>,
    chcfg: ChCfg,
    chctrl: ChCtrl,
    /// Set when the channel stopped on a transfer error that has not been
    /// retired yet. The channel is not re-armed while this is set.
    halted: bool,
    cookies: Cookies,
    stats: ChannelStats,
}

pub(crate) struct Pool {
    descs: Vec<SwDesc>,
    free: DescList,
    queued: DescList,
    active: DescList,
}

type DescList = Deque<usize, MAX_CHAN_DESCRIPTORS>;

#[derive(Debug)]
struct SwDesc {
    transfer: Option<Transfer>,
    /// Held by a `Transaction` that has not been submitted yet.
    reserved: bool,
    cookie: Cookie,
    status: TxStatus,
    callback: Option<Callback>,
    span: Option<RingSpan>,
}

/// Register state for a transfer that has been written to the ring.
struct Armed {
    span: RingSpan,
    chcfg: ChCfg,
    chctrl: ChCtrl,
    dmars: Dmars,
}

struct Cookies {
    last_used: u32,
    completed: u32,
    wrapped: bool,
    failed: Deque<u32, FAILED_HISTORY>,
}

// === impl ChannelState ===

impl ChannelState {
    pub(crate) fn new(idx: u8, ring: Ring) -> Self {
        Self {
            idx,
            ring,
            slave: None,
            rx: None,
            tx: None,
            pool: None,
            chcfg: ChCfg::new(),
            chctrl: ChCtrl::new(),
            halted: false,
            cookies: Cookies::new(),
            stats: ChannelStats::default(),
        }
    }

    pub(crate) fn slave(&self) -> Option<&Slave> {
        self.slave.as_ref()
    }

    pub(crate) fn bind_slave(&mut self, slave: Option<Slave>) {
        self.slave = slave;
    }

    /// Forgets the bound slave and peripheral parameters.
    pub(crate) fn unbind(&mut self) {
        self.slave = None;
        self.rx = None;
        self.tx = None;
    }

    pub(crate) fn ring(&self) -> &Ring {
        &self.ring
    }

    /// Allocates the descriptor pool, returning the number of descriptors.
    pub(crate) fn alloc(&mut self) -> Result<usize, DmaError> {
        if let Some(pool) = &self.pool {
            return Ok(pool.descs.len());
        }

        let mut descs = Vec::new();
        descs
            .try_reserve_exact(MAX_CHAN_DESCRIPTORS)
            .map_err(|_| DmaError::OutOfMemory)?;
        let mut free = DescList::new();
        for id in 0..MAX_CHAN_DESCRIPTORS {
            descs.push(SwDesc::new());
            let _ = free.push_back(id);
        }

        self.pool = Some(Pool {
            descs,
            free,
            queued: DescList::new(),
            active: DescList::new(),
        });
        Ok(MAX_CHAN_DESCRIPTORS)
    }

    /// Stops the channel and takes its descriptor pool.
    ///
    /// The pool is returned rather than dropped so the caller can release
    /// it outside the lock.
    pub(crate) fn free<H: DmacHal>(&mut self, regs: &ChannelRegs<'_, H>) -> Option<Pool> {
        self.disable_hw(regs);
        self.abandon_all();
        self.pool.take()
    }

    pub(crate) fn configure(&mut self, config: SlaveTransferConfig) -> Result<(), DmaError> {
        match config.direction {
            Direction::DevToMem => self.rx = Some(config),
            Direction::MemToDev => self.tx = Some(config),
            Direction::MemToMem => {
                return Err(DmaError::InvalidArgument(
                    "slave configuration must be to or from a device",
                ))
            }
        }
        Ok(())
    }

    pub(crate) fn slave_config(&self, direction: Direction) -> Option<SlaveTransferConfig> {
        match direction {
            Direction::DevToMem => self.rx,
            Direction::MemToDev => self.tx,
            Direction::MemToMem => None,
        }
    }

    /// Reserves a free descriptor for `transfer`.
    pub(crate) fn prepare(&mut self, transfer: Transfer) -> Result<usize, DmaError> {
        if matches!(transfer, Transfer::SlaveSg { .. }) && self.slave.is_none() {
            return Err(DmaError::NoSlave);
        }
        let pool = self.pool.as_mut().ok_or(DmaError::NotAllocated)?;
        let id = pool
            .free
            .iter()
            .copied()
            .find(|&id| !pool.descs[id].reserved)
            .ok_or(DmaError::PoolExhausted)?;

        tracing::trace!(channel = self.idx, desc = id, bytes = transfer.len(), "DMA transfer prepared");
        let desc = &mut pool.descs[id];
        desc.reserved = true;
        desc.transfer = Some(transfer);
        desc.callback = None;
        desc.span = None;
        self.stats.prepared += 1;
        Ok(id)
    }

    /// Returns an unsubmitted descriptor to the pool.
    pub(crate) fn release(&mut self, id: usize) {
        if let Some(desc) = self.pool.as_mut().and_then(|p| p.descs.get_mut(id)) {
            if desc.reserved {
                desc.reserved = false;
                desc.transfer = None;
            }
        }
    }

    /// Moves a prepared descriptor to the queued list and assigns its cookie.
    pub(crate) fn submit(&mut self, id: usize, callback: Option<Callback>) -> Result<Cookie, DmaError> {
        let pool = self.pool.as_mut().ok_or(DmaError::NotAllocated)?;
        match pool.descs.get(id) {
            Some(desc) if desc.reserved => {}
            _ => return Err(DmaError::NotPrepared),
        }
        if !remove(&mut pool.free, id) {
            return Err(DmaError::NotPrepared);
        }

        let cookie = self.cookies.assign();
        let desc = &mut pool.descs[id];
        desc.reserved = false;
        desc.callback = callback;
        desc.cookie = cookie;
        desc.status = TxStatus::InProgress;
        let _ = pool.queued.push_back(id);
        self.stats.submitted += 1;
        tracing::trace!(channel = self.idx, desc = id, cookie = cookie.0, "DMA transfer submitted");
        Ok(cookie)
    }

    /// Starts the transfer at the head of the queued list.
    pub(crate) fn issue_pending<H: DmacHal>(&mut self, regs: &ChannelRegs<'_, H>) {
        self.advance_queue(regs);
    }

    /// Stops the channel and abandons every queued and active transfer.
    ///
    /// No callbacks are run for the abandoned transfers; their cookies report
    /// [`TxStatus::Error`].
    pub(crate) fn terminate<H: DmacHal>(&mut self, regs: &ChannelRegs<'_, H>) -> usize {
        self.disable_hw(regs);
        let abandoned = self.abandon_all();
        self.stats.terminated += 1;
        abandoned
    }

    /// Records that the channel was stopped by a transfer error.
    ///
    /// Until the failed transfer is retired by [`complete`](Self::complete),
    /// new work is written to the ring but the channel is not restarted.
    pub(crate) fn halt(&mut self) {
        self.halted = true;
    }

    /// Retires the transfer at the head of the active list and starts the
    /// next queued one.
    ///
    /// This runs once per completion interrupt. `failed` is set if the
    /// interrupt reported a transfer error, in which case the transfer's
    /// remaining ring slots are discarded and no callback is returned.
    pub(crate) fn complete<H: DmacHal>(
        &mut self,
        regs: &ChannelRegs<'_, H>,
        failed: bool,
    ) -> Option<Finished> {
        let idx = self.idx;
        if failed {
            self.halted = false;
        }
        let Some(pool) = self.pool.as_mut() else {
            tracing::trace!(channel = idx, "DMA completion with no resources allocated");
            return None;
        };
        let Some(id) = pool.active.pop_front() else {
            // raced with `terminate_all`
            tracing::trace!(channel = idx, "DMA completion with no active transfer");
            return None;
        };

        let desc = &mut pool.descs[id];
        let cookie = desc.cookie;
        let span = desc.span.take();
        let mut callback = desc.callback.take();
        desc.transfer = None;
        desc.status = if failed {
            TxStatus::Error
        } else {
            TxStatus::Complete
        };
        let status = desc.status;
        let _ = pool.free.push_back(id);
        let more_queued = !pool.queued.is_empty();
        let more_active = !pool.active.is_empty();

        if failed {
            if let Some(span) = span {
                self.ring.discard(span);
            }
            self.cookies.fail(cookie);
            self.stats.errors += 1;
            callback = None;
            tracing::debug!(channel = idx, cookie = cookie.0, "DMA transfer failed");
        } else {
            self.cookies.complete(cookie);
            self.stats.completed += 1;
            tracing::trace!(channel = idx, cookie = cookie.0, "DMA transfer complete");
        }

        if more_queued {
            self.advance_queue(regs);
        } else if more_active {
            // transfers appended while the DMAC was stopping may have been
            // left behind in the ring.
            self.enable_hw(regs);
        }

        Some(Finished {
            callback,
            completion: Completion { cookie, status },
        })
    }

    pub(crate) fn tx_status(&self, cookie: Cookie) -> TxStatus {
        self.cookies.status(cookie)
    }

    pub(crate) fn phase(&self) -> ChannelPhase {
        match &self.pool {
            None => ChannelPhase::Unconfigured,
            Some(pool) if !pool.active.is_empty() => ChannelPhase::Active,
            Some(pool) if !pool.queued.is_empty() => ChannelPhase::Prepared,
            Some(_) if self.slave.is_some() => ChannelPhase::Configured,
            Some(_) => ChannelPhase::Idle,
        }
    }

    pub(crate) fn counts(&self) -> DescriptorCounts {
        let Some(pool) = &self.pool else {
            return DescriptorCounts::default();
        };
        DescriptorCounts {
            free: pool.free.len(),
            queued: pool.queued.len(),
            active: pool.active.len(),
            reserved: pool.descs.iter().filter(|d| d.reserved).count(),
        }
    }

    pub(crate) fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Writes the transfer `id` to the ring and arms the channel.
    fn xfer<H: DmacHal>(&mut self, regs: &ChannelRegs<'_, H>, id: usize) -> Result<(), DmaError> {
        self.ring.recycle();

        let Self {
            idx,
            ring,
            slave,
            rx,
            tx,
            pool,
            chcfg,
            chctrl,
            ..
        } = self;
        let pool = pool.as_mut().ok_or(DmaError::NotAllocated)?;
        let desc = pool
            .descs
            .get_mut(id)
            .ok_or(DmaError::InvalidArgument("no such descriptor"))?;

        let armed = match &desc.transfer {
            Some(Transfer::Memcpy { src, dst, len }) => arm_memcpy(*idx, ring, *src, *dst, *len)?,
            Some(Transfer::SlaveSg {
                segments,
                direction,
            }) => {
                let slave = slave.as_ref().ok_or(DmaError::NoSlave)?;
                let configured = match direction {
                    Direction::DevToMem => rx.as_ref(),
                    _ => tx.as_ref(),
                };
                let per_addr = configured.map_or(slave.addr, |c| c.addr);
                arm_slave_sg(*idx, ring, slave, per_addr, segments, *direction)?
            }
            None => return Err(DmaError::InvalidArgument("descriptor has no transfer")),
        };

        desc.span = Some(armed.span);
        *chcfg = armed.chcfg;
        *chctrl = armed.chctrl;
        regs.set_request_source(armed.dmars);
        tracing::trace!(
            channel = *idx,
            desc = id,
            slots = armed.span.len,
            start = armed.span.start,
            "DMA transfer written to ring"
        );

        self.enable_hw(regs);
        Ok(())
    }

    fn advance_queue<H: DmacHal>(&mut self, regs: &ChannelRegs<'_, H>) {
        let Some(next) = self.pool.as_ref().and_then(|p| p.queued.front().copied()) else {
            return;
        };
        match self.xfer(regs, next) {
            Ok(()) => {
                if let Some(pool) = self.pool.as_mut() {
                    pool.queued.pop_front();
                    let _ = pool.active.push_back(next);
                }
                self.stats.issued += 1;
            }
            Err(error) => {
                tracing::warn!(
                    channel = self.idx,
                    desc = next,
                    %error,
                    "could not start queued DMA transfer; leaving it queued"
                );
            }
        }
    }

    /// Points an idle channel at the oldest armed descriptor and starts it.
    ///
    /// If the channel is already running, the new descriptors are picked up
    /// when the DMAC reaches them.
    fn enable_hw<H: DmacHal>(&mut self, regs: &ChannelRegs<'_, H>) {
        self.ring.recycle();
        if self.halted {
            tracing::trace!(channel = self.idx, "DMA channel halted on error; not restarting");
            return;
        }
        if regs.status().get(ChStat::EN) {
            tracing::trace!(channel = self.idx, "DMA channel already running");
            return;
        }
        if self.ring.valid() == 0 {
            return;
        }

        let nxla = self.ring.head_bus_addr();
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        regs.set_next_link(nxla);
        regs.set_config(self.chcfg);
        regs.control(ChCtrl::new().with(ChCtrl::SWRST, true));
        regs.control(self.chctrl.with(ChCtrl::SETEN, true));
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        tracing::trace!(
            channel = self.idx,
            nxla = ?format_args!("{nxla:#010x}"),
            chcfg = ?format_args!("{:#010x}", self.chcfg.bits()),
            "DMA channel enabled"
        );
    }

    fn disable_hw<H: DmacHal>(&mut self, regs: &ChannelRegs<'_, H>) {
        regs.disable();
    }

    /// Empties the ring and moves every queued and active descriptor back to
    /// the free list. Returns how many transfers were abandoned.
    fn abandon_all(&mut self) -> usize {
        self.ring.clear();
        self.halted = false;
        let Some(pool) = self.pool.as_mut() else {
            return 0;
        };

        let mut abandoned = 0;
        let Pool {
            descs,
            free,
            queued,
            active,
        } = pool;
        for list in [active, queued] {
            while let Some(id) = list.pop_front() {
                let desc = &mut descs[id];
                desc.callback = None;
                desc.transfer = None;
                desc.span = None;
                desc.status = TxStatus::Error;
                self.cookies.fail(desc.cookie);
                let _ = free.push_back(id);
                abandoned += 1;
            }
        }
        abandoned
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let Some(pool) = &self.pool else {
            return;
        };
        let mut seen = [0usize; MAX_CHAN_DESCRIPTORS];
        for &id in pool.free.iter().chain(pool.queued.iter()).chain(pool.active.iter()) {
            seen[id] += 1;
        }
        for (id, &n) in seen.iter().enumerate() {
            assert_eq!(n, 1, "descriptor {id} is on {n} lists");
        }
        for &id in pool.queued.iter().chain(pool.active.iter()) {
            assert!(!pool.descs[id].reserved, "submitted descriptor {id} is reserved");
        }
    }
}

impl fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelState")
            .field("idx", &self.idx)
            .field("ring", &self.ring)
            .field("slave", &self.slave)
            .field("halted", &self.halted)
            .field("phase", &self.phase())
            .field("counts", &self.counts())
            .finish()
    }
}

fn arm_memcpy(idx: u8, ring: &mut Ring, src: u32, dst: u32, len: u32) -> Result<Armed, DmaError> {
    let link = Link::memcpy(idx, src, dst, len, LINK_END);
    let start = ring.tail();
    ring.push(link).ok_or(DmaError::RingFull {
        needed: 1,
        free: 0,
    })?;
    Ok(Armed {
        span: RingSpan { start, len: 1 },
        chcfg: link.chcfg,
        chctrl: ChCtrl::new()
            .with(ChCtrl::STG, true)
            .with(ChCtrl::SETEN, true),
        dmars: Dmars::new(),
    })
}

fn arm_slave_sg(
    idx: u8,
    ring: &mut Ring,
    slave: &Slave,
    per_addr: u32,
    segments: &[Segment],
    direction: Direction,
) -> Result<Armed, DmaError> {
    let free = ring.free_slots();
    if segments.len() > free {
        return Err(DmaError::RingFull {
            needed: segments.len(),
            free,
        });
    }

    let mut chcfg = slave
        .chcfg
        .with(ChCfg::SEL, u32::from(idx % 8))
        .with(ChCfg::DEM, true)
        .with(ChCfg::DMS, true);
    match direction {
        Direction::DevToMem => chcfg.set(ChCfg::SAD, true),
        _ => chcfg.set(ChCfg::DAD, true),
    };

    let start = ring.tail();
    let last = segments.len() - 1;
    for (i, seg) in segments.iter().enumerate() {
        let (src, dst) = match direction {
            Direction::DevToMem => (per_addr, seg.addr),
            _ => (seg.addr, per_addr),
        };
        // the last descriptor unmasks the end interrupt
        let (cfg, header) = if i == last {
            (chcfg.with(ChCfg::DEM, false), Header::armed(LINK_END))
        } else {
            (chcfg, Header::armed(false))
        };
        let pushed = ring.push(Link {
            src,
            dst,
            len: seg.len,
            chcfg: cfg,
            header,
        });
        debug_assert!(pushed.is_some(), "ring capacity was checked");
    }

    Ok(Armed {
        span: RingSpan {
            start,
            len: segments.len(),
        },
        chcfg,
        chctrl: ChCtrl::new().with(ChCtrl::SETEN, true),
        dmars: slave.dmars,
    })
}

/// Removes `id` from `list`, preserving the order of the other entries.
fn remove(list: &mut DescList, id: usize) -> bool {
    let mut found = false;
    for _ in 0..list.len() {
        let Some(next) = list.pop_front() else {
            break;
        };
        if next == id && !found {
            found = true;
        } else {
            let _ = list.push_back(next);
        }
    }
    found
}

// === impl SwDesc ===

impl SwDesc {
    fn new() -> Self {
        Self {
            transfer: None,
            reserved: false,
            cookie: Cookie(0),
            status: TxStatus::Complete,
            callback: None,
            span: None,
        }
    }
}

// === impl Cookies ===

impl Cookies {
    const fn new() -> Self {
        Self {
            last_used: 0,
            completed: 0,
            wrapped: false,
            failed: Deque::new(),
        }
    }

    fn assign(&mut self) -> Cookie {
        self.last_used = match self.last_used.checked_add(1) {
            Some(next) => next,
            None => {
                self.wrapped = true;
                1
            }
        };
        Cookie(self.last_used)
    }

    fn complete(&mut self, cookie: Cookie) {
        self.completed = cookie.0;
    }

    fn fail(&mut self, cookie: Cookie) {
        if self.failed.is_full() {
            self.failed.pop_front();
        }
        let _ = self.failed.push_back(cookie.0);
        self.completed = cookie.0;
    }

    fn status(&self, Cookie(cookie): Cookie) -> TxStatus {
        if cookie == 0 || (!self.wrapped && cookie > self.last_used) {
            return TxStatus::Unknown;
        }
        if self.failed.iter().any(|&c| c == cookie) {
            return TxStatus::Error;
        }

        let done = if self.completed <= self.last_used {
            cookie <= self.completed || cookie > self.last_used
        } else {
            cookie <= self.completed && cookie > self.last_used
        };
        if done {
            TxStatus::Complete
        } else {
            TxStatus::InProgress
        }
    }
}

// === impl Cookie ===

impl Cookie {
    /// Returns the cookie's numeric value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// === impl Callback ===

impl Callback {
    /// Returns a callback that calls `func(ctx, completion)`.
    #[must_use]
    pub const fn new(func: fn(usize, Completion), ctx: usize) -> Self {
        Self { func, ctx }
    }

    pub(crate) fn call(self, completion: Completion) {
        (self.func)(self.ctx, completion)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("func", &(self.func as *const ()))
            .field("ctx", &format_args!("{:#x}", self.ctx))
            .finish()
    }
}

// === impl Transfer ===

impl Transfer {
    pub(crate) fn memcpy(dst: u32, src: u32, len: usize) -> Result<Self, DmaError> {
        let len = u32::try_from(len)
            .ok()
            .filter(|&len| len > 0)
            .ok_or(DmaError::InvalidArgument("memcpy length must be 1 to 4 GiB"))?;
        Ok(Self::Memcpy { src, dst, len })
    }

    pub(crate) fn slave_sg(segments: &[Segment], direction: Direction) -> Result<Self, DmaError> {
        if direction == Direction::MemToMem {
            return Err(DmaError::InvalidArgument(
                "slave transfers must be to or from a device",
            ));
        }
        if segments.is_empty() {
            return Err(DmaError::InvalidArgument("empty scatter-gather list"));
        }
        if segments.len() > Ring::LEN {
            return Err(DmaError::InvalidArgument(
                "scatter-gather list is longer than the descriptor ring",
            ));
        }
        if segments.iter().any(|s| s.len == 0) {
            return Err(DmaError::InvalidArgument("zero-length segment"));
        }
        segments
            .iter()
            .try_fold(0u32, |total, s| total.checked_add(s.len))
            .ok_or(DmaError::InvalidArgument("scatter-gather list is too long"))?;

        let mut owned = Vec::new();
        owned
            .try_reserve_exact(segments.len())
            .map_err(|_| DmaError::OutOfMemory)?;
        owned.extend_from_slice(segments);
        Ok(Self::SlaveSg {
            segments: owned,
            direction,
        })
    }

    /// Total number of bytes moved by this transfer.
    pub(crate) fn len(&self) -> u64 {
        match self {
            Self::Memcpy { len, .. } => u64::from(*len),
            Self::SlaveSg { segments, .. } => segments.iter().map(|s| u64::from(s.len)).sum(),
        }
    }
}
