//! Driver for the Renesas RZ/A DMA Controller (DMAC).
//!
//! The DMAC is driven entirely in link mode: each channel executes a chain of
//! [`LinkDescriptor`](descriptor::LinkDescriptor)s from its own descriptor
//! [`Ring`](descriptor::Ring), so transfers submitted while a channel is busy
//! are appended to the ring and picked up without restarting the channel.
//!
//! A [`Dmac`] is created once per controller from the board's
//! [`DmacConfig`]. Drivers then claim [`Channel`]s from it, optionally bound
//! to a peripheral from the board's slave table, prepare transfers on them,
//! and [`submit`](Transaction::submit) and
//! [`issue`](Channel::issue_pending) those transfers.
//!
//! Interrupts are split in two halves. [`Dmac::handle_interrupt`] runs in
//! interrupt context, acknowledges the hardware, and records that a
//! completion is pending. The completion work (retiring the finished
//! transfer, starting the next one, and running its callback) happens in
//! [`Dmac::handle_irq_thread`] or in a per-channel [`Dmac::irq_thread`]
//! task.
#![warn(missing_docs)]
use core::{cell::RefCell, fmt};

use critical_section::Mutex;
use heapless::Vec;
use maitake_sync::{WaitCell, WaitQueue};
use portable_atomic::{AtomicU16, Ordering};
use rza_config::DmacConfig;

use self::{
    channel::{ChannelState, Finished, Transfer},
    descriptor::Ring,
    hal::{DmacHal, Window},
    regs::{ChCtrl, ChStat, ChannelRegs, Dctrl},
    slave::{Slave, SlaveTable},
};

pub use self::{
    channel::{
        Callback, ChannelPhase, ChannelStats, Completion, Cookie, DescriptorCounts, Direction,
        Segment, SlaveTransferConfig, TxStatus, MAX_CHAN_DESCRIPTORS,
    },
    errors::{DmaError, SetupError, TransferFailed},
    slave::SlaveId,
};

pub mod channel;
pub mod descriptor;
pub mod errors;
pub mod hal;
pub mod regs;
pub mod slave;

#[cfg(test)]
mod sim;

/// The maximum number of channels on the RZ/A DMAC.
pub const MAX_CHANNELS: usize = rza_config::MAX_CHANNELS as usize;

/// A DMA controller instance.
///
/// Owns the controller's register access, its slave table, and the state of
/// every channel. Channels are claimed using
/// [`claim_channel`](Self::claim_channel),
/// [`try_claim_channel`](Self::try_claim_channel) or
/// [`xlate`](Self::xlate), and released by dropping the [`Channel`].
pub struct Dmac<H: DmacHal> {
    hal: H,
    channels: Vec<ChannelSlot, MAX_CHANNELS>,
    slaves: SlaveTable,
    /// Bitmap of claimed channels.
    claims: AtomicU16,
    /// Notified when a channel is released.
    claim_wait: WaitQueue,
}

/// A claimed DMA channel.
///
/// Dropping a `Channel` stops it, frees its descriptors, and releases it back
/// to the [`Dmac`].
#[must_use = "dropping a `Channel` releases it"]
pub struct Channel<'dmac, H: DmacHal> {
    dmac: &'dmac Dmac<H>,
    idx: u8,
}

/// A prepared transfer that has not been submitted yet.
///
/// Holds one of the channel's descriptors. Dropping a `Transaction` without
/// [submitting](Self::submit) it returns the descriptor to the pool.
#[must_use = "a prepared transfer does nothing unless it is submitted"]
pub struct Transaction<'chan, H: DmacHal> {
    dmac: &'chan Dmac<H>,
    idx: u8,
    desc: usize,
    callback: Option<Callback>,
    submitted: bool,
}

/// A DMAC interrupt line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Irq {
    /// A channel's end-of-transfer interrupt.
    Channel(u8),
    /// The shared transfer error interrupt.
    Error,
}

/// What an interrupt handler did.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum IrqReturn {
    /// The interrupt was not raised by this device.
    None,
    /// The interrupt was handled entirely by the top half.
    Handled,
    /// Completion work is pending for the bottom half.
    WakeThread,
}

struct ChannelSlot {
    idx: u8,
    state: Mutex<RefCell<ChannelState>>,
    /// Completions signaled by the top half and not yet processed.
    irq_pending: AtomicU16,
    /// How many of the pending completions are errors. An error halts the
    /// channel until the bottom half retires the failed transfer, so these
    /// are always the most recent ones.
    irq_errors: AtomicU16,
    /// Wakes the bottom half.
    irq_wait: WaitCell,
    /// Wakes tasks waiting for transfers on this channel to finish.
    done_wait: WaitQueue,
}

// === impl Dmac ===

impl<H: DmacHal> Dmac<H> {
    /// Brings up the DMAC described by `config`.
    ///
    /// This builds the slave table, allocates a descriptor ring for each
    /// channel, resets every channel, and programs both channel groups'
    /// `DCTRL` registers.
    #[tracing::instrument(name = "Dmac::new", level = "info", skip(hal, config), fields(channels = config.channels))]
    pub fn new(hal: H, config: &DmacConfig) -> Result<Self, SetupError> {
        let slaves = SlaveTable::from_config(config)?;

        // rings allocated before a failure are freed when `dmac` is dropped.
        let mut dmac = Self {
            hal,
            channels: Vec::new(),
            slaves,
            claims: AtomicU16::new(0),
            claim_wait: WaitQueue::new(),
        };

        for idx in 0..config.channels {
            let mem = dmac
                .hal
                .alloc_ring()
                .ok_or(SetupError::OutOfMemory { channel: idx })?;
            let slot = ChannelSlot::new(idx, Ring::new(mem));
            if let Err(slot) = dmac.channels.push(slot) {
                // `validate` bounds the channel count
                unsafe { dmac.hal.free_ring(slot.into_ring_memory()) };
                return Err(rza_config::ConfigError::UnsupportedChannelCount(config.channels).into());
            }
            ChannelRegs::new(&dmac.hal, idx).disable();
        }

        for base in regs::common_bases() {
            dmac.hal.write32(
                Window::Dmac,
                base + regs::common::DCTRL,
                Dctrl::default_config().bits(),
            );
        }

        tracing::info!(
            channels = dmac.channels.len(),
            slaves = dmac.slaves.len(),
            "DMAC initialized"
        );
        Ok(dmac)
    }

    /// Returns the number of channels this DMAC was configured with.
    #[must_use]
    pub fn channel_count(&self) -> u8 {
        self.channels.len() as u8
    }

    /// Returns the board's slave table.
    #[must_use]
    pub fn slaves(&self) -> &SlaveTable {
        &self.slaves
    }

    /// Returns the HAL this DMAC was created with.
    #[must_use]
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// Claims an idle channel and allocates its resources, optionally binding
    /// it to the peripheral `slave`.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(`[`Channel`]`)` with allocated resources, if a channel was
    ///   free.
    /// - [`Err`]`(`[`DmaError::NoSuchDevice`]`)` if `slave` is not in the
    ///   slave table.
    /// - [`Err`]`(`[`DmaError::NoFreeChannel`]`)` if every channel is claimed.
    pub fn try_claim_channel(&self, slave: Option<SlaveId>) -> Result<Channel<'_, H>, DmaError> {
        if let Some(id) = slave {
            self.find_slave(id)?;
        }
        let idx = self.claim_idx().ok_or(DmaError::NoFreeChannel)?;
        let mut channel = Channel { dmac: self, idx };
        tracing::debug!(channel = idx, ?slave, "DMA channel claimed");
        // if this fails, dropping `channel` releases the claim.
        channel.alloc_resources(slave)?;
        Ok(channel)
    }

    /// Claims an idle channel, waiting for one to be released if none are
    /// currently idle.
    ///
    /// # Cancel Safety
    ///
    /// This future can be cancelled freely. If a channel has been claimed
    /// when the future is dropped, it is released again.
    pub async fn claim_channel(&self, slave: Option<SlaveId>) -> Result<Channel<'_, H>, DmaError> {
        match self.try_claim_channel(slave) {
            Err(DmaError::NoFreeChannel) => {}
            res => return res,
        }

        loop {
            let wait = self.claim_wait.wait();
            futures::pin_mut!(wait);
            // register with the queue before checking the claims again, so a
            // release in between is not missed.
            let _ = wait.as_mut().subscribe();

            match self.try_claim_channel(slave) {
                Err(DmaError::NoFreeChannel) => {}
                res => return res,
            }

            if wait.await.is_err() {
                return Err(DmaError::NoFreeChannel);
            }
        }
    }

    /// Claims a channel for a one-cell DMA specifier, whose single cell is
    /// the peripheral's slave id.
    pub fn xlate(&self, args: &[u32]) -> Result<Channel<'_, H>, DmaError> {
        let &[id] = args else {
            tracing::warn!(cells = args.len(), "DMA specifier must have exactly one cell");
            return Err(DmaError::InvalidArgument("DMA specifier must have one cell"));
        };
        self.try_claim_channel(Some(SlaveId(id)))
    }

    /// Handles a DMAC interrupt in interrupt context.
    ///
    /// For a channel interrupt, this acknowledges the end of a transfer (or
    /// stops the channel if it reported an error) and records a pending
    /// completion for the bottom half, returning [`IrqReturn::WakeThread`].
    /// The error interrupt does the same for every channel flagged in the
    /// groups' `DSTAT_ER` registers.
    pub fn handle_interrupt(&self, irq: Irq) -> IrqReturn {
        match irq {
            Irq::Channel(idx) => self.channel_interrupt(idx),
            Irq::Error => self
                .channels
                .iter()
                .filter(|slot| {
                    let regs = ChannelRegs::new(&self.hal, slot.idx);
                    regs.common_status(regs::common::DSTAT_ER) & regs.group_bit() != 0
                })
                .map(|slot| self.channel_interrupt(slot.idx))
                .fold(IrqReturn::None, IrqReturn::max),
        }
    }

    /// Runs the completion work recorded by
    /// [`handle_interrupt`](Self::handle_interrupt), returning the number of
    /// completions processed.
    ///
    /// This is the threaded half of the interrupt handler. For
    /// [`Irq::Error`], every channel is processed.
    pub fn handle_irq_thread(&self, irq: Irq) -> usize {
        match irq {
            Irq::Channel(idx) => self.drain_completions(idx),
            Irq::Error => self
                .channels
                .iter()
                .map(|slot| self.drain_completions(slot.idx))
                .sum(),
        }
    }

    /// Processes completions for channel `idx` as they are signaled.
    ///
    /// This is an alternative to calling
    /// [`handle_irq_thread`](Self::handle_irq_thread) from a threaded
    /// interrupt handler. It returns once [`close`](Self::close) is called.
    pub async fn irq_thread(&self, idx: u8) {
        let Some(slot) = self.channels.get(idx as usize) else {
            tracing::warn!(channel = idx, "no such DMA channel");
            return;
        };

        loop {
            // subscribe before draining so a completion signaled while we
            // drain wakes us again.
            let wait = slot.irq_wait.subscribe().await;
            self.drain_completions(idx);
            if wait.await.is_err() {
                tracing::trace!(channel = idx, "DMA IRQ thread exiting");
                return;
            }
        }
    }

    /// Closes the DMAC's wait queues.
    ///
    /// Every [`irq_thread`](Self::irq_thread) returns, pending and future
    /// [`Channel::wait`] calls return an error, and
    /// [`claim_channel`](Self::claim_channel) stops waiting for a channel to
    /// be released. Channels that are already claimed keep working.
    pub fn close(&self) {
        for slot in &self.channels {
            slot.irq_wait.close();
            slot.done_wait.close();
        }
        self.claim_wait.close();
        tracing::debug!("DMAC closed");
    }

    fn channel_interrupt(&self, idx: u8) -> IrqReturn {
        let Some(slot) = self.channels.get(idx as usize) else {
            tracing::trace!(channel = idx, "interrupt for nonexistent DMA channel");
            return IrqReturn::None;
        };
        let regs = ChannelRegs::new(&self.hal, idx);
        let chstat = regs.status();
        tracing::trace!(
            channel = idx,
            chstat = ?format_args!("{:#010x}", chstat.bits()),
            "DMA channel interrupt"
        );

        let failed = chstat.get(ChStat::ER);
        if !failed && !chstat.get(ChStat::END) {
            return IrqReturn::None;
        }

        if !self.is_claimed(idx) {
            tracing::debug!(channel = idx, "stray interrupt on unclaimed DMA channel");
            regs.disable();
            return IrqReturn::Handled;
        }

        critical_section::with(|cs| {
            if failed {
                tracing::error!(
                    channel = idx,
                    chstat = ?format_args!("{:#010x}", chstat.bits()),
                    crla = ?format_args!("{:#010x}", regs.current_link()),
                    "DMA transfer error"
                );
                regs.disable();
                slot.state.borrow_ref_mut(cs).halt();
                slot.irq_errors.fetch_add(1, Ordering::Relaxed);
            } else {
                regs.control(ChCtrl::ack_end());
            }
            slot.irq_pending.fetch_add(1, Ordering::Release);
        });

        slot.irq_wait.wake();
        IrqReturn::WakeThread
    }

    fn drain_completions(&self, idx: u8) -> usize {
        let Some(slot) = self.channels.get(idx as usize) else {
            return 0;
        };
        let regs = ChannelRegs::new(&self.hal, idx);

        let mut processed = 0;
        loop {
            let finished = critical_section::with(|cs| {
                let pending = slot.irq_pending.load(Ordering::Acquire);
                if pending == 0 {
                    return None;
                }
                let errors = slot.irq_errors.load(Ordering::Relaxed);
                let failed = errors >= pending;
                if failed {
                    slot.irq_errors.store(errors - 1, Ordering::Relaxed);
                }
                slot.irq_pending.store(pending - 1, Ordering::Release);

                Some(slot.state.borrow_ref_mut(cs).complete(&regs, failed))
            });

            let Some(finished) = finished else {
                return processed;
            };
            processed += 1;
            slot.done_wait.wake_all();
            if let Some(Finished {
                callback: Some(callback),
                completion,
            }) = finished
            {
                callback.call(completion);
            }
        }
    }

    fn find_slave(&self, id: SlaveId) -> Result<Slave, DmaError> {
        self.slaves.find(id).copied().ok_or_else(|| {
            tracing::debug!(slave = id.0, "no such DMA slave");
            DmaError::NoSuchDevice(id)
        })
    }

    fn claim_idx(&self) -> Option<u8> {
        let all = match self.channels.len() {
            0 => return None,
            n if n >= 16 => u16::MAX,
            n => (1u16 << n) - 1,
        };
        let mut claims = self.claims.load(Ordering::Acquire);
        loop {
            let free = !claims & all;
            if free == 0 {
                return None;
            }
            let idx = free.trailing_zeros() as u8;
            match self.claims.compare_exchange_weak(
                claims,
                claims | (1 << idx),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(idx),
                Err(actual) => claims = actual,
            }
        }
    }

    fn release_idx(&self, idx: u8) {
        self.claims.fetch_and(!(1 << idx), Ordering::AcqRel);
        self.claim_wait.wake_all();
    }

    fn is_claimed(&self, idx: u8) -> bool {
        self.claims.load(Ordering::Acquire) & (1 << idx) != 0
    }

    fn slot(&self, idx: u8) -> &ChannelSlot {
        // channel handles are only created for existing channels
        &self.channels[idx as usize]
    }
}

impl<H: DmacHal> Drop for Dmac<H> {
    fn drop(&mut self) {
        self.close();
        let hal = &self.hal;
        for slot in self.channels.iter_mut() {
            ChannelRegs::new(hal, slot.idx).disable();
            let mem = slot.state.get_mut().get_mut().ring().memory();
            // Safety: the channel is stopped and its ring is not used again.
            unsafe { hal.free_ring(mem) };
        }
        tracing::debug!("DMAC shut down");
    }
}

impl<H: DmacHal> fmt::Debug for Dmac<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dmac")
            .field("channels", &self.channels.len())
            .field("slaves", &self.slaves.len())
            .field(
                "claims",
                &format_args!("{:#018b}", self.claims.load(Ordering::Relaxed)),
            )
            .finish()
    }
}

// === impl ChannelSlot ===

impl ChannelSlot {
    fn new(idx: u8, ring: Ring) -> Self {
        Self {
            idx,
            state: Mutex::new(RefCell::new(ChannelState::new(idx, ring))),
            irq_pending: AtomicU16::new(0),
            irq_errors: AtomicU16::new(0),
            irq_wait: WaitCell::new(),
            done_wait: WaitQueue::new(),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ChannelState) -> T) -> T {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    fn into_ring_memory(self) -> hal::CoherentRing {
        self.state.into_inner().into_inner().ring().memory()
    }
}

// === impl Channel ===

impl<'dmac, H: DmacHal> Channel<'dmac, H> {
    /// Returns this channel's index, from 0 to 15.
    #[inline]
    #[must_use]
    pub fn index(&self) -> u8 {
        self.idx
    }

    /// Returns the slave this channel is bound to, if any.
    #[must_use]
    pub fn slave(&self) -> Option<SlaveId> {
        self.slot().with_state(|state| state.slave().map(|s| s.id))
    }

    /// Allocates this channel's descriptor pool and binds it to `slave`,
    /// returning the number of descriptors.
    ///
    /// If the pool is already allocated, only the binding changes.
    #[tracing::instrument(level = "debug", skip(self), fields(channel = self.idx))]
    pub fn alloc_resources(&mut self, slave: Option<SlaveId>) -> Result<usize, DmaError> {
        let slave = slave.map(|id| self.dmac.find_slave(id)).transpose()?;
        let res = self.slot().with_state(|state| {
            state.bind_slave(slave);
            state.alloc()
        });
        match res {
            Ok(descs) => tracing::debug!(descs, "DMA channel resources allocated"),
            Err(error) => tracing::warn!(%error, "could not allocate DMA channel resources"),
        }
        res
    }

    /// Stops the channel, abandons all of its transfers, and frees its
    /// descriptors.
    pub fn free_resources(&mut self) {
        self.release_resources();
    }

    /// Sets the peripheral address and width used by slave transfers in
    /// `config.direction`.
    pub fn config(&mut self, config: SlaveTransferConfig) -> Result<(), DmaError> {
        let idx = self.idx;
        let res = self.slot().with_state(|state| state.configure(config));
        match res {
            Ok(()) => tracing::debug!(
                channel = idx,
                direction = ?config.direction,
                addr = ?format_args!("{:#010x}", config.addr),
                width = ?config.width,
                "DMA channel configured"
            ),
            Err(error) => tracing::warn!(channel = idx, %error, "unsupported DMA slave configuration"),
        }
        res
    }

    /// Returns the slave configuration set for `direction`, if any.
    #[must_use]
    pub fn slave_config(&self, direction: Direction) -> Option<SlaveTransferConfig> {
        self.slot().with_state(|state| state.slave_config(direction))
    }

    /// Prepares a memory-to-memory copy of `len` bytes from `src` to `dst`.
    pub fn prep_memcpy(&self, dst: u32, src: u32, len: usize) -> Result<Transaction<'_, H>, DmaError> {
        let transfer = Transfer::memcpy(dst, src, len)?;
        self.prepare(transfer)
    }

    /// Prepares a scatter-gather transfer between `segments` and the bound
    /// peripheral.
    pub fn prep_slave_sg(
        &self,
        segments: &[Segment],
        direction: Direction,
    ) -> Result<Transaction<'_, H>, DmaError> {
        let transfer = Transfer::slave_sg(segments, direction)?;
        self.prepare(transfer)
    }

    /// Starts the oldest submitted transfer, if the channel is not already
    /// running one.
    pub fn issue_pending(&self) {
        let regs = self.regs();
        self.slot()
            .with_state(|state| state.issue_pending(&regs));
    }

    /// Returns the status of the transfer identified by `cookie`.
    #[must_use]
    pub fn tx_status(&self, cookie: Cookie) -> TxStatus {
        self.slot().with_state(|state| state.tx_status(cookie))
    }

    /// Stops the channel and abandons every queued and active transfer.
    ///
    /// Callbacks are not run for abandoned transfers, and their cookies
    /// report [`TxStatus::Error`].
    pub fn terminate_all(&self) {
        let regs = self.regs();
        let slot = self.slot();
        let abandoned = critical_section::with(|cs| {
            slot.irq_pending.store(0, Ordering::Release);
            slot.irq_errors.store(0, Ordering::Relaxed);
            slot.state.borrow_ref_mut(cs).terminate(&regs)
        });
        slot.done_wait.wake_all();
        tracing::debug!(channel = self.idx, abandoned, "DMA channel terminated");
    }

    /// Waits for the transfer identified by `cookie` to finish.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(())` if the transfer completed.
    /// - [`Err`]`(`[`TransferFailed`]`)` if it failed, was abandoned, was
    ///   never submitted on this channel, or the DMAC was
    ///   [closed](Dmac::close) first.
    ///
    /// # Cancel Safety
    ///
    /// Dropping this future does not affect the transfer.
    pub async fn wait(&self, cookie: Cookie) -> Result<(), TransferFailed> {
        let slot = self.slot();
        loop {
            let wait = slot.done_wait.wait();
            futures::pin_mut!(wait);
            let _ = wait.as_mut().subscribe();

            match self.tx_status(cookie) {
                TxStatus::Complete => return Ok(()),
                TxStatus::InProgress => {}
                status => return Err(TransferFailed { cookie, status }),
            }

            if wait.await.is_err() {
                let status = self.tx_status(cookie);
                return Err(TransferFailed { cookie, status });
            }
        }
    }

    /// Returns the channel's current [`ChannelPhase`].
    #[must_use]
    pub fn phase(&self) -> ChannelPhase {
        self.slot().with_state(|state| state.phase())
    }

    /// Returns how the channel's descriptors are distributed.
    #[must_use]
    pub fn descriptor_counts(&self) -> DescriptorCounts {
        self.slot().with_state(|state| state.counts())
    }

    /// Returns the channel's counters.
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        self.slot().with_state(|state| state.stats())
    }

    fn prepare(&self, transfer: Transfer) -> Result<Transaction<'_, H>, DmaError> {
        let desc = self
            .slot()
            .with_state(|state| state.prepare(transfer))?;
        Ok(Transaction {
            dmac: self.dmac,
            idx: self.idx,
            desc,
            callback: None,
            submitted: false,
        })
    }

    fn release_resources(&self) {
        let regs = self.regs();
        let slot = self.slot();
        let pool = critical_section::with(|cs| {
            slot.irq_pending.store(0, Ordering::Release);
            slot.irq_errors.store(0, Ordering::Relaxed);
            let mut state = slot.state.borrow_ref_mut(cs);
            state.unbind();
            state.free(&regs)
        });
        slot.done_wait.wake_all();
        if pool.is_some() {
            tracing::debug!(channel = self.idx, "DMA channel resources freed");
        }
        drop(pool);
    }

    fn regs(&self) -> ChannelRegs<'dmac, H> {
        ChannelRegs::new(&self.dmac.hal, self.idx)
    }

    fn slot(&self) -> &'dmac ChannelSlot {
        self.dmac.slot(self.idx)
    }
}

impl<H: DmacHal> Drop for Channel<'_, H> {
    fn drop(&mut self) {
        self.release_resources();
        self.dmac.release_idx(self.idx);
        tracing::debug!(channel = self.idx, "DMA channel released");
    }
}

impl<H: DmacHal> fmt::Debug for Channel<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("idx", &self.idx)
            .field("phase", &self.phase())
            .finish()
    }
}

// === impl Transaction ===

impl<H: DmacHal> Transaction<'_, H> {
    /// Sets a callback to run when the transfer completes.
    pub fn with_callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Queues the transfer on its channel, returning its cookie.
    ///
    /// The transfer does not start until
    /// [`issue_pending`](Channel::issue_pending) is called.
    pub fn submit(mut self) -> Result<Cookie, DmaError> {
        let (desc, callback) = (self.desc, self.callback.take());
        let res = self
            .dmac
            .slot(self.idx)
            .with_state(|state| state.submit(desc, callback));
        self.submitted = res.is_ok();
        res
    }
}

impl<H: DmacHal> Drop for Transaction<'_, H> {
    fn drop(&mut self) {
        if !self.submitted {
            let desc = self.desc;
            self.dmac
                .slot(self.idx)
                .with_state(|state| state.release(desc));
        }
    }
}

impl<H: DmacHal> fmt::Debug for Transaction<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("channel", &self.idx)
            .field("desc", &self.desc)
            .field("callback", &self.callback)
            .finish()
    }
}
