//! Errors returned by the DMAC driver.
use super::{
    channel::{Cookie, TxStatus},
    slave::SlaveId,
};
use core::fmt;
use rza_config::ConfigError;

/// Errors returned by channel operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DmaError {
    /// The requested peripheral is not in the slave table.
    NoSuchDevice(SlaveId),
    /// The channel's descriptor pool could not be allocated.
    OutOfMemory,
    /// The channel's resources have not been allocated.
    NotAllocated,
    /// Every descriptor in the channel's pool is in use.
    PoolExhausted,
    /// A slave transfer was requested on a channel with no slave bound.
    NoSlave,
    /// The request is malformed.
    InvalidArgument(&'static str),
    /// The transfer needs more descriptor ring slots than are free.
    RingFull {
        /// Slots the transfer needs.
        needed: usize,
        /// Slots currently free.
        free: usize,
    },
    /// Every DMA channel is claimed.
    NoFreeChannel,
    /// The transaction is no longer waiting to be submitted.
    NotPrepared,
}

/// Errors returned while bringing up the DMAC.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SetupError {
    /// The board configuration is unusable.
    Config(ConfigError),
    /// A channel's descriptor ring could not be allocated.
    OutOfMemory {
        /// The channel whose ring could not be allocated.
        channel: u8,
    },
}

/// A transfer finished without completing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransferFailed {
    /// The transfer's cookie.
    pub cookie: Cookie,
    /// Its final status.
    pub status: TxStatus,
}

// === impl DmaError ===

impl fmt::Display for DmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchDevice(id) => write!(f, "no such device: {id}"),
            Self::OutOfMemory => f.write_str("out of memory for DMA descriptors"),
            Self::NotAllocated => f.write_str("channel resources are not allocated"),
            Self::PoolExhausted => f.write_str("all DMA descriptors are in use"),
            Self::NoSlave => f.write_str("no slave is bound to this channel"),
            Self::InvalidArgument(why) => write!(f, "invalid argument: {why}"),
            Self::RingFull { needed, free } => write!(
                f,
                "transfer needs {needed} descriptor ring slots, but only {free} are free"
            ),
            Self::NoFreeChannel => f.write_str("all DMA channels are claimed"),
            Self::NotPrepared => f.write_str("transaction is not awaiting submission"),
        }
    }
}

// === impl SetupError ===

impl From<ConfigError> for SetupError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid DMAC configuration: {err}"),
            Self::OutOfMemory { channel } => {
                write!(f, "could not allocate descriptor ring for channel {channel}")
            }
        }
    }
}

// === impl TransferFailed ===

impl fmt::Display for TransferFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DMA transfer {} did not complete ({:?})", self.cookie, self.status)
    }
}
