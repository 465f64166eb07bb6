//! # RZ/A DMAC configuration
//!
//! Board-level description of the Renesas RZ/A DMA controller: how many
//! channels the controller exposes, and the table of peripheral "slaves"
//! that client drivers may request channels for.
//!
//! Board configs are written in TOML (see `board-configs/` in the platform
//! directory). A build script enables the `use-std` feature and uses
//! [`buildtime::render_file`] to validate a board config and store it as
//! `postcard` in `OUT_DIR`; the firmware then loads it with
//! [`DmacConfig::from_postcard`].
//!
//! ```toml
//! channels = 16
//!
//! [[slaves]]
//! id = 1
//! addr = 0xe820_4018
//! chcfg = { reqd = 1, lvl = 1, am = 2, sds = 2, dds = 2 }
//! dmars = { rid = 1, mid = 0x38 }
//! ```
#![cfg_attr(not(any(feature = "use-std", test)), no_std)]
#![warn(missing_docs)]

use core::fmt;
use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Maximum number of peripheral slaves a board config may describe.
pub const MAX_SLAVES: usize = 20;

/// Number of channels implemented by the RZ/A DMAC.
pub const MAX_CHANNELS: u8 = 16;

/// Top-level DMAC configuration for a board.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DmacConfig {
    /// Number of DMA channels to bring up.
    pub channels: u8,
    /// Peripherals that may be bound to a channel by id.
    #[serde(default)]
    pub slaves: Vec<SlaveConfig, MAX_SLAVES>,
}

/// A peripheral that performs DMA through the controller.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlaveConfig {
    /// Identifier client drivers use to request a channel for this peripheral.
    pub id: u32,
    /// Bus address of the peripheral's data register.
    pub addr: u32,
    /// Channel configuration (`CHCFG`) fields used for this peripheral.
    #[serde(default)]
    pub chcfg: ChannelConfig,
    /// Request-source selection (`DMARS`) for this peripheral.
    pub dmars: RequestSource,
}

/// The eight board-configurable fields of a channel's `CHCFG` word.
///
/// Every field is a raw register value. Flags are `0` or `1`; see
/// [`DmacConfig::validate`] for the permitted ranges.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Request direction: `0` for source, `1` for destination.
    #[serde(default)]
    pub reqd: u8,
    /// Low-enable for edge or level detection.
    #[serde(default)]
    pub loen: u8,
    /// High-enable for edge or level detection.
    #[serde(default)]
    pub hien: u8,
    /// Request detection: `0` for edge, `1` for level.
    #[serde(default)]
    pub lvl: u8,
    /// `DACK` output mode.
    #[serde(default)]
    pub am: u8,
    /// Source data size, as `log2(bits / 8)`.
    #[serde(default)]
    pub sds: u8,
    /// Destination data size, as `log2(bits / 8)`.
    #[serde(default)]
    pub dds: u8,
    /// Transfer mode: `0` for single, `1` for block.
    #[serde(default)]
    pub tm: u8,
}

/// Request-source selection for a peripheral.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestSource {
    /// Resource ID.
    pub rid: u8,
    /// Module ID.
    pub mid: u8,
}

/// Errors returned when a [`DmacConfig`] cannot be used.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// The channel count was zero or larger than [`MAX_CHANNELS`].
    UnsupportedChannelCount(u8),
    /// Two slaves share the same id.
    DuplicateSlave(u32),
    /// A slave field was outside of its register range.
    FieldOutOfRange {
        /// The slave the field belongs to.
        slave: u32,
        /// The name of the field.
        field: &'static str,
        /// The configured value.
        value: u8,
        /// The largest value the field may hold.
        max: u8,
    },
    /// The serialized config could not be decoded.
    Decode,
}

// === impl DmacConfig ===

impl DmacConfig {
    /// Returns a configuration for `channels` channels with no slaves.
    #[must_use]
    pub const fn new(channels: u8) -> Self {
        Self {
            channels,
            slaves: Vec::new(),
        }
    }

    /// Checks that this configuration describes something the DMAC can do.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(ConfigError::UnsupportedChannelCount(self.channels));
        }

        for (i, slave) in self.slaves.iter().enumerate() {
            if self.slaves[..i].iter().any(|s| s.id == slave.id) {
                return Err(ConfigError::DuplicateSlave(slave.id));
            }
            slave.validate()?;
        }

        Ok(())
    }

    /// Looks up a slave by id.
    #[must_use]
    pub fn slave(&self, id: u32) -> Option<&SlaveConfig> {
        self.slaves.iter().find(|s| s.id == id)
    }

    /// Decodes and validates a config rendered by [`buildtime::render_file`].
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }
}

// === impl SlaveConfig ===

impl SlaveConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let check = |field: &'static str, value: u8, max: u8| {
            if value > max {
                Err(ConfigError::FieldOutOfRange {
                    slave: self.id,
                    field,
                    value,
                    max,
                })
            } else {
                Ok(())
            }
        };

        let ChannelConfig {
            reqd,
            loen,
            hien,
            lvl,
            am,
            sds,
            dds,
            tm,
        } = self.chcfg;
        check("reqd", reqd, 1)?;
        check("loen", loen, 1)?;
        check("hien", hien, 1)?;
        check("lvl", lvl, 1)?;
        check("am", am, 0b111)?;
        // 8 through 1024 bits
        check("sds", sds, 7)?;
        check("dds", dds, 7)?;
        check("tm", tm, 1)?;

        check("rid", self.dmars.rid, 0b11)?;
        check("mid", self.dmars.mid, 0x7f)?;
        Ok(())
    }
}

// === impl ConfigError ===

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedChannelCount(n) => write!(
                f,
                "unsupported DMAC channel count {n} (must be 1-{MAX_CHANNELS})"
            ),
            Self::DuplicateSlave(id) => write!(f, "DMA slave {id} is configured more than once"),
            Self::FieldOutOfRange {
                slave,
                field,
                value,
                max,
            } => write!(
                f,
                "DMA slave {slave}: `{field}` = {value} is out of range (max {max})"
            ),
            Self::Decode => f.write_str("failed to decode DMAC configuration"),
        }
    }
}

#[cfg(feature = "use-std")]
impl std::error::Error for ConfigError {}

/// Tools intended for use in build.rs scripts
#[cfg(feature = "use-std")]
pub mod buildtime {
    use super::DmacConfig;
    use miette::{Context, IntoDiagnostic, Result};
    use std::{env, fs, path::Path};

    /// Parses and validates a TOML board config.
    pub fn from_toml(s: &str) -> Result<DmacConfig> {
        let config: DmacConfig = toml::from_str(s).into_diagnostic()?;
        config.validate().into_diagnostic()?;
        Ok(config)
    }

    /// Renders a TOML board config into `OUT_DIR` as postcard.
    ///
    /// The rendered file has the same stem as the source, with a `.postcard`
    /// extension.
    pub fn render_file(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let disp = path.display();
        println!("cargo:rerun-if-changed={disp}");

        let out_dir = env::var("OUT_DIR")
            .into_diagnostic()
            .wrap_err("Failed to read 'OUT_DIR' env variable")?;
        let text = fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read DMAC config '{disp}'"))?;
        let config = from_toml(&text).wrap_err_with(|| format!("Invalid DMAC config '{disp}'"))?;
        let bytes = postcard::to_stdvec(&config).into_diagnostic()?;

        let stem = path
            .file_stem()
            .ok_or_else(|| miette::miette!("config path '{disp}' has no file name"))?;
        let out = Path::new(&out_dir).join(stem).with_extension("postcard");
        fs::write(&out, bytes)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to write '{}'", out.display()))?;
        Ok(())
    }
}
