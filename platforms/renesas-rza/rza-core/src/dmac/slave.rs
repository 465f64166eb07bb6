//! Peripheral ("slave") configurations.
use super::regs::{ChCfg, DataSize, Dmars};
use core::fmt;
use heapless::Vec;
use mycelium_bitfield::FromBits;
use rza_config::{ConfigError, DmacConfig, MAX_SLAVES};

/// Identifies a peripheral in the board's slave table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SlaveId(pub u32);

/// A peripheral a channel can be bound to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Slave {
    /// The peripheral's id.
    pub id: SlaveId,
    /// Bus address of the peripheral's data register.
    pub addr: u32,
    /// Base channel configuration for transfers to or from this peripheral.
    pub chcfg: ChCfg,
    /// Request-source selection routing the peripheral's DMA requests.
    pub dmars: Dmars,
}

/// The slave table owned by a [`Dmac`](super::Dmac).
///
/// Built once from the board's [`DmacConfig`] and never modified.
#[derive(Clone, Debug, Default)]
pub struct SlaveTable {
    slaves: Vec<Slave, MAX_SLAVES>,
}

// === impl SlaveTable ===

impl SlaveTable {
    /// Builds the table for `config`.
    pub fn from_config(config: &DmacConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut slaves = Vec::new();
        for entry in &config.slaves {
            let slave = Slave::from_config(entry)?;
            // both tables hold at most MAX_SLAVES entries
            if slaves.push(slave).is_err() {
                break;
            }
        }
        Ok(Self { slaves })
    }

    /// Looks up the slave with the given id.
    #[must_use]
    pub fn find(&self, id: SlaveId) -> Option<&Slave> {
        self.slaves.iter().find(|s| s.id == id)
    }

    /// Returns the number of slaves in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    /// Returns `true` if the table has no slaves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }

    /// Iterates over every slave in the table.
    pub fn iter(&self) -> impl Iterator<Item = &Slave> + '_ {
        self.slaves.iter()
    }
}

// === impl Slave ===

impl Slave {
    fn from_config(entry: &rza_config::SlaveConfig) -> Result<Self, ConfigError> {
        let c = &entry.chcfg;
        let size = |field: &'static str, raw: u8| {
            <DataSize as FromBits<u8>>::try_from_bits(raw).map_err(|_| {
                ConfigError::FieldOutOfRange {
                    slave: entry.id,
                    field,
                    value: raw,
                    max: 7,
                }
            })
        };

        let chcfg = ChCfg::new()
            .with(ChCfg::REQD, c.reqd != 0)
            .with(ChCfg::LOEN, c.loen != 0)
            .with(ChCfg::HIEN, c.hien != 0)
            .with(ChCfg::LVL, c.lvl != 0)
            .with(ChCfg::AM, u32::from(c.am))
            .with(ChCfg::SDS, size("sds", c.sds)?)
            .with(ChCfg::DDS, size("dds", c.dds)?)
            .with(ChCfg::TM, c.tm != 0);
        let dmars = Dmars::new()
            .with(Dmars::RID, u16::from(entry.dmars.rid))
            .with(Dmars::MID, u16::from(entry.dmars.mid));

        Ok(Self {
            id: SlaveId(entry.id),
            addr: entry.addr,
            chcfg,
            dmars,
        })
    }
}

impl fmt::Display for SlaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slave {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rza_config::{ChannelConfig, RequestSource, SlaveConfig};

    #[test]
    fn builds_chcfg_from_fields() {
        let mut config = DmacConfig::new(4);
        config
            .slaves
            .push(SlaveConfig {
                id: 42,
                addr: 0xe820_4018,
                chcfg: ChannelConfig {
                    reqd: 1,
                    loen: 0,
                    hien: 1,
                    lvl: 1,
                    am: 0b010,
                    sds: 2,
                    dds: 1,
                    tm: 1,
                },
                dmars: RequestSource { rid: 1, mid: 0x38 },
            })
            .unwrap();

        let table = SlaveTable::from_config(&config).unwrap();
        assert_eq!(table.len(), 1);
        let slave = table.find(SlaveId(42)).unwrap();
        assert_eq!(slave.addr, 0xe820_4018);

        let expected = (1 << 3) | (1 << 5) | (1 << 6) | (0b010 << 8) | (2 << 12) | (1 << 16) | (1 << 22);
        assert_eq!(slave.chcfg.bits(), expected, "{}", slave.chcfg);
        assert_eq!(slave.dmars.bits(), 1 | (0x38 << 2));

        assert!(table.find(SlaveId(41)).is_none());
    }

    #[test]
    fn rejects_invalid_config() {
        assert_eq!(
            SlaveTable::from_config(&DmacConfig::new(0)).unwrap_err(),
            ConfigError::UnsupportedChannelCount(0)
        );
    }

    #[test]
    fn board_config() {
        let config: DmacConfig =
            toml::from_str(include_str!("../../../board-configs/rza2m-evk.toml")).unwrap();
        let table = SlaveTable::from_config(&config).unwrap();
        assert_eq!(table.len(), config.slaves.len());
        for (slave, entry) in table.iter().zip(&config.slaves) {
            assert_eq!(slave.id, SlaveId(entry.id));
            assert_eq!(slave.dmars.get(Dmars::MID), u16::from(entry.dmars.mid));
        }
    }
}
