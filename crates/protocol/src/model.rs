//! Device model reconstructed from an enumeration snapshot
//!
//! A [`Device`] owns its alternate settings, each alternate setting owns the
//! sectors of its memory layout, and each sector owns the memory blocks it is
//! made of. The serde representation is the JSON shape served to clients.

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A DFU-capable device found during one enumeration pass
///
/// Identified by `serial` within a snapshot. All other scalar attributes are
/// fixed for the physical device and shared by every alternate setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub serial: String,
    /// Vendor ID as printed by the tool (hex digits, no prefix)
    pub vendor_id: String,
    /// Product ID as printed by the tool (hex digits, no prefix)
    pub product_id: String,
    /// Firmware version (`bcdDevice`)
    pub version: u32,
    pub device_number: u32,
    pub configuration: u32,
    pub interface: u32,
    /// Bus/port path, e.g. `1-2`; absent for tools that do not report it
    pub bus_path: Option<String>,
    /// Alternate settings, sorted ascending by id
    #[serde(rename = "alt")]
    pub alt_settings: Vec<AlternateSetting>,
}

impl Device {
    /// Find an alternate setting by id
    pub fn alt_setting(&self, id: u32) -> Option<&AlternateSetting> {
        self.alt_settings.iter().find(|alt| alt.id == id)
    }
}

/// One selectable memory region of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateSetting {
    pub id: u32,
    pub name: String,
    pub sectors: Vec<Sector>,
}

/// A contiguous memory region starting at `address`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sector {
    /// Start address, kept verbatim (e.g. `0x08000000`)
    pub address: String,
    #[serde(rename = "mapping")]
    pub blocks: Vec<MemoryBlock>,
}

impl Sector {
    /// Total size of the region in bytes
    pub fn len_bytes(&self) -> u64 {
        self.blocks.iter().map(MemoryBlock::len_bytes).sum()
    }
}

/// `count` identical blocks of `block_size` units each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBlock {
    #[serde(rename = "number")]
    pub count: u32,
    #[serde(rename = "size")]
    pub block_size: u32,
    #[serde(rename = "multiplier")]
    pub unit: Unit,
    #[serde(rename = "permissions")]
    pub permission: Permission,
}

impl MemoryBlock {
    /// Size of a single block in bytes
    pub fn block_bytes(&self) -> u64 {
        u64::from(self.block_size) * self.unit.multiplier()
    }

    /// Size of all blocks in bytes
    pub fn len_bytes(&self) -> u64 {
        u64::from(self.count) * self.block_bytes()
    }
}

/// Block size multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    /// No multiplier (encoded as a space)
    None,
    Byte,
    Kilobyte,
    Megabyte,
}

impl Unit {
    pub fn code(self) -> char {
        match self {
            Unit::None => ' ',
            Unit::Byte => 'B',
            Unit::Kilobyte => 'K',
            Unit::Megabyte => 'M',
        }
    }

    pub fn multiplier(self) -> u64 {
        match self {
            Unit::None | Unit::Byte => 1,
            Unit::Kilobyte => 1024,
            Unit::Megabyte => 1024 * 1024,
        }
    }
}

impl TryFrom<char> for Unit {
    type Error = ProtocolError;

    fn try_from(code: char) -> Result<Self, Self::Error> {
        match code {
            ' ' => Ok(Unit::None),
            'B' => Ok(Unit::Byte),
            'K' => Ok(Unit::Kilobyte),
            'M' => Ok(Unit::Megabyte),
            other => Err(ProtocolError::InvalidUnit(other)),
        }
    }
}

/// Access capabilities of a memory block
///
/// The letter codes `a`..`g` encode a 3-bit mask: readable (1),
/// erasable (2), writable (4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Readable,
    Erasable,
    ReadableErasable,
    Writable,
    ReadableWritable,
    ErasableWritable,
    ReadableErasableWritable,
}

impl Permission {
    pub fn code(self) -> char {
        match self {
            Permission::Readable => 'a',
            Permission::Erasable => 'b',
            Permission::ReadableErasable => 'c',
            Permission::Writable => 'd',
            Permission::ReadableWritable => 'e',
            Permission::ErasableWritable => 'f',
            Permission::ReadableErasableWritable => 'g',
        }
    }

    fn mask(self) -> u8 {
        (self.code() as u8) & 7
    }

    pub fn readable(self) -> bool {
        self.mask() & 1 == 1
    }

    pub fn erasable(self) -> bool {
        self.mask() & 2 == 2
    }

    pub fn writable(self) -> bool {
        self.mask() & 4 == 4
    }
}

impl TryFrom<char> for Permission {
    type Error = ProtocolError;

    fn try_from(code: char) -> Result<Self, Self::Error> {
        match code {
            'a' => Ok(Permission::Readable),
            'b' => Ok(Permission::Erasable),
            'c' => Ok(Permission::ReadableErasable),
            'd' => Ok(Permission::Writable),
            'e' => Ok(Permission::ReadableWritable),
            'f' => Ok(Permission::ErasableWritable),
            'g' => Ok(Permission::ReadableErasableWritable),
            other => Err(ProtocolError::InvalidPermission(other)),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// Both closed sets travel as their single-character codes.

fn single_char<'de, D: Deserializer<'de>>(deserializer: D) -> Result<char, D::Error> {
    let s = String::deserialize(deserializer)?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(serde::de::Error::custom(format!(
            "expected a single character, got {:?}",
            s
        ))),
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_char(self.code())
    }
}

impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Unit::try_from(single_char(deserializer)?).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_char(self.code())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Permission::try_from(single_char(deserializer)?).map_err(serde::de::Error::custom)
    }
}
