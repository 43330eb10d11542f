//! Board identifiers and board descriptors.
//!
//! A board id is a colon-delimited FQBN (`family:arch:model`); strategy
//! dispatch only ever looks at the first two segments.

use std::fmt;

use crate::error::Error;

use bootloader_identities::{MKR_WIFI_1010, NANO_33_IOT, RENESAS_UNO_R4_WIFI};

/// A parsed `family:arch:model` board identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoardId(String);

impl BoardId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> Vec<&str> {
        self.0.split(':').collect()
    }

    fn family_arch(&self) -> (&str, &str) {
        let segs = self.segments();
        (segs.first().copied().unwrap_or(""), segs.get(1).copied().unwrap_or(""))
    }

    fn model(&self) -> &str {
        self.segments().get(2).copied().unwrap_or("")
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BoardId {
    fn from(value: &str) -> Self {
        BoardId::new(value)
    }
}

impl From<String> for BoardId {
    fn from(value: String) -> Self {
        BoardId::new(value)
    }
}

/// Chip family, as dispatched from the first two FQBN segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Avr,
    BossaRenesas,
    BossaSamd,
    Esp32,
    Uf2,
}

/// USB vendor/product id pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Immutable, derived-at-flash-time description of a target board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardDescriptor {
    pub family: Family,
    /// Base offset into flash where the firmware image is written.
    pub flash_base: u32,
    /// Usable flash capacity in bytes, counted from `flash_base`. A
    /// firmware image longer than this is rejected before it ever
    /// reaches the wire (spec.md §3).
    pub flash_capacity: u32,
    /// Bootloader USB identity, when the board is known to re-enumerate
    /// under a distinct vendor/product id once it enters its bootloader.
    pub bootloader_identity: Option<UsbIdentity>,
}

impl BoardDescriptor {
    /// Resolve a [`BoardId`] into a [`BoardDescriptor`], matching by
    /// prefix on the first two FQBN segments per spec.
    pub fn resolve(id: &BoardId) -> Result<Self, Error> {
        let (family, arch) = id.family_arch();

        let descriptor = match (family, arch) {
            ("arduino", "avr") => BoardDescriptor {
                family: Family::Avr,
                flash_base: 0x0000,
                // ATmega328P: 32KB flash, 512 bytes reserved for the
                // resident bootloader (Arduino Uno datasheet).
                flash_capacity: 32_256,
                bootloader_identity: None,
            },
            ("arduino", "renesas_uno") => BoardDescriptor {
                family: Family::BossaRenesas,
                flash_base: 0x4000,
                // RA4M1: 256KB flash, minus the 16KB bootloader region.
                flash_capacity: 256 * 1024 - 0x4000,
                bootloader_identity: Some(RENESAS_UNO_R4_WIFI),
            },
            ("arduino", "samd") => BoardDescriptor {
                family: Family::BossaSamd,
                flash_base: 0x2000,
                // SAMD21G18: 256KB flash, minus the 8KB bootloader region.
                flash_capacity: 256 * 1024 - 0x2000,
                bootloader_identity: match id.model() {
                    "mkrwifi1010" => Some(MKR_WIFI_1010),
                    "nano_33_iot" => Some(NANO_33_IOT),
                    _ => None,
                },
            },
            ("esp32", _) => BoardDescriptor {
                family: Family::Esp32,
                flash_base: 0x10000,
                // Typical devkit flash size (4MB) minus the bootloader
                // and partition table region the app image starts after.
                flash_capacity: 4 * 1024 * 1024 - 0x10000,
                bootloader_identity: None,
            },
            ("rp2040", _) | ("rpipico", _) => BoardDescriptor {
                family: Family::Uf2,
                flash_base: 0x0000,
                // RP2040 boards (e.g. Pico) commonly carry 2MB of flash.
                flash_capacity: 2 * 1024 * 1024,
                bootloader_identity: None,
            },
            _ => return Err(Error::BoardUnsupported(id.clone())),
        };

        Ok(descriptor)
    }
}

/// Known bootloader USB identities used for re-enumeration detection
/// (spec.md §6).
pub mod bootloader_identities {
    use super::UsbIdentity;

    pub const RENESAS_UNO_R4_WIFI: UsbIdentity = UsbIdentity {
        vendor_id: 0x2341,
        product_id: 0x006D,
    };
    pub const MKR_WIFI_1010: UsbIdentity = UsbIdentity {
        vendor_id: 0x2341,
        product_id: 0x0054,
    };
    pub const NANO_33_IOT: UsbIdentity = UsbIdentity {
        vendor_id: 0x2341,
        product_id: 0x0057,
    };
}
