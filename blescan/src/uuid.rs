//! Bluetooth SIG UUID aliases and filter mask shaping.

use uuid::Uuid;

/// 0000xxxx-0000-1000-8000-00805f9b34fb
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;
/// Everything below the 32-bit alias
const ALIAS_32_MASK: u128 = (1 << 96) - 1;

/// The shortest form a UUID can go on air in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UuidWidth {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128,
}

impl UuidWidth {
    pub fn of(uuid: &Uuid) -> UuidWidth {
        let value = uuid.as_u128();
        if value & ALIAS_32_MASK != BASE_UUID {
            return UuidWidth::Uuid128;
        }
        let alias = (value >> 96) as u32;
        if alias <= u32::from(u16::MAX) {
            UuidWidth::Uuid16(alias as u16)
        } else {
            UuidWidth::Uuid32(alias)
        }
    }
}

/// Expands a 16-bit SIG alias onto the base UUID.
///
/// Const so that well-known service UUIDs can be declared as constants.
pub const fn uuid_from_u16(alias: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | ((alias as u128) << 96))
}

/// A UUID filter condition mask, shaped to the width of the UUID it masks.
///
/// Controllers compare service UUIDs in their shortest on-air form, so a
/// mask for a 16-bit service UUID is itself 16 bits wide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UuidMask {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128(Uuid),
}

impl UuidMask {
    /// Reshapes a full 128-bit `mask` to the short form used by `uuid`.
    ///
    /// A short mask is taken from the alias bits of `mask`, the top 32.
    pub fn for_uuid(uuid: &Uuid, mask: &Uuid) -> UuidMask {
        let alias_bits = (mask.as_u128() >> 96) as u32;
        match UuidWidth::of(uuid) {
            UuidWidth::Uuid16(_) => UuidMask::Uuid16(alias_bits as u16),
            UuidWidth::Uuid32(_) => UuidMask::Uuid32(alias_bits),
            UuidWidth::Uuid128 => UuidMask::Uuid128(*mask),
        }
    }
}
