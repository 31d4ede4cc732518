//! Lookup of typed fields in EIR / advertising data.
//!
//! Structure format: [length] [type] [data...], where `length` covers the
//! type byte plus the data. A zero length terminates the data, which is
//! also how the zero padding of a fixed-size buffer gets treated.

pub const SHORTENED_LOCAL_NAME_TYPE: u8 = 0x08;
pub const COMPLETE_LOCAL_NAME_TYPE: u8 = 0x09;

/// Longest remote name the device manager accepts
pub const MAX_NAME_LEN: usize = 248;

/// Returns the data of the first field of type `ad_type`, if any.
///
/// Stops at the first malformed structure rather than guessing.
pub fn find_field(data: &[u8], ad_type: u8) -> Option<&[u8]> {
    let mut pos = 0;
    while pos < data.len() {
        let len = data[pos] as usize;
        if len == 0 || pos + 1 + len > data.len() {
            break;
        }

        if data[pos + 1] == ad_type {
            return Some(&data[pos + 2..pos + 1 + len]);
        }

        pos += 1 + len;
    }

    None
}

/// Complete local name if present, otherwise the shortened one.
pub fn local_name(data: &[u8]) -> Option<String> {
    let name = find_field(data, COMPLETE_LOCAL_NAME_TYPE)
        .or_else(|| find_field(data, SHORTENED_LOCAL_NAME_TYPE))?;
    let name = &name[..name.len().min(MAX_NAME_LEN)];
    Some(String::from_utf8_lossy(name).into_owned())
}
