//! Control core for Bluetooth LE scanning.
//!
//! A [`Scanner`](scanner::Scanner) accepts scan-session, advertisement filter
//! and batch-scan requests from a client, turns each into a command that is
//! executed on a single serialized "stack context" against a
//! [`RadioStack`](stack::RadioStack) and marshals the stack's asynchronous
//! results back onto a "client context" as [`Event`]s.
//!
//! Nothing here talks to a radio directly. The radio stack, the device
//! property store and the application callbacks are all collaborators that
//! get handed to [`ScannerConfig`](scanner::ScannerConfig) before starting.

use std::fmt;
use std::str::FromStr;

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

pub mod uuid;

pub mod status;
use status::ApiStatus;

pub mod eir;

pub mod filter;
use filter::{FilterAction, FilterError, FilterType};

pub mod cache;

pub mod result;
use result::ScanResult;

pub mod stack;
use stack::{BatchScanAction, TrackAdvertiserInfo};

mod dispatch;

pub mod scanner;

pub mod fake;

/// Identifier handed out by the stack when a scanner registers.
///
/// Filter and batch-scan operations are scoped to one of these ("client_if"
/// in stack terms).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScannerId(pub u8);
impl fmt::Display for ScannerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 48-bit Bluetooth device address, most significant octet first.
///
/// Equality and hashing only consider the six address bytes, the address
/// type travels separately as an [`AddressType`].
#[derive(Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceAddress(pub [u8; 6]);
impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bytes = &self.0;
        write!(f,
               "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
               bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5])
    }
}
impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DeviceAddress({})", self)
    }
}

// Note: we don't want allocations in the error path here since this gets
// used when parsing addresses that come straight from stack events.
fn try_bytes_from_mac48_str(s: &str) -> Option<[u8; 6]> {
    let mut parts = ArrayVec::<_, 6>::new();
    for part in s.split(':') {
        if let Err(_e) = parts.try_push(part) {
            return None;
        }
    }
    if parts.len() != 6 {
        return None;
    }
    let mut bytes = [0u8; 6];
    for i in 0..6 {
        if parts[i].len() != 2 {
            return None;
        }
        bytes[i] = match u8::from_str_radix(parts[i], 16) {
            Ok(v) => v,
            Err(_e) => {
                return None;
            }
        };
    }
    Some(bytes)
}

impl FromStr for DeviceAddress {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match try_bytes_from_mac48_str(s) {
            Some(bytes) => Ok(DeviceAddress(bytes)),
            None => Err(Error::Other(anyhow::anyhow!("Invalid device address: {}", s))),
        }
    }
}

#[test]
fn address_two_way() {
    let addr = DeviceAddress::from_str("F1:E2:D3:C4:B5:A6").unwrap();
    assert_eq!(addr.0, [0xF1, 0xE2, 0xD3, 0xC4, 0xB5, 0xA6]);
    // Octets are intentionally formatted as uppercase
    assert_eq!(addr.to_string(), "F1:E2:D3:C4:B5:A6");

    assert!(DeviceAddress::from_str("f1:e2:d3:c4:b5").is_err());
    assert!(DeviceAddress::from_str("f1:e2:d3:c4:b5:a6:97").is_err());
    assert!(DeviceAddress::from_str("18c2a267-a539-4423-aecc-edeeb2784bcc").is_err());
    assert!(DeviceAddress::from_str("f1:e2:d3:c4:b5:zz").is_err());
}

#[test]
fn address_serde() {
    let addr = DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    let json = serde_json::to_string(&addr).unwrap();
    let back: DeviceAddress = serde_json::from_str(&json).unwrap();
    assert_eq!(addr, back);
}

/// LE address type as reported alongside an advertisement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
}

/// Transport(s) a remote device has been seen on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Bredr,
    Ble,
    Dual,
}

/// Events delivered to the application's [`ScannerCallbacks`](scanner::ScannerCallbacks).
///
/// Every event is delivered on the client context, in the order the stack
/// context produced it. All statuses have already been translated into
/// [`ApiStatus`] values.
#[non_exhaustive]
#[derive(Debug)]
pub enum Event {
    ScanResult(ScanResult),

    /// Completion of a filter add/delete/clear.
    ///
    /// `available_space` is the stack's count of free filter slots and is
    /// passed through untouched.
    #[non_exhaustive]
    ScanFilterConfigured {
        action: FilterAction,
        client_id: ScannerId,
        status: ApiStatus,
        filter_type: FilterType,
        available_space: u8,
    },

    #[non_exhaustive]
    ScanFilterParamsConfigured {
        action: FilterAction,
        client_id: ScannerId,
        status: ApiStatus,
        available_space: u8,
    },

    #[non_exhaustive]
    ScanFilterStatus {
        enabled: bool,
        client_id: ScannerId,
        status: ApiStatus,
    },

    #[non_exhaustive]
    ScanParametersConfigured {
        client_id: ScannerId,
        status: ApiStatus,
    },

    #[non_exhaustive]
    BatchScanStorageConfigured {
        client_id: ScannerId,
        status: ApiStatus,
    },

    #[non_exhaustive]
    BatchScanStateChanged {
        action: BatchScanAction,
        client_id: ScannerId,
        status: ApiStatus,
    },

    #[non_exhaustive]
    BatchScanReports {
        client_id: ScannerId,
        status: ApiStatus,
        report_format: u8,
        num_records: u8,
        data: Vec<u8>,
    },

    #[non_exhaustive]
    BatchScanThresholdCrossed {
        client_id: ScannerId,
    },

    /// The tracking record is moved to the application, nothing else keeps
    /// a reference to it.
    AdvertiserTracked(Box<TrackAdvertiserInfo>),

    Flush(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Rejected filter request: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("The scanner has been shut down")]
    ContextClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
