use std::fmt;
use std::sync::Arc;

use log::{debug, trace};

use crate::cache::DeviceSeenCache;
use crate::eir;
use crate::{AddressType, DeviceAddress, DeviceType};

/// Maximum length of an attribute value, which is also the fixed capacity
/// of the advertising data buffer handed to clients.
pub const MAX_ATTR_LEN: usize = 600;

/// Fixed-capacity advertising payload.
///
/// Clients always receive a `MAX_ATTR_LEN` byte buffer: the bytes the
/// stack reported are copied to the front and the remainder stays zeroed.
/// This mirrors the fixed-size wire structure clients were built against
/// and is deliberate, not a truncation bug. Anything longer than the
/// capacity gets cut off.
#[derive(Clone, PartialEq, Eq)]
pub struct AdvertisingData {
    bytes: Box<[u8; MAX_ATTR_LEN]>,
    len: usize,
}

impl AdvertisingData {
    pub fn new(raw: &[u8]) -> Self {
        let mut bytes = Box::new([0u8; MAX_ATTR_LEN]);
        let len = raw.len().min(MAX_ATTR_LEN);
        bytes[..len].copy_from_slice(&raw[..len]);
        Self { bytes, len }
    }

    /// The full fixed-size buffer, including zero padding
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..]
    }

    /// Just the bytes that were actually reported by the stack
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl Default for AdvertisingData {
    fn default() -> Self {
        AdvertisingData::new(&[])
    }
}

impl fmt::Debug for AdvertisingData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvertisingData")
            .field("payload", &self.payload())
            .finish()
    }
}

/// An inquiry result as marshalled off the stack context, before any
/// client-side processing.
#[derive(Clone, Debug)]
pub(crate) struct RawScanResult {
    pub(crate) address: DeviceAddress,
    pub(crate) address_type: AddressType,
    pub(crate) device_type: DeviceType,
    pub(crate) rssi: i8,
    pub(crate) adv_data: AdvertisingData,
    /// The scan session whose event sink reported this
    pub(crate) session: u32,
}

/// A scan result as delivered to the client.
#[derive(Clone, Debug)]
pub struct ScanResult {
    pub address: DeviceAddress,
    pub address_type: AddressType,
    pub device_type: DeviceType,
    pub rssi: i8,
    pub adv_data: AdvertisingData,
    /// Complete local name, or else the shortened one, if advertised
    pub name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteProperty {
    DeviceType(DeviceType),
    AddressType(AddressType),
}

/// Persistent per-device property storage
pub trait PropertyStore: Send + Sync {
    fn set_remote_property(&self, address: &DeviceAddress, property: RemoteProperty);
}

/// The device manager that tracks remote names.
pub trait RemoteDeviceManager: Send + Sync {
    fn update_ble_remote_properties(&self, address: &DeviceAddress, name: &str,
                                    device_type: DeviceType);
}

/// Used when no property store or device manager has been configured
#[derive(Debug, Default)]
pub struct Discard;

impl PropertyStore for Discard {
    fn set_remote_property(&self, address: &DeviceAddress, property: RemoteProperty) {
        trace!("Discarding property for {}: {:?}", address, property);
    }
}

impl RemoteDeviceManager for Discard {
    fn update_ble_remote_properties(&self, address: &DeviceAddress, name: &str,
                                    _device_type: DeviceType) {
        trace!("Discarding name for {}: {}", address, name);
    }
}

/// Turns raw inquiry results into client-facing scan results.
///
/// Runs on the client context. Name hand-offs are deduplicated per scan
/// session through the [`DeviceSeenCache`], property writes and the
/// forwarded result are not. Results from a replaced session never touch
/// the cache.
pub(crate) struct ScanResultProcessor {
    pub(crate) seen: Arc<DeviceSeenCache>,
    pub(crate) properties: Arc<dyn PropertyStore>,
    pub(crate) devices: Arc<dyn RemoteDeviceManager>,
}

impl ScanResultProcessor {
    pub(crate) fn process(&self, raw: RawScanResult) -> ScanResult {
        let RawScanResult { address, address_type, device_type, rssi, adv_data, session } = raw;

        let name = eir::local_name(adv_data.payload());

        // Anonymous random addresses are never remembered
        if address_type != AddressType::Random || name.is_some() {
            let first_sighting = if self.seen.is_current(session) {
                self.seen.insert(address, session)
            } else {
                trace!("Result for {} from replaced scan session {}", address, session);
                true
            };

            if first_sighting {
                if let Some(name) = &name {
                    debug!("BLE device name={} len={} dev_type={:?}", name, name.len(), device_type);
                    self.devices.update_ble_remote_properties(&address, name, device_type);
                }
            }
        }

        self.properties.set_remote_property(&address, RemoteProperty::DeviceType(device_type));
        self.properties.set_remote_property(&address, RemoteProperty::AddressType(address_type));

        ScanResult { address, address_type, device_type, rssi, adv_data, name }
    }
}
