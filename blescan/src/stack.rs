//! The radio stack collaborator.
//!
//! Everything the radio stack does asynchronously comes back through one of
//! two channels: a [`Completion`] handed over with the primitive that
//! started it, or a [`ScanEventSink`] for unsolicited events (inquiry
//! results, batch-scan threshold notifications and advertiser tracking).
//! Both run on whatever thread the stack signals from and only ever
//! enqueue onto the client context, they never call into the application
//! directly.

use log::{debug, error, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::dispatch::{ClientMessage, RegisterCallback};
use crate::filter::{FilterAction, FilterParams, FilterType, UuidCondition};
use crate::result::{AdvertisingData, RawScanResult};
use crate::status::{translate, StackStatus};
use crate::{AddressType, DeviceAddress, DeviceType, Event, ScannerId};

pub(crate) type ClientBus = mpsc::UnboundedSender<ClientMessage>;

fn deliver(client_bus: &ClientBus, message: ClientMessage) {
    if let Err(err) = client_bus.send(message) {
        error!("Client context closed, dropping {:?}", err.0);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchScanAction {
    Enable,
    Disable,
}

/// Which kind of records a batch scan buffers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchScanMode {
    Truncated,
    Full,
    TruncatedAndFull,
}

/// What the controller throws away once batch storage is full
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardRule {
    Oldest,
    Weakest,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchScanParams {
    pub scan_mode: BatchScanMode,
    pub scan_interval: u32,
    pub scan_window: u32,
    pub address_type: AddressType,
    pub discard_rule: DiscardRule,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvertiserState {
    Found,
    Lost,
}

/// An advertiser found/lost notification for a filter in on-found
/// delivery mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackAdvertiserInfo {
    pub client_id: ScannerId,
    pub filter_index: u8,
    pub advertiser_state: AdvertiserState,
    pub advertiser_info_present: bool,
    pub address: DeviceAddress,
    pub address_type: AddressType,
    pub tx_power: i8,
    pub rssi: i8,
    pub timestamp: u16,
    pub adv_data: Vec<u8>,
    pub scan_response: Vec<u8>,
}

/// A single observation reported while observing.
#[derive(Clone, Debug)]
pub struct InquiryResult {
    pub address: DeviceAddress,
    pub address_type: AddressType,
    pub device_type: DeviceType,
    pub rssi: i8,
    /// Raw EIR / advertising data, if the controller reported any
    pub eir: Option<Vec<u8>>,
}

/// Search events raised by the stack while observing, keyed by the kind of
/// event.
#[derive(Clone, Debug)]
pub enum SearchEvent {
    InquiryResult(InquiryResult),
    InquiryComplete { num_responses: u8 },
    /// Any event kind the scanner doesn't handle
    Other(u8),
}

/// The stack-facing event sink.
///
/// Cheap to clone. The stack may hold onto it for as long as it likes,
/// events raised after the scanner has shut down are logged and dropped.
/// Each sink belongs to the scan session it was handed out for.
#[derive(Clone, Debug)]
pub struct ScanEventSink {
    client_bus: ClientBus,
    session: u32,
}

impl ScanEventSink {
    pub(crate) fn new(client_bus: ClientBus, session: u32) -> Self {
        Self { client_bus, session }
    }

    pub fn on_search_event(&self, event: SearchEvent) {
        match event {
            SearchEvent::InquiryResult(result) => {
                trace!("Inquiry result for {}", result.address);
                let adv_data = match &result.eir {
                    Some(eir) => AdvertisingData::new(eir),
                    None => AdvertisingData::default(),
                };
                deliver(&self.client_bus, ClientMessage::ScanResult(RawScanResult {
                    address: result.address,
                    address_type: result.address_type,
                    device_type: result.device_type,
                    rssi: result.rssi,
                    adv_data,
                    session: self.session,
                }));
            }
            SearchEvent::InquiryComplete { num_responses } => {
                debug!("BLE observe complete. Num Resp {}", num_responses);
            }
            SearchEvent::Other(kind) => {
                warn!("Unknown search event 0x{:x}", kind);
            }
        }
    }

    pub fn on_batch_scan_threshold(&self, client_id: ScannerId) {
        deliver(&self.client_bus,
                ClientMessage::Deliver(Event::BatchScanThresholdCrossed { client_id }));
    }

    /// Takes ownership of the tracking record and passes it on to the
    /// client context as is.
    pub fn on_track_advertiser(&self, info: Box<TrackAdvertiserInfo>) {
        debug!("Track advertiser event for {} ({:?})", info.address, info.advertiser_state);
        deliver(&self.client_bus, ClientMessage::Deliver(Event::AdvertiserTracked(info)));
    }
}

/// A one-shot continuation for a stack primitive.
///
/// `R` captures whatever the result needs to be routed back to the right
/// client (the client id, filter type or action known at call time). A
/// completion is consumed by completing it, so it can only ever be
/// delivered once. Dropping it without completing means the client never
/// hears back.
pub struct Completion<R> {
    client_bus: ClientBus,
    route: R,
}

impl<R> Completion<R> {
    pub(crate) fn new(client_bus: &ClientBus, route: R) -> Self {
        Self { client_bus: client_bus.clone(), route }
    }

    fn deliver(self, event: Event) {
        deliver(&self.client_bus, ClientMessage::Deliver(event));
    }
}

pub struct RegisterRoute {
    pub(crate) on_registered: RegisterCallback,
}

impl Completion<RegisterRoute> {
    pub fn complete(self, scanner_id: ScannerId, status: StackStatus) {
        let Completion { client_bus, route } = self;
        deliver(&client_bus, ClientMessage::Registered {
            on_registered: route.on_registered,
            scanner_id,
            status: translate(status),
        });
    }
}

pub struct FilterConfigRoute {
    pub(crate) client_id: ScannerId,
    pub(crate) filter_type: FilterType,
}

impl Completion<FilterConfigRoute> {
    pub fn complete(self, action: FilterAction, available_space: u8, status: StackStatus) {
        let FilterConfigRoute { client_id, filter_type } = self.route;
        self.deliver(Event::ScanFilterConfigured {
            action,
            client_id,
            status: translate(status),
            filter_type,
            available_space,
        });
    }
}

pub struct FilterParamRoute {
    pub(crate) client_id: ScannerId,
}

impl Completion<FilterParamRoute> {
    pub fn complete(self, action: FilterAction, available_space: u8, status: StackStatus) {
        let client_id = self.route.client_id;
        self.deliver(Event::ScanFilterParamsConfigured {
            action,
            client_id,
            status: translate(status),
            available_space,
        });
    }
}

pub struct FilterStatusRoute {
    pub(crate) client_id: ScannerId,
}

impl Completion<FilterStatusRoute> {
    pub fn complete(self, enabled: bool, status: StackStatus) {
        let client_id = self.route.client_id;
        self.deliver(Event::ScanFilterStatus { enabled, client_id, status: translate(status) });
    }
}

pub struct ScanParamRoute {
    pub(crate) client_id: ScannerId,
}

impl Completion<ScanParamRoute> {
    pub fn complete(self, status: StackStatus) {
        let client_id = self.route.client_id;
        self.deliver(Event::ScanParametersConfigured { client_id, status: translate(status) });
    }
}

pub struct BatchStorageRoute {
    pub(crate) client_id: ScannerId,
}

impl Completion<BatchStorageRoute> {
    pub fn complete(self, status: StackStatus) {
        let client_id = self.route.client_id;
        self.deliver(Event::BatchScanStorageConfigured { client_id, status: translate(status) });
    }
}

pub struct BatchScanToggleRoute {
    pub(crate) client_id: ScannerId,
    pub(crate) action: BatchScanAction,
}

impl Completion<BatchScanToggleRoute> {
    pub fn complete(self, status: StackStatus) {
        let BatchScanToggleRoute { client_id, action } = self.route;
        self.deliver(Event::BatchScanStateChanged { action, client_id, status: translate(status) });
    }
}

pub struct BatchReportsRoute {
    pub(crate) client_id: ScannerId,
}

impl Completion<BatchReportsRoute> {
    pub fn complete(self, report_format: u8, num_records: u8, data: Vec<u8>,
                    status: StackStatus) {
        let client_id = self.route.client_id;
        self.deliver(Event::BatchScanReports {
            client_id,
            status: translate(status),
            report_format,
            num_records,
            data,
        });
    }
}

/// The radio stack primitives the scanner drives.
///
/// Every method is called from the stack context only, one at a time and in
/// the order the client requested them. Implementations must not block for
/// long; results are reported by completing the given [`Completion`],
/// either before returning or later from any thread.
pub trait RadioStack: Send + Sync {
    fn register_app(&self, done: Completion<RegisterRoute>);
    fn deregister_app(&self, scanner_id: ScannerId);

    /// Starts or stops observing. A sink is only given when starting.
    fn observe(&self, start: bool, sink: Option<ScanEventSink>);

    fn track_advertiser(&self, client_id: ScannerId, sink: ScanEventSink);

    fn filter_param_setup(&self, action: FilterAction, filter_index: u8,
                          params: Option<FilterParams>, done: Completion<FilterParamRoute>);

    fn address_filter(&self, action: FilterAction, filter_index: u8, address: DeviceAddress,
                      address_type: AddressType, done: Completion<FilterConfigRoute>);
    fn service_data_filter(&self, action: FilterAction, filter_index: u8,
                           done: Completion<FilterConfigRoute>);
    fn uuid_filter(&self, action: FilterAction, filter_index: u8, condition: UuidCondition,
                   done: Completion<FilterConfigRoute>);
    fn local_name_filter(&self, action: FilterAction, filter_index: u8, pattern: Vec<u8>,
                         done: Completion<FilterConfigRoute>);
    #[allow(clippy::too_many_arguments)]
    fn manufacturer_data_filter(&self, action: FilterAction, filter_index: u8, company_id: u16,
                                company_id_mask: u16, data: Vec<u8>, mask: Vec<u8>,
                                done: Completion<FilterConfigRoute>);
    fn service_data_pattern_filter(&self, action: FilterAction, filter_index: u8, data: Vec<u8>,
                                   mask: Vec<u8>, done: Completion<FilterConfigRoute>);

    /// Clears every filter type for the given index
    fn clear_filters(&self, filter_index: u8, done: Completion<FilterConfigRoute>);

    fn enable_filter_feature(&self, enable: bool, done: Completion<FilterStatusRoute>);

    /// Configures active scanning for `client_id`
    fn set_scan_params(&self, client_id: ScannerId, scan_interval: u32, scan_window: u32,
                       done: Completion<ScanParamRoute>);

    /// `threshold` is notified, with `client_id`, whenever the storage fill
    /// level crosses `notify_threshold`.
    #[allow(clippy::too_many_arguments)]
    fn set_batch_storage_config(&self, full_max: u8, trunc_max: u8, notify_threshold: u8,
                                client_id: ScannerId, done: Completion<BatchStorageRoute>,
                                threshold: ScanEventSink);
    fn enable_batch_scan(&self, params: BatchScanParams, done: Completion<BatchScanToggleRoute>);
    fn disable_batch_scan(&self, done: Completion<BatchScanToggleRoute>);
    fn read_scan_reports(&self, scan_mode: BatchScanMode, done: Completion<BatchReportsRoute>);
}
