use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use log::trace;

use crate::filter::{FilterAction, FilterParams, UuidCondition};
use crate::stack::{
    BatchReportsRoute, BatchScanMode, BatchScanParams, BatchScanToggleRoute, BatchStorageRoute,
    Completion, FilterConfigRoute, FilterParamRoute, FilterStatusRoute, RadioStack,
    RegisterRoute, ScanEventSink, ScanParamRoute, SearchEvent, TrackAdvertiserInfo,
};
use crate::status::StackStatus;
use crate::{AddressType, DeviceAddress, ScannerId};

/// A primitive call as seen by the [`FakeStack`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackCall {
    RegisterApp,
    DeregisterApp(ScannerId),
    Observe(bool),
    TrackAdvertiser(ScannerId),
    FilterParamSetup {
        action: FilterAction,
        filter_index: u8,
        params: Option<FilterParams>,
    },
    AddressFilter {
        action: FilterAction,
        filter_index: u8,
        address: DeviceAddress,
        address_type: AddressType,
    },
    ServiceDataFilter {
        action: FilterAction,
        filter_index: u8,
    },
    UuidFilter {
        action: FilterAction,
        filter_index: u8,
        condition: UuidCondition,
    },
    LocalNameFilter {
        action: FilterAction,
        filter_index: u8,
        pattern: Vec<u8>,
    },
    ManufacturerDataFilter {
        action: FilterAction,
        filter_index: u8,
        company_id: u16,
        company_id_mask: u16,
        data: Vec<u8>,
        mask: Vec<u8>,
    },
    ServiceDataPatternFilter {
        action: FilterAction,
        filter_index: u8,
        data: Vec<u8>,
        mask: Vec<u8>,
    },
    ClearFilters {
        filter_index: u8,
    },
    EnableFilterFeature(bool),
    SetScanParams {
        client_id: ScannerId,
        scan_interval: u32,
        scan_window: u32,
    },
    SetBatchStorageConfig {
        full_max: u8,
        trunc_max: u8,
        notify_threshold: u8,
        client_id: ScannerId,
    },
    EnableBatchScan(BatchScanParams),
    DisableBatchScan,
    ReadScanReports(BatchScanMode),
}

#[derive(Default)]
struct BatchReports {
    format: u8,
    num_records: u8,
    data: Vec<u8>,
}

/// Records every primitive it's asked to run and completes each one
/// straight away with a configurable status.
///
/// Events can be injected through whatever sink the scanner most recently
/// handed over, as if the controller had raised them.
pub struct FakeStack {
    calls: Mutex<Vec<StackCall>>,
    status: Mutex<StackStatus>,
    next_scanner_id: AtomicU8,
    available_space: AtomicU8,
    reports: Mutex<BatchReports>,

    observer: Mutex<Option<ScanEventSink>>,
    trackers: Mutex<Vec<(ScannerId, ScanEventSink)>>,
    threshold: Mutex<Option<(ScannerId, ScanEventSink)>>,
}

impl Default for FakeStack {
    fn default() -> Self {
        FakeStack::new()
    }
}

impl FakeStack {
    pub fn new() -> Self {
        FakeStack {
            calls: Mutex::new(vec![]),
            status: Mutex::new(StackStatus::Success),
            next_scanner_id: AtomicU8::new(1),
            available_space: AtomicU8::new(16),
            reports: Mutex::new(BatchReports::default()),
            observer: Mutex::new(None),
            trackers: Mutex::new(vec![]),
            threshold: Mutex::new(None),
        }
    }

    /// The status every subsequent primitive completes with
    pub fn set_status(&self, status: StackStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// The id handed out by the next registration, later ones count up from it
    pub fn set_next_scanner_id(&self, id: u8) {
        self.next_scanner_id.store(id, Ordering::SeqCst);
    }

    /// The free filter slot count reported by filter completions
    pub fn set_available_space(&self, space: u8) {
        self.available_space.store(space, Ordering::SeqCst);
    }

    pub fn set_batch_reports(&self, format: u8, num_records: u8, data: Vec<u8>) {
        *self.reports.lock().unwrap() = BatchReports { format, num_records, data };
    }

    pub fn calls(&self) -> Vec<StackCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn is_observing(&self) -> bool {
        self.observer.lock().unwrap().is_some()
    }

    /// Raises a search event as if observed by the controller.
    ///
    /// Returns `false` if nothing is observing.
    pub fn inject(&self, event: SearchEvent) -> bool {
        let sink = self.observer.lock().unwrap().clone();
        match sink {
            Some(sink) => {
                sink.on_search_event(event);
                true
            }
            None => false,
        }
    }

    /// Raises a tracking event for `info.client_id`.
    ///
    /// Returns `false` if that client never asked for advertisers to be
    /// tracked.
    pub fn inject_track(&self, info: Box<TrackAdvertiserInfo>) -> bool {
        let sink = self.trackers
                       .lock()
                       .unwrap()
                       .iter()
                       .find(|(client_id, _)| *client_id == info.client_id)
                       .map(|(_, sink)| sink.clone());
        match sink {
            Some(sink) => {
                sink.on_track_advertiser(info);
                true
            }
            None => false,
        }
    }

    /// Reports the batch storage threshold as crossed.
    ///
    /// Returns `false` if batch storage was never configured.
    pub fn cross_batch_threshold(&self) -> bool {
        let threshold = self.threshold.lock().unwrap().clone();
        match threshold {
            Some((client_id, sink)) => {
                sink.on_batch_scan_threshold(client_id);
                true
            }
            None => false,
        }
    }

    fn record(&self, call: StackCall) -> StackStatus {
        trace!("FakeStack: {:?}", call);
        self.calls.lock().unwrap().push(call);
        *self.status.lock().unwrap()
    }

    fn space(&self) -> u8 {
        self.available_space.load(Ordering::SeqCst)
    }
}

impl RadioStack for FakeStack {
    fn register_app(&self, done: Completion<RegisterRoute>) {
        let status = self.record(StackCall::RegisterApp);
        let id = self.next_scanner_id.fetch_add(1, Ordering::SeqCst);
        done.complete(ScannerId(id), status);
    }

    fn deregister_app(&self, scanner_id: ScannerId) {
        self.record(StackCall::DeregisterApp(scanner_id));
        self.trackers.lock().unwrap().retain(|(client_id, _)| *client_id != scanner_id);
    }

    fn observe(&self, start: bool, sink: Option<ScanEventSink>) {
        self.record(StackCall::Observe(start));
        *self.observer.lock().unwrap() = if start { sink } else { None };
    }

    fn track_advertiser(&self, client_id: ScannerId, sink: ScanEventSink) {
        self.record(StackCall::TrackAdvertiser(client_id));
        self.trackers.lock().unwrap().push((client_id, sink));
    }

    fn filter_param_setup(&self, action: FilterAction, filter_index: u8,
                          params: Option<FilterParams>, done: Completion<FilterParamRoute>) {
        let status = self.record(StackCall::FilterParamSetup { action, filter_index, params });
        done.complete(action, self.space(), status);
    }

    fn address_filter(&self, action: FilterAction, filter_index: u8, address: DeviceAddress,
                      address_type: AddressType, done: Completion<FilterConfigRoute>) {
        let status = self.record(StackCall::AddressFilter { action, filter_index, address,
                                                            address_type });
        done.complete(action, self.space(), status);
    }

    fn service_data_filter(&self, action: FilterAction, filter_index: u8,
                           done: Completion<FilterConfigRoute>) {
        let status = self.record(StackCall::ServiceDataFilter { action, filter_index });
        done.complete(action, self.space(), status);
    }

    fn uuid_filter(&self, action: FilterAction, filter_index: u8, condition: UuidCondition,
                   done: Completion<FilterConfigRoute>) {
        let status = self.record(StackCall::UuidFilter { action, filter_index, condition });
        done.complete(action, self.space(), status);
    }

    fn local_name_filter(&self, action: FilterAction, filter_index: u8, pattern: Vec<u8>,
                         done: Completion<FilterConfigRoute>) {
        let status = self.record(StackCall::LocalNameFilter { action, filter_index, pattern });
        done.complete(action, self.space(), status);
    }

    fn manufacturer_data_filter(&self, action: FilterAction, filter_index: u8, company_id: u16,
                                company_id_mask: u16, data: Vec<u8>, mask: Vec<u8>,
                                done: Completion<FilterConfigRoute>) {
        let status = self.record(StackCall::ManufacturerDataFilter { action, filter_index,
                                                                     company_id, company_id_mask,
                                                                     data, mask });
        done.complete(action, self.space(), status);
    }

    fn service_data_pattern_filter(&self, action: FilterAction, filter_index: u8, data: Vec<u8>,
                                   mask: Vec<u8>, done: Completion<FilterConfigRoute>) {
        let status = self.record(StackCall::ServiceDataPatternFilter { action, filter_index,
                                                                       data, mask });
        done.complete(action, self.space(), status);
    }

    fn clear_filters(&self, filter_index: u8, done: Completion<FilterConfigRoute>) {
        let status = self.record(StackCall::ClearFilters { filter_index });
        done.complete(FilterAction::Clear, self.space(), status);
    }

    fn enable_filter_feature(&self, enable: bool, done: Completion<FilterStatusRoute>) {
        let status = self.record(StackCall::EnableFilterFeature(enable));
        done.complete(enable, status);
    }

    fn set_scan_params(&self, client_id: ScannerId, scan_interval: u32, scan_window: u32,
                       done: Completion<ScanParamRoute>) {
        let status = self.record(StackCall::SetScanParams { client_id, scan_interval,
                                                            scan_window });
        done.complete(status);
    }

    fn set_batch_storage_config(&self, full_max: u8, trunc_max: u8, notify_threshold: u8,
                                client_id: ScannerId, done: Completion<BatchStorageRoute>,
                                threshold: ScanEventSink) {
        let status = self.record(StackCall::SetBatchStorageConfig { full_max, trunc_max,
                                                                    notify_threshold,
                                                                    client_id });
        *self.threshold.lock().unwrap() = Some((client_id, threshold));
        done.complete(status);
    }

    fn enable_batch_scan(&self, params: BatchScanParams, done: Completion<BatchScanToggleRoute>) {
        let status = self.record(StackCall::EnableBatchScan(params));
        done.complete(status);
    }

    fn disable_batch_scan(&self, done: Completion<BatchScanToggleRoute>) {
        let status = self.record(StackCall::DisableBatchScan);
        done.complete(status);
    }

    fn read_scan_reports(&self, scan_mode: BatchScanMode, done: Completion<BatchReportsRoute>) {
        let status = self.record(StackCall::ReadScanReports(scan_mode));
        let reports = self.reports.lock().unwrap();
        done.complete(reports.format, reports.num_records, reports.data.clone(), status);
    }
}
