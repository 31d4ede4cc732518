use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use log::trace;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::cache::DeviceSeenCache;
use crate::dispatch::{ClientContext, Command, StackContext};
use crate::filter::{self, FilterAction, FilterParams, FilterRequest};
use crate::result::{Discard, PropertyStore, RemoteDeviceManager, ScanResultProcessor};
use crate::stack::{BatchScanMode, BatchScanParams, RadioStack};
use crate::status::ApiStatus;
use crate::{Error, Event, Result, ScannerId};

/// Where the scanner delivers [`Event`]s.
///
/// Always called from the client context task, one event at a time.
pub trait ScannerCallbacks: Send + Sync {
    fn on_event(&self, event: Event);
}

impl<F> ScannerCallbacks for F
    where F: Fn(Event) + Send + Sync
{
    fn on_event(&self, event: Event) {
        self(event)
    }
}

pub struct ScannerConfig {
    stack: Arc<dyn RadioStack>,
    callbacks: Arc<dyn ScannerCallbacks>,
    properties: Arc<dyn PropertyStore>,
    devices: Arc<dyn RemoteDeviceManager>,
}

impl ScannerConfig {
    pub fn new(stack: Arc<dyn RadioStack>, callbacks: impl ScannerCallbacks + 'static) -> Self {
        ScannerConfig {
            stack,
            callbacks: Arc::new(callbacks),
            properties: Arc::new(Discard),
            devices: Arc::new(Discard),
        }
    }

    pub fn set_property_store(&mut self, properties: Arc<dyn PropertyStore>) -> &mut Self {
        self.properties = properties;
        self
    }

    pub fn set_device_manager(&mut self, devices: Arc<dyn RemoteDeviceManager>) -> &mut Self {
        self.devices = devices;
        self
    }

    /// Spawns the stack and client contexts on the current tokio runtime.
    pub fn start(self) -> Result<Scanner> {
        Scanner::start(self)
    }
}

#[derive(Clone)]
pub struct Scanner {
    inner: Arc<ScannerInner>,
}
impl Deref for Scanner {
    type Target = ScannerInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

// Public so Scanner can Deref to it, nothing in here is public
pub struct ScannerInner {
    command_bus: mpsc::UnboundedSender<Command>,
    seen: Arc<DeviceSeenCache>,
    next_flush_index: AtomicU32,

    // Taken by the first shutdown()
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl Scanner {
    fn start(config: ScannerConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| Error::Other(anyhow!("No tokio runtime to run the scanner on: {}", err)))?;

        let (command_bus_tx, command_bus_rx) = mpsc::unbounded_channel();
        let (client_bus_tx, client_bus_rx) = mpsc::unbounded_channel();
        let seen = Arc::new(DeviceSeenCache::new());

        let stack_context = StackContext {
            stack: config.stack,
            client_bus: client_bus_tx,
            seen: seen.clone(),
        };
        let client_context = ClientContext {
            processor: ScanResultProcessor {
                seen: seen.clone(),
                properties: config.properties,
                devices: config.devices,
            },
            callbacks: config.callbacks,
        };

        let stack_task = runtime.spawn(stack_context.run(command_bus_rx));
        let client_task = runtime.spawn(client_context.run(client_bus_rx));

        Ok(Scanner {
            inner: Arc::new(ScannerInner {
                command_bus: command_bus_tx,
                seen,
                next_flush_index: AtomicU32::new(0),
                tasks: Mutex::new(Some((stack_task, client_task))),
            }),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.command_bus.send(command).map_err(|_| Error::ContextClosed)
    }

    /// Registers a new scanner with the stack.
    ///
    /// `on_registered` is called on the client context with the id assigned
    /// by the stack; the id is only meaningful if the status is a success.
    pub fn register_scanner<F>(&self, on_registered: F) -> Result<()>
        where F: FnOnce(ScannerId, ApiStatus) + Send + 'static
    {
        self.send(Command::RegisterScanner { on_registered: Box::new(on_registered) })
    }

    pub fn unregister(&self, scanner_id: ScannerId) -> Result<()> {
        self.send(Command::Unregister { scanner_id })
    }

    /// Starting a scan begins a new session and forgets every device seen
    /// by the previous one before the start is even queued. Stopping
    /// forgets nothing.
    pub fn set_scan_enabled(&self, enabled: bool) -> Result<()> {
        let session = if enabled { self.seen.start_session() } else { self.seen.session() };
        self.send(Command::Scan { start: enabled, session })
    }

    pub fn configure_filter_params(&self, client_id: ScannerId, action: FilterAction,
                                   filter_index: u8, params: Option<FilterParams>)
                                   -> Result<()> {
        self.send(Command::ScanFilterParamSetup { client_id, action, filter_index, params })
    }

    /// Validates and queues a filter add or delete.
    ///
    /// A request that fails validation is rejected here and the stack never
    /// hears about it, so no filter event follows either.
    pub fn add_or_remove_filter(&self, request: FilterRequest) -> Result<()> {
        let client_id = request.client_id;
        let action = request.action;
        let filter_index = request.filter_index;

        let spec = match filter::validate(request) {
            Ok(spec) => spec,
            Err(err) => {
                log::warn!("Dropping filter request for {}: {}", client_id, err);
                return Err(err.into());
            }
        };

        self.send(Command::ScanFilterAddRemove { client_id, action, filter_index, spec })
    }

    pub fn clear_filters(&self, client_id: ScannerId, filter_index: u8) -> Result<()> {
        self.send(Command::ScanFilterClear { client_id, filter_index })
    }

    pub fn set_filter_enabled(&self, client_id: ScannerId, enabled: bool) -> Result<()> {
        self.send(Command::ScanFilterEnable { client_id, enable: enabled })
    }

    pub fn set_scan_parameters(&self, client_id: ScannerId, scan_interval: u32,
                               scan_window: u32) -> Result<()> {
        self.send(Command::SetScanParameters { client_id, scan_interval, scan_window })
    }

    pub fn configure_batch_scan_storage(&self, client_id: ScannerId, full_max: u8,
                                        trunc_max: u8, notify_threshold: u8) -> Result<()> {
        self.send(Command::BatchscanConfigStorage { client_id, full_max, trunc_max,
                                                    notify_threshold })
    }

    pub fn set_batch_scan_enabled(&self, client_id: ScannerId, params: BatchScanParams)
                                  -> Result<()> {
        self.send(Command::BatchscanEnable { client_id, params })
    }

    pub fn set_batch_scan_disabled(&self, client_id: ScannerId) -> Result<()> {
        self.send(Command::BatchscanDisable { client_id })
    }

    pub fn read_batch_scan_reports(&self, client_id: ScannerId, scan_mode: BatchScanMode)
                                   -> Result<()> {
        self.send(Command::BatchscanReadReports { client_id, scan_mode })
    }

    /// Queues a barrier and returns its id.
    ///
    /// `Event::Flush(id)` is delivered once every command queued before it
    /// has run on the stack context, along with anything the stack
    /// completed synchronously while running them.
    pub fn flush(&self) -> Result<u32> {
        let id = self.next_flush_index.fetch_add(1, Ordering::SeqCst);
        self.send(Command::Flush(id))?;
        Ok(id)
    }

    /// Lets both contexts drain whatever has already been queued and then
    /// waits for them to exit.
    ///
    /// Anything requested afterwards fails with [`Error::ContextClosed`].
    pub async fn shutdown(&self) -> Result<()> {
        let tasks = self.tasks.lock().await.take();
        let (stack_task, client_task) = match tasks {
            Some(tasks) => tasks,
            None => return Ok(()),
        };

        trace!("Shutting down scanner");
        self.send(Command::Shutdown)?;
        stack_task.await.map_err(|err| anyhow!("Stack context task failed: {}", err))?;
        client_task.await.map_err(|err| anyhow!("Client context task failed: {}", err))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use crate::fake::{FakeStack, StackCall};
    use crate::filter::{DeliveryMode, FilterFeatures, FilterLogic, FilterType, UuidCondition,
                        UuidFilterKind};
    use crate::result::RemoteProperty;
    use crate::stack::{AdvertiserState, BatchScanAction, DiscardRule, InquiryResult,
                       SearchEvent, TrackAdvertiserInfo};
    use crate::status::StackStatus;
    use crate::uuid::{uuid_from_u16, UuidMask};
    use crate::{AddressType, DeviceAddress, DeviceType};

    #[derive(Default)]
    struct Devices {
        properties: StdMutex<Vec<(DeviceAddress, RemoteProperty)>>,
        names: StdMutex<Vec<(DeviceAddress, String)>>,
    }
    impl PropertyStore for Devices {
        fn set_remote_property(&self, address: &DeviceAddress, property: RemoteProperty) {
            self.properties.lock().unwrap().push((*address, property));
        }
    }
    impl RemoteDeviceManager for Devices {
        fn update_ble_remote_properties(&self, address: &DeviceAddress, name: &str,
                                        _device_type: DeviceType) {
            self.names.lock().unwrap().push((*address, name.to_string()));
        }
    }

    struct Harness {
        scanner: Scanner,
        stack: Arc<FakeStack>,
        devices: Arc<Devices>,
        events: mpsc::UnboundedReceiver<Event>,
    }

    impl Harness {
        fn new() -> Self {
            let _ = env_logger::builder().is_test(true).try_init();

            let stack = Arc::new(FakeStack::new());
            let devices = Arc::new(Devices::default());
            let (tx, events) = mpsc::unbounded_channel();

            let mut config = ScannerConfig::new(stack.clone(), move |event: Event| {
                let _ = tx.send(event);
            });
            config.set_property_store(devices.clone())
                  .set_device_manager(devices.clone());
            let scanner = config.start().unwrap();

            Harness { scanner, stack, devices, events }
        }

        /// Everything delivered before the flush barrier comes back around
        async fn settle(&mut self) -> Vec<Event> {
            let id = self.scanner.flush().unwrap();
            let mut delivered = vec![];
            loop {
                let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                    .await
                    .expect("timed out waiting for flush")
                    .expect("event channel closed");
                match event {
                    Event::Flush(flushed) if flushed == id => return delivered,
                    event => delivered.push(event),
                }
            }
        }
    }

    fn inquiry(address: DeviceAddress, address_type: AddressType, rssi: i8, eir: Vec<u8>)
               -> SearchEvent {
        SearchEvent::InquiryResult(InquiryResult {
            address,
            address_type,
            device_type: DeviceType::Ble,
            rssi,
            eir: Some(eir),
        })
    }

    fn complete_name(name: &str) -> Vec<u8> {
        let mut eir = vec![0x02, 0x01, 0x06, name.len() as u8 + 1, 0x09];
        eir.extend_from_slice(name.as_bytes());
        eir
    }

    const SENSOR: DeviceAddress = DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    #[tokio::test]
    async fn register_scan_and_report() {
        let mut harness = Harness::new();
        harness.stack.set_next_scanner_id(5);

        let registered = Arc::new(StdMutex::new(None));
        let registered2 = registered.clone();
        harness.scanner
               .register_scanner(move |id, status| {
                   *registered2.lock().unwrap() = Some((id, status));
               })
               .unwrap();
        harness.scanner.set_scan_enabled(true).unwrap();
        assert!(harness.settle().await.is_empty());
        assert_eq!(*registered.lock().unwrap(), Some((ScannerId(5), ApiStatus::Success)));

        assert!(harness.stack.inject(inquiry(SENSOR, AddressType::Public, -57,
                                             complete_name("Sensor1"))));
        let events = harness.settle().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::ScanResult(result) => {
                assert_eq!(result.address, SENSOR);
                assert_eq!(result.rssi, -57);
                assert_eq!(result.name.as_deref(), Some("Sensor1"));
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(*harness.devices.names.lock().unwrap(), vec![(SENSOR, "Sensor1".to_string())]);
        assert_eq!(*harness.devices.properties.lock().unwrap(), vec![
            (SENSOR, RemoteProperty::DeviceType(DeviceType::Ble)),
            (SENSOR, RemoteProperty::AddressType(AddressType::Public)),
        ]);
        assert_eq!(harness.stack.calls(), vec![StackCall::RegisterApp, StackCall::Observe(true)]);
    }

    #[tokio::test]
    async fn failed_registration_reports_translated_status() {
        let mut harness = Harness::new();
        harness.stack.set_status(StackStatus::NoResources);

        let registered = Arc::new(StdMutex::new(None));
        let registered2 = registered.clone();
        harness.scanner
               .register_scanner(move |_id, status| *registered2.lock().unwrap() = Some(status))
               .unwrap();
        harness.settle().await;
        assert_eq!(*registered.lock().unwrap(), Some(ApiStatus::NoResources));
    }

    #[tokio::test]
    async fn mismatched_filter_mask_never_dispatched() {
        let mut harness = Harness::new();

        let request = FilterRequest { data: vec![0x01, 0x02], mask: vec![0xFF],
                                      ..FilterRequest::new(ScannerId(1), FilterAction::Add,
                                                           FilterType::ManufacturerData.into(),
                                                           0) };
        match harness.scanner.add_or_remove_filter(request) {
            Err(Error::InvalidFilter(filter::FilterError::MaskLengthMismatch { .. })) => {}
            other => panic!("unexpected result {:?}", other),
        }

        assert!(harness.settle().await.is_empty());
        assert!(harness.stack.calls().is_empty());
    }

    #[tokio::test]
    async fn unmasked_uuid_filter() {
        let mut harness = Harness::new();
        harness.stack.set_available_space(9);

        let uuid = uuid_from_u16(0xFEAA);
        let request = FilterRequest { uuid: Some(uuid),
                                      ..FilterRequest::new(ScannerId(2), FilterAction::Add,
                                                           FilterType::ServiceUuid.into(), 3) };
        harness.scanner.add_or_remove_filter(request).unwrap();

        let events = harness.settle().await;
        assert_eq!(harness.stack.calls(), vec![StackCall::UuidFilter {
            action: FilterAction::Add,
            filter_index: 3,
            condition: UuidCondition {
                kind: UuidFilterKind::Service,
                uuid,
                logic: FilterLogic::And,
                mask: None,
            },
        }]);
        match &events[..] {
            [Event::ScanFilterConfigured { action, client_id, status, filter_type,
                                           available_space }] => {
                assert_eq!(*action, FilterAction::Add);
                assert_eq!(*client_id, ScannerId(2));
                assert_eq!(*status, ApiStatus::Success);
                assert_eq!(*filter_type, FilterType::ServiceUuid);
                assert_eq!(*available_space, 9);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn pattern_and_masked_filters() {
        let mut harness = Harness::new();
        let client = ScannerId(6);
        let filter = |filter_type: FilterType| {
            FilterRequest::new(client, FilterAction::Add, filter_type.into(), 2)
        };

        let requests = vec![
            FilterRequest { data: b"Sensor".to_vec(), ..filter(FilterType::LocalName) },
            FilterRequest { company_id: 0x004C, company_id_mask: 0xFFFF,
                            data: vec![0x02, 0x15], mask: vec![0xFF, 0x0F],
                            ..filter(FilterType::ManufacturerData) },
            FilterRequest { data: vec![0xAA, 0xFE, 0x10], mask: vec![0xFF, 0xFF, 0x00],
                            ..filter(FilterType::ServiceDataPattern) },
            FilterRequest {
                uuid: Some(uuid_from_u16(0xFD6F)),
                uuid_mask: Some(::uuid::Uuid::from_u128(0x0000ff00_0000_0000_0000_000000000000)),
                ..filter(FilterType::ServiceSolicitationUuid)
            },
        ];
        for request in requests {
            harness.scanner.add_or_remove_filter(request).unwrap();
        }

        let events = harness.settle().await;
        let filter_types: Vec<FilterType> = events.iter()
            .map(|event| match event {
                Event::ScanFilterConfigured { client_id, status, filter_type, .. } => {
                    assert_eq!(*client_id, client);
                    assert_eq!(*status, ApiStatus::Success);
                    *filter_type
                }
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(filter_types, vec![FilterType::LocalName, FilterType::ManufacturerData,
                                      FilterType::ServiceDataPattern,
                                      FilterType::ServiceSolicitationUuid]);

        assert_eq!(harness.stack.calls(), vec![
            StackCall::LocalNameFilter { action: FilterAction::Add, filter_index: 2,
                                         pattern: b"Sensor".to_vec() },
            StackCall::ManufacturerDataFilter { action: FilterAction::Add, filter_index: 2,
                                                company_id: 0x004C, company_id_mask: 0xFFFF,
                                                data: vec![0x02, 0x15], mask: vec![0xFF, 0x0F] },
            StackCall::ServiceDataPatternFilter { action: FilterAction::Add, filter_index: 2,
                                                  data: vec![0xAA, 0xFE, 0x10],
                                                  mask: vec![0xFF, 0xFF, 0x00] },
            StackCall::UuidFilter {
                action: FilterAction::Add,
                filter_index: 2,
                condition: UuidCondition {
                    kind: UuidFilterKind::Solicitation,
                    uuid: uuid_from_u16(0xFD6F),
                    logic: FilterLogic::And,
                    mask: Some(UuidMask::Uuid16(0xff00)),
                },
            },
        ]);

        // Removing goes through the same primitives
        harness.stack.clear_calls();
        harness.scanner
               .add_or_remove_filter(FilterRequest { action: FilterAction::Delete,
                                                     data: b"Sensor".to_vec(),
                                                     ..filter(FilterType::LocalName) })
               .unwrap();
        assert!(matches!(harness.settle().await[..], [Event::ScanFilterConfigured {
            action: FilterAction::Delete, filter_type: FilterType::LocalName, .. }]));
        assert_eq!(harness.stack.calls(), vec![
            StackCall::LocalNameFilter { action: FilterAction::Delete, filter_index: 2,
                                         pattern: b"Sensor".to_vec() },
        ]);
    }

    #[tokio::test]
    async fn filter_lifecycle() {
        let mut harness = Harness::new();
        let client = ScannerId(1);

        let request = FilterRequest { address: Some(SENSOR), address_type: AddressType::Random,
                                      ..FilterRequest::new(client, FilterAction::Add,
                                                           FilterType::Address.into(), 0) };
        harness.scanner.add_or_remove_filter(request).unwrap();
        harness.scanner
               .add_or_remove_filter(FilterRequest::new(client, FilterAction::Add,
                                                        FilterType::ServiceData.into(), 0))
               .unwrap();
        harness.scanner.set_filter_enabled(client, true).unwrap();
        let mut events = harness.settle().await;

        harness.stack.set_status(StackStatus::IllegalAction);
        harness.scanner.clear_filters(client, 0).unwrap();
        events.extend(harness.settle().await);

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], Event::ScanFilterConfigured {
            filter_type: FilterType::Address, status: ApiStatus::Success, .. }));
        assert!(matches!(events[1], Event::ScanFilterConfigured {
            filter_type: FilterType::ServiceData, .. }));
        assert!(matches!(events[2], Event::ScanFilterStatus { enabled: true, .. }));
        assert!(matches!(events[3], Event::ScanFilterConfigured {
            action: FilterAction::Clear, filter_type: FilterType::All,
            status: ApiStatus::IncorrectState, .. }));

        assert_eq!(harness.stack.calls(), vec![
            StackCall::AddressFilter { action: FilterAction::Add, filter_index: 0,
                                       address: SENSOR, address_type: AddressType::Random },
            StackCall::ServiceDataFilter { action: FilterAction::Add, filter_index: 0 },
            StackCall::EnableFilterFeature(true),
            StackCall::ClearFilters { filter_index: 0 },
        ]);
    }

    #[tokio::test]
    async fn on_found_delivery_tracks_advertisers() {
        let mut harness = Harness::new();
        let client = ScannerId(4);

        let params = FilterParams { feature_selection: FilterFeatures::LOCAL_NAME,
                                    delivery_mode: DeliveryMode::OnFound,
                                    ..FilterParams::default() };
        harness.scanner
               .configure_filter_params(client, FilterAction::Add, 1, Some(params.clone()))
               .unwrap();
        let events = harness.settle().await;
        assert!(matches!(events[..], [Event::ScanFilterParamsConfigured { .. }]));
        assert_eq!(harness.stack.calls(), vec![
            StackCall::TrackAdvertiser(client),
            StackCall::FilterParamSetup { action: FilterAction::Add, filter_index: 1,
                                          params: Some(params) },
        ]);

        let info = TrackAdvertiserInfo {
            client_id: client,
            filter_index: 1,
            advertiser_state: AdvertiserState::Found,
            advertiser_info_present: true,
            address: SENSOR,
            address_type: AddressType::Public,
            tx_power: 4,
            rssi: -70,
            timestamp: 1234,
            adv_data: complete_name("Tag"),
            scan_response: vec![],
        };
        assert!(harness.stack.inject_track(Box::new(info.clone())));
        match &harness.settle().await[..] {
            [Event::AdvertiserTracked(tracked)] => assert_eq!(**tracked, info),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_params_do_not_track() {
        let mut harness = Harness::new();
        harness.scanner
               .configure_filter_params(ScannerId(1), FilterAction::Delete, 2, None)
               .unwrap();
        harness.settle().await;
        assert_eq!(harness.stack.calls(), vec![
            StackCall::FilterParamSetup { action: FilterAction::Delete, filter_index: 2,
                                          params: None },
        ]);
    }

    #[tokio::test]
    async fn seen_devices_reset_per_session() {
        let mut harness = Harness::new();
        let eir = complete_name("Sensor1");

        harness.scanner.set_scan_enabled(true).unwrap();
        harness.settle().await;
        harness.stack.inject(inquiry(SENSOR, AddressType::Public, -60, eir.clone()));
        harness.stack.inject(inquiry(SENSOR, AddressType::Public, -61, eir.clone()));
        assert_eq!(harness.settle().await.len(), 2);
        assert_eq!(harness.devices.names.lock().unwrap().len(), 1);

        // Stopping alone doesn't forget anything
        harness.scanner.set_scan_enabled(false).unwrap();
        harness.settle().await;
        assert!(!harness.stack.is_observing());
        assert_eq!(harness.scanner.seen.len(), 1);

        harness.scanner.set_scan_enabled(true).unwrap();
        assert!(harness.scanner.seen.is_empty());
        harness.settle().await;
        harness.stack.inject(inquiry(SENSOR, AddressType::Public, -62, eir));
        harness.settle().await;
        assert_eq!(harness.devices.names.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn late_result_does_not_suppress_next_session() {
        let mut harness = Harness::new();
        let eir = complete_name("Sensor1");

        harness.scanner.set_scan_enabled(true).unwrap();
        harness.settle().await;

        // Reported by the first session but restarted before the client
        // context gets to it
        harness.stack.inject(inquiry(SENSOR, AddressType::Public, -60, eir.clone()));
        harness.scanner.set_scan_enabled(true).unwrap();
        harness.settle().await;
        assert!(!harness.scanner.seen.contains(&SENSOR));

        harness.stack.inject(inquiry(SENSOR, AddressType::Public, -61, eir));
        assert_eq!(harness.settle().await.len(), 1);
        assert_eq!(harness.devices.names.lock().unwrap().len(), 2);
        assert_eq!(harness.scanner.seen.len(), 1);
    }

    #[tokio::test]
    async fn anonymous_random_advertiser_still_reported() {
        let mut harness = Harness::new();
        harness.scanner.set_scan_enabled(true).unwrap();
        harness.settle().await;

        harness.stack.inject(inquiry(SENSOR, AddressType::Random, -80, vec![0x02, 0x01, 0x06]));
        harness.stack.inject(SearchEvent::InquiryComplete { num_responses: 1 });
        harness.stack.inject(SearchEvent::Other(0x17));

        let events = harness.settle().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::ScanResult(result) if result.name.is_none()));
        assert!(harness.scanner.seen.is_empty());
        assert!(harness.devices.names.lock().unwrap().is_empty());
        assert_eq!(harness.devices.properties.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn scan_parameters_are_active() {
        let mut harness = Harness::new();
        harness.stack.set_status(StackStatus::Busy);
        harness.scanner.set_scan_parameters(ScannerId(3), 0x60, 0x30).unwrap();

        let events = harness.settle().await;
        assert!(matches!(events[..], [Event::ScanParametersConfigured {
            client_id: ScannerId(3), status: ApiStatus::Busy, .. }]));
        assert_eq!(harness.stack.calls(), vec![StackCall::SetScanParams {
            client_id: ScannerId(3),
            scan_interval: 0x60,
            scan_window: 0x30,
        }]);
    }

    #[tokio::test]
    async fn batch_scanning() {
        let mut harness = Harness::new();
        let client = ScannerId(7);
        harness.stack.set_batch_reports(2, 1, vec![0xde, 0xad]);

        let params = BatchScanParams {
            scan_mode: BatchScanMode::Full,
            scan_interval: 2000,
            scan_window: 500,
            address_type: AddressType::Public,
            discard_rule: DiscardRule::Weakest,
        };
        harness.scanner.configure_batch_scan_storage(client, 50, 0, 95).unwrap();
        harness.scanner.set_batch_scan_enabled(client, params.clone()).unwrap();
        harness.scanner.read_batch_scan_reports(client, BatchScanMode::Full).unwrap();
        harness.scanner.set_batch_scan_disabled(client).unwrap();

        let events = harness.settle().await;
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], Event::BatchScanStorageConfigured { client_id: ScannerId(7), .. }));
        assert!(matches!(events[1], Event::BatchScanStateChanged {
            action: BatchScanAction::Enable, status: ApiStatus::Success, .. }));
        match &events[2] {
            Event::BatchScanReports { client_id, report_format, num_records, data, .. } => {
                assert_eq!(*client_id, client);
                assert_eq!(*report_format, 2);
                assert_eq!(*num_records, 1);
                assert_eq!(data, &vec![0xde, 0xad]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events[3], Event::BatchScanStateChanged {
            action: BatchScanAction::Disable, .. }));

        assert_eq!(harness.stack.calls(), vec![
            StackCall::SetBatchStorageConfig { full_max: 50, trunc_max: 0, notify_threshold: 95,
                                               client_id: client },
            StackCall::EnableBatchScan(params),
            StackCall::ReadScanReports(BatchScanMode::Full),
            StackCall::DisableBatchScan,
        ]);

        assert!(harness.stack.cross_batch_threshold());
        assert!(matches!(harness.settle().await[..],
                         [Event::BatchScanThresholdCrossed { client_id: ScannerId(7), .. }]));
    }

    #[tokio::test]
    async fn commands_run_in_order() {
        let mut harness = Harness::new();
        for index in 0..8u8 {
            harness.scanner.clear_filters(ScannerId(1), index).unwrap();
        }
        harness.scanner.unregister(ScannerId(1)).unwrap();
        harness.settle().await;

        let calls = harness.stack.calls();
        let expected: Vec<StackCall> = (0..8u8).map(|filter_index| StackCall::ClearFilters { filter_index })
                                               .chain(std::iter::once(StackCall::DeregisterApp(ScannerId(1))))
                                               .collect();
        assert_eq!(calls, expected);
    }

    #[tokio::test]
    async fn independent_scanners() {
        let mut first = Harness::new();
        let mut second = Harness::new();

        first.scanner.set_scan_enabled(true).unwrap();
        first.settle().await;
        assert!(second.settle().await.is_empty());
        assert!(first.stack.is_observing());
        assert!(!second.stack.is_observing());
    }

    #[tokio::test]
    async fn closed_after_shutdown() {
        let mut harness = Harness::new();
        harness.scanner.set_scan_enabled(true).unwrap();
        harness.scanner.shutdown().await.unwrap();

        // Work queued before the shutdown still ran
        assert_eq!(harness.stack.calls(), vec![StackCall::Observe(true)]);
        assert!(matches!(harness.scanner.set_scan_enabled(false), Err(Error::ContextClosed)));
        assert!(matches!(harness.scanner.flush(), Err(Error::ContextClosed)));

        // A second shutdown is a no-op
        harness.scanner.shutdown().await.unwrap();

        // Late stack events are dropped, not delivered
        harness.stack.inject(inquiry(SENSOR, AddressType::Public, -50, vec![]));
        assert!(harness.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_both_contexts() {
        let Harness { scanner, stack, mut events, .. } = Harness::new();
        let clone = scanner.clone();
        scanner.set_scan_enabled(true).unwrap();
        drop(scanner);
        drop(clone);

        // The stack still holds the observe sink
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                trace!("Draining {:?}", event);
            }
        }).await;
        assert!(closed.is_ok(), "client context outlived its scanner");
        assert!(stack.is_observing());
        assert!(stack.inject(inquiry(SENSOR, AddressType::Public, -50, vec![])));
    }

    #[test]
    fn start_needs_a_runtime() {
        let config = ScannerConfig::new(Arc::new(FakeStack::new()), |_event: Event| {});
        assert!(matches!(config.start(), Err(Error::Other(_))));
    }
}
