//! The two execution contexts.
//!
//! The stack context drains [`Command`]s in submission order and is the
//! only place that calls into the [`RadioStack`]. The client context drains
//! [`ClientMessage`]s, finishes processing scan results and is the only
//! place that calls into the application.

use std::fmt;
use std::sync::Arc;

use function_name::named;
use futures::StreamExt;
use log::{error, trace, warn};
use tokio::sync::mpsc;

use crate::cache::DeviceSeenCache;
use crate::filter::{DeliveryMode, FilterAction, FilterParams, FilterSpec, FilterType};
use crate::result::{RawScanResult, ScanResultProcessor};
use crate::scanner::ScannerCallbacks;
use crate::stack::{
    BatchReportsRoute, BatchScanAction, BatchScanMode, BatchScanParams, BatchScanToggleRoute,
    BatchStorageRoute, ClientBus, Completion, FilterConfigRoute, FilterParamRoute,
    FilterStatusRoute, RadioStack, RegisterRoute, ScanEventSink, ScanParamRoute,
};
use crate::status::ApiStatus;
use crate::{Event, ScannerId};

pub(crate) type RegisterCallback = Box<dyn FnOnce(ScannerId, ApiStatus) + Send + 'static>;

/// One unit of work for the stack context, one variant per operation.
pub(crate) enum Command {
    RegisterScanner { on_registered: RegisterCallback },
    Unregister { scanner_id: ScannerId },
    /// `session` is the scan session a start begins
    Scan { start: bool, session: u32 },
    ScanFilterParamSetup {
        client_id: ScannerId,
        action: FilterAction,
        filter_index: u8,
        params: Option<FilterParams>,
    },
    ScanFilterAddRemove {
        client_id: ScannerId,
        action: FilterAction,
        filter_index: u8,
        spec: FilterSpec,
    },
    ScanFilterClear { client_id: ScannerId, filter_index: u8 },
    ScanFilterEnable { client_id: ScannerId, enable: bool },
    SetScanParameters { client_id: ScannerId, scan_interval: u32, scan_window: u32 },
    BatchscanConfigStorage {
        client_id: ScannerId,
        full_max: u8,
        trunc_max: u8,
        notify_threshold: u8,
    },
    BatchscanEnable { client_id: ScannerId, params: BatchScanParams },
    BatchscanDisable { client_id: ScannerId },
    BatchscanReadReports { client_id: ScannerId, scan_mode: BatchScanMode },
    Flush(u32),
    Shutdown,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::RegisterScanner { .. } => f.write_str("RegisterScanner"),
            Command::Unregister { scanner_id } => write!(f, "Unregister({})", scanner_id),
            Command::Scan { start, session } => write!(f, "Scan({}, {})", start, session),
            Command::ScanFilterParamSetup { client_id, action, filter_index, .. } => {
                write!(f, "ScanFilterParamSetup({}, {:?}, {})", client_id, action, filter_index)
            }
            Command::ScanFilterAddRemove { client_id, action, filter_index, spec } => {
                write!(f, "ScanFilterAddRemove({}, {:?}, {}, {:?})",
                       client_id, action, filter_index, spec.filter_type())
            }
            Command::ScanFilterClear { client_id, filter_index } => {
                write!(f, "ScanFilterClear({}, {})", client_id, filter_index)
            }
            Command::ScanFilterEnable { client_id, enable } => {
                write!(f, "ScanFilterEnable({}, {})", client_id, enable)
            }
            Command::SetScanParameters { client_id, scan_interval, scan_window } => {
                write!(f, "SetScanParameters({}, {}, {})", client_id, scan_interval, scan_window)
            }
            Command::BatchscanConfigStorage { client_id, .. } => {
                write!(f, "BatchscanConfigStorage({})", client_id)
            }
            Command::BatchscanEnable { client_id, .. } => write!(f, "BatchscanEnable({})", client_id),
            Command::BatchscanDisable { client_id } => write!(f, "BatchscanDisable({})", client_id),
            Command::BatchscanReadReports { client_id, scan_mode } => {
                write!(f, "BatchscanReadReports({}, {:?})", client_id, scan_mode)
            }
            Command::Flush(id) => write!(f, "Flush({})", id),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Everything that gets marshalled onto the client context.
pub(crate) enum ClientMessage {
    Registered {
        on_registered: RegisterCallback,
        scanner_id: ScannerId,
        status: ApiStatus,
    },
    ScanResult(RawScanResult),
    Deliver(Event),
    Shutdown,
}

impl fmt::Debug for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientMessage::Registered { scanner_id, status, .. } => {
                write!(f, "Registered({}, {})", scanner_id, status)
            }
            ClientMessage::ScanResult(raw) => write!(f, "ScanResult({})", raw.address),
            ClientMessage::Deliver(event) => write!(f, "Deliver({:?})", event),
            ClientMessage::Shutdown => f.write_str("Shutdown"),
        }
    }
}

pub(crate) struct StackContext {
    pub(crate) stack: Arc<dyn RadioStack>,
    pub(crate) client_bus: ClientBus,
    pub(crate) seen: Arc<DeviceSeenCache>,
}

impl StackContext {
    pub(crate) async fn run(self, commands: mpsc::UnboundedReceiver<Command>) {
        trace!("Starting stack context task");

        let stream = tokio_stream::wrappers::UnboundedReceiverStream::new(commands);
        tokio::pin!(stream);
        while let Some(command) = stream.next().await {
            trace!("Stack context: {:?}", command);
            match command {
                Command::RegisterScanner { on_registered } => self.register_scanner(on_registered),
                Command::Unregister { scanner_id } => self.unregister(scanner_id),
                Command::Scan { start, session } => self.scan(start, session),
                Command::ScanFilterParamSetup { client_id, action, filter_index, params } => {
                    self.scan_filter_param_setup(client_id, action, filter_index, params)
                }
                Command::ScanFilterAddRemove { client_id, action, filter_index, spec } => {
                    self.scan_filter_add_remove(client_id, action, filter_index, spec)
                }
                Command::ScanFilterClear { client_id, filter_index } => {
                    self.scan_filter_clear(client_id, filter_index)
                }
                Command::ScanFilterEnable { client_id, enable } => {
                    self.scan_filter_enable(client_id, enable)
                }
                Command::SetScanParameters { client_id, scan_interval, scan_window } => {
                    self.set_scan_parameters(client_id, scan_interval, scan_window)
                }
                Command::BatchscanConfigStorage { client_id, full_max, trunc_max,
                                                  notify_threshold } => {
                    self.batchscan_config_storage(client_id, full_max, trunc_max, notify_threshold)
                }
                Command::BatchscanEnable { client_id, params } => {
                    self.batchscan_enable(client_id, params)
                }
                Command::BatchscanDisable { client_id } => self.batchscan_disable(client_id),
                Command::BatchscanReadReports { client_id, scan_mode } => {
                    self.batchscan_read_reports(client_id, scan_mode)
                }
                Command::Flush(id) => self.to_client(ClientMessage::Deliver(Event::Flush(id))),
                Command::Shutdown => break,
            }
        }

        // Sinks held by the stack keep the client bus open
        self.to_client(ClientMessage::Shutdown);

        trace!("Exiting stack context task");
    }

    fn to_client(&self, message: ClientMessage) {
        if let Err(err) = self.client_bus.send(message) {
            error!("Client context closed, dropping {:?}", err.0);
        }
    }

    fn sink(&self, session: u32) -> ScanEventSink {
        ScanEventSink::new(self.client_bus.clone(), session)
    }

    #[named]
    fn register_scanner(&self, on_registered: RegisterCallback) {
        trace!("{}", function_name!());
        self.stack.register_app(Completion::new(&self.client_bus, RegisterRoute { on_registered }));
    }

    #[named]
    fn unregister(&self, scanner_id: ScannerId) {
        trace!("{}: scanner_id: {}", function_name!(), scanner_id);
        self.stack.deregister_app(scanner_id);
    }

    #[named]
    fn scan(&self, start: bool, session: u32) {
        trace!("{}: start: {}, session: {}", function_name!(), start, session);
        if start {
            self.stack.observe(true, Some(self.sink(session)));
        } else {
            self.stack.observe(false, None);
        }
    }

    #[named]
    fn scan_filter_param_setup(&self, client_id: ScannerId, action: FilterAction,
                               filter_index: u8, params: Option<FilterParams>) {
        trace!("{}: client_id: {}, filter_index: {}", function_name!(), client_id, filter_index);

        let on_found = params.as_ref()
                             .map(|params| params.delivery_mode == DeliveryMode::OnFound)
                             .unwrap_or(false);
        if on_found {
            self.stack.track_advertiser(client_id, self.sink(self.seen.session()));
        }

        let done = Completion::new(&self.client_bus, FilterParamRoute { client_id });
        self.stack.filter_param_setup(action, filter_index, params, done);
    }

    #[named]
    fn scan_filter_add_remove(&self, client_id: ScannerId, action: FilterAction,
                              filter_index: u8, spec: FilterSpec) {
        let filter_type = spec.filter_type();
        trace!("{}: {:?}, {:?}", function_name!(), action, filter_type);

        let done = Completion::new(&self.client_bus, FilterConfigRoute { client_id, filter_type });
        match spec {
            FilterSpec::Address { address, address_type } => {
                self.stack.address_filter(action, filter_index, address, address_type, done)
            }
            FilterSpec::ServiceData => self.stack.service_data_filter(action, filter_index, done),
            FilterSpec::ServiceUuid(condition) => {
                self.stack.uuid_filter(action, filter_index, condition, done)
            }
            FilterSpec::LocalName { pattern } => {
                self.stack.local_name_filter(action, filter_index, pattern, done)
            }
            FilterSpec::ManufacturerData { company_id, company_id_mask, data, mask } => {
                self.stack.manufacturer_data_filter(action, filter_index, company_id,
                                                    company_id_mask, data, mask, done)
            }
            FilterSpec::ServiceDataPattern { data, mask } => {
                self.stack.service_data_pattern_filter(action, filter_index, data, mask, done)
            }
        }
    }

    #[named]
    fn scan_filter_clear(&self, client_id: ScannerId, filter_index: u8) {
        trace!("{}: filter_index: {}", function_name!(), filter_index);
        let done = Completion::new(&self.client_bus,
                                   FilterConfigRoute { client_id, filter_type: FilterType::All });
        self.stack.clear_filters(filter_index, done);
    }

    #[named]
    fn scan_filter_enable(&self, client_id: ScannerId, enable: bool) {
        trace!("{}: enable: {}", function_name!(), enable);
        let done = Completion::new(&self.client_bus, FilterStatusRoute { client_id });
        self.stack.enable_filter_feature(enable, done);
    }

    #[named]
    fn set_scan_parameters(&self, client_id: ScannerId, scan_interval: u32, scan_window: u32) {
        trace!("{}: interval: {}, window: {}", function_name!(), scan_interval, scan_window);
        let done = Completion::new(&self.client_bus, ScanParamRoute { client_id });
        self.stack.set_scan_params(client_id, scan_interval, scan_window, done);
    }

    #[named]
    fn batchscan_config_storage(&self, client_id: ScannerId, full_max: u8, trunc_max: u8,
                                notify_threshold: u8) {
        trace!("{}: full_max: {}, trunc_max: {}, notify_threshold: {}",
               function_name!(), full_max, trunc_max, notify_threshold);
        let done = Completion::new(&self.client_bus, BatchStorageRoute { client_id });
        self.stack.set_batch_storage_config(full_max, trunc_max, notify_threshold, client_id,
                                            done, self.sink(self.seen.session()));
    }

    #[named]
    fn batchscan_enable(&self, client_id: ScannerId, params: BatchScanParams) {
        trace!("{}: {:?}", function_name!(), params);
        let done = Completion::new(&self.client_bus,
                                   BatchScanToggleRoute { client_id,
                                                          action: BatchScanAction::Enable });
        self.stack.enable_batch_scan(params, done);
    }

    #[named]
    fn batchscan_disable(&self, client_id: ScannerId) {
        trace!("{}: client_id: {}", function_name!(), client_id);
        let done = Completion::new(&self.client_bus,
                                   BatchScanToggleRoute { client_id,
                                                          action: BatchScanAction::Disable });
        self.stack.disable_batch_scan(done);
    }

    #[named]
    fn batchscan_read_reports(&self, client_id: ScannerId, scan_mode: BatchScanMode) {
        trace!("{}: scan_mode: {:?}", function_name!(), scan_mode);
        let done = Completion::new(&self.client_bus, BatchReportsRoute { client_id });
        self.stack.read_scan_reports(scan_mode, done);
    }
}

pub(crate) struct ClientContext {
    pub(crate) processor: ScanResultProcessor,
    pub(crate) callbacks: Arc<dyn ScannerCallbacks>,
}

impl ClientContext {
    pub(crate) async fn run(self, messages: mpsc::UnboundedReceiver<ClientMessage>) {
        trace!("Starting client context task");

        let stream = tokio_stream::wrappers::UnboundedReceiverStream::new(messages);
        tokio::pin!(stream);
        while let Some(message) = stream.next().await {
            match message {
                ClientMessage::Registered { on_registered, scanner_id, status } => {
                    if status.is_success() {
                        trace!("Scanner {} registered", scanner_id);
                    } else {
                        warn!("Scanner registration failed: {}", status);
                    }
                    on_registered(scanner_id, status);
                }
                ClientMessage::ScanResult(raw) => {
                    let result = self.processor.process(raw);
                    self.callbacks.on_event(Event::ScanResult(result));
                }
                ClientMessage::Deliver(event) => self.callbacks.on_event(event),
                ClientMessage::Shutdown => break,
            }
        }

        trace!("Exiting client context task");
    }
}
