//! Advertisement filter configuration and validation.
//!
//! Requests arrive in the flat shape the client API uses (a raw type tag
//! plus every possible argument) and are validated into a [`FilterSpec`]
//! before anything gets handed to the stack context. A request that fails
//! validation never reaches the stack and never produces a callback.

use std::convert::TryFrom;

use bitflags::bitflags;
use thiserror::Error;
use uuid::Uuid;

use crate::uuid::UuidMask;
use crate::{AddressType, DeviceAddress, ScannerId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Filter data and mask lengths differ ({data_len} vs {mask_len})")]
    MaskLengthMismatch { data_len: usize, mask_len: usize },

    #[error("Unknown filter type ({0})")]
    UnknownFilterType(u8),

    #[error("Unknown filter action ({0})")]
    UnknownAction(u8),

    #[error("Address filter without an address")]
    MissingAddress,

    #[error("UUID filter without a UUID")]
    MissingUuid,
}

/// Filter type tags as understood by the controller's packet filter.
///
/// `All` is only meaningful as the wildcard target of a clear.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterType {
    Address,
    ServiceData,
    ServiceUuid,
    ServiceSolicitationUuid,
    LocalName,
    ManufacturerData,
    ServiceDataPattern,
    All,
}

impl From<FilterType> for u8 {
    fn from(filter_type: FilterType) -> u8 {
        match filter_type {
            FilterType::Address => 0,
            FilterType::ServiceData => 1,
            FilterType::ServiceUuid => 2,
            FilterType::ServiceSolicitationUuid => 3,
            FilterType::LocalName => 4,
            FilterType::ManufacturerData => 5,
            FilterType::ServiceDataPattern => 6,
            FilterType::All => 7,
        }
    }
}

impl TryFrom<u8> for FilterType {
    type Error = FilterError;

    fn try_from(raw: u8) -> Result<Self, FilterError> {
        match raw {
            0 => Ok(FilterType::Address),
            1 => Ok(FilterType::ServiceData),
            2 => Ok(FilterType::ServiceUuid),
            3 => Ok(FilterType::ServiceSolicitationUuid),
            4 => Ok(FilterType::LocalName),
            5 => Ok(FilterType::ManufacturerData),
            6 => Ok(FilterType::ServiceDataPattern),
            7 => Ok(FilterType::All),
            _ => Err(FilterError::UnknownFilterType(raw)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterAction {
    Add,
    Delete,
    Clear,
}

impl From<FilterAction> for u8 {
    fn from(action: FilterAction) -> u8 {
        match action {
            FilterAction::Add => 0,
            FilterAction::Delete => 1,
            FilterAction::Clear => 2,
        }
    }
}

impl TryFrom<u8> for FilterAction {
    type Error = FilterError;

    fn try_from(raw: u8) -> Result<Self, FilterError> {
        match raw {
            0 => Ok(FilterAction::Add),
            1 => Ok(FilterAction::Delete),
            2 => Ok(FilterAction::Clear),
            _ => Err(FilterError::UnknownAction(raw)),
        }
    }
}

/// Which of the two UUID list fields a UUID filter matches against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UuidFilterKind {
    Service,
    Solicitation,
}

impl UuidFilterKind {
    pub fn filter_type(self) -> FilterType {
        match self {
            UuidFilterKind::Service => FilterType::ServiceUuid,
            UuidFilterKind::Solicitation => FilterType::ServiceSolicitationUuid,
        }
    }
}

/// How a condition combines with the other conditions of the same filter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterLogic {
    Or,
    And,
}

/// The UUID condition handed to the stack's UUID filter primitive.
///
/// `mask` is `None` when the client didn't supply one: the stack then
/// matches the UUID exactly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UuidCondition {
    pub kind: UuidFilterKind,
    pub uuid: Uuid,
    pub logic: FilterLogic,
    pub mask: Option<UuidMask>,
}

/// A filter add/delete/clear request in the client API's flat shape.
///
/// Only the fields relevant to `filter_type` are looked at.
#[derive(Clone, Debug)]
pub struct FilterRequest {
    pub client_id: ScannerId,
    pub action: FilterAction,
    pub filter_type: u8,
    pub filter_index: u8,
    pub company_id: u16,
    pub company_id_mask: u16,
    pub uuid: Option<Uuid>,
    pub uuid_mask: Option<Uuid>,
    pub address: Option<DeviceAddress>,
    pub address_type: AddressType,
    pub data: Vec<u8>,
    pub mask: Vec<u8>,
}

impl FilterRequest {
    pub fn new(client_id: ScannerId, action: FilterAction, filter_type: u8, filter_index: u8) -> Self {
        FilterRequest {
            client_id,
            action,
            filter_type,
            filter_index,
            company_id: 0,
            company_id_mask: 0,
            uuid: None,
            uuid_mask: None,
            address: None,
            address_type: AddressType::Public,
            data: vec![],
            mask: vec![],
        }
    }
}

/// A validated, type-specific filter condition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterSpec {
    Address {
        address: DeviceAddress,
        address_type: AddressType,
    },
    ServiceData,
    ServiceUuid(UuidCondition),
    LocalName {
        pattern: Vec<u8>,
    },
    ManufacturerData {
        company_id: u16,
        company_id_mask: u16,
        data: Vec<u8>,
        mask: Vec<u8>,
    },
    ServiceDataPattern {
        data: Vec<u8>,
        mask: Vec<u8>,
    },
}

impl FilterSpec {
    pub fn filter_type(&self) -> FilterType {
        match self {
            FilterSpec::Address { .. } => FilterType::Address,
            FilterSpec::ServiceData => FilterType::ServiceData,
            FilterSpec::ServiceUuid(condition) => condition.kind.filter_type(),
            FilterSpec::LocalName { .. } => FilterType::LocalName,
            FilterSpec::ManufacturerData { .. } => FilterType::ManufacturerData,
            FilterSpec::ServiceDataPattern { .. } => FilterType::ServiceDataPattern,
        }
    }
}

/// Validates a flat request and normalizes it into a [`FilterSpec`].
///
/// When both `data` and `mask` are non-empty they must be the same length.
/// The data and mask buffers are moved, not copied.
pub fn validate(request: FilterRequest) -> Result<FilterSpec, FilterError> {
    let FilterRequest { filter_type, address, address_type, uuid, uuid_mask,
                        company_id, company_id_mask, data, mask, .. } = request;

    if data.len() != mask.len() && !data.is_empty() && !mask.is_empty() {
        return Err(FilterError::MaskLengthMismatch { data_len: data.len(), mask_len: mask.len() });
    }

    let kind = match FilterType::try_from(filter_type)? {
        FilterType::Address => {
            let address = address.ok_or(FilterError::MissingAddress)?;
            return Ok(FilterSpec::Address { address, address_type });
        }
        FilterType::ServiceData => return Ok(FilterSpec::ServiceData),
        FilterType::ServiceUuid => UuidFilterKind::Service,
        FilterType::ServiceSolicitationUuid => UuidFilterKind::Solicitation,
        FilterType::LocalName => return Ok(FilterSpec::LocalName { pattern: data }),
        FilterType::ManufacturerData => {
            return Ok(FilterSpec::ManufacturerData { company_id, company_id_mask, data, mask });
        }
        FilterType::ServiceDataPattern => {
            return Ok(FilterSpec::ServiceDataPattern { data, mask });
        }
        // Only valid as a clear target
        FilterType::All => return Err(FilterError::UnknownFilterType(filter_type)),
    };

    let uuid = uuid.ok_or(FilterError::MissingUuid)?;
    let mask = uuid_mask.map(|mask| UuidMask::for_uuid(&uuid, &mask));
    Ok(FilterSpec::ServiceUuid(UuidCondition { kind, uuid, logic: FilterLogic::And, mask }))
}

bitflags! {
    /// Which filter conditions participate in a filter index
    pub struct FilterFeatures: u16 {
        const ADDRESS = 0x01;
        const SERVICE_DATA = 0x02;
        const SERVICE_UUID = 0x04;
        const SERVICE_SOLICITATION_UUID = 0x08;
        const LOCAL_NAME = 0x10;
        const MANUFACTURER_DATA = 0x20;
        const SERVICE_DATA_PATTERN = 0x40;
    }
}

/// When matching advertisements get reported
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    Immediate,
    /// Report on found/lost transitions, which also enables advertiser tracking
    OnFound,
    Batched,
}

/// Per filter-index parameters for the controller's packet filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterParams {
    pub feature_selection: FilterFeatures,
    pub list_logic_type: u16,
    pub filter_logic_type: u8,
    pub rssi_high_threshold: i8,
    pub rssi_low_threshold: i8,
    pub delivery_mode: DeliveryMode,
    pub found_timeout: u16,
    pub lost_timeout: u16,
    pub found_timeout_count: u8,
    pub num_tracking_entries: u16,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            feature_selection: FilterFeatures::empty(),
            list_logic_type: 0,
            filter_logic_type: 0,
            rssi_high_threshold: i8::MIN,
            rssi_low_threshold: i8::MIN,
            delivery_mode: DeliveryMode::Immediate,
            found_timeout: 0,
            lost_timeout: 0,
            found_timeout_count: 0,
            num_tracking_entries: 0,
        }
    }
}
