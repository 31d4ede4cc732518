//! Stack result codes and their translation into API statuses.

use std::fmt;

/// Result code reported by the radio stack when a primitive completes.
///
/// `Unknown` carries any raw code the stack reports that isn't listed here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StackStatus {
    Success,
    CmdStarted,
    Busy,
    NoResources,
    ModeUnsupported,
    IllegalValue,
    WrongMode,
    UnknownAddr,
    DeviceTimeout,
    BadValueRet,
    ErrProcessing,
    NotAuthorized,
    DevReset,
    CmdStored,
    IllegalAction,
    DelayCheck,
    ScoBadLength,
    SuccessNoSecurity,
    FailedOnSecurity,
    RepeatedAttempts,
    Mode4Level4NotSupported,
    Unknown(u8),
}

impl StackStatus {
    pub fn from_raw(raw: u8) -> StackStatus {
        match raw {
            0 => StackStatus::Success,
            1 => StackStatus::CmdStarted,
            2 => StackStatus::Busy,
            3 => StackStatus::NoResources,
            4 => StackStatus::ModeUnsupported,
            5 => StackStatus::IllegalValue,
            6 => StackStatus::WrongMode,
            7 => StackStatus::UnknownAddr,
            8 => StackStatus::DeviceTimeout,
            9 => StackStatus::BadValueRet,
            10 => StackStatus::ErrProcessing,
            11 => StackStatus::NotAuthorized,
            12 => StackStatus::DevReset,
            13 => StackStatus::CmdStored,
            14 => StackStatus::IllegalAction,
            15 => StackStatus::DelayCheck,
            16 => StackStatus::ScoBadLength,
            17 => StackStatus::SuccessNoSecurity,
            18 => StackStatus::FailedOnSecurity,
            19 => StackStatus::RepeatedAttempts,
            20 => StackStatus::Mode4Level4NotSupported,
            other => StackStatus::Unknown(other),
        }
    }
}

/// Closed set of statuses the client ever sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiStatus {
    Success,
    Started,
    Busy,
    Stored,
    NoResources,
    ModeUnsupported,
    IllegalValue,
    IncorrectState,
    UnknownAddress,
    DeviceTimeout,
    InvalidControllerOutput,
    SecurityError,
    DelayedEncryptionCheck,
    ErrorProcessing,
}

impl ApiStatus {
    pub fn as_raw(self) -> u8 {
        match self {
            ApiStatus::Success => 0,
            ApiStatus::Started => 1,
            ApiStatus::Busy => 2,
            ApiStatus::Stored => 3,
            ApiStatus::NoResources => 4,
            ApiStatus::ModeUnsupported => 5,
            ApiStatus::IllegalValue => 6,
            ApiStatus::IncorrectState => 7,
            ApiStatus::UnknownAddress => 8,
            ApiStatus::DeviceTimeout => 9,
            ApiStatus::InvalidControllerOutput => 10,
            ApiStatus::SecurityError => 11,
            ApiStatus::DelayedEncryptionCheck => 12,
            ApiStatus::ErrorProcessing => 13,
        }
    }

    pub fn is_success(self) -> bool {
        self == ApiStatus::Success
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<StackStatus> for ApiStatus {
    fn from(status: StackStatus) -> Self {
        translate(status)
    }
}

/// Maps a stack result code onto the API status the client sees.
///
/// Total: anything not explicitly grouped, including a generic processing
/// error, becomes `ErrorProcessing`.
pub fn translate(status: StackStatus) -> ApiStatus {
    match status {
        StackStatus::Success | StackStatus::SuccessNoSecurity => ApiStatus::Success,

        StackStatus::CmdStarted => ApiStatus::Started,

        StackStatus::Busy => ApiStatus::Busy,

        StackStatus::CmdStored => ApiStatus::Stored,

        StackStatus::NoResources => ApiStatus::NoResources,

        StackStatus::ModeUnsupported
        | StackStatus::WrongMode
        | StackStatus::Mode4Level4NotSupported => ApiStatus::ModeUnsupported,

        StackStatus::IllegalValue | StackStatus::ScoBadLength => ApiStatus::IllegalValue,

        StackStatus::UnknownAddr => ApiStatus::UnknownAddress,

        StackStatus::DeviceTimeout => ApiStatus::DeviceTimeout,

        StackStatus::FailedOnSecurity
        | StackStatus::RepeatedAttempts
        | StackStatus::NotAuthorized => ApiStatus::SecurityError,

        StackStatus::DevReset | StackStatus::IllegalAction => ApiStatus::IncorrectState,

        StackStatus::BadValueRet => ApiStatus::InvalidControllerOutput,

        StackStatus::DelayCheck => ApiStatus::DelayedEncryptionCheck,

        StackStatus::ErrProcessing | StackStatus::Unknown(_) => ApiStatus::ErrorProcessing,
    }
}
