use crate::gpio::GpioError;
use core::fmt;
use mdm_proto::ProtoError;

pub type MdmResult<T> = Result<T, MdmError>;

/// Broad failure classes surfaced to callers of the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MdmErrorKind {
    /// A required line, interrupt or the control surface is unavailable.
    NotProvisioned,
    /// A bounded wait expired.
    Timeout,
    /// Unknown command or malformed value.
    InvalidArgument,
    /// Caller argument could not be read or written.
    TransferFault,
    /// The modem agent reported a failed boot or dump.
    Io,
    /// A blocking wait was interrupted by its caller.
    Interrupted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MdmError {
    kind: MdmErrorKind,
    message: Option<String>,
}

impl MdmError {
    pub const fn new(kind: MdmErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: MdmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub const fn kind(&self) -> MdmErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for MdmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {msg}", self.kind),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for MdmError {}

impl From<ProtoError> for MdmError {
    fn from(err: ProtoError) -> Self {
        MdmError::with_message(MdmErrorKind::InvalidArgument, err.to_string())
    }
}

impl From<GpioError> for MdmError {
    fn from(err: GpioError) -> Self {
        MdmError::with_message(MdmErrorKind::NotProvisioned, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = MdmError::with_message(MdmErrorKind::Timeout, "boot");
        assert_eq!(err.to_string(), "Timeout: boot");
        assert_eq!(MdmError::new(MdmErrorKind::Io).to_string(), "Io");
    }

    #[test]
    fn conversions_pick_kind() {
        let err = MdmError::from(ProtoError::InvalidType(0x12));
        assert_eq!(err.kind(), MdmErrorKind::InvalidArgument);
        let err = MdmError::from(GpioError::Unavailable(4));
        assert_eq!(err.kind(), MdmErrorKind::NotProvisioned);
        assert!(err.message().unwrap().contains('4'));
    }
}
