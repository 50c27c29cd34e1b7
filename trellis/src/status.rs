use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use prost::Message as _;

use crate::code::Code;
use crate::error::BoxError;
use crate::wire;

/// The fixed message a client sees when a service implementation fails with
/// anything other than a [`Status`]. Arbitrary errors are never serialized;
/// their detail stays on the server as the status cause.
pub(crate) const REDACTED_MESSAGE: &str = "internal error";

const NO_MESSAGE_PLACEHOLDER: &str = "(no message)";

/// A structured, client-visible error describing why a call failed.
///
/// Values are created with [`Status::new`] or one of the per-code
/// constructors, optionally enriched with a typed detail payload and a
/// local-only diagnostic cause:
///
/// ```
/// # use trellis::{Code, Status};
/// let status = Status::not_found("no such profile");
/// assert_eq!(status.code(), Code::NOT_FOUND);
/// ```
///
/// A `Status` is the only channel for intentionally client-visible failure
/// detail: code, message and details cross the wire, while the cause never
/// leaves the process.
#[derive(Clone)]
pub struct Status {
    code: Code,
    message: String,
    details: Option<wire::Details>,
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl Status {
    /// Creates a new `Status` with the given code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Status {
        Status {
            code,
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    /// The failure does not fit any other code, or its origin is unknown.
    pub fn unknown(message: impl Into<String>) -> Status {
        Status::new(Code::UNKNOWN, message)
    }

    /// The client supplied a malformed or invalid input message.
    pub fn invalid_input(message: impl Into<String>) -> Status {
        Status::new(Code::INVALID_INPUT, message)
    }

    /// The system is not in a state required for the operation.
    pub fn failed_precondition(message: impl Into<String>) -> Status {
        Status::new(Code::FAILED_PRECONDITION, message)
    }

    /// The request does not carry valid authentication credentials.
    pub fn unauthenticated(message: impl Into<String>) -> Status {
        Status::new(Code::UNAUTHENTICATED, message)
    }

    /// The caller is not permitted to execute the operation.
    pub fn permission_denied(message: impl Into<String>) -> Status {
        Status::new(Code::PERMISSION_DENIED, message)
    }

    /// A requested entity was not found.
    pub fn not_found(message: impl Into<String>) -> Status {
        Status::new(Code::NOT_FOUND, message)
    }

    /// An entity the operation tried to create already exists.
    pub fn already_exists(message: impl Into<String>) -> Status {
        Status::new(Code::ALREADY_EXISTS, message)
    }

    /// The operation was aborted.
    pub fn aborted(message: impl Into<String>) -> Status {
        Status::new(Code::ABORTED, message)
    }

    /// A quota or resource has been exhausted.
    pub fn resource_exhausted(message: impl Into<String>) -> Status {
        Status::new(Code::RESOURCE_EXHAUSTED, message)
    }

    /// The service is temporarily unavailable.
    pub fn unavailable(message: impl Into<String>) -> Status {
        Status::new(Code::UNAVAILABLE, message)
    }

    /// The operation is not implemented or not enabled.
    pub fn not_implemented(message: impl Into<String>) -> Status {
        Status::new(Code::NOT_IMPLEMENTED, message)
    }

    /// Attaches a typed detail payload, serialized alongside code and
    /// message.
    ///
    /// # Panics
    ///
    /// Panics if details were already attached; a status carries at most one
    /// detail payload and attaching twice is a programming error.
    pub fn with_details<T>(mut self, details: &T) -> Status
    where
        T: crate::codec::Message + prost::Name,
    {
        assert!(
            self.details.is_none(),
            "status details already attached ({})",
            self.details.as_ref().map(|d| d.type_name.as_str()).unwrap_or_default(),
        );
        self.details = Some(wire::Details {
            type_name: T::full_name(),
            value: details.encode_to_vec(),
        });
        self
    }

    /// Attaches a diagnostic cause. The cause is local-only: it shows up in
    /// [`std::error::Error::source`] and debug output but is never
    /// serialized to the wire.
    ///
    /// # Panics
    ///
    /// Panics if a cause was already attached.
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Status {
        assert!(self.cause.is_none(), "status cause already attached");
        self.cause = Some(Arc::from(cause.into()));
        self
    }

    /// The code of this status.
    pub fn code(&self) -> Code {
        self.code
    }

    /// The human-readable message of this status.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The type name of the attached detail payload, if any.
    pub fn details_type(&self) -> Option<&str> {
        self.details.as_ref().map(|details| details.type_name.as_str())
    }

    /// Decodes the detail payload as `T`.
    ///
    /// Returns `Ok(None)` when no details are attached. A payload that is
    /// present but carries a different type, or fails to decode, is an
    /// error — distinct from absence, so callers can tell "nothing attached"
    /// from "attached but unreadable".
    pub fn details<T>(&self) -> Result<Option<T>, Status>
    where
        T: crate::codec::Message + prost::Name,
    {
        let Some(details) = &self.details else {
            return Ok(None);
        };
        if details.type_name != T::full_name() {
            return Err(Status::unknown(format!(
                "status details hold {}, not {}",
                details.type_name,
                T::full_name(),
            )));
        }
        T::decode(details.value.as_slice())
            .map(Some)
            .map_err(|err| Status::unknown(format!("malformed status details: {err}")))
    }

    /// The diagnostic cause, if one was attached.
    pub fn cause(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|cause| &**cause as _)
    }

    /// Serializes this status into its wire envelope. The cause is dropped.
    pub fn to_wire(&self) -> wire::Error {
        wire::Error {
            code: self.code.value(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }

    /// Rebuilds a status from its wire envelope.
    pub fn from_wire(error: wire::Error) -> Status {
        Status {
            code: Code::from_wire(error.code),
            message: error.message,
            details: error.details,
            cause: None,
        }
    }

    /// Converts a service implementation error into the status a client is
    /// allowed to see.
    ///
    /// A boxed [`Status`] passes through with code, message and details
    /// intact. Anything else becomes [`Code::UNKNOWN`] with a fixed,
    /// non-revealing message; the original error is kept as the local cause
    /// so operators still get the full picture.
    pub fn from_service_error(error: BoxError) -> Status {
        match error.downcast::<Status>() {
            Ok(status) => *status,
            Err(error) => Status::unknown(REDACTED_MESSAGE).with_cause(error),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = if self.message.is_empty() {
            NO_MESSAGE_PLACEHOLDER
        } else {
            self.message.as_str()
        };
        match &self.details {
            Some(details) => write!(f, "{} [{}]: {}", self.code, details.type_name, message),
            None => write!(f, "{}: {}", self.code, message),
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Skip the frequently empty fields to keep logs readable.
        let mut builder = f.debug_struct("Status");
        builder.field("code", &self.code);
        if !self.message.is_empty() {
            builder.field("message", &self.message);
        }
        if let Some(details) = &self.details {
            builder.field("details", &details.type_name);
        }
        if let Some(cause) = &self.cause {
            builder.field("cause", cause);
        }
        builder.finish()
    }
}

impl StdError for Status {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause()
    }
}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Status {
        use std::io::ErrorKind;
        let code = match err.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrInUse
            | ErrorKind::AddrNotAvailable => Code::UNAVAILABLE,
            ErrorKind::AlreadyExists => Code::ALREADY_EXISTS,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => Code::INVALID_INPUT,
            ErrorKind::NotFound => Code::NOT_FOUND,
            ErrorKind::PermissionDenied => Code::PERMISSION_DENIED,
            ErrorKind::TimedOut | ErrorKind::Interrupted => Code::ABORTED,
            _ => Code::UNKNOWN,
        };
        Status::new(code, err.to_string())
    }
}
