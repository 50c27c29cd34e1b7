use std::fmt;

/// A status code describing the result of a call.
///
/// Non-positive values are reserved by the framework and exposed as the
/// associated constants below. Positive values are application-defined custom
/// codes created with [`Code::custom`]. Codes carry no ordering semantics;
/// two codes are either the same or they are not.
///
/// ```
/// # use trellis::Code;
/// let code = Code::custom(7);
/// assert_ne!(code, Code::NOT_FOUND);
/// assert_eq!(code.value(), 7);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(i32);

impl Code {
    /// The failure does not fit any other code, or its origin is unknown.
    pub const UNKNOWN: Code = Code(0);

    /// The client supplied an input message that is malformed or fails
    /// validation, regardless of system state.
    pub const INVALID_INPUT: Code = Code(-1);

    /// The system is not in a state required for the operation.
    pub const FAILED_PRECONDITION: Code = Code(-2);

    /// The request does not carry valid authentication credentials.
    pub const UNAUTHENTICATED: Code = Code(-3);

    /// The caller is not permitted to execute the operation.
    pub const PERMISSION_DENIED: Code = Code(-4);

    /// A requested entity was not found.
    pub const NOT_FOUND: Code = Code(-5);

    /// An entity the operation tried to create already exists.
    pub const ALREADY_EXISTS: Code = Code(-6);

    /// The operation was aborted, typically after a concurrency conflict or
    /// cancellation.
    pub const ABORTED: Code = Code(-7);

    /// A quota or resource has been exhausted.
    pub const RESOURCE_EXHAUSTED: Code = Code(-8);

    /// The service is temporarily unavailable; retrying may help.
    pub const UNAVAILABLE: Code = Code(-9);

    /// The operation is not implemented or not enabled.
    pub const NOT_IMPLEMENTED: Code = Code(-10);

    /// Creates an application-defined code.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not positive; the non-positive space is reserved.
    pub fn custom(value: i32) -> Code {
        assert!(
            value > 0,
            "custom codes must be positive, got {value}; non-positive codes are reserved",
        );
        Code(value)
    }

    /// Returns the raw numeric value of this code.
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Rebuilds a code from its wire representation. Unlike [`Code::custom`]
    /// this accepts any value, since the peer may speak a newer revision of
    /// the reserved space.
    pub(crate) const fn from_wire(value: i32) -> Code {
        Code(value)
    }

    /// The well-known name of a reserved code, if this is one.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "unknown",
            -1 => "invalid_input",
            -2 => "failed_precondition",
            -3 => "unauthenticated",
            -4 => "permission_denied",
            -5 => "not_found",
            -6 => "already_exists",
            -7 => "aborted",
            -8 => "resource_exhausted",
            -9 => "unavailable",
            -10 => "not_implemented",
            _ => return None,
        };
        Some(name)
    }

    /// The HTTP response status used when a call fails with this code.
    pub fn http_status(self) -> http::StatusCode {
        match self {
            Code::INVALID_INPUT | Code::FAILED_PRECONDITION => http::StatusCode::BAD_REQUEST,
            Code::UNAUTHENTICATED => http::StatusCode::UNAUTHORIZED,
            Code::PERMISSION_DENIED => http::StatusCode::FORBIDDEN,
            Code::NOT_FOUND => http::StatusCode::NOT_FOUND,
            Code::ALREADY_EXISTS | Code::ABORTED => http::StatusCode::CONFLICT,
            Code::RESOURCE_EXHAUSTED => http::StatusCode::TOO_MANY_REQUESTS,
            Code::NOT_IMPLEMENTED => http::StatusCode::NOT_IMPLEMENTED,
            Code::UNAVAILABLE => http::StatusCode::SERVICE_UNAVAILABLE,
            _ => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::Code;

    #[test]
    fn reserved_codes_have_names() {
        assert_eq!(Code::UNKNOWN.name(), Some("unknown"));
        assert_eq!(Code::NOT_IMPLEMENTED.name(), Some("not_implemented"));
        assert_eq!(Code::custom(12).name(), None);
    }

    #[test]
    fn display_renders_name_or_value() {
        assert_eq!(Code::INVALID_INPUT.to_string(), "invalid_input");
        assert_eq!(Code::custom(42).to_string(), "42");
    }

    #[test]
    #[should_panic(expected = "custom codes must be positive")]
    fn zero_custom_code_is_rejected() {
        Code::custom(0);
    }

    #[test]
    #[should_panic(expected = "custom codes must be positive")]
    fn negative_custom_code_is_rejected() {
        Code::custom(-3);
    }

    #[test]
    fn http_mapping() {
        assert_eq!(Code::INVALID_INPUT.http_status(), http::StatusCode::BAD_REQUEST);
        assert_eq!(Code::UNAUTHENTICATED.http_status(), http::StatusCode::UNAUTHORIZED);
        assert_eq!(Code::ABORTED.http_status(), http::StatusCode::CONFLICT);
        assert_eq!(Code::UNKNOWN.http_status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        // Custom and unrecognized codes fall back to 500.
        assert_eq!(Code::custom(9000).http_status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            Code::from_wire(-77).http_status(),
            http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
