use std::fmt;

/// Machine-readable error codes for logs and CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    HostUnavailable,
    ConfigParseError,
    MessageNotFound,
    GatewayUnavailable,
    CallerRejected,
    MalformedBlob,
    StorageWriteFailed,
    LockContention,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::HostUnavailable => "E1001",
            Self::ConfigParseError => "E1002",
            Self::MessageNotFound => "E2001",
            Self::GatewayUnavailable => "E3001",
            Self::CallerRejected => "E3002",
            Self::MalformedBlob => "E3003",
            Self::StorageWriteFailed => "E5001",
            Self::LockContention => "E5002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::HostUnavailable => "Host event source unavailable",
            Self::ConfigParseError => "Config file parse error",
            Self::MessageNotFound => "Message not found",
            Self::GatewayUnavailable => "Persistence gateway unavailable",
            Self::CallerRejected => "Gateway caller rejected",
            Self::MalformedBlob => "Malformed persisted blob",
            Self::StorageWriteFailed => "Storage write failed",
            Self::LockContention => "Lock contention",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::HostUnavailable => {
                Some("The host integration point is missing; recall cannot start without it.")
            }
            Self::ConfigParseError => Some("Fix syntax in recall/config.toml and retry."),
            Self::MessageNotFound => None,
            Self::GatewayUnavailable => Some("Check that the store path is readable and writable."),
            Self::CallerRejected => {
                Some("Set storage.caller_id to the id listed in storage.allowed_caller.")
            }
            Self::MalformedBlob => {
                Some("The affected set was reset to empty; new messages will repopulate it.")
            }
            Self::StorageWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the other `recall` process releases its lock."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
