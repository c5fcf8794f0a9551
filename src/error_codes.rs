//! Error code constants
//!
//! Returned to the desktop shell as strings so the UI can localise the
//! "sync failed, will retry" message.

/// Remote API unreachable or answered with a non-success status
pub const ERR_TRANSPORT: &str = "ERR_TRANSPORT";

/// Local filesystem refused an operation
pub const ERR_FILESYSTEM: &str = "ERR_FILESYSTEM";

/// History or settings file could not be parsed
pub const ERR_CORRUPT_STATE: &str = "ERR_CORRUPT_STATE";

/// Remote entry names a path outside the download root
pub const ERR_INVALID_ENTRY: &str = "ERR_INVALID_ENTRY";

/// No user or download folder has been configured yet
pub const ERR_NOT_CONFIGURED: &str = "ERR_NOT_CONFIGURED";
