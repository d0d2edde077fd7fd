/// Error code registry for flowprobe
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration and input errors
/// - 4000-4999: Execution errors
/// - 5000-5999: Observation and polling errors
/// - 9000-9999: Other errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_YAML: u16 = 1002;
    pub const CONFIG_INVALID_JSON: u16 = 1003;
    pub const CONFIG_INVALID_VALUE: u16 = 1004;
    pub const CONFIG_VALIDATION_FAILED: u16 = 1005;
    pub const CONFIG_INVALID_FIELD_PATH: u16 = 1006;
    pub const CONFIG_INVALID_PATTERN: u16 = 1007;

    // Execution errors (4000-4999)
    pub const EXEC_GENERIC: u16 = 4000;
    pub const EXEC_COMMAND_NOT_FOUND: u16 = 4001;
    pub const EXEC_TIMEOUT: u16 = 4002;
    pub const EXEC_SUBPROCESS_FAILED: u16 = 4003;
    pub const EXEC_LAUNCH_FAILED: u16 = 4004;
    pub const EXEC_CANCELLED: u16 = 4005;
    pub const EXEC_INVALID_COMMAND: u16 = 4006;
    pub const EXEC_TRIGGER_FAILED: u16 = 4007;
    pub const EXEC_IO_ERROR: u16 = 4008;

    // Observation errors (5000-5999)
    pub const OBSERVE_GENERIC: u16 = 5000;
    pub const OBSERVE_NO_MATCH: u16 = 5001;
    pub const OBSERVE_STOPPED: u16 = 5002;
    pub const OBSERVE_STREAM_ENDED: u16 = 5003;
    pub const OBSERVE_POLL_NO_MATCH: u16 = 5004;
    pub const OBSERVE_POLL_CANCELLED: u16 = 5005;
    pub const OBSERVE_VISIBILITY_NOT_APPLIED: u16 = 5006;
    pub const OBSERVE_NO_PODS: u16 = 5007;
    pub const OBSERVE_FIELD_NOT_FOUND: u16 = 5008;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
    pub const OTHER_UNEXPECTED: u16 = 9001;
    pub const OTHER_INTERNAL: u16 = 9004;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        // Configuration errors
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Invalid YAML syntax in configuration",
        1003 => "Invalid JSON syntax",
        1004 => "Invalid configuration value",
        1005 => "Configuration validation failed",
        1006 => "Invalid field path",
        1007 => "Invalid match pattern",

        // Execution errors
        4000 => "Generic execution error",
        4001 => "Command not found",
        4002 => "Command execution timeout",
        4003 => "Subprocess failed",
        4004 => "Command could not be launched",
        4005 => "Command execution cancelled",
        4006 => "Invalid command",
        4007 => "Trigger command failed",
        4008 => "I/O error while running a command",

        // Observation errors
        5000 => "Generic observation error",
        5001 => "No matching line before the deadline",
        5002 => "Observer stopped before a match",
        5003 => "Observed stream ended before a match",
        5004 => "Polled command never produced the expected output",
        5005 => "Polling cancelled",
        5006 => "Visibility annotation was not applied",
        5007 => "No pods matched the selector",
        5008 => "Field not found in line",

        // Other errors
        9000 => "Generic error",
        9001 => "Unexpected error",
        9004 => "Internal error",

        _ => "Unknown error code",
    }
}
