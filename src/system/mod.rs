/// System module: validation of operator-supplied identifiers before they
/// reach an external command line.
use crate::error::AppError;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Device nodes (/dev/ttyUSB0, /dev/cu.usbserial-1420), COM ports,
    // \\.\COM10 and rfc2217://host:port URLs.
    static ref PORT_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_./:\\\-]+$").unwrap();
}

/// Validate a serial port identifier.
///
/// The port is always passed as a separate argument and never interpolated
/// into a shell string, but it is echoed back to the operator inside fallback
/// commands meant to be pasted into a shell, so shell metacharacters are
/// rejected outright.
pub fn validate_port(port: &str) -> Result<(), AppError> {
    if port.is_empty() {
        return Err(AppError::InvalidInput(
            "Serial port cannot be empty".to_string(),
        ));
    }

    if !PORT_PATTERN.is_match(port) {
        return Err(AppError::InvalidInput(format!(
            "Serial port contains invalid characters: {}. Only alphanumerics and . _ - / : \\ are allowed.",
            port
        )));
    }

    Ok(())
}
