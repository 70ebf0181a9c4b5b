//! Input constraints applied before any text enters the pipeline.
//!
//! Names and chat messages are limited to ASCII letters, digits and spaces,
//! which also guarantees they can never carry the frame delimiter.

use std::net::IpAddr;

use crate::error::ValidationError;

fn is_safe_text(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ')
}

/// Validates a display name.
pub fn validate_name(name: &str) -> Result<&str, ValidationError> {
    if is_safe_text(name) {
        Ok(name)
    } else {
        Err(ValidationError::InvalidName(name.to_string()))
    }
}

/// Validates the text of a chat message.
pub fn validate_message(text: &str) -> Result<&str, ValidationError> {
    if is_safe_text(text) {
        Ok(text)
    } else {
        Err(ValidationError::InvalidMessage(text.to_string()))
    }
}

/// Parses a server address (IPv4 or IPv6 literal).
pub fn validate_address(address: &str) -> Result<IpAddr, ValidationError> {
    address
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidAddress(address.to_string()))
}

/// Parses a port in `1..=65535`.
pub fn validate_port(port: &str) -> Result<u16, ValidationError> {
    match port.trim().parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ValidationError::InvalidPort(port.to_string())),
    }
}

/// Parses a read buffer size (at least one byte).
pub fn validate_buffer_size(size: &str) -> Result<usize, ValidationError> {
    match size.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ValidationError::InvalidBufferSize(size.to_string())),
    }
}
