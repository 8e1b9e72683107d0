//! Headware Helmet Protocol
//!
//! Fixed identifiers and message conventions for Headware smart helmets.
//! The helmet exposes one service with a single read/notify characteristic;
//! everything it sends is an opaque byte string that callers may interpret
//! by textual prefix.

use anyhow::Result;
use uuid::Uuid;

/// Helmet BLE service UUID (16-bit 0xFFF0 in the Bluetooth base range).
pub const HELMET_SERVICE_UUID: &str = "0000fff0-0000-1000-8000-00805f9b34fb";

/// Read/notify characteristic carrying helmet status traffic.
pub const HELMET_DATA_CHAR_UUID: &str = "0000180a-0000-1000-8000-00805f9b34fb";

/// Advertising name prefix of Headware helmets (case-sensitive).
pub const HELMET_NAME_PREFIX: &str = "HEADWARE";

/// Textual prefix the helmet puts on UI-bound status notifications.
pub const UI_MESSAGE_PREFIX: &str = "ui";

/// Caller-side reading of an inbound payload. The manager relays raw
/// bytes; this convention is applied by whoever consumes the events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// UTF-8 text starting with [`UI_MESSAGE_PREFIX`].
    Ui(String),
    /// Anything else; bytes pass through untouched.
    Opaque,
}

pub fn classify_inbound(payload: &[u8]) -> InboundKind {
    match std::str::from_utf8(payload) {
        Ok(text) if text.starts_with(UI_MESSAGE_PREFIX) => InboundKind::Ui(text.to_string()),
        _ => InboundKind::Opaque,
    }
}

/// Parse a UUID string, expanding 16-bit Bluetooth SIG shorthand ("fff0")
/// over the base UUID.
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    if uuid_str.len() == 4 && uuid_str.chars().all(|c| c.is_ascii_hexdigit()) {
        let expanded = format!("0000{uuid_str}-0000-1000-8000-00805f9b34fb");
        return Ok(Uuid::parse_str(&expanded)?);
    }
    Ok(Uuid::parse_str(uuid_str)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid() {
        let uuid = parse_uuid(HELMET_SERVICE_UUID).unwrap();
        assert_eq!(uuid.as_u128() >> 96, 0x0000fff0);
    }

    #[test]
    fn test_parse_uuid_shorthand() {
        assert_eq!(
            parse_uuid("fff0").unwrap(),
            parse_uuid(HELMET_SERVICE_UUID).unwrap()
        );
        assert_eq!(
            parse_uuid("180a").unwrap(),
            parse_uuid(HELMET_DATA_CHAR_UUID).unwrap()
        );
    }

    #[test]
    fn test_parse_uuid_rejects_garbage() {
        assert!(parse_uuid("not-a-uuid").is_err());
        assert!(parse_uuid("fff").is_err());
    }

    #[test]
    fn test_classify_inbound() {
        assert_eq!(
            classify_inbound(b"ui:overheat"),
            InboundKind::Ui("ui:overheat".to_string())
        );
        assert_eq!(classify_inbound(&[0x01, 0x02, 0xff]), InboundKind::Opaque);
        // prefix match is case-sensitive
        assert_eq!(classify_inbound(b"UI:overheat"), InboundKind::Opaque);
    }
}
