//! Hex-string text transforms for callers that present payloads as hex
//! pairs. Pure functions, deliberately outside the session core.

#[derive(Debug, thiserror::Error)]
pub enum HexError {
    #[error("invalid hex character: {0:?}")]
    InvalidCharacter(char),

    #[error("hex decode failed: {0}")]
    Decode(#[from] hex::FromHexError),
}

/// Parse a hex string into bytes.
///
/// Input is uppercased, spaces between pairs are allowed and stripped, and
/// an odd digit count is left-padded with a zero ("ABC" reads as 0x0A 0xBC).
/// Any character that is not a hex digit or a space is rejected.
pub fn text_to_bytes(text: &str) -> Result<Vec<u8>, HexError> {
    let upper = text.to_uppercase();
    if let Some(bad) = upper.chars().find(|c| !c.is_ascii_hexdigit() && *c != ' ') {
        return Err(HexError::InvalidCharacter(bad));
    }

    let mut digits = upper.replace(' ', "");
    if digits.len() % 2 == 1 {
        digits.insert(0, '0');
    }

    Ok(hex::decode(&digits)?)
}

/// Render bytes as uppercase two-digit pairs joined by single spaces,
/// e.g. `[0x41, 0x0A]` becomes `"41 0A"`.
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
