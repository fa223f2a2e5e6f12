/// Bytes rendered before a log field is elided.
const MAX_LOGGED_BYTES: usize = 64;

/// Formats bytes as uppercase hexadecimal pairs for log fields.
///
/// Payloads longer than 64 bytes are cut off with a count of the remainder.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_owned();
    }

    let shown = &bytes[..bytes.len().min(MAX_LOGGED_BYTES)];
    let rendered = shown
        .iter()
        .map(|value| hex::encode_upper([*value]))
        .collect::<Vec<_>>()
        .join(" ");

    match bytes.len() - shown.len() {
        0 => rendered,
        hidden => format!("{rendered} .. (+{hidden} bytes)"),
    }
}
