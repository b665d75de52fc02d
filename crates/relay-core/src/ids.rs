/// Builds a synthesized message id of the form `prefix_timestamp`.
///
/// Used when a raw message arrives without an assistant-issued id; the
/// resulting id is stable for the `(prefix, timestamp)` pair so repeated
/// normalization of the same raw input deduplicates cleanly.
pub fn synthesize_message_id(prefix: &str, timestamp_unix_ms: u64) -> String {
    format!("{prefix}_{timestamp_unix_ms}")
}
