//! Small shared helpers

use std::sync::LazyLock;
use tracing::trace;

fn env_limit(var: &str, default: usize) -> usize {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

static BINARY_MAX_LINE: LazyLock<usize> =
    LazyLock::new(|| env_limit("ATVLINK_BINARY_MAX_LINE", 512));

static PROTOBUF_MAX_LINE: LazyLock<usize> =
    LazyLock::new(|| env_limit("ATVLINK_PROTOBUF_MAX_LINE", 512));

fn cropped_hex(data: &[u8], limit: usize) -> String {
    if data.len() * 2 <= limit {
        hex::encode(data)
    } else {
        format!("{}... ({} bytes)", hex::encode(&data[..limit / 2]), data.len())
    }
}

/// Trace a binary payload, hex-cropped to `ATVLINK_BINARY_MAX_LINE`.
pub fn log_binary(label: &str, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    trace!("{label}: {}", cropped_hex(data, *BINARY_MAX_LINE));
}

/// Trace a protobuf frame, hex-cropped to `ATVLINK_PROTOBUF_MAX_LINE`.
pub fn log_protobuf(label: &str, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    trace!("{label}: {}", cropped_hex(data, *PROTOBUF_MAX_LINE));
}
