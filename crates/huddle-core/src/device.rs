//! Device type reported in the handshake.

/// Reported when no known device token is found.
pub const UNKNOWN_DEVICE: &str = "unknown";

const DEVICE_TOKENS: &[&str] = &[
    "Android",
    "webOS",
    "iPhone",
    "iPad",
    "iPod",
    "BlackBerry",
    "IEMobile",
    "Opera Mini",
];

/// Detect the device type from a user-agent string.
///
/// Returns the leftmost known token, spelled as it appears in the input, or
/// `"unknown"`.
pub fn detect_device_type(user_agent: &str) -> String {
    let haystack = user_agent.to_ascii_lowercase();

    DEVICE_TOKENS
        .iter()
        .filter_map(|token| {
            haystack
                .find(&token.to_ascii_lowercase())
                .map(|start| (start, token.len()))
        })
        .min_by_key(|&(start, _)| start)
        .map(|(start, len)| user_agent[start..start + len].to_string())
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string())
}
