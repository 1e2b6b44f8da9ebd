//! Line-ending helpers.

/// Line ending of the host platform, appended by `write_line`/`append_line`.
#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";

/// Line ending of the host platform, appended by `write_line`/`append_line`.
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

/// Split text on `\n` and `\r\n`.
///
/// Text ending in a line ending produces a trailing empty element, and empty
/// text produces a single empty element.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

/// Append [`LINE_ENDING`] unless `text` already ends with it.
pub fn ensure_line_ending(mut text: String) -> String {
    if !text.ends_with(LINE_ENDING) {
        text.push_str(LINE_ENDING);
    }
    text
}

/// Byte-level counterpart of [`ensure_line_ending`].
pub fn ensure_line_ending_bytes(mut bytes: Vec<u8>) -> Vec<u8> {
    if !bytes.ends_with(LINE_ENDING.as_bytes()) {
        bytes.extend_from_slice(LINE_ENDING.as_bytes());
    }
    bytes
}
