//! Rendering of device diagnostic bytes for the operator log.

use tracing::info;

/// Accumulates device text and emits it line by line.
///
/// Printable ASCII is kept as characters; anything else is shown as
/// `0xNN`.
#[derive(Debug, Default)]
pub struct DeviceText {
    line: String,
}

impl DeviceText {
    pub fn push(&mut self, byte: u8) {
        match byte {
            b'\n' => self.flush(),
            b'\r' => {}
            0x20..=0x7E | b'\t' => self.line.push(byte as char),
            _ => {
                if !self.line.is_empty() && !self.line.ends_with(' ') {
                    self.line.push(' ');
                }
                self.line.push_str(&format!("0x{byte:02x} "));
            }
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }

    /// Emit whatever is buffered.
    pub fn flush(&mut self) {
        if let Some(line) = self.take() {
            info!(target: "device", "DEVICE: {line}");
        }
    }

    /// The buffered line, if any, leaving the buffer empty.
    pub fn take(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.line);
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }
}
