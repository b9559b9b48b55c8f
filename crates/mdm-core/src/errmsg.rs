use mdm_proto::ERRMSG_LEN;
use std::sync::{Mutex, PoisonError};

/// Fixed-capacity, NUL-terminated diagnostic message set by the boot agent.
pub struct DiagnosticMessage {
    buf: Mutex<[u8; ERRMSG_LEN]>,
}

impl Default for DiagnosticMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticMessage {
    pub const fn new() -> Self {
        Self {
            buf: Mutex::new([0; ERRMSG_LEN]),
        }
    }

    /// Replaces the message. Input longer than the buffer is truncated and the
    /// final byte is always NUL.
    pub fn set(&self, src: &[u8]) {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        buf.fill(0);
        let len = src.len().min(ERRMSG_LEN);
        buf[..len].copy_from_slice(&src[..len]);
        buf[ERRMSG_LEN - 1] = 0;
    }

    /// Message bytes up to the first NUL, or `None` when empty.
    pub fn get_bytes(&self) -> Option<Vec<u8>> {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        let len = buf.iter().position(|&b| b == 0).unwrap_or(ERRMSG_LEN);
        if len == 0 {
            return None;
        }
        Some(buf[..len].to_vec())
    }

    pub fn get(&self) -> Option<String> {
        self.get_bytes()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}
