//! Output sink for `puts`, `print` and `p`

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Shared buffer collecting console output
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    /// Output so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }

    /// Drain the buffer
    pub fn take(&self) -> String {
        let bytes = std::mem::take(&mut *self.bytes.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn clear(&self) {
        self.bytes.lock().clear();
    }
}

/// Where console output goes
#[derive(Debug, Clone, Default)]
pub enum Console {
    #[default]
    Stdout,
    Capture(CaptureBuffer),
}

impl Console {
    /// A capturing console and a handle to read what it captured
    pub fn capture() -> (Console, CaptureBuffer) {
        let buffer = CaptureBuffer::default();
        (Console::Capture(buffer.clone()), buffer)
    }

    pub fn write(
        &self,
        bytes: &[u8],
    ) {
        match self {
            Console::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(bytes);
                let _ = out.flush();
            }
            Console::Capture(buffer) => buffer.bytes.lock().extend_from_slice(bytes),
        }
    }
}
