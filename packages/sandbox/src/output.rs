// ABOUTME: Output sinks for demultiplexed container streams
// ABOUTME: Serializes concurrent producers that share one destination

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Boxed byte sink for captured container output.
pub type OutputWriter = Box<dyn Write + Send>;

/// Clone-able writer that serializes access to a shared destination.
///
/// Each write takes the lock, writes the whole buffer, and flushes before
/// releasing, so chunks from concurrent producers land atomically and in
/// per-producer order. Installed for both streams when standard output
/// and standard error are configured to the same destination.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<OutputWriter>>,
}

impl SharedWriter {
    pub fn new(writer: OutputWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(buf)?;
        writer.flush()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut writer = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        writer.flush()
    }
}

/// Fallback sink for unset destinations.
pub(crate) fn discard() -> OutputWriter {
    Box::new(io::sink())
}
