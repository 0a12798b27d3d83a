//! `log::Log` sink backed by a fixed-capacity ring buffer, mirroring the
//! firmware's rolling log: a single writer (the foreground context)
//! appends formatted lines, and a periodic poller drains whatever's new
//! since its last read, detecting wrap instead of panicking on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{Log, Metadata, Record};

/// Returned by [`LogRing::drain_since`] when the requested cursor has
/// already been overwritten by the ring wrapping around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lagged {
    pub missed_bytes: u64,
}

pub struct LogRing {
    buf: Mutex<Vec<u8>>,
    capacity: usize,
    /// Monotonic count of bytes ever written; `write_pos % capacity` is the
    /// physical offset of the next write.
    write_pos: AtomicU64,
    level: log::LevelFilter,
}

impl LogRing {
    pub fn new(capacity: usize, level: log::LevelFilter) -> Self {
        Self {
            buf: Mutex::new(vec![0u8; capacity]),
            capacity,
            write_pos: AtomicU64::new(0),
            level,
        }
    }

    fn append(&self, line: &[u8]) {
        let mut buf = self.buf.lock().unwrap();
        for &b in line {
            let pos = self.write_pos.fetch_add(1, Ordering::SeqCst);
            let idx = (pos as usize) % self.capacity;
            buf[idx] = b;
        }
    }

    pub fn cursor(&self) -> u64 {
        self.write_pos.load(Ordering::SeqCst)
    }

    /// Returns all bytes written since `since`, oldest first, or `Err`
    /// with how many bytes were missed if the ring has already wrapped
    /// past `since`.
    pub fn drain_since(&self, since: u64) -> Result<(Vec<u8>, u64), Lagged> {
        let now = self.write_pos.load(Ordering::SeqCst);
        let available = now.saturating_sub(since);
        if available > self.capacity as u64 {
            let missed = available - self.capacity as u64;
            return Err(Lagged {
                missed_bytes: missed,
            });
        }

        let buf = self.buf.lock().unwrap();
        let mut out = Vec::with_capacity(available as usize);
        for i in 0..available {
            let pos = since + i;
            out.push(buf[(pos as usize) % self.capacity]);
        }
        Ok((out, now))
    }
}

impl Log for LogRing {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{:<5}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
        self.append(line.as_bytes());
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_everything_under_capacity() {
        let ring = LogRing::new(64, log::LevelFilter::Trace);
        ring.append(b"hello");
        let (data, cursor) = ring.drain_since(0).unwrap();
        assert_eq!(&data, b"hello");
        assert_eq!(cursor, 5);
    }

    #[test]
    fn wrap_past_cursor_reports_lagged() {
        let ring = LogRing::new(8, log::LevelFilter::Trace);
        ring.append(b"0123456789abcdef"); // 16 bytes into an 8-byte ring
        assert!(ring.drain_since(0).is_err());
    }
}
