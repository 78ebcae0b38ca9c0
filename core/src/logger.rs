// Ring-buffer logging backend for vpnshim
//
// There is no console inside the hypervisor, so records are kept in memory
// until someone drains them. When full, the oldest entries are overwritten.

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

const MAX_LOG_ENTRIES: usize = 512;

/// Bytes of formatted text kept per entry; longer records are truncated.
pub const ENTRY_TEXT_LEN: usize = 120;

/// One captured log record.
#[derive(Clone, Copy)]
pub struct LogEntry {
    level: Level,
    len: u8,
    text: [u8; ENTRY_TEXT_LEN],
}

impl LogEntry {
    const EMPTY: LogEntry = LogEntry {
        level: Level::Trace,
        len: 0,
        text: [0; ENTRY_TEXT_LEN],
    };

    pub fn level(&self) -> Level {
        self.level
    }

    /// Formatted `target: message` text.
    pub fn text(&self) -> &str {
        let bytes = &self.text[..self.len as usize];
        // Truncation can split a code point; keep the valid prefix.
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.text())
    }
}

/// Truncating writer into an entry's text buffer.
struct EntryWriter<'a> {
    buf: &'a mut [u8; ENTRY_TEXT_LEN],
    len: usize,
}

impl Write for EntryWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = ENTRY_TEXT_LEN - self.len;
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

struct Ring {
    entries: [LogEntry; MAX_LOG_ENTRIES],
    // Total records written; the next write goes to `count % MAX_LOG_ENTRIES`.
    count: usize,
}

/// In-memory `log` backend.
pub struct RingLogger {
    ring: Mutex<Ring>,
}

impl RingLogger {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(Ring {
                entries: [LogEntry::EMPTY; MAX_LOG_ENTRIES],
                count: 0,
            }),
        }
    }

    fn push(&self, level: Level, args: fmt::Arguments<'_>, target: &str) {
        let mut entry = LogEntry::EMPTY;
        entry.level = level;
        let mut w = EntryWriter {
            buf: &mut entry.text,
            len: 0,
        };
        let _ = write!(w, "{}: {}", target, args);
        entry.len = w.len as u8;

        let mut ring = self.ring.lock();
        let idx = ring.count % MAX_LOG_ENTRIES;
        ring.entries[idx] = entry;
        ring.count += 1;
    }

    /// Iterate over all retained entries, oldest first.
    pub fn iter(&self) -> LogIterator<'_> {
        self.last_n(MAX_LOG_ENTRIES)
    }

    /// Iterate over the last `n` retained entries, oldest first.
    pub fn last_n(&self, n: usize) -> LogIterator<'_> {
        let total_count = self.ring.lock().count;
        let available = total_count.min(MAX_LOG_ENTRIES);
        let num_logs = n.min(available);

        LogIterator {
            logger: self,
            start_idx: (total_count - num_logs) % MAX_LOG_ENTRIES,
            current: 0,
            remaining: num_logs,
        }
    }

    pub fn count(&self) -> usize {
        self.ring.lock().count.min(MAX_LOG_ENTRIES)
    }

    pub fn total_count(&self) -> usize {
        self.ring.lock().count
    }
}

impl Default for RingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.push(record.level(), *record.args(), record.target());
        }
    }

    fn flush(&self) {}
}

/// Iterator over captured entries in chronological order.
pub struct LogIterator<'a> {
    logger: &'a RingLogger,
    start_idx: usize,
    current: usize,
    remaining: usize,
}

impl Iterator for LogIterator<'_> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let idx = (self.start_idx + self.current) % MAX_LOG_ENTRIES;
        self.current += 1;
        self.remaining -= 1;

        Some(self.logger.ring.lock().entries[idx])
    }
}

static LOGGER: RingLogger = RingLogger::new();

/// Install the ring buffer as the global `log` backend.
///
/// Returns `false` if another logger was installed first; the level is
/// applied either way.
pub fn init(level: LevelFilter) -> bool {
    let installed = log::set_logger(&LOGGER).is_ok();
    log::set_max_level(level);
    installed
}

pub fn get_logs_iter() -> LogIterator<'static> {
    LOGGER.iter()
}

/// Get the last N log entries (up to the ring capacity)
pub fn get_last_n_logs(n: usize) -> LogIterator<'static> {
    LOGGER.last_n(n)
}

pub fn log_count() -> usize {
    LOGGER.count()
}

pub fn total_log_count() -> usize {
    LOGGER.total_count()
}
