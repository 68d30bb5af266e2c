//! Bounded in-memory buffer of recent process output.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Default number of lines retained per stream.
pub const DEFAULT_LOGS_CAPACITY: usize = 500;

/// The output stream a line was read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogStream {
    /// Standard output.
    Stdout,

    /// Standard error.
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

struct Buffers {
    stdout: VecDeque<String>,
    stderr: VecDeque<String>,
}

impl Buffers {
    const fn stream_mut(&mut self, stream: LogStream) -> &mut VecDeque<String> {
        match stream {
            LogStream::Stdout => &mut self.stdout,
            LogStream::Stderr => &mut self.stderr,
        }
    }
}

/// Ring buffer holding the most recent stdout and stderr lines of a process.
///
/// Each stream keeps at most `capacity` lines; once full, the oldest line of
/// that stream is evicted. Clones share the same underlying buffers, so the
/// cache can be handed to output pumps and readiness probes alike.
#[derive(Clone)]
pub struct LogsCache {
    buffers: Arc<Mutex<Buffers>>,
    capacity: usize,
}

impl LogsCache {
    /// Creates a cache retaining up to `capacity` lines per stream.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(Buffers {
                stdout: VecDeque::with_capacity(capacity),
                stderr: VecDeque::with_capacity(capacity),
            })),
            capacity,
        }
    }

    /// Maximum number of lines retained per stream.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a line to the given stream, evicting the oldest line if full.
    pub fn add(&self, stream: LogStream, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }

        let line = line.into();
        let mut buffers = self.buffers.lock();
        let buffer = buffers.stream_mut(stream);
        while buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }

    /// Appends raw bytes as a line, replacing invalid UTF-8 sequences.
    pub fn add_bytes(&self, stream: LogStream, bytes: &[u8]) {
        self.add(stream, String::from_utf8_lossy(bytes));
    }

    /// Snapshot of the retained stdout lines, oldest first.
    #[must_use]
    pub fn std_out(&self) -> Vec<String> {
        self.buffers.lock().stdout.iter().cloned().collect()
    }

    /// Snapshot of the retained stderr lines, oldest first.
    #[must_use]
    pub fn std_err(&self) -> Vec<String> {
        self.buffers.lock().stderr.iter().cloned().collect()
    }

    /// Snapshot of the given stream.
    #[must_use]
    pub fn lines(&self, stream: LogStream) -> Vec<String> {
        match stream {
            LogStream::Stdout => self.std_out(),
            LogStream::Stderr => self.std_err(),
        }
    }

    /// Drops every retained line.
    pub fn clear(&self) {
        let mut buffers = self.buffers.lock();
        buffers.stdout.clear();
        buffers.stderr.clear();
    }
}

impl Default for LogsCache {
    fn default() -> Self {
        Self::new(DEFAULT_LOGS_CAPACITY)
    }
}

impl fmt::Debug for LogsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffers = self.buffers.lock();
        f.debug_struct("LogsCache")
            .field("capacity", &self.capacity)
            .field("stdout", &buffers.stdout.len())
            .field("stderr", &buffers.stderr.len())
            .finish()
    }
}
