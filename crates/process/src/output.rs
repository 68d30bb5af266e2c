//! Splits raw process output into lines.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Adapts a byte stream into discrete lines handed to a consumer.
///
/// Lines are terminated by `\n`; a preceding `\r` is stripped as well. A
/// trailing line without terminator is emitted once the stream ends. Invalid
/// UTF-8 is replaced rather than rejected.
pub struct LoggingOutputStream<F>
where
    F: FnMut(String),
{
    consumer: F,
}

impl<F> LoggingOutputStream<F>
where
    F: FnMut(String),
{
    /// Creates a stream forwarding every complete line to `consumer`.
    pub const fn new(consumer: F) -> Self {
        Self { consumer }
    }

    /// Reads `reader` to the end, emitting lines as they complete.
    ///
    /// # Errors
    ///
    /// Returns the first read error. Lines completed before the error have
    /// already been emitted; the partial remainder is discarded.
    pub async fn pump<R>(mut self, reader: R) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();

        while reader.read_until(b'\n', &mut line).await? > 0 {
            self.emit(&line);
            line.clear();
        }

        Ok(())
    }

    fn emit(&mut self, line: &[u8]) {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        (self.consumer)(String::from_utf8_lossy(line).into_owned());
    }
}
