//! Incremental chat log tailer.
//!
//! Reads text appended to a log file since the last read. Chat logs are
//! UTF-16 (either byte order, with BOM) or UTF-8.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::error::WatcherError;

/// Text encoding of a log file, sniffed from its first two bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl Encoding {
    fn sniff(header: &[u8]) -> Self {
        match header {
            [0xFF, 0xFE, ..] => Self::Utf16Le,
            [0xFE, 0xFF, ..] => Self::Utf16Be,
            _ => Self::Utf8,
        }
    }
}

/// Per-file cursor that yields newly appended lines.
///
/// The file is opened and closed on every call; no handle is held between
/// reads.
#[derive(Debug)]
pub struct Tailer {
    path: PathBuf,
    /// `None` until primed or read.
    offset: Option<u64>,
    encoding: Option<Encoding>,
    /// Undecodable trailing bytes carried into the next read.
    pending: Vec<u8>,
}

impl Tailer {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: None,
            encoding: None,
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }

    #[must_use]
    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    async fn open(&self) -> Result<File, WatcherError> {
        File::open(&self.path)
            .await
            .map_err(|e| WatcherError::from_open(&self.path, e))
    }

    async fn ensure_encoding(&mut self, file: &mut File) -> Result<(), WatcherError> {
        if self.encoding.is_some() {
            return Ok(());
        }
        let mut header = [0u8; 2];
        let mut filled = 0;
        while filled < header.len() {
            let n = file.read(&mut header[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        // too short to tell; sniff again on the next call
        if filled == header.len() {
            self.encoding = Some(Encoding::sniff(&header));
        }
        Ok(())
    }

    /// Detect the encoding and move to end of file without reading history.
    ///
    /// An offset that is already set is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or inspected.
    pub async fn prime(&mut self) -> Result<(), WatcherError> {
        let mut file = self.open().await?;
        let len = file.metadata().await?.len();
        self.ensure_encoding(&mut file).await?;
        if self.offset.is_none() {
            self.offset = Some(len);
        }
        Ok(())
    }

    /// Read lines appended since the last call.
    ///
    /// An unprimed tailer reads from the start of the file. If the file
    /// shrank, reading restarts at offset 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub async fn read_new_lines(&mut self) -> Result<Vec<String>, WatcherError> {
        let mut file = self.open().await?;
        let len = file.metadata().await?.len();
        self.ensure_encoding(&mut file).await?;

        let mut offset = self.offset.unwrap_or(0);
        if len < offset {
            tracing::debug!(
                path = %self.path.display(),
                old_offset = offset,
                new_len = len,
                "Log file shrank, resetting offset to 0"
            );
            offset = 0;
            self.pending.clear();
        }

        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        self.offset = Some(offset + buf.len() as u64);

        let raw = if self.pending.is_empty() {
            buf
        } else {
            let mut raw = std::mem::take(&mut self.pending);
            raw.extend_from_slice(&buf);
            raw
        };

        let text = self.decode(&raw);
        Ok(text.lines().map(str::to_string).collect())
    }

    fn decode(&mut self, raw: &[u8]) -> String {
        match self.encoding.unwrap_or(Encoding::Utf8) {
            Encoding::Utf8 => {
                let keep = raw.len() - incomplete_utf8_suffix(raw);
                self.pending = raw[keep..].to_vec();
                String::from_utf8_lossy(&raw[..keep]).into_owned()
            }
            encoding @ (Encoding::Utf16Le | Encoding::Utf16Be) => {
                let mut units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|pair| match encoding {
                        Encoding::Utf16Be => u16::from_be_bytes([pair[0], pair[1]]),
                        _ => u16::from_le_bytes([pair[0], pair[1]]),
                    })
                    .collect();
                let mut keep = units.len() * 2;
                // a high surrogate waits for its pair
                if units.last().is_some_and(|u| (0xD800..0xDC00).contains(u)) {
                    units.pop();
                    keep -= 2;
                }
                self.pending = raw[keep..].to_vec();

                let text = String::from_utf16_lossy(&units);
                match text.strip_prefix('\u{feff}') {
                    Some(rest) => rest.to_string(),
                    None => text,
                }
            }
        }
    }
}

/// Length of an incomplete multi-byte sequence at the end of `bytes`.
fn incomplete_utf8_suffix(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}
