//! Streaming scanner over the top-level box sequence of a seekable input.
//!
//! The scanner reads only box headers (8 or 16 bytes); the caller decides
//! per entry whether to pull the payload into a buffer with
//! [`Scanner::read_body`] (ftyp/moov/moof) or let the next
//! [`Scanner::next_entry`] seek past it (mdat and other large payloads).

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use tracing::trace;

use crate::cursor::be_u32;
use crate::error::{Mp4Error, Result};
use crate::fourcc::FourCC;

/// One top-level box reported by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanEntry {
    /// Box type.
    pub kind: FourCC,
    /// Absolute file offset of the box header.
    pub offset: u64,
    /// Total box size including the header.
    pub size: u64,
    /// Header length: 8, or 16 with an extended size.
    pub header_len: u8,
}

impl ScanEntry {
    /// Payload size (total size minus header).
    pub fn data_size(&self) -> u64 {
        self.size - self.header_len as u64
    }
}

/// Pull-based scanner over the top-level boxes of a seekable input.
pub struct Scanner<R> {
    input: R,
    pos: u64,
    pending_body: u64,
}

impl<R: Read + Seek> Scanner<R> {
    pub fn new(input: R) -> Self {
        Scanner {
            input,
            pos: 0,
            pending_body: 0,
        }
    }

    /// Advance to the next top-level box.
    ///
    /// Returns `Ok(None)` at a clean EOF on a header boundary. An EOF in
    /// the middle of a header surfaces as [`Mp4Error::ShortRead`]; other
    /// I/O failures pass through unchanged. Any unread payload of the
    /// previous entry is seeked past first.
    pub fn next_entry(&mut self) -> Result<Option<ScanEntry>> {
        if self.pending_body > 0 {
            self.input.seek(SeekFrom::Current(self.pending_body as i64))?;
            self.pos += self.pending_body;
            self.pending_body = 0;
        }

        let offset = self.pos;
        let mut header = [0u8; 8];
        match read_fully(&mut self.input, &mut header)? {
            0 => return Ok(None),
            8 => {}
            n => {
                return Err(Mp4Error::ShortRead {
                    expected: 8,
                    actual: n,
                });
            }
        }

        let size32 = be_u32(&header, 0).unwrap_or(0);
        let kind = FourCC([header[4], header[5], header[6], header[7]]);

        let (size, header_len) = match size32 {
            1 => {
                let mut ext = [0u8; 8];
                let n = read_fully(&mut self.input, &mut ext)?;
                if n != 8 {
                    return Err(Mp4Error::ShortRead {
                        expected: 8,
                        actual: n,
                    });
                }
                (u64::from_be_bytes(ext), 16u8)
            }
            // Size 0: the box runs to the end of the file.
            0 => {
                let body_start = self.input.stream_position()?;
                let end = self.input.seek(SeekFrom::End(0))?;
                self.input.seek(SeekFrom::Start(body_start))?;
                (end - offset, 8)
            }
            n => (n as u64, 8u8),
        };

        if size < header_len as u64 {
            return Err(Mp4Error::InvalidBoxSize { kind, size });
        }

        trace!(%kind, offset, size, "scanned top-level box");

        self.pos = offset + header_len as u64;
        self.pending_body = size - header_len as u64;
        Ok(Some(ScanEntry {
            kind,
            offset,
            size,
            header_len,
        }))
    }

    /// Read the current entry's payload into `dst`.
    ///
    /// `dst` must not exceed the remaining payload; callers size it with
    /// [`ScanEntry::data_size`]. May be called with a shorter buffer to
    /// read a payload prefix; the remainder is skipped on the next
    /// [`Scanner::next_entry`].
    pub fn read_body(&mut self, dst: &mut [u8]) -> Result<()> {
        if dst.len() as u64 > self.pending_body {
            return Err(Mp4Error::ShortRead {
                expected: dst.len(),
                actual: self.pending_body as usize,
            });
        }
        self.input.read_exact(dst)?;
        self.pos += dst.len() as u64;
        self.pending_body -= dst.len() as u64;
        Ok(())
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
fn read_fully<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
