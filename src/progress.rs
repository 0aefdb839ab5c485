//! Progress reporting and range headers for chunked transfers.

use crate::error::{DriveError, Result};

/// Progress of a media download after a chunk has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes received so far.
    pub received: u64,
    /// Total size as reported by the service.
    pub total: u64,
}

impl DownloadProgress {
    /// Completed share as a whole percentage (0 to 100).
    ///
    /// An empty file counts as complete.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.received.min(self.total) * 100) / self.total) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.total
    }
}

/// A parsed `Content-Range` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Inclusive byte range, absent for `bytes */total`.
    pub range: Option<(u64, u64)>,
    /// Complete length, absent for `bytes a-b/*`.
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parse `bytes a-b/total`, `bytes */total` or `bytes a-b/*`.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || DriveError::InvalidResponse(format!("bad Content-Range: {:?}", value));

        let rest = value.trim().strip_prefix("bytes").ok_or_else(invalid)?.trim_start();
        let (range, total) = rest.split_once('/').ok_or_else(invalid)?;

        let range = match range.trim() {
            "*" => None,
            r => {
                let (start, end) = r.split_once('-').ok_or_else(invalid)?;
                let start: u64 = start.trim().parse().map_err(|_| invalid())?;
                let end: u64 = end.trim().parse().map_err(|_| invalid())?;
                if end < start {
                    return Err(invalid());
                }
                Some((start, end))
            }
        };

        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().map_err(|_| invalid())?),
        };

        Ok(Self { range, total })
    }
}

/// Parse the `Range: bytes=0-N` header of a `308 Resume Incomplete` reply.
///
/// Returns the offset of the next byte the service expects.
pub fn next_upload_offset(range_header: Option<&str>) -> Result<u64> {
    let Some(value) = range_header else {
        return Ok(0);
    };
    let end = value
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, end)| end.trim().parse::<u64>().ok())
        .ok_or_else(|| DriveError::InvalidResponse(format!("bad Range header: {:?}", value)))?;
    Ok(end + 1)
}
