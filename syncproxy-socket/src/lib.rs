use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Single byte that terminates every frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Separator(u8);

impl Separator {
    pub const NEWLINE: Separator = Separator(b'\n');

    pub const fn new(byte: u8) -> Self {
        Self(byte)
    }

    pub const fn byte(self) -> u8 {
        self.0
    }

    /// Parse a separator given on the command line.
    ///
    /// Accepts one single-byte character, or one of the escapes `\n`, `\r`,
    /// `\t` and `\0`.
    pub fn parse(s: &str) -> Result<Self, SeparatorError> {
        match s {
            "\\n" => return Ok(Self(b'\n')),
            "\\r" => return Ok(Self(b'\r')),
            "\\t" => return Ok(Self(b'\t')),
            "\\0" => return Ok(Self(0)),
            _ => {}
        }

        let mut chars = s.chars();
        let Some(c) = chars.next() else {
            return Err(SeparatorError::Empty);
        };
        if chars.next().is_some() {
            return Err(SeparatorError::TooLong(s.to_string()));
        }
        if c.len_utf8() != 1 {
            return Err(SeparatorError::MultiByte(c));
        }
        Ok(Self(c as u8))
    }
}

impl Default for Separator {
    fn default() -> Self {
        Self::NEWLINE
    }
}

impl FromStr for Separator {
    type Err = SeparatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Separator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0 as char)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SeparatorError {
    #[error("separator must not be empty")]
    Empty,

    #[error("separator must be exactly one character, got '{0}'")]
    TooLong(String),

    #[error("separator '{0}' can not be used, only single byte separators are valid")]
    MultiByte(char),
}

/// Read one frame, without its separator.
///
/// Returns `Ok(None)` at end of stream. Bytes left over when the stream ends
/// without a trailing separator are returned as a final frame.
pub async fn read_frame_with_limit<R>(
    reader: &mut R,
    separator: Separator,
    max_bytes: usize,
) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((!frame.is_empty()).then_some(frame));
        }

        let end = available.iter().position(|&b| b == separator.byte());
        let chunk = match end {
            Some(pos) => &available[..pos],
            None => available,
        };
        if frame.len() + chunk.len() > max_bytes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "frame exceeds max length ({} > {})",
                    frame.len() + chunk.len(),
                    max_bytes
                ),
            ));
        }
        frame.extend_from_slice(chunk);

        let consumed = end.map_or(chunk.len(), |pos| pos + 1);
        reader.consume(consumed);
        if end.is_some() {
            return Ok(Some(frame));
        }
    }
}

pub async fn read_frame<R>(reader: &mut R, separator: Separator) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    read_frame_with_limit(reader, separator, DEFAULT_MAX_FRAME_BYTES).await
}

/// Write `frame` followed by the separator and flush.
pub async fn write_frame<W>(
    writer: &mut W,
    separator: Separator,
    frame: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.write_all(&[separator.byte()]).await?;
    writer.flush().await
}
