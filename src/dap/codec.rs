//! DAP wire framing
//!
//! Messages are framed with HTTP-style headers:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

// Upper bound on a single message body. Anything larger is a framing bug.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Read one framed message and return its JSON body
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, Error> {
    let len = read_content_length(reader).await?;

    if len > MAX_BODY_BYTES {
        return Err(Error::DapProtocol(format!(
            "Content-Length too large: {} bytes",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(eof_is_crash)?;

    String::from_utf8(body).map_err(|e| Error::DapProtocol(format!("invalid UTF-8: {}", e)))
}

/// Consume header lines up to the blank separator, returning Content-Length
async fn read_content_length<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<usize, Error> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(eof_is_crash)?;
        if n == 0 {
            return Err(Error::AdapterCrashed);
        }

        if line == "\r\n" || line == "\n" {
            break;
        }

        // Headers other than Content-Length (e.g. Content-Type) are ignored.
        if let Some(value) = line.trim().strip_prefix("Content-Length:") {
            let parsed = value.trim().parse().map_err(|_| {
                Error::DapProtocol(format!("invalid Content-Length: {}", value.trim()))
            })?;
            content_length = Some(parsed);
        }
    }

    content_length.ok_or_else(|| Error::DapProtocol("missing Content-Length header".to_string()))
}

/// Frame and write one message
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<(), Error> {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn eof_is_crash(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::AdapterCrashed
    } else {
        Error::Io(e)
    }
}
