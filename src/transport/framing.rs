//! Content-Length framing of router frames on a byte stream.
//!
//! Each frame is `Content-Length: N\r\n\r\n` followed by N bytes of JSON.

use super::RouterFrame;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const HEADER: &str = "Content-Length: ";

/// Largest frame body accepted from a peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Reads one frame; `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<RouterFrame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line_buffer = String::new();

    // ヘッダー行を読み取り (空行は読み飛ばす)
    let content_length = loop {
        line_buffer.clear();
        if reader.read_line(&mut line_buffer).await? == 0 {
            return Ok(None);
        }
        let header_line = line_buffer.trim();
        if header_line.is_empty() {
            continue;
        }
        let length = header_line
            .strip_prefix(HEADER)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Expected Content-Length header, got: {}", header_line),
                )
            })?
            .parse::<usize>()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid Content-Length"))?;
        break length;
    };
    if content_length > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame of {} bytes exceeds limit", content_length),
        ));
    }

    // 区切りの空行
    line_buffer.clear();
    reader.read_line(&mut line_buffer).await?;

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    let frame = serde_json::from_slice(&body).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, format!("Frame parse error: {}", e))
    })?;
    Ok(Some(frame))
}

pub async fn write_frame<W>(writer: &mut W, frame: &RouterFrame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(frame).map_err(|e| {
        io::Error::new(io::ErrorKind::Other, format!("Frame serialization error: {}", e))
    })?;
    let header = format!("{}{}\r\n\r\n", HEADER, body.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{RemoteEvent, RequestEvent};
    use crate::service::{MessageId, Payload, ProxyAddress, StubAddress};
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_frames_read_back_in_order() {
        let frames = vec![
            RouterFrame::Welcome { session: 3 },
            RouterFrame::RegisterStub {
                address: StubAddress::new("Chat", "main"),
            },
            RouterFrame::Event {
                event: RemoteEvent::Request(RequestEvent::new(
                    ProxyAddress::new("Chat", "main", "ui"),
                    StubAddress::new("Chat", "main"),
                    MessageId(0x1000),
                    1,
                    Payload::of("line one\nline two").unwrap(),
                )),
            },
        ];

        let mut buffer = Vec::new();
        for frame in &frames {
            write_frame(&mut buffer, frame).await.unwrap();
        }

        let mut reader = BufReader::new(buffer.as_slice());
        for expected in &frames {
            assert_eq!(read_frame(&mut reader).await.unwrap().as_ref(), Some(expected));
        }
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_header_rejected() {
        let mut reader = BufReader::new(&b"{\"type\":\"welcome\"}\r\n"[..]);
        let error = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let input = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_LEN + 1);
        let mut reader = BufReader::new(input.as_bytes());
        assert!(read_frame(&mut reader).await.is_err());
    }
}
