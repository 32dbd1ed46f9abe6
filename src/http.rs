//! HTTP/1.0 framing for the raw TCP client used by the uplink and OTA
//! downloads.

use core::fmt::Write;

use embedded_io_async::Read;
use heapless::String;

use crate::error::TransportError;
use crate::traits::HttpResponse;

pub const REQUEST_HEAD_CAPACITY: usize = 512;

/// `http://host[:port]/path` split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Url<'a> {
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

impl<'a> Url<'a> {
    pub fn parse(url: &'a str) -> Result<Self, TransportError> {
        let rest = url
            .strip_prefix("http://")
            .ok_or(TransportError::InvalidUrl)?;
        let (authority, path) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>().map_err(|_| TransportError::InvalidUrl)?,
            ),
            None => (authority, 80),
        };
        if host.is_empty() {
            return Err(TransportError::InvalidUrl);
        }
        Ok(Self { host, port, path })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<usize>,
    /// Bytes up to and including the blank line.
    pub header_len: usize,
}

pub fn request_head(
    method: &str,
    url: &Url<'_>,
    headers: &[(&str, &str)],
    content_length: Option<usize>,
) -> Result<String<REQUEST_HEAD_CAPACITY>, TransportError> {
    let mut head = String::new();
    let overflow = |_| TransportError::RequestTooLarge;
    write!(head, "{method} {} HTTP/1.0\r\nHost: {}\r\n", url.path, url.host).map_err(overflow)?;
    for (name, value) in headers {
        write!(head, "{name}: {value}\r\n").map_err(overflow)?;
    }
    if let Some(len) = content_length {
        write!(head, "Content-Length: {len}\r\n").map_err(overflow)?;
    }
    head.push_str("\r\n").map_err(|_| TransportError::RequestTooLarge)?;
    Ok(head)
}

/// Parses the status line and `Content-Length` once the blank line is in
/// `buf`; `Ok(None)` means more bytes are needed.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<ResponseHead>, TransportError> {
    let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Ok(None);
    };
    let head = core::str::from_utf8(&buf[..end]).map_err(|_| TransportError::InvalidResponse)?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().ok_or(TransportError::InvalidResponse)?;
    let mut parts = status_line.split(' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(TransportError::InvalidResponse);
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or(TransportError::InvalidResponse)?;

    let mut content_length = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = Some(
                    value
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| TransportError::InvalidResponse)?,
                );
            }
        }
    }

    Ok(Some(ResponseHead {
        status,
        content_length,
        header_len: end + 4,
    }))
}

/// Reads from `socket` until the response head is complete. Returns the head
/// and the number of bytes of `buf` filled so far, body bytes included.
pub async fn read_response_head<R: Read>(
    socket: &mut R,
    buf: &mut [u8],
) -> Result<(ResponseHead, usize), TransportError> {
    let mut filled = 0;
    loop {
        if filled == buf.len() {
            return Err(TransportError::InvalidResponse);
        }
        let n = socket
            .read(&mut buf[filled..])
            .await
            .map_err(|_| TransportError::Io)?;
        if n == 0 {
            return Err(TransportError::InvalidResponse);
        }
        filled += n;
        if let Some(head) = parse_response_head(&buf[..filled])? {
            return Ok((head, filled));
        }
    }
}

/// Reads a whole response into `buf`, leaving only the body in it. The body
/// ends at `Content-Length` or when the peer closes.
pub async fn read_response<R: Read>(
    socket: &mut R,
    buf: &mut [u8],
) -> Result<HttpResponse, TransportError> {
    let (head, filled) = read_response_head(socket, buf).await?;
    buf.copy_within(head.header_len..filled, 0);
    let mut body_len = filled - head.header_len;

    while head.content_length.is_none_or(|len| body_len < len) {
        if body_len == buf.len() {
            return Err(TransportError::InvalidResponse);
        }
        let n = socket
            .read(&mut buf[body_len..])
            .await
            .map_err(|_| TransportError::Io)?;
        if n == 0 {
            break;
        }
        body_len += n;
    }

    Ok(HttpResponse {
        status: head.status,
        body_len: head.content_length.map_or(body_len, |len| len.min(body_len)),
    })
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;
    use embedded_io_async::{ErrorKind, ErrorType};

    use super::*;

    /// Serves `data` in chunks of at most `chunk` bytes, then EOF.
    struct ChunkedReader<'a> {
        data: &'a [u8],
        chunk: usize,
    }

    impl ErrorType for ChunkedReader<'_> {
        type Error = ErrorKind;
    }

    impl Read for ChunkedReader<'_> {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let n = self.data.len().min(self.chunk).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn body_is_moved_to_buffer_start() {
        let mut socket = ChunkedReader {
            data: b"HTTP/1.1 200 OK\r\nContent-Length: 16\r\n\r\n{\"limits\":null}\ntrailing",
            chunk: 7,
        };
        let mut buf = [0u8; 128];
        let response = block_on(read_response(&mut socket, &mut buf)).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&buf[..response.body_len], b"{\"limits\":null}\n");
    }

    #[test]
    fn body_without_length_runs_to_eof() {
        let mut socket = ChunkedReader {
            data: b"HTTP/1.0 503 Service Unavailable\r\n\r\nbusy",
            chunk: 64,
        };
        let mut buf = [0u8; 128];
        let response = block_on(read_response(&mut socket, &mut buf)).unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(&buf[..response.body_len], b"busy");
    }

    #[test]
    fn oversized_response_is_rejected() {
        let mut socket = ChunkedReader {
            data: b"HTTP/1.0 200 OK\r\n\r\n0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
            chunk: 64,
        };
        let mut buf = [0u8; 40];
        assert_eq!(
            block_on(read_response(&mut socket, &mut buf)),
            Err(TransportError::InvalidResponse)
        );
    }

    #[test]
    fn connection_closed_before_head() {
        let mut socket = ChunkedReader {
            data: b"HTTP/1.0 200",
            chunk: 64,
        };
        let mut buf = [0u8; 64];
        assert_eq!(
            block_on(read_response(&mut socket, &mut buf)),
            Err(TransportError::InvalidResponse)
        );
    }

    #[test]
    fn url_with_port_and_path() {
        assert_eq!(
            Url::parse("http://10.0.0.2:8080/api/measurements"),
            Ok(Url {
                host: "10.0.0.2",
                port: 8080,
                path: "/api/measurements"
            })
        );
    }

    #[test]
    fn url_defaults() {
        assert_eq!(
            Url::parse("http://collector.local"),
            Ok(Url {
                host: "collector.local",
                port: 80,
                path: "/"
            })
        );
    }

    #[test]
    fn unsupported_urls() {
        assert_eq!(Url::parse("https://collector/"), Err(TransportError::InvalidUrl));
        assert_eq!(Url::parse("http://:80/"), Err(TransportError::InvalidUrl));
        assert_eq!(Url::parse("http://host:http/"), Err(TransportError::InvalidUrl));
    }

    #[test]
    fn post_head_lists_headers_and_length() {
        let url = Url::parse("http://collector:8080/api/measurements").unwrap();
        let head = request_head(
            "POST",
            &url,
            &[("Content-Type", "application/json"), ("Version", "0.1.0")],
            Some(17),
        )
        .unwrap();
        assert_eq!(
            head.as_str(),
            "POST /api/measurements HTTP/1.0\r\nHost: collector\r\nContent-Type: application/json\r\nVersion: 0.1.0\r\nContent-Length: 17\r\n\r\n"
        );
    }

    #[test]
    fn oversized_header_value_is_request_too_large() {
        let url = Url::parse("http://collector/api/measurements").unwrap();
        let version = "9".repeat(REQUEST_HEAD_CAPACITY);
        assert_eq!(
            request_head("POST", &url, &[("Version", &version)], Some(17)),
            Err(TransportError::RequestTooLarge)
        );
    }

    #[test]
    fn response_head_needs_blank_line() {
        assert_eq!(parse_response_head(b"HTTP/1.1 200 OK\r\nContent-Le"), Ok(None));
    }

    #[test]
    fn response_head_with_length() {
        let raw = b"HTTP/1.1 200 OK\r\ncontent-length: 42\r\nServer: x\r\n\r\n{\"limits\"";
        assert_eq!(
            parse_response_head(raw),
            Ok(Some(ResponseHead {
                status: 200,
                content_length: Some(42),
                header_len: raw.len() - 9,
            }))
        );
    }

    #[test]
    fn response_head_rejects_garbage() {
        assert_eq!(
            parse_response_head(b"SSH-2.0-OpenSSH\r\n\r\n"),
            Err(TransportError::InvalidResponse)
        );
        assert_eq!(
            parse_response_head(b"HTTP/1.0 abc\r\n\r\n"),
            Err(TransportError::InvalidResponse)
        );
    }
}
