use std::fmt::Display;

use tokio::io::{ AsyncWrite, AsyncWriteExt };

pub const CRLF: &[u8] = b"\r\n";
pub const TERMINATOR: &[u8] = b".\r\n";

/// A reply ready to be put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok(String),
    Err(String),
    /// `+OK` status line, content lines, then the `.` terminator line.
    MultiLine {
        status: String,
        lines: Vec<Vec<u8>>,
    },
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Response::Ok(single_line(&message.into()))
    }

    /// Error replies always fit on one line, whatever the source message.
    pub fn err(message: impl Display) -> Self {
        Response::Err(single_line(&message.to_string()))
    }

    pub fn multi_line<I, L>(status: impl Into<String>, lines: I) -> Self
        where I: IntoIterator<Item = L>, L: Into<Vec<u8>>
    {
        Response::MultiLine {
            status: single_line(&status.into()),
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Renders the reply with CRLF line endings and dot-stuffing applied.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Response::Ok(message) => status_line(&mut out, "+OK", message),
            Response::Err(message) => status_line(&mut out, "-ERR", message),
            Response::MultiLine { status, lines } => {
                status_line(&mut out, "+OK", status);
                for line in lines {
                    stuff_line(&mut out, line);
                }
                out.extend_from_slice(TERMINATOR);
            }
        }
        out
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.encode()).await?;
        writer.flush().await
    }
}

fn single_line(message: &str) -> String {
    message.replace(&['\r', '\n'][..], " ").trim_end().to_string()
}

fn status_line(out: &mut Vec<u8>, status: &str, message: &str) {
    out.extend_from_slice(status.as_bytes());
    if !message.is_empty() {
        out.push(b' ');
        out.extend_from_slice(message.as_bytes());
    }
    out.extend_from_slice(CRLF);
}

/// Writes one content line, doubling a leading `.` (RFC 1939 section 3).
pub fn stuff_line(out: &mut Vec<u8>, line: &[u8]) {
    if line.first() == Some(&b'.') {
        out.push(b'.');
    }
    out.extend_from_slice(line);
    out.extend_from_slice(CRLF);
}

/// Reverses [`stuff_line`] for the body of a multi-line reply (everything
/// after the status line). Returns `None` when the terminator is missing.
pub fn unstuff(body: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut lines = Vec::new();
    let mut rest = body;

    while let Some(end) = find_crlf(rest) {
        let line = &rest[..end];
        rest = &rest[end + 2..];

        if line == b"." {
            return Some(lines);
        }
        let line = if line.first() == Some(&b'.') { &line[1..] } else { line };
        lines.push(line.to_vec());
    }

    None
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == CRLF)
}

/// Splits stored message content into lines. Both CRLF and bare LF are
/// accepted; a final line terminator does not produce an empty last line.
pub fn split_lines(content: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = content
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(&b"\r"[..]).unwrap_or(line))
        .collect();

    if content.is_empty() || content.ends_with(b"\n") {
        lines.pop();
    }
    lines
}

/// Lines sent by `TOP`: the header block up to and including the first empty
/// line, followed by at most `body_lines` lines of the body.
pub fn top_lines(content: &[u8], body_lines: usize) -> Vec<&[u8]> {
    let lines = split_lines(content);
    let header_end = lines
        .iter()
        .position(|line| line.is_empty())
        .map(|blank| blank + 1)
        .unwrap_or(lines.len());

    let end = header_end.saturating_add(body_lines).min(lines.len());
    lines[..end].to_vec()
}
