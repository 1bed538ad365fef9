//! STOMP frame codec.
//!
//! A frame is a command line, `key:value` header lines, a blank line, and a
//! body terminated by a NUL byte. Decoding never fails: malformed input
//! degrades to a frame with fewer headers or an empty body.

use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Byte that terminates every frame on the wire.
pub const FRAME_TERMINATOR: u8 = b'\0';

const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
    /// Any command word this codec does not know about.
    Other(String),
}

impl Command {
    pub fn parse(word: &str) -> Self {
        match word {
            "CONNECT" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "SEND" => Command::Send,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "DISCONNECT" => Command::Disconnect,
            other => Command::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
            Command::Other(word) => word,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message. Headers keep their wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.headers.push((key.into(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the value of the first header named `key`.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Renders the frame as wire text, including the trailing terminator.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(FRAME_TERMINATOR as char);
        out
    }

    /// Parses wire text into a frame. The terminator is optional.
    pub fn decode(raw: &str) -> Self {
        let raw = raw.trim_start_matches(LINE_ENDINGS);
        let raw = raw
            .strip_suffix(FRAME_TERMINATOR as char)
            .unwrap_or(raw);

        let (command_line, mut rest) = match raw.split_once('\n') {
            Some((line, rest)) => (line, rest),
            None => (raw, ""),
        };
        let command = Command::parse(command_line.trim_end_matches('\r'));

        let mut headers = Vec::new();
        loop {
            let (line, remainder) = match rest.split_once('\n') {
                Some(split) => split,
                None => (rest, ""),
            };
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                rest = remainder;
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.to_string(), value.to_string()));
            }
            rest = remainder;
            if rest.is_empty() {
                break;
            }
        }

        Self {
            command,
            headers,
            body: rest.to_string(),
        }
    }
}

/// Reads the next frame, skipping empty keep-alive gaps.
///
/// Returns `Ok(None)` once the peer closes the stream.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let bytes = reader.read_until(FRAME_TERMINATOR, &mut buf).await?;
        if bytes == 0 {
            return Ok(None);
        }

        // A frame cut off by EOF never got its terminator.
        if buf.pop() != Some(FRAME_TERMINATOR) {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&buf);
        if text.trim_start_matches(LINE_ENDINGS).is_empty() {
            continue;
        }

        return Ok(Some(Frame::decode(&text)));
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.encode().as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
