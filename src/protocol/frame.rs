//! STOMP 1.2 frame codec
//!
//! Pure encode/decode functions for STOMP frames carried inside WebSocket
//! text messages. A single WebSocket message may hold several frames and
//! heart-beat EOLs, and a frame may be split across messages, so decoding goes
//! through the buffering [`FrameDecoder`].

use thiserror::Error;

/// Largest frame the decoder buffers before giving up on the stream
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// STOMP frame commands (client and server)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Result<Self, FrameError> {
        let command = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    /// CONNECT and CONNECTED frames carry raw header values (STOMP 1.2 §"Value Encoding")
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame codec errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FrameError {
    #[error("Unknown STOMP command: {0:?}")]
    UnknownCommand(String),
    #[error("Malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("Invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),
    #[error("Invalid content-length: {0:?}")]
    InvalidContentLength(String),
    #[error("Frame body is not terminated by NUL")]
    MissingTerminator,
    #[error("Frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
}

/// A single STOMP frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order; repeated names are allowed, the first one wins on lookup
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

    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_body<S: Into<String>>(mut self, body: S) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header value (first occurrence wins)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize the frame to its wire representation
    pub fn encode(&self) -> String {
        let escape_headers = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape_headers {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Output of the streaming decoder
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(Frame),
    Heartbeat,
}

/// Buffering decoder for frames arriving over a message stream
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text; returns every complete frame and heart-beat it closes
    pub fn push(&mut self, chunk: &str) -> Result<Vec<Decoded>, FrameError> {
        self.buffer.push_str(chunk);
        let mut decoded = Vec::new();

        loop {
            if self.buffer.starts_with('\n') {
                self.buffer.drain(..1);
                decoded.push(Decoded::Heartbeat);
                continue;
            }
            if self.buffer.starts_with("\r\n") {
                self.buffer.drain(..2);
                decoded.push(Decoded::Heartbeat);
                continue;
            }
            if self.buffer.is_empty() || self.buffer == "\r" {
                break;
            }

            match parse_frame(&self.buffer) {
                Ok(Some((frame, consumed))) => {
                    self.buffer.drain(..consumed);
                    decoded.push(Decoded::Frame(frame));
                }
                Ok(None) if self.buffer.len() > MAX_FRAME_SIZE => {
                    let size = self.buffer.len();
                    self.buffer.clear();
                    return Err(FrameError::FrameTooLarge {
                        size,
                        limit: MAX_FRAME_SIZE,
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    self.buffer.clear();
                    return Err(e);
                }
            }
        }

        Ok(decoded)
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Parse one frame from the front of `input`; `None` when more input is needed
fn parse_frame(input: &str) -> Result<Option<(Frame, usize)>, FrameError> {
    let mut pos = 0;

    let Some(line) = next_line(input, &mut pos) else {
        return Ok(None);
    };
    let command = Command::parse(line)?;
    let unescape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let Some(line) = next_line(input, &mut pos) else {
            return Ok(None);
        };
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if unescape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(v.clone()))
        })
        .transpose()?;

    let (body, consumed) = match content_length {
        Some(len) => {
            let end = pos
                .checked_add(len)
                .and_then(|n| n.checked_add(1))
                .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
            if len > MAX_FRAME_SIZE {
                return Err(FrameError::FrameTooLarge {
                    size: len,
                    limit: MAX_FRAME_SIZE,
                });
            }
            if input.len() < end {
                return Ok(None);
            }
            let body = input
                .get(pos..end - 1)
                .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
            if input.as_bytes()[end - 1] != 0 {
                return Err(FrameError::MissingTerminator);
            }
            (body, end)
        }
        None => {
            let Some(nul) = input[pos..].find('\0') else {
                return Ok(None);
            };
            (&input[pos..pos + nul], pos + nul + 1)
        }
    };

    let frame = Frame {
        command,
        headers,
        body: body.to_string(),
    };
    Ok(Some((frame, consumed)))
}

/// Read one EOL-terminated line (LF or CRLF) starting at `pos`
fn next_line<'a>(input: &'a str, pos: &mut usize) -> Option<&'a str> {
    let rest = &input[*pos..];
    let nl = rest.find('\n')?;
    *pos += nl + 1;
    Some(rest[..nl].strip_suffix('\r').unwrap_or(&rest[..nl]))
}

pub fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

pub fn unescape_header(value: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}
