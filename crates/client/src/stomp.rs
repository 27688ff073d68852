// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! STOMP 1.2 text frames carried one per WebSocket text message.
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! \n
//! body\0
//! ```
//!
//! A message containing only end-of-line bytes is a heart-beat.

use std::fmt;

/// STOMP frame commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Send,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Send => "SEND",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "SEND" => Self::Send,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    /// CONNECT and CONNECTED headers are not escaped.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("malformed header line {0:?}")]
    MalformedHeader(String),
    #[error("invalid escape sequence in {0:?}")]
    InvalidEscape(String),
    #[error("frame ended before headers were terminated")]
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: String::new() }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`; repeated headers after the first are ignored.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str, token: Option<&str>) -> Self {
        let frame = Self::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0");
        match token {
            Some(token) => frame.header("Authorization", format!("Bearer {token}")),
            None => frame,
        }
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).header("receipt", receipt)
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
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

    /// Decode one frame. Returns `Ok(None)` for a heart-beat.
    pub fn decode(text: &str) -> Result<Option<Self>, FrameError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() || text == "\0" {
            return Ok(None);
        }

        let (command_line, mut rest) = split_line(text).ok_or(FrameError::Truncated)?;
        let command = Command::parse(command_line)
            .ok_or_else(|| FrameError::UnknownCommand(command_line.to_owned()))?;
        let escape = command.escapes_headers();

        let mut headers = Vec::new();
        loop {
            let (line, next) = split_line(rest).ok_or(FrameError::Truncated)?;
            rest = next;
            if line.is_empty() {
                break;
            }
            let (name, value) =
                line.split_once(':').ok_or_else(|| FrameError::MalformedHeader(line.to_owned()))?;
            if escape {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_owned(), value.to_owned()));
            }
        }

        let frame = Self { command, headers, body: String::new() };
        let length = frame.get("content-length").and_then(|v| v.trim().parse::<usize>().ok());
        let body = match length {
            Some(len) if len <= rest.len() && rest.is_char_boundary(len) => &rest[..len],
            _ => rest.split('\0').next().unwrap_or_default(),
        };
        Ok(Some(Self { body: body.to_owned(), ..frame }))
    }
}

/// Split off one line, accepting `\n` or `\r\n`.
fn split_line(s: &str) -> Option<(&str, &str)> {
    let (line, rest) = s.split_once('\n')?;
    Some((line.strip_suffix('\r').unwrap_or(line), rest))
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
}

fn unescape(s: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(s.to_owned())),
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "stomp_tests.rs"]
mod tests;
