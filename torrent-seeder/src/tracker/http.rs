use std::io::{self, Read, Write};

use percent_encoding::percent_decode;
use thiserror::Error;

use crate::reactor::Flow;

/// Requests larger than this, headers included, are dropped.
pub const MAX_REQUEST_SIZE: usize = 4096;

type Result<T> = std::result::Result<T, HttpError>;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request exceeds {MAX_REQUEST_SIZE} bytes")]
    RequestTooLarge,
    #[error("Malformed request line {0:?}")]
    RequestLine(String),
    #[error("Connection closed before request completed")]
    Closed,
    #[error(transparent)]
    IoKind(#[from] io::Error),
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub location: String,
    pub query: String,
    pub headers: Vec<String>,
}

/// Parses the head of a request, everything before the blank line.
pub fn parse_request(head: &str) -> Result<HttpRequest> {
    let mut lines = head.split("\r\n");
    let line = lines.next().unwrap_or_default();
    let mut parts = line.split_whitespace();
    let (Some(method), Some(uri), Some(protocol)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::RequestLine(line.to_string()));
    };
    if !protocol.starts_with("HTTP/") {
        return Err(HttpError::RequestLine(line.to_string()));
    }
    let (location, query) = uri.split_once('?').unwrap_or((uri, ""));
    Ok(HttpRequest {
        method: method.to_string(),
        location: location.to_string(),
        query: query.to_string(),
        headers: lines.map(str::to_string).collect(),
    })
}

/// Decoded query variables in request order. Names may repeat.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct QueryVars(Vec<(Vec<u8>, Vec<u8>)>);

impl QueryVars {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|(key, _)| key == name.as_bytes())
            .map(|(_, value)| value.as_slice())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| std::str::from_utf8(value).ok())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.0
            .iter()
            .filter(move |(key, _)| key == name.as_bytes())
            .map(|(_, value)| value.as_slice())
    }
}

/// Splits `a=1&b=2` pairs and percent-decodes both sides. Pairs without
/// `=` are skipped and `+` is kept as is.
pub fn parse_query_string(query: &str) -> QueryVars {
    let vars = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| {
            (
                percent_decode(key.as_bytes()).collect(),
                percent_decode(value.as_bytes()).collect(),
            )
        })
        .collect();
    QueryVars(vars)
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        HttpResponse {
            status: 200,
            reason: "OK",
            body,
        }
    }

    pub fn bad_request() -> Self {
        Self::error(400, "Bad Request")
    }

    pub fn forbidden() -> Self {
        Self::error(403, "Forbidden")
    }

    pub fn not_found() -> Self {
        Self::error(404, "Not Found")
    }

    fn error(status: u16, reason: &'static str) -> Self {
        HttpResponse {
            status,
            reason,
            body: format!("{reason}\r\n").into_bytes(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.0 {} {}\r\n", self.status, self.reason).into_bytes();
        if self.status == 200 {
            out.extend_from_slice(b"Content-type: text/plain\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

enum Phase {
    Reading(Vec<u8>),
    Writing(Vec<u8>, usize),
}

/// One request, one response, then close.
pub struct HttpConnection<S> {
    stream: S,
    phase: Phase,
}

impl<S: Read + Write> HttpConnection<S> {
    pub fn new(stream: S) -> Self {
        HttpConnection {
            stream,
            phase: Phase::Reading(Vec::new()),
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn is_writing(&self) -> bool {
        matches!(self.phase, Phase::Writing(..))
    }

    /// Buffers input until the blank line, then hands the request to
    /// `handler` and switches to writing its response.
    pub fn on_readable<F>(&mut self, handler: F) -> Result<Flow>
    where
        F: FnOnce(&HttpRequest) -> HttpResponse,
    {
        let Phase::Reading(input) = &mut self.phase else {
            return Ok(Flow::Continue);
        };
        let mut buf = [0; 2048];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(HttpError::Closed),
                Ok(n) => {
                    if input.len() + n > MAX_REQUEST_SIZE {
                        return Err(HttpError::RequestTooLarge);
                    }
                    input.extend_from_slice(&buf[..n]);
                    if let Some(end) = find_head_end(input) {
                        let request = parse_request(&String::from_utf8_lossy(&input[..end]))?;
                        let response = handler(&request);
                        self.phase = Phase::Writing(response.to_bytes(), 0);
                        return Ok(Flow::Continue);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Continue),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Writes the response; asks to be closed once it is out.
    pub fn on_writable(&mut self) -> Result<Flow> {
        let Phase::Writing(output, pos) = &mut self.phase else {
            return Ok(Flow::Continue);
        };
        while *pos < output.len() {
            match self.stream.write(&output[*pos..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => *pos += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Continue),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Flow::Close)
    }
}

fn find_head_end(input: &[u8]) -> Option<usize> {
    input.windows(4).position(|window| window == b"\r\n\r\n")
}
