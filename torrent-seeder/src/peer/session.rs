use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;

use crate::file::MetaInfo;
use crate::peer::connection::ConnectionError;
use crate::peer::handshake::{HandshakeHeader, HandshakeMessage, HEADER_LEN};
use crate::peer::message::{self, Inbound, MAX_MESSAGE_LEN};
use crate::peer::Request;
use crate::seeder::Seeder;
use crate::util::BitField;

/// Requests kept per peer; the oldest is dropped beyond this.
pub const MAX_REQUESTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitingHandshake,
    AwaitingPeerId,
    AwaitingLength,
    AwaitingMessage,
}

/// Protocol state of one peer connection, independent of the socket it
/// runs over. Bytes go in through [`PeerSession::receive`] and framed
/// messages come out of the output queue.
#[derive(Debug)]
pub struct PeerSession {
    state: State,
    input: Vec<u8>,
    input_pos: usize,
    output: VecDeque<Vec<u8>>,
    output_pos: usize,
    info: Option<Arc<MetaInfo>>,
    requests: VecDeque<Request>,
    cached_piece: Option<(u32, Vec<u8>)>,
}

impl Default for PeerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerSession {
    pub fn new() -> Self {
        PeerSession {
            state: State::AwaitingHandshake,
            input: vec![0; HEADER_LEN],
            input_pos: 0,
            output: VecDeque::new(),
            output_pos: 0,
            info: None,
            requests: VecDeque::new(),
            cached_piece: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn info(&self) -> Option<&Arc<MetaInfo>> {
        self.info.as_ref()
    }

    pub fn requests(&self) -> &VecDeque<Request> {
        &self.requests
    }

    pub fn has_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Unwritten remainder of the front output buffer.
    pub fn front_output(&self) -> Option<&[u8]> {
        self.output.front().map(|buf| &buf[self.output_pos..])
    }

    /// Marks `n` bytes of the front buffer as written.
    pub fn consume_output(&mut self, n: usize) {
        let Some(front) = self.output.front() else {
            return;
        };
        self.output_pos += n;
        if self.output_pos >= front.len() {
            self.output.pop_front();
            self.output_pos = 0;
        }
    }

    fn queue_output(&mut self, data: Vec<u8>) {
        self.output.push_back(data);
    }

    /// Feeds bytes read from the socket through the state machine. An error
    /// means the connection must be torn down.
    pub fn receive(&mut self, mut data: &[u8], seeder: &Seeder) -> Result<(), ConnectionError> {
        while !data.is_empty() {
            let take = data.len().min(self.input.len() - self.input_pos);
            self.input[self.input_pos..self.input_pos + take].copy_from_slice(&data[..take]);
            self.input_pos += take;
            data = &data[take..];
            if self.input_pos == self.input.len() {
                self.input_pos = 0;
                self.process_input(seeder)?;
            }
        }
        Ok(())
    }

    fn await_input(&mut self, state: State, len: usize) {
        self.state = state;
        self.input.clear();
        self.input.resize(len, 0);
    }

    fn process_input(&mut self, seeder: &Seeder) -> Result<(), ConnectionError> {
        match self.state {
            State::AwaitingHandshake => {
                let mut raw = [0; HEADER_LEN];
                raw.copy_from_slice(&self.input);
                let header = HandshakeHeader::from_bytes(&raw)?;
                let info = seeder
                    .get_meta_info(&header.info_hash)
                    .ok_or(ConnectionError::UnknownInfoHash(header.info_hash))?;

                let reply = HandshakeMessage::new([0; 8], header.info_hash, *seeder.peer_id());
                self.queue_output(reply.to_bytes().to_vec());
                let pieces = BitField::full(info.piece_count() as usize);
                self.queue_output(message::bitfield(&pieces));
                self.queue_output(message::unchoke());
                debug!("Handshake for {}", hex::encode(header.info_hash));

                self.info = Some(info);
                self.await_input(State::AwaitingPeerId, 20);
            }
            State::AwaitingPeerId => self.await_input(State::AwaitingLength, 4),
            State::AwaitingLength => {
                let mut raw = [0; 4];
                raw.copy_from_slice(&self.input);
                let length = u32::from_be_bytes(raw);
                if length > MAX_MESSAGE_LEN {
                    return Err(ConnectionError::MessageTooLarge(length));
                }
                if length > 0 {
                    self.await_input(State::AwaitingMessage, length as usize);
                }
            }
            State::AwaitingMessage => {
                match Inbound::parse(&self.input) {
                    Inbound::Request(request) => self.push_request(request),
                    Inbound::Cancel(request) => {
                        if let Some(i) = self.requests.iter().position(|r| *r == request) {
                            self.requests.remove(i);
                        }
                    }
                    Inbound::Ignored(_) => {}
                }
                self.await_input(State::AwaitingLength, 4);
            }
        }
        Ok(())
    }

    fn push_request(&mut self, request: Request) {
        let Some(info) = &self.info else {
            return;
        };
        if !info.valid_request(request.piece, request.begin, request.length) {
            debug!("Dropping invalid request {request:?}");
            return;
        }
        while self.requests.len() >= MAX_REQUESTS {
            self.requests.pop_front();
        }
        self.requests.push_back(request);
    }

    /// Queues a `piece` message for the oldest pending request and returns
    /// the block length queued, or 0 when the request had to be dropped.
    pub fn serve_request(&mut self) -> u32 {
        let Some(request) = self.requests.pop_front() else {
            return 0;
        };
        let Some(info) = self.info.clone() else {
            return 0;
        };
        let cached = matches!(&self.cached_piece, Some((index, _)) if *index == request.piece);
        if !cached {
            match info.fetch_piece(request.piece) {
                Ok(data) => self.cached_piece = Some((request.piece, data)),
                Err(e) => {
                    debug!("Unable to fetch piece {} of {}: {e}", request.piece, info.name());
                    return 0;
                }
            }
        }
        let Some((_, data)) = &self.cached_piece else {
            return 0;
        };
        let begin = request.begin as usize;
        let end = begin + request.length as usize;
        if end > data.len() {
            debug!(
                "Unable to satisfy request for short piece {} of length {}",
                request.piece,
                data.len()
            );
            return 0;
        }
        let block = message::piece(request.piece, request.begin, &data[begin..end]);
        self.queue_output(block);
        request.length
    }
}
