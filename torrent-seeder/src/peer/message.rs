use bytes::{Buf, BufMut, BytesMut};

use crate::peer::Request;
use crate::util::BitField;

/// Largest message body accepted from a peer.
pub const MAX_MESSAGE_LEN: u32 = 1 << 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            other => return Err(other),
        })
    }
}

/// Messages this node reacts to. Everything else is read and dropped.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Request(Request),
    Cancel(Request),
    Ignored(u8),
}

impl Inbound {
    /// `body` is a whole message without its length prefix, never empty.
    pub fn parse(mut body: &[u8]) -> Self {
        let id = body.get_u8();
        match MessageId::try_from(id) {
            Ok(MessageId::Request) if body.len() == 12 => {
                Inbound::Request(read_request(&mut body))
            }
            Ok(MessageId::Cancel) if body.len() == 12 => Inbound::Cancel(read_request(&mut body)),
            _ => Inbound::Ignored(id),
        }
    }
}

fn read_request(body: &mut &[u8]) -> Request {
    Request::new(body.get_u32(), body.get_u32(), body.get_u32())
}

pub fn unchoke() -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u32(1);
    buf.put_u8(MessageId::Unchoke as u8);
    buf.to_vec()
}

pub fn bitfield(bitfield: &BitField) -> Vec<u8> {
    let bytes = bitfield.as_bytes();
    let mut buf = BytesMut::with_capacity(5 + bytes.len());
    buf.put_u32(1 + bytes.len() as u32);
    buf.put_u8(MessageId::Bitfield as u8);
    buf.put_slice(bytes);
    buf.to_vec()
}

pub fn piece(piece: u32, begin: u32, block: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(13 + block.len());
    buf.put_u32(9 + block.len() as u32);
    buf.put_u8(MessageId::Piece as u8);
    buf.put_u32(piece);
    buf.put_u32(begin);
    buf.put_slice(block);
    buf.to_vec()
}

pub fn request(request: &Request) -> Vec<u8> {
    framed_request(MessageId::Request, request)
}

pub fn cancel(request: &Request) -> Vec<u8> {
    framed_request(MessageId::Cancel, request)
}

fn framed_request(id: MessageId, request: &Request) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(17);
    buf.put_u32(13);
    buf.put_u8(id as u8);
    buf.put_u32(request.piece);
    buf.put_u32(request.begin);
    buf.put_u32(request.length);
    buf.to_vec()
}
