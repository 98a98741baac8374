use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::str::{from_utf8, FromStr, Utf8Error};

use thiserror::Error;

use crate::BencodeError::{
    InvalidDictionary, InvalidFormat, InvalidInteger, InvalidList, InvalidString, InvalidType,
    TrailingData, UnexpectedEOF,
};

pub mod from_bencode;

pub type BencodeInt = i64;
pub type BencodeString = Vec<u8>;
pub type BencodeList = Vec<Value>;
pub type BencodeDict = BTreeMap<BencodeString, Value>;
pub type Result<T> = std::result::Result<T, BencodeError>;

/// A decoded bencode value.
///
/// Dictionaries are kept in a `BTreeMap`, so iterating (and therefore
/// encoding) always visits keys in byte-lexicographic order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(BencodeInt),
    String(BencodeString),
    List(BencodeList),
    Dict(BencodeDict),
}

static INTEGER_NAME: &str = "Integer";
static STRING_NAME: &str = "String";
static LIST_NAME: &str = "List";
static DICTIONARY_NAME: &str = "Dictionary";

impl Value {
    pub fn name(&self) -> &'static str {
        match self {
            Value::Int(_) => INTEGER_NAME,
            Value::String(_) => STRING_NAME,
            Value::List(_) => LIST_NAME,
            Value::Dict(_) => DICTIONARY_NAME,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    pub fn is_dict(&self) -> bool {
        matches!(self, Self::Dict(_))
    }

    pub fn as_int(&self) -> Option<BencodeInt> {
        match self {
            Self::Int(int) => Some(*int),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(string) => Some(string.as_slice()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&BencodeList> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BencodeDict> {
        match self {
            Self::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    /// Looks up `key` when this value is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|dict| dict.get(key))
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum BencodeError {
    #[error("Invalid format {0}")]
    InvalidFormat(String),
    #[error("Unexpected end of file")]
    UnexpectedEOF,
    #[error("Invalid integer")]
    InvalidInteger,
    #[error("Invalid string")]
    InvalidString,
    #[error("Invalid list")]
    InvalidList,
    #[error("Invalid dictionary")]
    InvalidDictionary,
    #[error("Trailing data after value: {0} bytes")]
    TrailingData(usize),
    #[error("Invalid UTF-8 sequence: {0}")]
    InvalidUTF8(#[from] Utf8Error),
    #[error("Invalid type found {0} expected {1}")]
    InvalidType(&'static str, &'static str),
    #[error("Read failed: {0}")]
    Io(String),
}

impl From<io::Error> for BencodeError {
    fn from(value: io::Error) -> Self {
        BencodeError::Io(value.to_string())
    }
}

impl TryFrom<Value> for BencodeInt {
    type Error = BencodeError;
    fn try_from(value: Value) -> Result<Self> {
        if let Value::Int(int) = value {
            return Ok(int);
        }
        Err(InvalidType(value.name(), INTEGER_NAME))
    }
}

impl TryFrom<Value> for u16 {
    type Error = BencodeError;
    fn try_from(value: Value) -> Result<Self> {
        let int = BencodeInt::try_from(value)?;
        u16::try_from(int).map_err(|e| InvalidFormat(format!("{e}")))
    }
}

impl TryFrom<Value> for BencodeString {
    type Error = BencodeError;
    fn try_from(value: Value) -> Result<Self> {
        if let Value::String(string) = value {
            return Ok(string);
        }
        Err(InvalidType(value.name(), STRING_NAME))
    }
}

impl TryFrom<Value> for BencodeList {
    type Error = BencodeError;
    fn try_from(value: Value) -> Result<Self> {
        if let Value::List(list) = value {
            return Ok(list);
        }
        Err(InvalidType(value.name(), LIST_NAME))
    }
}

impl TryFrom<Value> for BencodeDict {
    type Error = BencodeError;
    fn try_from(value: Value) -> Result<Self> {
        if let Value::Dict(dict) = value {
            return Ok(dict);
        }
        Err(InvalidType(value.name(), DICTIONARY_NAME))
    }
}

impl TryFrom<Value> for String {
    type Error = BencodeError;
    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        Ok(String::from_utf8(BencodeString::try_from(value)?).map_err(|e| e.utf8_error())?)
    }
}

impl From<BencodeString> for Value {
    fn from(value: BencodeString) -> Self {
        Value::String(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::String(value.to_vec())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into_bytes())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.as_bytes().to_vec())
    }
}

impl From<BencodeInt> for Value {
    fn from(value: BencodeInt) -> Self {
        Value::Int(value)
    }
}

impl From<BencodeList> for Value {
    fn from(value: BencodeList) -> Self {
        Value::List(value)
    }
}

impl From<BencodeDict> for Value {
    fn from(value: BencodeDict) -> Self {
        Value::Dict(value)
    }
}

/// Decodes exactly one value; anything after it is an error.
pub fn from_slice(data: &[u8]) -> Result<Value> {
    let (value, rest) = from_slice_prefix(data)?;
    if !rest.is_empty() {
        return Err(TrailingData(rest.len()));
    }
    Ok(value)
}

/// Decodes one value from the front of `data` and returns it together with
/// the bytes that follow it.
pub fn from_slice_prefix(data: &[u8]) -> Result<(Value, &[u8])> {
    let mut parser = BencodeDecoder::new(data);
    let value = parser.parse()?;
    Ok((value, parser.data))
}

/// Reads `reader` to its end and decodes the contents as a single value.
pub fn from_reader<R: Read>(mut reader: R) -> Result<Value> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    from_slice(&data)
}

/// Deepest list/dictionary nesting the decoder accepts.
pub const MAX_DEPTH: usize = 512;

struct BencodeDecoder<'a> {
    data: &'a [u8],
    depth: usize,
}

impl<'a> BencodeDecoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, depth: 0 }
    }

    fn parse_str(&mut self) -> Result<BencodeString> {
        let mut len_str = 0;
        for byte in self.data.iter() {
            match byte {
                b':' => break,
                b'0'..=b'9' => len_str += 1,
                _ => return Err(InvalidString),
            }
        }
        if len_str == 0 {
            return Err(InvalidString);
        }
        if len_str == self.data.len() {
            return Err(UnexpectedEOF);
        }
        let len = usize::from_str(from_utf8(&self.data[..len_str])?)
            .map_err(|e| InvalidFormat(format!("{e}")))?;
        let start_of_string = len_str + 1;
        let end_of_string = start_of_string.checked_add(len).ok_or(UnexpectedEOF)?;
        let vec_data = self
            .data
            .get(start_of_string..end_of_string)
            .ok_or(UnexpectedEOF)?
            .to_vec();
        self.data = &self.data[end_of_string..];
        Ok(vec_data)
    }

    fn parse_int(&mut self) -> Result<BencodeInt> {
        let mut len: usize = 0;
        let mut terminated = false;
        for (num, byte) in self.data.iter().enumerate() {
            match (byte, num) {
                (b'i', 0) => continue,
                (b'0'..=b'9', _) | (b'-', 1) => len += 1,
                (b'e', _) => {
                    terminated = true;
                    break;
                }
                _ => return Err(InvalidInteger),
            }
        }
        if !terminated {
            return Err(UnexpectedEOF);
        }

        let digits = &self.data[1..1 + len];
        let magnitude = digits.strip_prefix(b"-").unwrap_or(digits);
        // "ie", "i-e", "i-0e" and leading zeros are not canonical integers.
        if magnitude.is_empty()
            || (magnitude[0] == b'0' && (magnitude.len() > 1 || digits.len() > 1))
        {
            return Err(InvalidInteger);
        }

        let ans = i64::from_str(from_utf8(digits)?).map_err(|_| InvalidInteger)?;
        self.data = &self.data[len + 2..];
        Ok(ans)
    }

    fn parse_list(&mut self) -> Result<BencodeList> {
        match self.data.first() {
            Some(b'l') => {
                self.data = &self.data[1..];
            }
            _ => return Err(InvalidList),
        }
        let mut ans: BencodeList = Vec::new();
        while *self.data.first().ok_or(InvalidList)? != b'e' {
            ans.push(self.parse()?);
        }
        self.data = &self.data[1..];
        Ok(ans)
    }

    fn parse_dict(&mut self) -> Result<BencodeDict> {
        match self.data.first() {
            Some(b'd') => self.data = &self.data[1..],
            _ => return Err(InvalidDictionary),
        }

        let mut ans: BencodeDict = BTreeMap::new();
        while *self.data.first().ok_or(InvalidDictionary)? != b'e' {
            let key = match self.parse()? {
                Value::String(key) => key,
                _ => return Err(InvalidDictionary),
            };
            let value = self.parse()?;
            ans.insert(key, value);
        }
        self.data = &self.data[1..];
        Ok(ans)
    }

    fn parse(&mut self) -> Result<Value> {
        match self.data.first().ok_or(UnexpectedEOF)? {
            b'i' => self.parse_int().map(Value::Int),
            b'l' | b'd' => self.parse_nested(),
            b'0'..=b'9' => self.parse_str().map(Value::String),
            char => Err(InvalidFormat(format!("unexpected char, code: {char}"))),
        }
    }

    fn parse_nested(&mut self) -> Result<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(InvalidFormat(format!("nesting deeper than {MAX_DEPTH}")));
        }
        self.depth += 1;
        let value = match self.data.first() {
            Some(b'l') => self.parse_list().map(Value::List),
            _ => self.parse_dict().map(Value::Dict),
        };
        self.depth -= 1;
        value
    }
}

pub fn into_vec(value: &Value) -> Vec<u8> {
    let mut res = Vec::new();
    let mut encoder = BencodeEncoder::new(&mut res);
    encoder.encode(value);
    res
}

/// Encodes `value` straight into `writer`.
pub fn to_writer<W: Write>(mut writer: W, value: &Value) -> io::Result<()> {
    writer.write_all(&into_vec(value))
}

pub struct BencodeEncoder<'a> {
    data: &'a mut Vec<u8>,
}

impl<'a> BencodeEncoder<'a> {
    pub fn new(data: &'a mut Vec<u8>) -> Self {
        Self { data }
    }

    pub fn encode(&mut self, value: &Value) {
        match value {
            Value::Int(int) => self.encode_int(*int),
            Value::String(str) => self.encode_bytes(str.as_slice()),
            Value::List(list) => self.encode_list(list),
            Value::Dict(dict) => self.encode_dict(dict),
        }
    }

    pub fn encode_int(&mut self, int: BencodeInt) {
        self.data.push(b'i');
        self.data.extend_from_slice(int.to_string().as_bytes());
        self.data.push(b'e');
    }

    pub fn encode_bytes(&mut self, bytes: &[u8]) {
        self.data
            .extend_from_slice(bytes.len().to_string().as_bytes());
        self.data.push(b':');
        self.data.extend_from_slice(bytes);
    }

    pub fn encode_list(&mut self, list: &BencodeList) {
        self.data.push(b'l');
        for item in list {
            self.encode(item)
        }
        self.data.push(b'e');
    }

    pub fn encode_dict(&mut self, dict: &BencodeDict) {
        self.data.push(b'd');
        for (key, value) in dict {
            self.encode_bytes(key);
            self.encode(value);
        }
        self.data.push(b'e');
    }
}

#[cfg(test)]
mod tests {
    use crate::Value::{Dict, Int, List, String};

    use super::*;

    #[test]
    fn parse_valid_string() {
        let data = b"5:aboba";
        let mut parser = BencodeDecoder::new(data);
        let str = parser.parse_str();
        assert_eq!(str, Ok(Vec::from("aboba")));
        assert_eq!(parser.data.len(), 0);
    }

    #[test]
    fn parse_zero_string() {
        let data = b"0:";
        let mut parser = BencodeDecoder::new(data);
        let str = parser.parse_str();
        assert_eq!(str, Ok(Vec::from("")));
        assert_eq!(parser.data.len(), 0);
    }

    #[test]
    fn parse_invalid_string() {
        let data = b"5:abfd";
        let mut parser = BencodeDecoder::new(data);
        let str = parser.parse_str();
        assert_eq!(str, Err(UnexpectedEOF));
    }

    #[test]
    fn parse_string_without_colon() {
        assert_eq!(from_slice(b"12"), Err(UnexpectedEOF));
    }

    #[test]
    fn parse_string_with_huge_length() {
        assert_eq!(from_slice(b"18446744073709551615:a"), Err(UnexpectedEOF));
    }

    #[test]
    fn parse_valid_int() {
        let data = b"i452e";
        let mut parser = BencodeDecoder::new(data);
        let int = parser.parse_int();
        assert_eq!(int, Ok(452));
        assert_eq!(parser.data.len(), 0);
    }

    #[test]
    fn parse_negative_int() {
        assert_eq!(from_slice(b"i-17e"), Ok(Int(-17)));
        assert_eq!(from_slice(b"i0e"), Ok(Int(0)));
    }

    #[test]
    fn parse_non_canonical_ints() {
        for data in [&b"ie"[..], b"i-e", b"i-0e", b"i03e", b"i1-2e"] {
            assert_eq!(from_slice(data), Err(InvalidInteger), "{data:?}");
        }
    }

    #[test]
    fn parse_overflowing_int() {
        assert_eq!(from_slice(b"i9223372036854775807e"), Ok(Int(i64::MAX)));
        assert_eq!(from_slice(b"i9223372036854775808e"), Err(InvalidInteger));
    }

    #[test]
    fn parse_invalid_int() {
        let data = b"i4f52e";
        let mut parser = BencodeDecoder::new(data);
        let int = parser.parse_int();
        assert_eq!(int, Err(InvalidInteger));
    }

    #[test]
    fn parse_invalid_int_without_ending_e() {
        let data = b"i452";
        let mut parser = BencodeDecoder::new(data);
        let int = parser.parse_int();
        assert_eq!(int, Err(UnexpectedEOF));
    }

    #[test]
    fn parse_valid_list() {
        let data = Vec::from(b"l4:spami42ee");
        let mut parser = BencodeDecoder::new(data.as_slice());
        let list = parser.parse_list();
        assert_eq!(
            list,
            Ok(vec![Value::String(Vec::from(b"spam")), Value::Int(42)])
        );
        assert_eq!(parser.data.len(), 0);
    }

    #[test]
    fn parse_invalid_list_without_ending_e() {
        let data = Vec::from(b"l4:spami42e");
        let mut parser = BencodeDecoder::new(data.as_slice());
        let list = parser.parse_list();
        assert_eq!(list, Err(InvalidList));
    }

    #[test]
    fn parse_invalid_list_with_incorrect_element() {
        let data = Vec::from(b"l4:spamuperi42ee");
        let mut parser = BencodeDecoder::new(data.as_slice());
        let list = parser.parse_list();

        assert_eq!(
            list,
            Err(InvalidFormat("unexpected char, code: 117".to_string()))
        );
    }

    #[test]
    fn parse_nested_structs() {
        let data = b"lli43e5:abobaed3:bari52eee";
        let list = from_slice(data);
        let map: BencodeDict = BTreeMap::from([(b"bar".to_vec(), Int(52))]);
        assert_eq!(
            list,
            Ok(List(vec![
                List(vec![Int(43), String(b"aboba".to_vec())]),
                Dict(map)
            ]))
        );
    }

    #[test]
    fn parse_valid_dict() {
        let data = Vec::from(b"d3:bar4:spam3:fooi42ee");
        let mut parser = BencodeDecoder::new(data.as_slice());
        let map_dict = BencodeDict::from([
            (b"bar".to_vec(), String(b"spam".to_vec())),
            (b"foo".to_vec(), Int(42)),
        ]);
        let dict = parser.parse_dict();
        assert_eq!(dict, Ok(map_dict));
        assert_eq!(parser.data.len(), 0);
    }

    #[test]
    fn parse_deeply_nested_list() {
        let mut data = vec![b'l'; 100_000];
        data.extend(vec![b'e'; 100_000]);
        assert!(matches!(from_slice(&data), Err(InvalidFormat(_))));
    }

    #[test]
    fn parse_nesting_at_limit() {
        let mut data = vec![b'l'; MAX_DEPTH];
        data.extend(vec![b'e'; MAX_DEPTH]);
        assert!(from_slice(&data).is_ok());

        let mut data = b"d1:a".to_vec();
        data.extend(vec![b'l'; MAX_DEPTH]);
        data.extend(vec![b'e'; MAX_DEPTH + 1]);
        assert!(matches!(from_slice(&data), Err(InvalidFormat(_))));
    }

    #[test]
    fn parse_dict_with_integer_key() {
        assert_eq!(from_slice(b"di1e3:fooe"), Err(InvalidDictionary));
    }

    #[test]
    fn parse_invalid_dict_without_ending_e() {
        let data = Vec::from(b"d3:bar4:spam3:fooi42e");
        let mut parser = BencodeDecoder::new(data.as_slice());
        let dict = parser.parse_dict();
        assert_eq!(dict, Err(InvalidDictionary));
    }

    #[test]
    fn canonical_document_round_trip() {
        let data = b"d3:barl4:spam4:eggse3:fooi42ee";
        let value = from_slice(data).unwrap();
        let expected = Dict(BencodeDict::from([
            (
                b"bar".to_vec(),
                List(vec![String(b"spam".to_vec()), String(b"eggs".to_vec())]),
            ),
            (b"foo".to_vec(), Int(42)),
        ]));
        assert_eq!(value, expected);
        assert_eq!(crate::into_vec(&value).as_slice(), data);
    }

    #[test]
    fn unordered_keys_are_sorted_on_encode() {
        let value = from_slice(b"d3:fooi42e3:bar4:spame").unwrap();
        assert_eq!(crate::into_vec(&value).as_slice(), b"d3:bar4:spam3:fooi42ee");
    }

    #[test]
    fn trailing_data_is_rejected() {
        assert_eq!(from_slice(b"i1ei2e"), Err(TrailingData(3)));
        let (value, rest) = from_slice_prefix(b"i1ei2e").unwrap();
        assert_eq!(value, Int(1));
        assert_eq!(rest, b"i2e");
    }

    #[test]
    fn empty_input_is_eof() {
        assert_eq!(from_slice(b""), Err(UnexpectedEOF));
    }

    #[test]
    fn decode_from_reader() {
        let value = from_reader(&b"l1:a1:be"[..]).unwrap();
        assert_eq!(value, List(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn random_values_round_trip() {
        let value = List(vec![
            Int(-1),
            Int(i64::MIN),
            String(vec![0, 255, b':', b'e']),
            Dict(BencodeDict::from([
                (vec![0xff], List(vec![])),
                (vec![], Dict(BencodeDict::new())),
            ])),
        ]);
        assert_eq!(from_slice(&crate::into_vec(&value)), Ok(value));
    }

    #[test]
    fn encode_values() {
        let cases: [(Value, &[u8]); 5] = [
            (String(b"aboba".to_vec()), b"5:aboba"),
            (String(vec![]), b"0:"),
            (Int(-354), b"i-354e"),
            (Int(0), b"i0e"),
            (List(vec![345.into(), "x".into()]), b"li345e1:xe"),
        ];
        for (value, expected) in cases {
            let mut vec = Vec::new();
            BencodeEncoder::new(&mut vec).encode(&value);
            assert_eq!(vec.as_slice(), expected, "{value:?}");
        }
    }

    #[test]
    fn encode_dict() {
        let mut vec = Vec::new();
        let mut encoder = BencodeEncoder::new(&mut vec);
        let mut map: BencodeDict = BTreeMap::new();
        map.insert(b"second".to_vec(), "go here dgf".into());
        map.insert(b"first".to_vec(), 3546.into());
        encoder.encode(&Dict(map));
        assert_eq!(vec.as_slice(), b"d5:firsti3546e6:second11:go here dgfe");
    }

    #[test]
    fn write_to_writer() {
        let mut out = Vec::new();
        to_writer(&mut out, &List(vec![Int(1)])).unwrap();
        assert_eq!(out, b"li1ee");
    }
}
