use crate::{BencodeInt, BencodeString, Result, Value};

pub trait FromBencode {
    fn from_bencode(bencode: Value) -> Result<Self> where Self: Sized;
}

impl FromBencode for String {
    fn from_bencode(bencode: Value) -> Result<Self>
    where
        Self: Sized
    {
        Ok(String::from_utf8(BencodeString::try_from(bencode)?).map_err(|e| e.utf8_error())?)
    }
}

impl FromBencode for BencodeInt {
    fn from_bencode(bencode: Value) -> Result<Self>
    where
        Self: Sized
    {
        BencodeInt::try_from(bencode)
    }
}

impl<T: FromBencode> FromBencode for Vec<T> {
    fn from_bencode(bencode: Value) -> Result<Self>
    where
        Self: Sized
    {
        Vec::<Value>::try_from(bencode)?
            .into_iter()
            .map(T::from_bencode)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::FromBencode;
    use crate::{from_slice, BencodeError};

    #[test]
    fn list_of_strings() {
        let value = from_slice(b"l3:abc2:dee").unwrap();
        let list = Vec::<String>::from_bencode(value).unwrap();
        assert_eq!(list, vec!["abc".to_string(), "de".to_string()]);
    }

    #[test]
    fn type_mismatch() {
        let value = from_slice(b"i5e").unwrap();
        assert_eq!(
            String::from_bencode(value),
            Err(BencodeError::InvalidType("Integer", "String"))
        );
    }
}
