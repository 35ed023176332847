//! Binary encoding of rpc messages.
//!
//! Little endian. Strings and sequences carry a u32 length, options a u8 tag,
//! structs are their fields in declaration order.
use std::collections::BTreeMap;

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Largest message the wire's u32 size field is allowed to describe.
pub const MAX_MESSAGE_SIZE: usize = 0x7fff_ffff;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message truncated, {need} more bytes needed")]
    Truncated { need: usize },
    #[error("invalid utf8 string")]
    Utf8,
    #[error("invalid tag {tag} for {ty}")]
    BadTag { tag: u8, ty: &'static str },
}

pub trait Encode {
    fn encode<B: BufMut>(&self, buf: &mut B);

    /// Exact number of bytes `encode` writes.
    fn encoded_len(&self) -> usize;
}

pub trait Decode: Sized {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError>;
}

fn need<B: Buf>(buf: &B, n: usize) -> Result<(), CodecError> {
    if buf.remaining() < n {
        Err(CodecError::Truncated {
            need: n - buf.remaining(),
        })
    } else {
        Ok(())
    }
}

macro_rules! wire_int {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl Encode for $ty {
                fn encode<B: BufMut>(&self, buf: &mut B) {
                    buf.$put(*self);
                }

                fn encoded_len(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }
            }

            impl Decode for $ty {
                fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
                    need(buf, std::mem::size_of::<$ty>())?;
                    Ok(buf.$get())
                }
            }
        )*
    };
}

wire_int! {
    u8 => put_u8, get_u8;
    u32 => put_u32_le, get_u32_le;
    u64 => put_u64_le, get_u64_le;
    i32 => put_i32_le, get_i32_le;
}

impl Encode for () {
    fn encode<B: BufMut>(&self, _: &mut B) {}

    fn encoded_len(&self) -> usize {
        0
    }
}

impl Decode for () {
    fn decode<B: Buf>(_: &mut B) -> Result<Self, CodecError> {
        Ok(())
    }
}

impl Encode for bool {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(*self as u8);
    }

    fn encoded_len(&self) -> usize {
        1
    }
}

impl Decode for bool {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        match u8::decode(buf)? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(CodecError::BadTag { tag, ty: "bool" }),
        }
    }
}

impl Encode for String {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.len() as u32);
        buf.put_slice(self.as_bytes());
    }

    fn encoded_len(&self) -> usize {
        4 + self.len()
    }
}

impl Decode for String {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        let len = u32::decode(buf)? as usize;
        need(buf, len)?;
        let mut bytes = vec![0; len];
        buf.copy_to_slice(&mut bytes);
        String::from_utf8(bytes).map_err(|_| CodecError::Utf8)
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.len() as u32);
        for v in self.iter() {
            v.encode(buf);
        }
    }

    fn encoded_len(&self) -> usize {
        4 + self.iter().map(Encode::encoded_len).sum::<usize>()
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        let n = u32::decode(buf)? as usize;
        // each element takes at least one byte.
        let mut ret = Vec::with_capacity(n.min(buf.remaining()));
        for _ in 0..n {
            ret.push(T::decode(buf)?);
        }
        Ok(ret)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Some(v) => {
                buf.put_u8(1);
                v.encode(buf);
            }
            None => buf.put_u8(0),
        }
    }

    fn encoded_len(&self) -> usize {
        1 + self.as_ref().map_or(0, Encode::encoded_len)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        match u8::decode(buf)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(buf)?)),
            tag => Err(CodecError::BadTag { tag, ty: "option" }),
        }
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.len() as u32);
        for (k, v) in self.iter() {
            k.encode(buf);
            v.encode(buf);
        }
    }

    fn encoded_len(&self) -> usize {
        4 + self
            .iter()
            .map(|(k, v)| k.encoded_len() + v.encoded_len())
            .sum::<usize>()
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        let n = u32::decode(buf)?;
        let mut ret = BTreeMap::new();
        for _ in 0..n {
            let k = K::decode(buf)?;
            let v = V::decode(buf)?;
            ret.insert(k, v);
        }
        Ok(ret)
    }
}

/// Implement [`Encode`] and [`Decode`] for a struct, field by field.
macro_rules! wire_struct {
    ($name:ident { $($field:ident),* $(,)? }) => {
        impl $crate::rpc::codec::Encode for $name {
            fn encode<B: bytes::BufMut>(&self, buf: &mut B) {
                $( $crate::rpc::codec::Encode::encode(&self.$field, buf); )*
            }

            fn encoded_len(&self) -> usize {
                0 $( + $crate::rpc::codec::Encode::encoded_len(&self.$field) )*
            }
        }

        impl $crate::rpc::codec::Decode for $name {
            fn decode<B: bytes::Buf>(buf: &mut B) -> Result<Self, $crate::rpc::codec::CodecError> {
                Ok(Self {
                    $( $field: $crate::rpc::codec::Decode::decode(buf)?, )*
                })
            }
        }
    };
}

/// Implement [`Encode`] and [`Decode`] for a fieldless enum, as one byte.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident = $tag:literal),* $(,)? }) => {
        impl $crate::rpc::codec::Encode for $name {
            fn encode<B: bytes::BufMut>(&self, buf: &mut B) {
                let tag: u8 = match self {
                    $( $name::$variant => $tag, )*
                };
                buf.put_u8(tag);
            }

            fn encoded_len(&self) -> usize {
                1
            }
        }

        impl $crate::rpc::codec::Decode for $name {
            fn decode<B: bytes::Buf>(buf: &mut B) -> Result<Self, $crate::rpc::codec::CodecError> {
                match <u8 as $crate::rpc::codec::Decode>::decode(buf)? {
                    $( $tag => Ok($name::$variant), )*
                    tag => Err($crate::rpc::codec::CodecError::BadTag { tag, ty: stringify!($name) }),
                }
            }
        }
    };
}

/// Encode `msg` into a fresh buffer.
pub fn to_bytes<T: Encode>(msg: &T) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msg.encoded_len());
    msg.encode(&mut buf);
    buf
}

/// Decode a whole message, trailing bytes are ignored.
pub fn from_bytes<T: Decode>(mut bytes: &[u8]) -> Result<T, CodecError> {
    T::decode(&mut bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_len_is_exact() {
        let mut m = BTreeMap::new();
        m.insert(0x10u64, String::from("open"));
        m.insert(0x20u64, String::new());
        let msg = (m, vec![Some(1u32), None], true);
        let bytes = to_bytes(&msg.0);
        assert_eq!(bytes.len(), msg.0.encoded_len());
        assert_eq!(to_bytes(&msg.1).len(), msg.1.encoded_len());
        assert_eq!(to_bytes(&msg.2).len(), 1);
        let back: BTreeMap<u64, String> = from_bytes(&bytes).unwrap();
        assert_eq!(back, msg.0);
    }

    #[test]
    fn little_endian_layout() {
        let s = String::from("ab");
        assert_eq!(to_bytes(&s), vec![2, 0, 0, 0, b'a', b'b']);
        assert_eq!(to_bytes(&0x0102_0304u32), vec![4, 3, 2, 1]);
    }

    #[test]
    fn truncated_input() {
        let bytes = to_bytes(&String::from("syz_open_dev"));
        let ret: Result<String, _> = from_bytes(&bytes[..6]);
        assert!(matches!(ret, Err(CodecError::Truncated { need: 10 })));
        // a huge count must not allocate up front.
        let ret: Result<Vec<u64>, _> = from_bytes(&[0xff, 0xff, 0xff, 0xff]);
        assert!(ret.is_err());
    }

    #[test]
    fn bad_tags() {
        assert!(matches!(
            from_bytes::<bool>(&[2]),
            Err(CodecError::BadTag { tag: 2, .. })
        ));
        assert!(matches!(
            from_bytes::<Option<u8>>(&[7, 0]),
            Err(CodecError::BadTag { tag: 7, .. })
        ));
        assert!(matches!(from_bytes::<String>(&[1, 0, 0, 0, 0xff]), Err(CodecError::Utf8)));
    }
}
