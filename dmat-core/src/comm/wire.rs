//! Byte encoding of messages that cross a process boundary.
//!
//! The in-process fabric moves boxed values and never encodes them. Out-of-process transports
//! encode each payload with [`Message::encode`], prefixed by a fingerprint of its type name,
//! and the receiver decodes it with [`Message::decode`].

use std::{
    any::{type_name, Any},
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use crate::{c32, c64};

/// Value that can be sent through a [`Comm`](super::Comm).
pub trait Message: Any + Send + Sized {
    /// Appends the encoding of `self` to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Reads one value from the front of `input` and advances it, or returns `None` if
    /// `input` does not start with a valid encoding.
    fn decode(input: &mut &[u8]) -> Option<Self>;
}

/// Identifies the Rust type of a payload. Every process runs the same binary, so equal types
/// give equal fingerprints.
pub(crate) fn fingerprint<M: Message>() -> u64 {
    let mut hasher = DefaultHasher::new();
    type_name::<M>().hash(&mut hasher);
    hasher.finish()
}

pub(crate) fn take_bytes<const N: usize>(input: &mut &[u8]) -> Option<[u8; N]> {
    if input.len() < N {
        return None;
    }
    let (head, rest) = input.split_at(N);
    *input = rest;
    head.try_into().ok()
}

macro_rules! impl_le_bytes {
    ($($ty: ty),*) => {
        $(
            impl Message for $ty {
                #[inline]
                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(input: &mut &[u8]) -> Option<Self> {
                    take_bytes(input).map(<$ty>::from_le_bytes)
                }
            }
        )*
    };
}

impl_le_bytes!(u8, u16, u32, u64, i32, i64, f32, f64);

impl Message for usize {
    #[inline]
    fn encode(&self, out: &mut Vec<u8>) {
        (*self as u64).encode(out);
    }

    #[inline]
    fn decode(input: &mut &[u8]) -> Option<Self> {
        u64::decode(input).and_then(|v| usize::try_from(v).ok())
    }
}

impl Message for bool {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }

    fn decode(input: &mut &[u8]) -> Option<Self> {
        match u8::decode(input)? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }
}

impl Message for () {
    fn encode(&self, _: &mut Vec<u8>) {}

    fn decode(_: &mut &[u8]) -> Option<Self> {
        Some(())
    }
}

macro_rules! impl_complex {
    ($($ty: ty => $real: ty),*) => {
        $(
            impl Message for $ty {
                #[inline]
                fn encode(&self, out: &mut Vec<u8>) {
                    self.re.encode(out);
                    self.im.encode(out);
                }

                #[inline]
                fn decode(input: &mut &[u8]) -> Option<Self> {
                    let re = <$real>::decode(input)?;
                    let im = <$real>::decode(input)?;
                    Some(<$ty>::new(re, im))
                }
            }
        )*
    };
}

impl_complex!(c32 => f32, c64 => f64);

impl Message for String {
    fn encode(&self, out: &mut Vec<u8>) {
        self.len().encode(out);
        out.extend_from_slice(self.as_bytes());
    }

    fn decode(input: &mut &[u8]) -> Option<Self> {
        let len = usize::decode(input)?;
        if input.len() < len {
            return None;
        }
        let (head, rest) = input.split_at(len);
        *input = rest;
        String::from_utf8(head.to_vec()).ok()
    }
}

impl<M: Message> Message for Vec<M> {
    fn encode(&self, out: &mut Vec<u8>) {
        self.len().encode(out);
        for item in self {
            item.encode(out);
        }
    }

    fn decode(input: &mut &[u8]) -> Option<Self> {
        let len = usize::decode(input)?;
        let mut out = Vec::with_capacity(Ord::min(len, input.len()));
        for _ in 0..len {
            out.push(M::decode(input)?);
        }
        Some(out)
    }
}

impl<M: Message> Message for Option<M> {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            None => out.push(0),
            Some(value) => {
                out.push(1);
                value.encode(out);
            }
        }
    }

    fn decode(input: &mut &[u8]) -> Option<Self> {
        match u8::decode(input)? {
            0 => Some(None),
            1 => M::decode(input).map(Some),
            _ => None,
        }
    }
}

macro_rules! impl_tuple {
    ($($name: ident $field: ident),*) => {
        impl<$($name: Message),*> Message for ($($name,)*) {
            fn encode(&self, out: &mut Vec<u8>) {
                let ($($field,)*) = self;
                $($field.encode(out);)*
            }

            fn decode(input: &mut &[u8]) -> Option<Self> {
                Some(($($name::decode(input)?,)*))
            }
        }
    };
}

impl_tuple!(A a, B b);
impl_tuple!(A a, B b, C c);
impl_tuple!(A a, B b, C c, D d);
