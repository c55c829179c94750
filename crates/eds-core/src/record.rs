//! Generic netstring record engine
//!
//! A record is an ordered list of fields, each encoded as one netstring. The
//! schema lives in a static field map; there are no names on the wire and
//! decoding is positional. Decoded byte fields are views into the input, so
//! a decoded record cannot outlive the buffer it was parsed from.
//!
//! Field kinds:
//! - `Data`: raw bytes
//! - `Long`: `i64`, decimal ASCII inside the netstring
//! - `DataArray`: netstring of netstrings
//! - `LongArray`: netstring of decimal netstrings
//! - `Record`: an encoded sub-record, checked for well-formedness on decode
//!
//! Message types are declared with [`netstring_record!`](crate::netstring_record):
//!
//! ```ignore
//! netstring_record! {
//!     pub struct SweeperReq<'a> {
//!         pub addrs: Data,
//!         pub arp: Data,
//!     }
//! }
//!
//! let mut out = Buffer::new();
//! SweeperReq { addrs: b"10.0.0.1", arp: b"yes" }.serialize(&mut out)?;
//! let (req, left) = SweeperReq::deserialize(out.as_slice())?;
//! ```

use crate::buf::Buffer;
use crate::error::{NetstringError, NsResult};
use crate::netstring;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Data,
    Long,
    DataArray,
    LongArray,
    Record,
}

/// One entry of a record's field map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDesc {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Borrowed field value on the encode side.
#[derive(Debug, Clone, Copy)]
pub enum FieldRef<'v> {
    Data(&'v [u8]),
    Long(i64),
    DataArray(&'v [&'v [u8]]),
    LongArray(&'v [i64]),
    Record(&'v [u8]),
}

/// Decoded field value; byte views borrow the decoder input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<'a> {
    Data(&'a [u8]),
    Long(i64),
    DataArray(Vec<&'a [u8]>),
    LongArray(Vec<i64>),
    Record(&'a [u8]),
}

// ── Engine ──

/// Append every field in map order. `scratch` holds array bodies while they
/// are assembled.
pub fn serialize_fields(
    map: &[FieldDesc],
    values: &[FieldRef<'_>],
    out: &mut Buffer,
    scratch: &mut Buffer,
) -> NsResult<()> {
    if map.len() != values.len() {
        return Err(NetstringError::Arity {
            expected: map.len(),
            got: values.len(),
        });
    }

    for (desc, value) in map.iter().zip(values) {
        match (desc.kind, value) {
            (FieldKind::Data, FieldRef::Data(d))
            | (FieldKind::Record, FieldRef::Record(d))
            | (FieldKind::Record, FieldRef::Data(d)) => netstring::append(out, d)?,
            (FieldKind::Long, FieldRef::Long(v)) => netstring::append_long(out, *v)?,
            (FieldKind::DataArray, FieldRef::DataArray(items)) => {
                scratch.clear();
                for item in items.iter() {
                    netstring::append(scratch, item)?;
                }
                netstring::append(out, scratch.as_slice())?;
            }
            (FieldKind::LongArray, FieldRef::LongArray(items)) => {
                scratch.clear();
                for item in items.iter() {
                    netstring::append_long(scratch, *item)?;
                }
                netstring::append(out, scratch.as_slice())?;
            }
            _ => return Err(NetstringError::Kind { field: desc.name }),
        }
    }
    scratch.clear();
    Ok(())
}

/// Split a complete netstring payload into its inner netstrings.
///
/// The outer netstring is already complete here, so running short is a
/// truncation, not a reason to wait for more input.
fn split_nested(mut payload: &[u8]) -> NsResult<Vec<&[u8]>> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        let (item, used) = netstring::parse(payload).map_err(|e| match e {
            NetstringError::Incomplete => NetstringError::Format,
            other => other,
        })?;
        items.push(item);
        payload = &payload[used..];
    }
    Ok(items)
}

/// Walk `input` splitting off one netstring per field.
///
/// Returns the decoded values and the number of unconsumed trailing bytes.
pub fn deserialize_fields<'a>(map: &[FieldDesc], input: &'a [u8]) -> NsResult<(Vec<Value<'a>>, usize)> {
    let mut values = Vec::with_capacity(map.len());
    let mut off = 0;

    for desc in map {
        let (payload, used) = netstring::parse(&input[off..])?;
        off += used;
        let value = match desc.kind {
            FieldKind::Data => Value::Data(payload),
            FieldKind::Long => Value::Long(netstring::parse_long(payload)?),
            FieldKind::DataArray => Value::DataArray(split_nested(payload)?),
            FieldKind::LongArray => Value::LongArray(
                split_nested(payload)?
                    .into_iter()
                    .map(netstring::parse_long)
                    .collect::<NsResult<Vec<_>>>()?,
            ),
            FieldKind::Record => {
                split_nested(payload)?;
                Value::Record(payload)
            }
        };
        values.push(value);
    }

    Ok((values, input.len() - off))
}

// ── Typed records ──

/// A message type with a static field map.
pub trait Record<'a>: Sized {
    const FIELDS: &'static [FieldDesc];

    /// Field values in map order.
    fn fields_ref(&self) -> Vec<FieldRef<'_>>;

    /// Build from decoded values in map order.
    fn from_values(values: Vec<Value<'a>>) -> NsResult<Self>;

    fn serialize_with(&self, out: &mut Buffer, scratch: &mut Buffer) -> NsResult<()> {
        serialize_fields(Self::FIELDS, &self.fields_ref(), out, scratch)
    }

    fn serialize(&self, out: &mut Buffer) -> NsResult<()> {
        let mut scratch = Buffer::new();
        self.serialize_with(out, &mut scratch)
    }

    /// Decode from the front of `input`; returns the record and the length
    /// of the unconsumed remainder.
    fn deserialize(input: &'a [u8]) -> NsResult<(Self, usize)> {
        let (values, left) = deserialize_fields(Self::FIELDS, input)?;
        Ok((Self::from_values(values)?, left))
    }
}

/// Conversion from a struct field to its encode view.
pub trait ToFieldRef {
    fn to_field_ref(&self) -> FieldRef<'_>;
}

/// Conversion from a decoded value to a struct field.
pub trait FromValue<'a>: Sized {
    fn from_value(value: Value<'a>, field: &'static str) -> NsResult<Self>;
}

impl<'a> ToFieldRef for &'a [u8] {
    fn to_field_ref(&self) -> FieldRef<'_> {
        FieldRef::Data(*self)
    }
}

impl ToFieldRef for i64 {
    fn to_field_ref(&self) -> FieldRef<'_> {
        FieldRef::Long(*self)
    }
}

impl<'a> ToFieldRef for Vec<&'a [u8]> {
    fn to_field_ref(&self) -> FieldRef<'_> {
        FieldRef::DataArray(self.as_slice())
    }
}

impl ToFieldRef for Vec<i64> {
    fn to_field_ref(&self) -> FieldRef<'_> {
        FieldRef::LongArray(self.as_slice())
    }
}

impl<'a> FromValue<'a> for &'a [u8] {
    fn from_value(value: Value<'a>, field: &'static str) -> NsResult<Self> {
        match value {
            Value::Data(d) | Value::Record(d) => Ok(d),
            _ => Err(NetstringError::Kind { field }),
        }
    }
}

impl<'a> FromValue<'a> for i64 {
    fn from_value(value: Value<'a>, field: &'static str) -> NsResult<Self> {
        match value {
            Value::Long(v) => Ok(v),
            _ => Err(NetstringError::Kind { field }),
        }
    }
}

impl<'a> FromValue<'a> for Vec<&'a [u8]> {
    fn from_value(value: Value<'a>, field: &'static str) -> NsResult<Self> {
        match value {
            Value::DataArray(v) => Ok(v),
            _ => Err(NetstringError::Kind { field }),
        }
    }
}

impl<'a> FromValue<'a> for Vec<i64> {
    fn from_value(value: Value<'a>, field: &'static str) -> NsResult<Self> {
        match value {
            Value::LongArray(v) => Ok(v),
            _ => Err(NetstringError::Kind { field }),
        }
    }
}

#[doc(hidden)]
pub fn take_field<'a, T: FromValue<'a>>(
    values: &mut std::vec::IntoIter<Value<'a>>,
    field: &'static str,
) -> NsResult<T> {
    let value = values.next().ok_or(NetstringError::Kind { field })?;
    T::from_value(value, field)
}

/// Declare a record struct and its field map.
///
/// Fields are declared by kind (`Data`, `Long`, `DataArray`, `LongArray`,
/// `Record`) and get the matching borrowed Rust type. The struct takes one
/// lifetime parameter, which at least one byte-valued field must use.
#[macro_export]
macro_rules! netstring_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident<$lt:lifetime> {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $kind:ident
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        $vis struct $name<$lt> {
            $(
                $(#[$fmeta])*
                $fvis $field: $crate::record_field_type!($kind, $lt),
            )*
        }

        impl<$lt> $crate::record::Record<$lt> for $name<$lt> {
            const FIELDS: &'static [$crate::record::FieldDesc] = &[
                $(
                    $crate::record::FieldDesc {
                        name: stringify!($field),
                        kind: $crate::record::FieldKind::$kind,
                    },
                )*
            ];

            fn fields_ref(&self) -> ::std::vec::Vec<$crate::record::FieldRef<'_>> {
                ::std::vec![
                    $( $crate::record::ToFieldRef::to_field_ref(&self.$field), )*
                ]
            }

            fn from_values(
                values: ::std::vec::Vec<$crate::record::Value<$lt>>,
            ) -> $crate::error::NsResult<Self> {
                let expected = <Self as $crate::record::Record<$lt>>::FIELDS.len();
                if values.len() != expected {
                    return Err($crate::error::NetstringError::Arity {
                        expected,
                        got: values.len(),
                    });
                }
                #[allow(unused_mut, unused_variables)]
                let mut values = values.into_iter();
                Ok(Self {
                    $( $field: $crate::record::take_field(&mut values, stringify!($field))?, )*
                })
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! record_field_type {
    (Data, $lt:lifetime) => { &$lt [u8] };
    (Long, $lt:lifetime) => { i64 };
    (DataArray, $lt:lifetime) => { ::std::vec::Vec<&$lt [u8]> };
    (LongArray, $lt:lifetime) => { ::std::vec::Vec<i64> };
    (Record, $lt:lifetime) => { &$lt [u8] };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    crate::netstring_record! {
        struct Sweep<'a> {
            addrs: Data,
            arp: Data,
        }
    }

    crate::netstring_record! {
        struct Job<'a> {
            name: Data,
            timeout: Long,
            params: DataArray,
            ports: LongArray,
            inner: Record,
        }
    }

    fn encode<'r, R: Record<'r>>(rec: &R) -> Vec<u8> {
        let mut out = Buffer::new();
        rec.serialize(&mut out).unwrap();
        out.as_slice().to_vec()
    }

    #[test]
    fn test_sweeper_shape_wire_bytes() {
        let req = Sweep { addrs: b"10.0.0.1", arp: b"yes" };
        let wire = encode(&req);
        assert_eq!(wire, b"8:10.0.0.1,3:yes,");

        let (back, left) = Sweep::deserialize(&wire).unwrap();
        assert_eq!(back, req);
        assert_eq!(left, 0);
    }

    #[test]
    fn test_left_reports_remainder() {
        let (req, left) = Sweep::deserialize(b"1:a,1:b,extra").unwrap();
        assert_eq!(req.addrs, b"a");
        assert_eq!(req.arp, b"b");
        assert_eq!(left, 5);
    }

    #[test]
    fn test_field_map() {
        assert_eq!(Sweep::FIELDS.len(), 2);
        assert_eq!(Sweep::FIELDS[0].name, "addrs");
        assert_eq!(Job::FIELDS[2].kind, FieldKind::DataArray);
        assert_eq!(Job::FIELDS[4].kind, FieldKind::Record);
    }

    #[test]
    fn test_arrays_and_nested() {
        let inner = encode(&Sweep { addrs: b"x", arp: b"" });
        let job = Job {
            name: b"scan",
            timeout: -30,
            params: vec![b"-p", b"80,443"],
            ports: vec![22, 8080],
            inner: &inner,
        };
        let wire = encode(&job);
        assert_eq!(
            &wire[..],
            &b"4:scan,3:-30,14:2:-p,6:80,443,,12:2:22,4:8080,,7:1:x,0:,,"[..]
        );

        let (back, left) = Job::deserialize(&wire).unwrap();
        assert_eq!(left, 0);
        assert_eq!(back, job);
        let (nested, _) = Sweep::deserialize(back.inner).unwrap();
        assert_eq!(nested.addrs, b"x");
    }

    #[test]
    fn test_truncated_array_is_format_error() {
        // outer netstring complete, inner one cut short
        let wire = b"4:scan,2:30,5:3:ab,,0:,0:,";
        assert_eq!(Job::deserialize(wire), Err(NetstringError::Format));
    }

    #[test]
    fn test_bad_long_is_format_error() {
        let wire = b"4:scan,2:3x,0:,0:,0:,";
        assert_eq!(Job::deserialize(wire), Err(NetstringError::Format));
    }

    #[test]
    fn test_kind_mismatch_on_serialize() {
        let mut out = Buffer::new();
        let mut scratch = Buffer::new();
        let err = serialize_fields(
            Sweep::FIELDS,
            &[FieldRef::Long(1), FieldRef::Data(b"")],
            &mut out,
            &mut scratch,
        );
        assert_eq!(err, Err(NetstringError::Kind { field: "addrs" }));
    }

    #[test]
    fn test_arity_mismatch() {
        let mut out = Buffer::new();
        let mut scratch = Buffer::new();
        let err = serialize_fields(Sweep::FIELDS, &[FieldRef::Data(b"")], &mut out, &mut scratch);
        assert_eq!(err, Err(NetstringError::Arity { expected: 2, got: 1 }));

        let err = Sweep::from_values(vec![Value::Data(b"a")]);
        assert_eq!(err, Err(NetstringError::Arity { expected: 2, got: 1 }));
    }

    #[test]
    fn test_strict_prefix_incomplete() {
        let wire = encode(&Sweep { addrs: b"10.0.0.1", arp: b"yes" });
        for n in 0..wire.len() {
            assert_eq!(Sweep::deserialize(&wire[..n]), Err(NetstringError::Incomplete));
        }
    }

    proptest! {
        #[test]
        fn prop_roundtrip_and_prefixes(
            name in proptest::collection::vec(any::<u8>(), 0..40),
            timeout in any::<i64>(),
            params in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..12), 0..5),
            ports in proptest::collection::vec(any::<i64>(), 0..5),
        ) {
            let params_ref: Vec<&[u8]> = params.iter().map(|p| p.as_slice()).collect();
            let job = Job { name: &name, timeout, params: params_ref, ports, inner: b"" };
            let wire = encode(&job);

            let (back, left) = Job::deserialize(&wire).unwrap();
            prop_assert_eq!(left, 0);
            prop_assert_eq!(&back, &job);

            for n in 0..wire.len() {
                prop_assert_eq!(Job::deserialize(&wire[..n]), Err(NetstringError::Incomplete));
            }
        }
    }
}
