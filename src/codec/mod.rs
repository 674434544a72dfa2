//! Binary struct codec.
//!
//! A [`Struct`] is compiled from a compact format string (an optional `<`/`>`
//! byte-order marker followed by `(count?)(type)` tokens) or assembled with a
//! [`StructBuilder`], and then packs and unpacks fixed-size records. Every
//! wire record of the protocol is defined with it.

pub mod format;
pub mod value;

use std::iter::FusedIterator;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use half::f16;
use thiserror::Error;

pub use format::{Endianness, Field, FieldKind, StructBuilder};
pub use value::Value;

/// Struct codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructError {
    #[error("Invalid format string {format:?}: {reason}")]
    InvalidFormat { format: String, reason: String },

    #[error("Structure larger than remaining buffer (needs {needed} bytes at offset {offset}, buffer holds {available})")]
    BufferTooSmall {
        needed: usize,
        offset: usize,
        available: usize,
    },

    #[error("Expected {expected} values for structure, got {got}")]
    ValueCount { expected: usize, got: usize },

    #[error("Value {index} is {found} but the field expects {expected}")]
    ValueType {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Buffer of {len} bytes is not a whole number of {size}-byte records")]
    UnalignedBuffer { len: usize, size: usize },
}

/// A compiled, immutable record layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Struct {
    format: String,
    order: Endianness,
    fields: Vec<Field>,
    size: usize,
}

impl Struct {
    pub fn compile(format: &str) -> Result<Self, StructError> {
        format::compile(format)
    }

    pub fn builder(order: Endianness) -> StructBuilder {
        StructBuilder::new(order)
    }

    fn from_parts(format: String, order: Endianness, fields: Vec<Field>, size: usize) -> Self {
        Self { format, order, fields, size }
    }

    /// Packed size in bytes, padding included.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn byte_order(&self) -> Endianness {
        self.order
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn unpack(&self, buffer: &[u8]) -> Result<Vec<Value>, StructError> {
        self.unpack_from(buffer, 0)
    }

    /// Decodes one record starting at `offset`.
    pub fn unpack_from(&self, buffer: &[u8], offset: usize) -> Result<Vec<Value>, StructError> {
        let record = self.region(buffer.len(), offset).map(|range| &buffer[range])?;
        Ok(self.decode(record))
    }

    pub fn pack(&self, values: &[Value]) -> Result<Vec<u8>, StructError> {
        let mut buffer = vec![0u8; self.size];
        self.pack_into(&mut buffer, 0, values)?;
        Ok(buffer)
    }

    /// Encodes one record at `offset`. The whole record region is zeroed
    /// first, so padding and short strings never carry stale bytes.
    pub fn pack_into(&self, buffer: &mut [u8], offset: usize, values: &[Value]) -> Result<(), StructError> {
        if values.len() != self.fields.len() {
            return Err(StructError::ValueCount {
                expected: self.fields.len(),
                got: values.len(),
            });
        }
        let range = self.region(buffer.len(), offset)?;
        let record = &mut buffer[range];
        record.fill(0);
        match self.order {
            Endianness::Little => encode_fields::<LittleEndian>(&self.fields, values, record),
            Endianness::Big => encode_fields::<BigEndian>(&self.fields, values, record),
        }
    }

    /// Lazily decodes consecutive records. The iterator is cheap to clone,
    /// and calling this again starts over from the first record.
    pub fn iter_unpack<'a>(&'a self, buffer: &'a [u8]) -> Result<IterUnpack<'a>, StructError> {
        if self.size > 0 && buffer.len() % self.size != 0 {
            return Err(StructError::UnalignedBuffer {
                len: buffer.len(),
                size: self.size,
            });
        }
        Ok(IterUnpack {
            layout: self,
            buffer,
            offset: 0,
        })
    }

    fn region(&self, available: usize, offset: usize) -> Result<std::ops::Range<usize>, StructError> {
        match offset.checked_add(self.size) {
            Some(end) if end <= available => Ok(offset..end),
            _ => Err(StructError::BufferTooSmall {
                needed: self.size,
                offset,
                available,
            }),
        }
    }

    fn decode(&self, record: &[u8]) -> Vec<Value> {
        match self.order {
            Endianness::Little => decode_fields::<LittleEndian>(&self.fields, record),
            Endianness::Big => decode_fields::<BigEndian>(&self.fields, record),
        }
    }
}

impl FromStr for Struct {
    type Err = StructError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Struct::compile(s)
    }
}

fn decode_fields<E: ByteOrder>(fields: &[Field], record: &[u8]) -> Vec<Value> {
    fields
        .iter()
        .map(|field| {
            let bytes = &record[field.offset..field.offset + field.width];
            match field.kind {
                FieldKind::Char => Value::Char(bytes[0]),
                FieldKind::Bool => Value::Bool(bytes[0] != 0),
                FieldKind::I8 => Value::I8(bytes[0] as i8),
                FieldKind::U8 => Value::U8(bytes[0]),
                FieldKind::I16 => Value::I16(E::read_i16(bytes)),
                FieldKind::U16 => Value::U16(E::read_u16(bytes)),
                FieldKind::I32 => Value::I32(E::read_i32(bytes)),
                FieldKind::U32 => Value::U32(E::read_u32(bytes)),
                FieldKind::I64 => Value::I64(E::read_i64(bytes)),
                FieldKind::U64 => Value::U64(E::read_u64(bytes)),
                FieldKind::F16 => Value::F16(f16::from_bits(E::read_u16(bytes))),
                FieldKind::F32 => Value::F32(E::read_f32(bytes)),
                FieldKind::F64 => Value::F64(E::read_f64(bytes)),
                FieldKind::Bytes => Value::Bytes(bytes.to_vec()),
                FieldKind::Pascal => {
                    let len = usize::from(bytes[0]).min(field.width - 1);
                    Value::Bytes(bytes[1..1 + len].to_vec())
                }
            }
        })
        .collect()
}

fn encode_fields<E: ByteOrder>(fields: &[Field], values: &[Value], record: &mut [u8]) -> Result<(), StructError> {
    for (index, (field, value)) in fields.iter().zip(values).enumerate() {
        let bytes = &mut record[field.offset..field.offset + field.width];
        match (field.kind, value) {
            (FieldKind::Char, Value::Char(v)) | (FieldKind::U8, Value::U8(v)) => bytes[0] = *v,
            (FieldKind::Bool, Value::Bool(v)) => bytes[0] = u8::from(*v),
            (FieldKind::I8, Value::I8(v)) => bytes[0] = *v as u8,
            (FieldKind::I16, Value::I16(v)) => E::write_i16(bytes, *v),
            (FieldKind::U16, Value::U16(v)) => E::write_u16(bytes, *v),
            (FieldKind::I32, Value::I32(v)) => E::write_i32(bytes, *v),
            (FieldKind::U32, Value::U32(v)) => E::write_u32(bytes, *v),
            (FieldKind::I64, Value::I64(v)) => E::write_i64(bytes, *v),
            (FieldKind::U64, Value::U64(v)) => E::write_u64(bytes, *v),
            (FieldKind::F16, Value::F16(v)) => E::write_u16(bytes, v.to_bits()),
            (FieldKind::F32, Value::F32(v)) => E::write_f32(bytes, *v),
            (FieldKind::F64, Value::F64(v)) => E::write_f64(bytes, *v),
            (FieldKind::Bytes, Value::Bytes(v)) => {
                let len = v.len().min(bytes.len());
                bytes[..len].copy_from_slice(&v[..len]);
            }
            (FieldKind::Pascal, Value::Bytes(v)) => {
                let len = v.len().min(field.width - 1).min(usize::from(u8::MAX));
                bytes[0] = len as u8;
                bytes[1..1 + len].copy_from_slice(&v[..len]);
            }
            (kind, value) => {
                return Err(StructError::ValueType {
                    index,
                    expected: kind.name(),
                    found: value.kind_name(),
                });
            }
        }
    }
    Ok(())
}

/// Iterator returned by [`Struct::iter_unpack`].
#[derive(Debug, Clone)]
pub struct IterUnpack<'a> {
    layout: &'a Struct,
    buffer: &'a [u8],
    offset: usize,
}

impl Iterator for IterUnpack<'_> {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let size = self.layout.size;
        if size == 0 || self.offset + size > self.buffer.len() {
            return None;
        }
        let record = &self.buffer[self.offset..self.offset + size];
        self.offset += size;
        Some(self.layout.decode(record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.layout.size {
            0 => 0,
            size => (self.buffer.len() - self.offset) / size,
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for IterUnpack<'_> {}

impl FusedIterator for IterUnpack<'_> {}
