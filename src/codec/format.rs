use super::{Struct, StructError};

/// Byte order applied to every multi-byte field of a [`Struct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    Little,
    /// Used when a format string carries no byte-order marker.
    #[default]
    Big,
}

impl Endianness {
    fn marker(self) -> char {
        match self {
            Endianness::Little => '<',
            Endianness::Big => '>',
        }
    }
}

/// Kind of a value-bearing field. Padding never becomes a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Char,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F16,
    F32,
    F64,
    /// `s`: fixed-length byte string.
    Bytes,
    /// `p`: length byte followed by at most `width - 1` bytes.
    Pascal,
}

impl FieldKind {
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Char => "char",
            FieldKind::Bool => "bool",
            FieldKind::I8 => "i8",
            FieldKind::U8 => "u8",
            FieldKind::I16 => "i16",
            FieldKind::U16 => "u16",
            FieldKind::I32 => "i32",
            FieldKind::U32 => "u32",
            FieldKind::I64 => "i64",
            FieldKind::U64 => "u64",
            FieldKind::F16 => "f16",
            FieldKind::F32 => "f32",
            FieldKind::F64 => "f64",
            FieldKind::Bytes => "bytes",
            FieldKind::Pascal => "pascal bytes",
        }
    }

    /// Width of one repetition, `None` for the string kinds whose count is a length.
    fn scalar_width(self) -> Option<usize> {
        match self {
            FieldKind::Char | FieldKind::Bool | FieldKind::I8 | FieldKind::U8 => Some(1),
            FieldKind::I16 | FieldKind::U16 | FieldKind::F16 => Some(2),
            FieldKind::I32 | FieldKind::U32 | FieldKind::F32 => Some(4),
            FieldKind::I64 | FieldKind::U64 | FieldKind::F64 => Some(8),
            FieldKind::Bytes | FieldKind::Pascal => None,
        }
    }

    fn type_char(self) -> char {
        match self {
            FieldKind::Char => 'c',
            FieldKind::Bool => '?',
            FieldKind::I8 => 'b',
            FieldKind::U8 => 'B',
            FieldKind::I16 => 'h',
            FieldKind::U16 => 'H',
            FieldKind::I32 => 'i',
            FieldKind::U32 => 'I',
            FieldKind::I64 => 'q',
            FieldKind::U64 => 'Q',
            FieldKind::F16 => 'e',
            FieldKind::F32 => 'f',
            FieldKind::F64 => 'd',
            FieldKind::Bytes => 's',
            FieldKind::Pascal => 'p',
        }
    }
}

/// Position of one field inside a packed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    pub offset: usize,
    pub width: usize,
}

enum Token {
    Pad,
    Field(FieldKind),
}

fn token_for(ch: char) -> Option<Token> {
    let kind = match ch {
        'x' => return Some(Token::Pad),
        'c' => FieldKind::Char,
        '?' => FieldKind::Bool,
        'b' => FieldKind::I8,
        'B' => FieldKind::U8,
        'h' => FieldKind::I16,
        'H' => FieldKind::U16,
        'i' | 'l' => FieldKind::I32,
        'I' | 'L' => FieldKind::U32,
        'q' => FieldKind::I64,
        'Q' => FieldKind::U64,
        'e' => FieldKind::F16,
        'f' => FieldKind::F32,
        'd' => FieldKind::F64,
        's' => FieldKind::Bytes,
        'p' => FieldKind::Pascal,
        _ => return None,
    };
    Some(Token::Field(kind))
}

#[derive(Debug, Default)]
struct Layout {
    fields: Vec<Field>,
    size: usize,
}

impl Layout {
    fn pad(&mut self, count: usize) -> Option<()> {
        self.size = self.size.checked_add(count)?;
        Some(())
    }

    fn field(&mut self, kind: FieldKind, count: usize) -> Option<()> {
        match kind.scalar_width() {
            Some(width) => {
                for _ in 0..count {
                    self.fields.push(Field { kind, offset: self.size, width });
                    self.size = self.size.checked_add(width)?;
                }
            }
            None => {
                self.fields.push(Field { kind, offset: self.size, width: count });
                self.size = self.size.checked_add(count)?;
            }
        }
        Some(())
    }
}

/// Compiles `format` into a [`Struct`].
pub(super) fn compile(format: &str) -> Result<Struct, StructError> {
    let invalid = |reason: &str| StructError::InvalidFormat {
        format: format.to_string(),
        reason: reason.to_string(),
    };

    let (order, body) = match format.as_bytes().first() {
        Some(b'<') => (Endianness::Little, &format[1..]),
        Some(b'>') => (Endianness::Big, &format[1..]),
        _ => (Endianness::Big, format),
    };

    let mut layout = Layout::default();
    let mut chars = body.chars().peekable();

    while let Some(ch) = chars.next() {
        let (count, type_char) = if ch.is_ascii_digit() {
            if ch == '0' {
                return Err(invalid("repeat count must start with 1-9"));
            }
            let mut count = ch as usize - '0' as usize;
            let type_char = loop {
                match chars.next() {
                    Some(d) if d.is_ascii_digit() => {
                        count = count
                            .checked_mul(10)
                            .and_then(|c| c.checked_add(d as usize - '0' as usize))
                            .ok_or_else(|| invalid("repeat count overflows"))?;
                    }
                    Some(t) => break t,
                    None => return Err(invalid("repeat count without a type character")),
                }
            };
            (count, type_char)
        } else {
            (1, ch)
        };

        let token = token_for(type_char)
            .ok_or_else(|| invalid(&format!("unknown type character {type_char:?}")))?;
        let fits = match token {
            Token::Pad => layout.pad(count),
            Token::Field(kind) => layout.field(kind, count),
        };
        fits.ok_or_else(|| invalid("structure size overflows"))?;
    }

    Ok(Struct::from_parts(format.to_string(), order, layout.fields, layout.size))
}

/// Builds a [`Struct`] from explicit field widths, without going through a
/// format string. Variable-length records (paths, reserved areas) pass their
/// length as an argument instead of splicing it into text.
#[derive(Debug)]
pub struct StructBuilder {
    order: Endianness,
    layout: Layout,
    format: String,
}

impl StructBuilder {
    pub fn new(order: Endianness) -> Self {
        Self {
            order,
            layout: Layout::default(),
            format: order.marker().to_string(),
        }
    }

    pub fn little() -> Self {
        Self::new(Endianness::Little)
    }

    pub fn big() -> Self {
        Self::new(Endianness::Big)
    }

    fn record(&mut self, count: usize, type_char: char) {
        if count != 1 {
            self.format.push_str(&count.to_string());
        }
        self.format.push(type_char);
    }

    fn push(mut self, kind: FieldKind, count: usize) -> Self {
        self.layout
            .field(kind, count)
            .expect("struct size overflows usize");
        self.record(count, kind.type_char());
        self
    }

    /// Zero bytes on pack, skipped on unpack.
    pub fn pad(mut self, len: usize) -> Self {
        if len > 0 {
            self.layout.pad(len).expect("struct size overflows usize");
            self.record(len, 'x');
        }
        self
    }

    pub fn char(self) -> Self {
        self.push(FieldKind::Char, 1)
    }

    pub fn bool(self) -> Self {
        self.push(FieldKind::Bool, 1)
    }

    pub fn i8(self) -> Self {
        self.push(FieldKind::I8, 1)
    }

    pub fn u8(self) -> Self {
        self.push(FieldKind::U8, 1)
    }

    pub fn i16(self) -> Self {
        self.push(FieldKind::I16, 1)
    }

    pub fn u16(self) -> Self {
        self.push(FieldKind::U16, 1)
    }

    pub fn i32(self) -> Self {
        self.push(FieldKind::I32, 1)
    }

    pub fn u32(self) -> Self {
        self.push(FieldKind::U32, 1)
    }

    pub fn i64(self) -> Self {
        self.push(FieldKind::I64, 1)
    }

    pub fn u64(self) -> Self {
        self.push(FieldKind::U64, 1)
    }

    pub fn f16(self) -> Self {
        self.push(FieldKind::F16, 1)
    }

    pub fn f32(self) -> Self {
        self.push(FieldKind::F32, 1)
    }

    pub fn f64(self) -> Self {
        self.push(FieldKind::F64, 1)
    }

    /// Fixed-length byte string of `len` bytes.
    pub fn bytes(self, len: usize) -> Self {
        self.push(FieldKind::Bytes, len)
    }

    /// Pascal string occupying `len` bytes including its length byte.
    pub fn pascal(self, len: usize) -> Self {
        self.push(FieldKind::Pascal, len.max(1))
    }

    /// # Panics
    ///
    /// Field methods panic if the accumulated size overflows `usize`.
    pub fn build(self) -> Struct {
        Struct::from_parts(self.format, self.order, self.layout.fields, self.layout.size)
    }
}
