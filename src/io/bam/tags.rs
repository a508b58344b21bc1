//! BAM optional fields (auxiliary tags).
//!
//! Each field is encoded as:
//! - 2 bytes: tag name (e.g. `NM`)
//! - 1 byte: value type (`A`, `c`, `C`, `s`, `S`, `i`, `I`, `f`, `Z`, `H`, `B`)
//! - N bytes: value (layout depends on type)
//!
//! Integers are held as a single [`TagValue::Int`] and written with the
//! smallest BAM type that holds them: non-negative values use `C`, `S` or
//! `I`; negative values use `c`, `s` or `i`. Numeric arrays (`B`) carry an
//! element type byte, a 4-byte element count and the packed elements.

use super::error::{BamDecodeError, BamEncodeError};
use std::fmt;

/// Tag value types in BAM format.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// Character (A): single printable character
    Char(u8),
    /// Integer (c, C, s, S, i, I): width chosen on encode
    Int(i64),
    /// Float (f): IEEE 754 single-precision float
    Float(f32),
    /// String (Z): null-terminated string
    String(String),
    /// Hex string (H): hex digits stored as text
    Hex(String),
    /// Array (B): typed array of numbers
    Array(ArrayValue),
}

/// Array value types for tag arrays (B type).
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    /// Array of signed 8-bit integers
    Int8(Vec<i8>),
    /// Array of unsigned 8-bit integers
    UInt8(Vec<u8>),
    /// Array of signed 16-bit integers
    Int16(Vec<i16>),
    /// Array of unsigned 16-bit integers
    UInt16(Vec<u16>),
    /// Array of signed 32-bit integers
    Int32(Vec<i32>),
    /// Array of unsigned 32-bit integers
    UInt32(Vec<u32>),
    /// Array of 32-bit floats
    Float(Vec<f32>),
}

impl ArrayValue {
    /// Element type byte written after `B`.
    pub fn subtype(&self) -> u8 {
        match self {
            ArrayValue::Int8(_) => b'c',
            ArrayValue::UInt8(_) => b'C',
            ArrayValue::Int16(_) => b's',
            ArrayValue::UInt16(_) => b'S',
            ArrayValue::Int32(_) => b'i',
            ArrayValue::UInt32(_) => b'I',
            ArrayValue::Float(_) => b'f',
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Int8(v) => v.len(),
            ArrayValue::UInt8(v) => v.len(),
            ArrayValue::Int16(v) => v.len(),
            ArrayValue::UInt16(v) => v.len(),
            ArrayValue::Int32(v) => v.len(),
            ArrayValue::UInt32(v) => v.len(),
            ArrayValue::Float(v) => v.len(),
        }
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn element_size(&self) -> usize {
        match self {
            ArrayValue::Int8(_) | ArrayValue::UInt8(_) => 1,
            ArrayValue::Int16(_) | ArrayValue::UInt16(_) => 2,
            ArrayValue::Int32(_) | ArrayValue::UInt32(_) | ArrayValue::Float(_) => 4,
        }
    }

    fn write_elements(&self, out: &mut Vec<u8>) {
        match self {
            ArrayValue::Int8(v) => out.extend(v.iter().map(|&x| x as u8)),
            ArrayValue::UInt8(v) => out.extend_from_slice(v),
            ArrayValue::Int16(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            ArrayValue::UInt16(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            ArrayValue::Int32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            ArrayValue::UInt32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            ArrayValue::Float(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        }
    }
}

/// A single BAM optional field with name and value.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Two-character tag name (e.g., "NM", "AS", "RG")
    pub name: [u8; 2],
    /// Tag value
    pub value: TagValue,
}

impl Tag {
    /// Create a tag.
    pub fn new(name: [u8; 2], value: TagValue) -> Self {
        Self { name, value }
    }

    /// Get tag name as a string slice.
    pub fn name_str(&self) -> &str {
        std::str::from_utf8(&self.name).unwrap_or("??")
    }

    /// Type code this tag is written with.
    ///
    /// # Errors
    ///
    /// Integer values outside `i32::MIN..=u32::MAX` have no BAM type.
    pub fn type_code(&self) -> Result<u8, BamEncodeError> {
        match &self.value {
            TagValue::Char(_) => Ok(b'A'),
            TagValue::Int(v) => integer_type_code(*v).ok_or_else(|| BamEncodeError::IntegerOutOfRange {
                tag: self.name,
                value: v.to_string(),
            }),
            TagValue::Float(_) => Ok(b'f'),
            TagValue::String(_) => Ok(b'Z'),
            TagValue::Hex(_) => Ok(b'H'),
            TagValue::Array(_) => Ok(b'B'),
        }
    }

    /// Exact number of bytes [`encode_tag`] will emit, validating the value.
    pub fn encoded_size(&self) -> Result<usize, BamEncodeError> {
        let type_code = self.type_code()?;
        let value_size = match &self.value {
            TagValue::Char(_) => 1,
            TagValue::Int(_) => integer_width(type_code),
            TagValue::Float(_) => 4,
            TagValue::String(s) | TagValue::Hex(s) => {
                if s.as_bytes().contains(&0) {
                    return Err(BamEncodeError::InvalidTagValue {
                        tag: self.name,
                        message: "string contains a NUL byte".to_string(),
                    });
                }
                s.len() + 1
            }
            TagValue::Array(array) => {
                if array.len() > u32::MAX as usize {
                    return Err(BamEncodeError::FieldTooLarge {
                        field: "array tag",
                        size: array.len(),
                        max: u32::MAX as usize,
                    });
                }
                1 + 4 + array.len() * array.element_size()
            }
        };
        Ok(3 + value_size)
    }

    /// Parse a SAM-style optional field from its three text parts.
    ///
    /// Integer types (`c`, `C`, `s`, `S`, `i`, `I`) all become
    /// [`TagValue::Int`]; arrays use `subtype,v1,v2,...`.
    ///
    /// # Example
    ///
    /// ```
    /// use bamforge::io::bam::{Tag, TagValue, ArrayValue};
    ///
    /// let nm = Tag::from_sam("NM", 'i', "3").unwrap();
    /// assert_eq!(nm.value, TagValue::Int(3));
    ///
    /// let arr = Tag::from_sam("XB", 'B', "s,-1,200").unwrap();
    /// assert_eq!(arr.value, TagValue::Array(ArrayValue::Int16(vec![-1, 200])));
    ///
    /// assert!(Tag::from_sam("XI", 'i', "4294967296").is_err());
    /// assert!(Tag::from_sam("XQ", 'Q', "1").is_err());
    /// ```
    pub fn from_sam(tag: &str, type_code: char, value: &str) -> Result<Tag, BamEncodeError> {
        let bytes = tag.as_bytes();
        let name = match bytes {
            [a, b] => [*a, *b],
            _ => {
                return Err(BamEncodeError::InvalidTagValue {
                    tag: [b'?', b'?'],
                    message: format!("tag name '{}' must be two characters", tag),
                })
            }
        };

        let invalid = |message: String| BamEncodeError::InvalidTagValue { tag: name, message };

        let value = match type_code {
            'A' => {
                let mut chars = value.bytes();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => TagValue::Char(c),
                    _ => return Err(invalid(format!("'{}' is not a single character", value))),
                }
            }
            'c' | 'C' | 's' | 'S' | 'i' | 'I' => {
                let parsed = parse_integer(value).map_err(|out_of_range| {
                    if out_of_range {
                        BamEncodeError::IntegerOutOfRange {
                            tag: name,
                            value: value.to_string(),
                        }
                    } else {
                        invalid(format!("'{}' is not an integer", value))
                    }
                })?;
                if integer_type_code(parsed).is_none() {
                    return Err(BamEncodeError::IntegerOutOfRange {
                        tag: name,
                        value: value.to_string(),
                    });
                }
                TagValue::Int(parsed)
            }
            'f' => TagValue::Float(
                value
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| invalid(format!("'{}' is not a float", value)))?,
            ),
            'Z' => TagValue::String(value.to_string()),
            'H' => {
                if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(invalid(format!("'{}' is not a hex string", value)));
                }
                TagValue::Hex(value.to_string())
            }
            'B' => TagValue::Array(parse_sam_array(value).map_err(invalid)?),
            other => {
                return Err(BamEncodeError::UnsupportedTagType {
                    tag: name,
                    type_code: other,
                })
            }
        };

        Ok(Tag { name, value })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: ToString>(values: &[T]) -> String {
            values.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(",")
        }

        write!(f, "{}:", self.name_str())?;
        match &self.value {
            TagValue::Char(c) => write!(f, "A:{}", *c as char),
            TagValue::Int(i) => write!(f, "i:{}", i),
            TagValue::Float(fl) => write!(f, "f:{}", fl),
            TagValue::String(s) => write!(f, "Z:{}", s),
            TagValue::Hex(h) => write!(f, "H:{}", h),
            TagValue::Array(arr) => {
                write!(f, "B:{}", arr.subtype() as char)?;
                let body = match arr {
                    ArrayValue::Int8(v) => join(v),
                    ArrayValue::UInt8(v) => join(v),
                    ArrayValue::Int16(v) => join(v),
                    ArrayValue::UInt16(v) => join(v),
                    ArrayValue::Int32(v) => join(v),
                    ArrayValue::UInt32(v) => join(v),
                    ArrayValue::Float(v) => join(v),
                };
                if body.is_empty() {
                    Ok(())
                } else {
                    write!(f, ",{}", body)
                }
            }
        }
    }
}

/// Smallest BAM integer type code that holds `value`.
///
/// Non-negative values always take the unsigned codes (`C`, `S`, `I`);
/// negative values take `c`, `s` or `i`. Returns `None` outside
/// `i32::MIN..=u32::MAX`.
///
/// # Example
///
/// ```
/// use bamforge::io::bam::tags::integer_type_code;
///
/// assert_eq!(integer_type_code(255), Some(b'C'));
/// assert_eq!(integer_type_code(256), Some(b'S'));
/// assert_eq!(integer_type_code(-129), Some(b's'));
/// assert_eq!(integer_type_code(1 << 32), None);
/// ```
pub fn integer_type_code(value: i64) -> Option<u8> {
    if value >= 0 {
        if value <= u8::MAX as i64 {
            Some(b'C')
        } else if value <= u16::MAX as i64 {
            Some(b'S')
        } else if value <= u32::MAX as i64 {
            Some(b'I')
        } else {
            None
        }
    } else if value >= i8::MIN as i64 {
        Some(b'c')
    } else if value >= i16::MIN as i64 {
        Some(b's')
    } else if value >= i32::MIN as i64 {
        Some(b'i')
    } else {
        None
    }
}

fn integer_width(type_code: u8) -> usize {
    match type_code {
        b'c' | b'C' => 1,
        b's' | b'S' => 2,
        _ => 4,
    }
}

/// Write `value` with the given integer type code. `value` must fit that type.
fn write_integer(value: i64, type_code: u8, out: &mut Vec<u8>) {
    match type_code {
        b'c' => out.push(value as i8 as u8),
        b'C' => out.push(value as u8),
        b's' => out.extend_from_slice(&(value as i16).to_le_bytes()),
        b'S' => out.extend_from_slice(&(value as u16).to_le_bytes()),
        b'i' => out.extend_from_slice(&(value as i32).to_le_bytes()),
        _ => out.extend_from_slice(&(value as u32).to_le_bytes()),
    }
}

/// `Err(true)` when the text is numeric but too large for i64.
fn parse_integer(text: &str) -> Result<i64, bool> {
    let text = text.trim();
    text.parse::<i64>().map_err(|_| {
        let digits = text.strip_prefix(&['-', '+'][..]).unwrap_or(text);
        !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
    })
}

fn parse_sam_array(text: &str) -> Result<ArrayValue, String> {
    let mut parts = text.split(',');
    let subtype = parts.next().unwrap_or("");
    let elements: Vec<&str> = parts.filter(|s| !s.is_empty()).collect();

    fn collect<T: std::str::FromStr>(elements: &[&str], kind: &str) -> Result<Vec<T>, String> {
        elements
            .iter()
            .map(|e| {
                e.trim()
                    .parse::<T>()
                    .map_err(|_| format!("'{}' is not a valid {} array element", e, kind))
            })
            .collect()
    }

    Ok(match subtype {
        "c" => ArrayValue::Int8(collect(&elements, "int8")?),
        "C" => ArrayValue::UInt8(collect(&elements, "uint8")?),
        "s" => ArrayValue::Int16(collect(&elements, "int16")?),
        "S" => ArrayValue::UInt16(collect(&elements, "uint16")?),
        "i" => ArrayValue::Int32(collect(&elements, "int32")?),
        "I" => ArrayValue::UInt32(collect(&elements, "uint32")?),
        "f" => ArrayValue::Float(collect(&elements, "float")?),
        other => return Err(format!("unsupported array subtype '{}'", other)),
    })
}

/// Append one optional field to `out`.
///
/// On error `out` may hold a partial field; record encoding works on a
/// scratch buffer for that reason.
pub fn encode_tag(tag: &Tag, out: &mut Vec<u8>) -> Result<(), BamEncodeError> {
    let type_code = tag.type_code()?;
    out.extend_from_slice(&tag.name);
    out.push(type_code);

    match &tag.value {
        TagValue::Char(c) => out.push(*c),
        TagValue::Int(v) => write_integer(*v, type_code, out),
        TagValue::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
        TagValue::String(s) | TagValue::Hex(s) => {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        TagValue::Array(array) => {
            out.push(array.subtype());
            out.extend_from_slice(&(array.len() as u32).to_le_bytes());
            array.write_elements(out);
        }
    }

    Ok(())
}

/// Parse every optional field in the trailing bytes of a record.
pub fn parse_tags(mut data: &[u8]) -> Result<Vec<Tag>, BamDecodeError> {
    let mut tags = Vec::new();
    while !data.is_empty() {
        if data.len() < 3 {
            return Err(BamDecodeError::UnexpectedEof {
                context: "tag header",
                expected: 3,
                actual: data.len(),
            });
        }
        let name = [data[0], data[1]];
        let (value, consumed) = parse_tag_value(&data[3..], data[2], name)?;
        tags.push(Tag { name, value });
        data = &data[3 + consumed..];
    }
    Ok(tags)
}

fn take<'a>(data: &'a [u8], n: usize, context: &'static str) -> Result<&'a [u8], BamDecodeError> {
    data.get(..n).ok_or(BamDecodeError::UnexpectedEof {
        context,
        expected: n,
        actual: data.len(),
    })
}

fn read_array<T, const N: usize>(
    data: &[u8],
    count: usize,
    convert: fn([u8; N]) -> T,
) -> Result<Vec<T>, BamDecodeError> {
    let bytes_needed = count.checked_mul(N).ok_or_else(|| BamDecodeError::InvalidData {
        message: format!("Array size overflow: count={}", count),
    })?;
    let bytes = take(data, bytes_needed, "array tag")?;
    Ok(bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            convert(raw)
        })
        .collect())
}

/// Parse a single tag value from raw bytes.
///
/// Returns `(TagValue, bytes_consumed)`.
fn parse_tag_value(data: &[u8], type_code: u8, tag: [u8; 2]) -> Result<(TagValue, usize), BamDecodeError> {
    match type_code {
        b'A' => Ok((TagValue::Char(take(data, 1, "char tag")?[0]), 1)),
        b'c' => Ok((TagValue::Int(take(data, 1, "int8 tag")?[0] as i8 as i64), 1)),
        b'C' => Ok((TagValue::Int(take(data, 1, "uint8 tag")?[0] as i64), 1)),
        b's' => {
            let b = take(data, 2, "int16 tag")?;
            Ok((TagValue::Int(i16::from_le_bytes([b[0], b[1]]) as i64), 2))
        }
        b'S' => {
            let b = take(data, 2, "uint16 tag")?;
            Ok((TagValue::Int(u16::from_le_bytes([b[0], b[1]]) as i64), 2))
        }
        b'i' => {
            let b = take(data, 4, "int32 tag")?;
            Ok((TagValue::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64), 4))
        }
        b'I' => {
            let b = take(data, 4, "uint32 tag")?;
            Ok((TagValue::Int(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64), 4))
        }
        b'f' => {
            let b = take(data, 4, "float tag")?;
            Ok((TagValue::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]])), 4))
        }
        b'Z' | b'H' => {
            let field = if type_code == b'Z' { "string tag" } else { "hex tag" };
            let nul = data
                .iter()
                .position(|&b| b == 0)
                .ok_or(BamDecodeError::MissingNulTerminator { field, offset: 0 })?;
            let text = String::from_utf8(data[..nul].to_vec())
                .map_err(|source| BamDecodeError::InvalidUtf8 { field, source })?;
            let value = if type_code == b'Z' {
                TagValue::String(text)
            } else {
                TagValue::Hex(text)
            };
            Ok((value, nul + 1))
        }
        b'B' => {
            let header = take(data, 5, "array tag header")?;
            let subtype = header[0];
            let count = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
            let body = &data[5..];
            let array = match subtype {
                b'c' => ArrayValue::Int8(read_array(body, count, |[b]: [u8; 1]| b as i8)?),
                b'C' => ArrayValue::UInt8(read_array(body, count, |[b]: [u8; 1]| b)?),
                b's' => ArrayValue::Int16(read_array(body, count, i16::from_le_bytes)?),
                b'S' => ArrayValue::UInt16(read_array(body, count, u16::from_le_bytes)?),
                b'i' => ArrayValue::Int32(read_array(body, count, i32::from_le_bytes)?),
                b'I' => ArrayValue::UInt32(read_array(body, count, u32::from_le_bytes)?),
                b'f' => ArrayValue::Float(read_array(body, count, f32::from_le_bytes)?),
                other => return Err(BamDecodeError::InvalidArraySubtype { subtype: other }),
            };
            let consumed = 5 + count * array.element_size();
            Ok((TagValue::Array(array), consumed))
        }
        _ => Err(BamDecodeError::InvalidTagType { tag, type_code }),
    }
}
