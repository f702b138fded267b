//! Packing-spec driven register codec.
//!
//! A packing spec is a compact binary layout in the `struct` notation used by
//! register map files: an optional byte-order prefix followed by
//! `[count]code` items, e.g. `>H`, `<f`, `<4H`, `>16s`, `>hhf`.
//!
//! | code | meaning          | bytes |
//! |------|------------------|-------|
//! | `x`  | pad byte         | 1     |
//! | `c`  | char             | 1     |
//! | `b`/`B` | i8 / u8       | 1     |
//! | `?`  | bool             | 1     |
//! | `h`/`H` | i16 / u16     | 2     |
//! | `i`/`I`, `l`/`L` | i32 / u32 | 4 |
//! | `q`/`Q` | i64 / u64     | 8     |
//! | `f`/`d` | f32 / f64     | 4 / 8 |
//! | `s`  | byte string, count is its length | count |
//!
//! Byte order: `<` little, `>` and `!` big, `=` and `@` (or no prefix) native.
//! No alignment padding is ever inserted. Anything from a `#` on is a
//! directive: the register is excluded from live queries and the directive
//! never reaches the decoder.

use std::fmt;

use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::error::RegMapError;

/// Characters the type heuristic strips before counting leftovers.
const STRUCTURAL_CHARS: &str = "0123456789<>@=!#";
const FLOAT_CODES: &str = "fd";
const INTEGER_CODES: &str = "bBhHiIlLqQ?";
/// Largest layout a single register transaction can carry (125 words).
const MAX_PACKED_BYTES: usize = 250;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
    Native,
}

impl ByteOrder {
    const fn is_big(self) -> bool {
        match self {
            Self::Big => true,
            Self::Little => false,
            Self::Native => cfg!(target_endian = "big"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Code {
    Pad,
    Char,
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Bytes,
}

impl Code {
    const fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'x' => Self::Pad,
            'c' => Self::Char,
            'b' => Self::I8,
            'B' => Self::U8,
            '?' => Self::Bool,
            'h' => Self::I16,
            'H' => Self::U16,
            'i' | 'l' => Self::I32,
            'I' | 'L' => Self::U32,
            'q' => Self::I64,
            'Q' => Self::U64,
            'f' => Self::F32,
            'd' => Self::F64,
            's' => Self::Bytes,
            _ => return None,
        })
    }

    const fn size(self) -> usize {
        match self {
            Self::Pad | Self::Char | Self::I8 | Self::U8 | Self::Bool | Self::Bytes => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Item {
    code: Code,
    count: usize,
}

impl Item {
    const fn byte_len(self) -> usize {
        self.code.size() * self.count
    }

    const fn element_count(self) -> usize {
        match self.code {
            Code::Pad => 0,
            Code::Bytes => 1,
            _ => self.count,
        }
    }
}

/// Split a raw packing field into the decodable spec and the no-query flag.
#[must_use]
pub fn strip_directive(packing: &str) -> (&str, bool) {
    match packing.find('#') {
        Some(pos) => (packing[..pos].trim_end(), true),
        None => (packing, false),
    }
}

/// A parsed packing spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackingSpec {
    source: String,
    order: ByteOrder,
    items: Vec<Item>,
}

impl PackingSpec {
    /// Parse a packing spec. A `#` directive, if present, is stripped first.
    ///
    /// # Errors
    ///
    /// Returns `RegMapError::Format` for unknown codes, a dangling count, an
    /// empty spec or a layout wider than one register transaction.
    pub fn parse(packing: &str) -> Result<Self, RegMapError> {
        let (spec, _) = strip_directive(packing);
        let mut chars = spec.chars().peekable();
        let order = match chars.peek() {
            Some('<') => ByteOrder::Little,
            Some('>' | '!') => ByteOrder::Big,
            Some('=' | '@') => ByteOrder::Native,
            _ => ByteOrder::Native,
        };
        if matches!(chars.peek(), Some('<' | '>' | '!' | '=' | '@')) {
            chars.next();
        }

        let mut items = Vec::new();
        let mut total = 0usize;
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
                continue;
            }
            let mut count: Option<usize> = None;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                chars.next();
                let next = count
                    .unwrap_or(0)
                    .checked_mul(10)
                    .and_then(|n| n.checked_add(d as usize))
                    .ok_or_else(|| RegMapError::Format(format!("repeat count overflow in {spec:?}")))?;
                count = Some(next);
            }
            let code_char = chars.next().ok_or_else(|| {
                RegMapError::Format(format!("repeat count without type code in {spec:?}"))
            })?;
            let code = Code::from_char(code_char).ok_or_else(|| {
                RegMapError::Format(format!("bad type code {code_char:?} in {spec:?}"))
            })?;
            let count = count.unwrap_or(1);
            total = code
                .size()
                .checked_mul(count)
                .and_then(|n| n.checked_add(total))
                .filter(|&n| n <= MAX_PACKED_BYTES)
                .ok_or_else(|| {
                    RegMapError::Format(format!(
                        "{spec:?} is larger than {MAX_PACKED_BYTES} bytes"
                    ))
                })?;
            items.push(Item { code, count });
        }
        if items.is_empty() {
            return Err(RegMapError::Format(format!("empty packing spec {packing:?}")));
        }
        Ok(Self {
            source: spec.to_string(),
            order,
            items,
        })
    }

    /// The spec text handed to the decoder (directive stripped).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub const fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Number of bytes the layout occupies.
    #[must_use]
    pub fn size(&self) -> usize {
        self.items.iter().map(|i| i.byte_len()).sum()
    }

    /// Number of values one unpack yields.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.items.iter().map(|i| i.element_count()).sum()
    }

    /// Unpack the leading `size()` bytes of `bytes`; trailing bytes are ignored.
    pub fn unpack(&self, bytes: &[u8]) -> Result<Vec<Value>, RegMapError> {
        let need = self.size();
        if bytes.len() < need {
            return Err(RegMapError::Format(format!(
                "{:?} needs {need} bytes, got {}",
                self.source,
                bytes.len()
            )));
        }
        let big = self.order.is_big();
        let mut out = Vec::with_capacity(self.element_count());
        let mut pos = 0usize;
        for item in &self.items {
            match item.code {
                Code::Pad => pos += item.count,
                Code::Bytes => {
                    out.push(Value::Bytes(bytes[pos..pos + item.count].to_vec()));
                    pos += item.count;
                }
                code => {
                    let size = code.size();
                    for _ in 0..item.count {
                        out.push(read_scalar(code, &bytes[pos..pos + size], big));
                        pos += size;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Pack `values` in layout order. Pad bytes take no value.
    pub fn pack(&self, values: &[Value]) -> Result<Vec<u8>, RegMapError> {
        let big = self.order.is_big();
        let mut out = Vec::with_capacity(self.size());
        let mut it = values.iter();
        let mut next = || {
            it.next().ok_or_else(|| {
                RegMapError::Format(format!(
                    "{:?} expects {} values, got {}",
                    self.source,
                    self.element_count(),
                    values.len()
                ))
            })
        };
        for item in &self.items {
            match item.code {
                Code::Pad => out.resize(out.len() + item.count, 0),
                Code::Bytes => {
                    let mut b = next()?.to_bytes()?;
                    b.resize(item.count, 0);
                    out.extend_from_slice(&b);
                }
                code => {
                    for _ in 0..item.count {
                        write_scalar(&mut out, code, next()?, big)?;
                    }
                }
            }
        }
        if values.len() > self.element_count() {
            return Err(RegMapError::Format(format!(
                "{:?} expects {} values, got {}",
                self.source,
                self.element_count(),
                values.len()
            )));
        }
        Ok(out)
    }
}

fn read_uint(chunk: &[u8], big: bool) -> u64 {
    let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
    if big {
        chunk.iter().fold(0, fold)
    } else {
        chunk.iter().rev().fold(0, fold)
    }
}

fn read_scalar(code: Code, chunk: &[u8], big: bool) -> Value {
    let raw = read_uint(chunk, big);
    match code {
        Code::Char => Value::Bytes(chunk.to_vec()),
        Code::Bool => Value::Bool(raw != 0),
        Code::F32 => Value::Float(f64::from(f32::from_bits(raw as u32))),
        Code::F64 => Value::Float(f64::from_bits(raw)),
        c if c.is_signed() => {
            // sign-extend from the item width
            let shift = 64 - 8 * c.size() as u32;
            Value::Int(((raw << shift) as i64) >> shift)
        }
        _ => Value::UInt(raw),
    }
}

fn write_uint(out: &mut Vec<u8>, v: u64, size: usize, big: bool) {
    let bytes = v.to_be_bytes();
    let tail = &bytes[8 - size..];
    if big {
        out.extend_from_slice(tail);
    } else {
        out.extend(tail.iter().rev());
    }
}

fn write_scalar(out: &mut Vec<u8>, code: Code, value: &Value, big: bool) -> Result<(), RegMapError> {
    let size = code.size();
    match code {
        Code::Char => {
            let b = value.to_bytes()?;
            if b.len() != 1 {
                return Err(RegMapError::Format(format!(
                    "char item needs exactly one byte, got {value}"
                )));
            }
            out.push(b[0]);
        }
        Code::Bool => out.push(u8::from(value.is_truthy())),
        Code::F32 => write_uint(out, u64::from((value.to_f64()? as f32).to_bits()), 4, big),
        Code::F64 => write_uint(out, value.to_f64()?.to_bits(), 8, big),
        c => {
            let v = value.to_i128()?;
            let bits = 8 * size as u32;
            let (min, max) = if c.is_signed() {
                (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
            } else {
                (0, (1i128 << bits) - 1)
            };
            if v < min || v > max {
                return Err(RegMapError::Format(format!(
                    "{v} out of range for a {bits}-bit {} item",
                    if c.is_signed() { "signed" } else { "unsigned" }
                )));
            }
            // two's complement truncation to the item width
            write_uint(out, v as u64, size, big);
        }
    }
    Ok(())
}

/// A decoded register value, or a value staged for write.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::UInt(_) | Self::Float(_))
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::UInt(u) => Some(*u as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::UInt(u) => i64::try_from(*u).ok(),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    /// Text content of a byte string with trailing NULs removed.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Bytes(b) => {
                let end = b.iter().rposition(|&c| c != 0).map_or(0, |p| p + 1);
                Some(String::from_utf8_lossy(&b[..end]).into_owned())
            }
            _ => None,
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Self::Int(i) => *i != 0,
            Self::UInt(u) => *u != 0,
            Self::Float(f) => *f != 0.0,
            Self::Bool(b) => *b,
            Self::Bytes(b) => !b.is_empty(),
            Self::List(l) => !l.is_empty(),
        }
    }

    fn to_f64(&self) -> Result<f64, RegMapError> {
        self.as_f64()
            .ok_or_else(|| RegMapError::Format(format!("expected a number, got {self}")))
    }

    fn to_i128(&self) -> Result<i128, RegMapError> {
        match self {
            Self::Int(i) => Ok(i128::from(*i)),
            Self::UInt(u) => Ok(i128::from(*u)),
            Self::Bool(b) => Ok(i128::from(*b)),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i128),
            other => Err(RegMapError::Format(format!(
                "expected an integer, got {other}"
            ))),
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, RegMapError> {
        match self {
            Self::Bytes(b) => Ok(b.clone()),
            Self::Int(_) | Self::UInt(_) => {
                let v = self.to_i128()?;
                u8::try_from(v)
                    .map(|b| vec![b])
                    .map_err(|_| RegMapError::Format(format!("{v} does not fit a byte")))
            }
            other => Err(RegMapError::Format(format!("expected bytes, got {other}"))),
        }
    }

    fn scaled(self, scale: f64, offset: f64) -> Self {
        match self {
            Self::List(items) => Self::List(
                items
                    .into_iter()
                    .map(|v| v.scaled(scale, offset))
                    .collect(),
            ),
            v if v.is_numeric() => match v.as_f64() {
                Some(raw) => Self::Float(raw * scale + offset),
                None => v,
            },
            v => v,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Bytes(_) => write!(f, "{}", self.as_text().unwrap_or_default()),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::UInt(u) => serializer.serialize_u64(*u),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Bytes(_) => serializer.serialize_str(&self.as_text().unwrap_or_default()),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for v in items {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}
impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::UInt(u64::from(v))
    }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Bytes(v.as_bytes().to_vec())
    }
}
impl From<Vec<Self>> for Value {
    fn from(v: Vec<Self>) -> Self {
        Self::List(v)
    }
}

/// Display classification of a register's packing spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Integer,
    Float,
    String,
}

/// Per-register codec: the parsed packing spec plus the linear transform and
/// the display classification derived once at construction.
///
/// `decode` applies `raw * scale + offset`; `encode` never inverts it, so
/// writes always take values in the raw (device) domain.
#[derive(Clone, Debug)]
pub struct FormatCodec {
    packing: String,
    spec: Option<PackingSpec>,
    scale: Option<f64>,
    offset: Option<f64>,
    no_query: bool,
    is_list: bool,
    semantic: SemanticType,
}

impl FormatCodec {
    /// Build the codec for a register whose read direction is `words_out` words.
    /// Problems with the packing spec are logged, never fatal.
    #[must_use]
    pub fn new(packing: &str, words_out: u16, scale: Option<f64>, offset: Option<f64>) -> Self {
        let (decodable, no_query) = strip_directive(packing);
        let spec = match PackingSpec::parse(decodable) {
            Ok(spec) => Some(spec),
            Err(e) => {
                if !no_query {
                    log::warn!("error in packing string {packing:?}: {e}");
                }
                None
            }
        };

        // trial unpack of a zeroed read buffer
        let trial = vec![0u8; usize::from(words_out) * 2];
        let mut is_list = match spec.as_ref().map(|s| s.unpack(&trial)) {
            Some(Ok(values)) => values.len() > 1,
            Some(Err(e)) => {
                if !no_query {
                    log::warn!(
                        "error in packing string {packing:?} on {} bytes: {e}",
                        trial.len()
                    );
                }
                false
            }
            None => false,
        };
        if packing.chars().any(|c| c.is_ascii_digit()) {
            is_list = true;
        }

        let semantic = classify(packing, is_list, scale.is_some());
        Self {
            packing: packing.to_string(),
            spec,
            scale,
            offset,
            no_query,
            is_list,
            semantic,
        }
    }

    /// The raw packing field, directive included.
    #[must_use]
    pub fn packing(&self) -> &str {
        &self.packing
    }

    #[must_use]
    pub const fn spec(&self) -> Option<&PackingSpec> {
        self.spec.as_ref()
    }

    #[must_use]
    pub const fn scale(&self) -> Option<f64> {
        self.scale
    }

    #[must_use]
    pub const fn offset(&self) -> Option<f64> {
        self.offset
    }

    /// True when the packing carries a `#` directive.
    #[must_use]
    pub const fn no_query(&self) -> bool {
        self.no_query
    }

    #[must_use]
    pub const fn is_list(&self) -> bool {
        self.is_list
    }

    #[must_use]
    pub const fn semantic_type(&self) -> SemanticType {
        self.semantic
    }

    fn require_spec(&self) -> Result<&PackingSpec, RegMapError> {
        self.spec.as_ref().ok_or_else(|| {
            RegMapError::Format(format!("unusable packing spec {:?}", self.packing))
        })
    }

    /// Decode raw words (concatenated big-endian) into a physical value.
    ///
    /// One element decodes to a scalar, several to a `Value::List`.
    pub fn decode(&self, words: &[u16]) -> Result<Value, RegMapError> {
        let spec = self.require_spec()?;
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let mut values = spec.unpack(&bytes)?;
        if let Some(scale) = self.scale {
            let offset = self.offset.unwrap_or(0.0);
            values = values.into_iter().map(|v| v.scaled(scale, offset)).collect();
        }
        match values.len() {
            0 => Err(RegMapError::Format(format!(
                "{:?} yields no values",
                self.packing
            ))),
            1 => Ok(values.remove(0)),
            _ => Ok(Value::List(values)),
        }
    }

    /// Encode a raw-domain value into words. A `Value::List` supplies one
    /// element per item; an odd byte count is padded with a zero byte.
    pub fn encode(&self, value: &Value) -> Result<Vec<u16>, RegMapError> {
        let spec = self.require_spec()?;
        let mut bytes = match value {
            Value::List(items) => spec.pack(items)?,
            single => spec.pack(std::slice::from_ref(single))?,
        };
        if bytes.len() % 2 == 1 {
            bytes.push(0);
        }
        Ok(bytes
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect())
    }
}

/// Best-effort type heuristic used for display only.
fn classify(packing: &str, is_list: bool, scaled: bool) -> SemanticType {
    if is_list {
        return SemanticType::String;
    }
    let has_any = |set: &str| packing.chars().any(|c| set.contains(c));
    let mut semantic = SemanticType::String;
    if has_any(FLOAT_CODES) {
        semantic = SemanticType::Float;
    }
    if has_any(INTEGER_CODES) {
        semantic = SemanticType::Integer;
    }
    if packing.contains('s') {
        semantic = SemanticType::String;
    }
    if scaled {
        semantic = SemanticType::Float;
    }
    let leftovers: std::collections::HashSet<char> = packing
        .chars()
        .filter(|c| !STRUCTURAL_CHARS.contains(*c))
        .collect();
    if leftovers.len() > 1 {
        // several distinct codes: a composite value
        semantic = SemanticType::String;
    }
    semantic
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_big_endian_u16() {
        let codec = FormatCodec::new(">H", 1, None, None);
        assert_eq!(codec.decode(&[0x0010]).unwrap(), Value::UInt(16));
        assert_eq!(codec.semantic_type(), SemanticType::Integer);
        assert!(!codec.is_list());
    }

    #[test]
    fn signed_items_sign_extend() {
        let spec = PackingSpec::parse(">hb").unwrap();
        let v = spec.unpack(&[0xFF, 0xFE, 0x80]).unwrap();
        assert_eq!(v, vec![Value::Int(-2), Value::Int(-128)]);
    }

    #[test]
    fn little_endian_float_with_scale_and_offset() {
        let codec = FormatCodec::new("<f", 2, Some(0.001), Some(200.0));
        let raw = 1000.0f32.to_le_bytes();
        let words = [
            u16::from_be_bytes([raw[0], raw[1]]),
            u16::from_be_bytes([raw[2], raw[3]]),
        ];
        match codec.decode(&words).unwrap() {
            Value::Float(v) => assert!((v - 201.0).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(codec.semantic_type(), SemanticType::Float);
    }

    #[test]
    fn repeat_count_makes_a_list() {
        let codec = FormatCodec::new(">4H", 4, None, None);
        assert!(codec.is_list());
        assert_eq!(codec.semantic_type(), SemanticType::String);
        assert_eq!(
            codec.decode(&[1, 2, 3, 4]).unwrap(),
            Value::List(vec![
                Value::UInt(1),
                Value::UInt(2),
                Value::UInt(3),
                Value::UInt(4)
            ])
        );
    }

    #[test]
    fn composite_spec_is_a_string_aggregate() {
        let codec = FormatCodec::new(">hf", 3, None, None);
        assert!(codec.is_list());
        assert_eq!(codec.semantic_type(), SemanticType::String);
    }

    #[test]
    fn string_code_wins() {
        let codec = FormatCodec::new(">s", 1, None, None);
        assert_eq!(codec.semantic_type(), SemanticType::String);
        let codec = FormatCodec::new(">16s", 8, None, None);
        let mut words = vec![0u16; 8];
        words[0] = u16::from_be_bytes(*b"OK");
        let v = codec.decode(&words).unwrap();
        assert_eq!(v.as_text().as_deref(), Some("OK"));
    }

    #[test]
    fn directive_is_stripped_before_decoding() {
        let codec = FormatCodec::new(">H#", 1, None, None);
        assert!(codec.no_query());
        assert_eq!(codec.spec().map(PackingSpec::as_str), Some(">H"));
        assert_eq!(codec.decode(&[7]).unwrap(), Value::UInt(7));
    }

    #[test]
    fn bad_spec_is_kept_but_cannot_decode() {
        let codec = FormatCodec::new(">Z", 1, None, None);
        assert!(codec.spec().is_none());
        assert!(!codec.is_list());
        assert!(matches!(codec.decode(&[1]), Err(RegMapError::Format(_))));
    }

    #[test]
    fn short_buffer_is_a_format_error() {
        let codec = FormatCodec::new(">I", 1, None, None);
        assert!(!codec.is_list());
        assert!(codec.decode(&[1]).is_err());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let cases: Vec<(&str, Value)> = vec![
            (">H", Value::UInt(0xBEEF)),
            ("<h", Value::Int(-1234)),
            (">i", Value::Int(-70000)),
            ("<Q", Value::UInt(u64::MAX)),
            (">d", Value::Float(-2.5e-3)),
            ("<f", Value::Float(1.5)),
            (">?", Value::Bool(true)),
            (">4s", Value::Bytes(b"ABCD".to_vec())),
            (">2H", Value::List(vec![Value::UInt(1), Value::UInt(2)])),
        ];
        for (spec, v) in cases {
            let codec = FormatCodec::new(spec, 0, None, None);
            let words = codec.encode(&v).unwrap();
            assert_eq!(codec.decode(&words).unwrap(), v, "spec {spec}");
        }
    }

    #[test]
    fn encode_ignores_scale() {
        let codec = FormatCodec::new(">H", 1, Some(0.1), None);
        assert_eq!(codec.encode(&Value::UInt(250)).unwrap(), vec![250]);
    }

    #[test]
    fn encode_range_and_type_checks() {
        let codec = FormatCodec::new(">H", 1, None, None);
        assert!(codec.encode(&Value::Int(-1)).is_err());
        assert!(codec.encode(&Value::Int(65536)).is_err());
        assert!(codec.encode(&Value::Float(1.5)).is_err());
        assert_eq!(codec.encode(&Value::Float(3.0)).unwrap(), vec![3]);
        assert!(codec.encode(&Value::List(vec![Value::UInt(1), Value::UInt(2)])).is_err());
    }

    #[test]
    fn odd_byte_layout_is_padded() {
        let codec = FormatCodec::new(">B", 1, None, None);
        assert_eq!(codec.encode(&Value::UInt(0xAB)).unwrap(), vec![0xAB00]);
        assert_eq!(codec.decode(&[0xAB00]).unwrap(), Value::UInt(0xAB));
    }

    #[test]
    fn spec_grammar() {
        assert!(PackingSpec::parse("").is_err());
        assert!(PackingSpec::parse(">4").is_err());
        let s = PackingSpec::parse("! 2x H").unwrap();
        assert_eq!(s.byte_order(), ByteOrder::Big);
        assert_eq!(s.size(), 4);
        assert_eq!(s.element_count(), 1);
    }

    #[test]
    fn oversized_layouts_are_rejected() {
        for spec in [">4611686018427387904Q", ">18446744073709551615s", ">126H", ">200s60x"] {
            let err = PackingSpec::parse(spec).unwrap_err();
            assert!(matches!(err, RegMapError::Format(_)), "{spec}: {err}");
        }
        assert!(matches!(
            PackingSpec::parse(">99999999999999999999999Q"),
            Err(RegMapError::Format(_))
        ));
        assert_eq!(PackingSpec::parse(">125H").unwrap().size(), 250);
        let codec = FormatCodec::new(">4611686018427387904Q", 1, None, None);
        assert!(codec.spec().is_none());
    }

    #[test]
    fn values_serialize_to_plain_json() {
        let v = Value::List(vec![Value::UInt(1), Value::Bytes(b"hi\0\0".to_vec())]);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"[1,"hi"]"#);
    }
}
