use std::sync::Arc;

use crate::codec::{FormatCodec, SemanticType, Value};
use crate::error::RegMapError;

/// Immutable description of one register, as parsed from a map line.
#[derive(Clone, Debug)]
pub struct RegisterDescriptor {
    address: u16,
    words_out: u16,
    words_in: u16,
    persist: i32,
    name: String,
    unit: String,
    format_str: String,
    hint: String,
    codec: FormatCodec,
}

impl RegisterDescriptor {
    #[must_use]
    pub fn builder(address: u16, name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            address,
            name: name.into(),
            words_out: 1,
            words_in: 1,
            persist: 0,
            packing: ">H".to_string(),
            scale: None,
            offset: None,
            unit: String::new(),
            format_str: String::new(),
            hint: String::new(),
        }
    }

    #[must_use]
    pub const fn address(&self) -> u16 {
        self.address
    }
    /// Words the device returns on read.
    #[must_use]
    pub const fn words_out(&self) -> u16 {
        self.words_out
    }
    /// Words the device accepts on write.
    #[must_use]
    pub const fn words_in(&self) -> u16 {
        self.words_in
    }
    /// Informational: the device persists writes itself.
    #[must_use]
    pub const fn persist(&self) -> i32 {
        self.persist
    }
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Packing field without the scale/offset sub-fields, directive included.
    #[must_use]
    pub fn packing(&self) -> &str {
        self.codec.packing()
    }
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }
    #[must_use]
    pub fn format_str(&self) -> &str {
        &self.format_str
    }
    #[must_use]
    pub fn hint(&self) -> &str {
        &self.hint
    }
    #[must_use]
    pub const fn scale(&self) -> Option<f64> {
        self.codec.scale()
    }
    #[must_use]
    pub const fn offset(&self) -> Option<f64> {
        self.codec.offset()
    }
    #[must_use]
    pub const fn codec(&self) -> &FormatCodec {
        &self.codec
    }
    #[must_use]
    pub const fn semantic_type(&self) -> SemanticType {
        self.codec.semantic_type()
    }
    #[must_use]
    pub const fn is_list(&self) -> bool {
        self.codec.is_list()
    }
    /// The packing carries a `#` directive: never part of a sweep.
    #[must_use]
    pub const fn no_query(&self) -> bool {
        self.codec.no_query()
    }

    /// Encode a raw-domain value for a write transaction, sized to `words_in`
    /// when the map declares a write width.
    pub fn encode_for_write(&self, value: &Value) -> Result<Vec<u16>, RegMapError> {
        let mut words = self.codec.encode(value)?;
        let width = usize::from(self.words_in);
        if width > 0 && words.len() != width {
            log::debug!(
                "register {:?}: encoded {} words, write width is {width}",
                self.name,
                words.len()
            );
            words.resize(width, 0);
        }
        Ok(words)
    }
}

pub struct DescriptorBuilder {
    address: u16,
    name: String,
    words_out: u16,
    words_in: u16,
    persist: i32,
    packing: String,
    scale: Option<f64>,
    offset: Option<f64>,
    unit: String,
    format_str: String,
    hint: String,
}

impl DescriptorBuilder {
    #[must_use]
    pub const fn words(mut self, words_out: u16, words_in: u16) -> Self {
        self.words_out = words_out;
        self.words_in = words_in;
        self
    }
    #[must_use]
    pub const fn persist(mut self, persist: i32) -> Self {
        self.persist = persist;
        self
    }
    #[must_use]
    pub fn packing(mut self, packing: impl Into<String>) -> Self {
        self.packing = packing.into();
        self
    }
    #[must_use]
    pub const fn scale(mut self, scale: Option<f64>, offset: Option<f64>) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }
    #[must_use]
    pub fn display(
        mut self,
        unit: impl Into<String>,
        format_str: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        self.unit = unit.into();
        self.format_str = format_str.into();
        self.hint = hint.into();
        self
    }

    /// Derive the codec and freeze the descriptor.
    #[must_use]
    pub fn build(self) -> RegisterDescriptor {
        let codec = FormatCodec::new(&self.packing, self.words_out, self.scale, self.offset);
        RegisterDescriptor {
            address: self.address,
            words_out: self.words_out,
            words_in: self.words_in,
            persist: self.persist,
            name: self.name,
            unit: self.unit,
            format_str: self.format_str,
            hint: self.hint,
            codec,
        }
    }
}

/// A descriptor plus the runtime state mutated by sweeps and callers.
#[derive(Clone, Debug)]
pub struct Register {
    descriptor: Arc<RegisterDescriptor>,
    value: Option<Value>,
    raw_words: Option<Vec<u16>>,
    raw_hex: Option<String>,
    query: bool,
    write_pending: bool,
}

impl Register {
    #[must_use]
    pub fn new(descriptor: RegisterDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            value: None,
            raw_words: None,
            raw_hex: None,
            query: true,
            write_pending: false,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &RegisterDescriptor {
        &self.descriptor
    }
    pub(crate) fn descriptor_arc(&self) -> Arc<RegisterDescriptor> {
        Arc::clone(&self.descriptor)
    }
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }
    #[must_use]
    pub fn address(&self) -> u16 {
        self.descriptor.address()
    }

    /// Last decoded physical value, or the value staged for write.
    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
    #[must_use]
    pub fn raw_words(&self) -> Option<&[u16]> {
        self.raw_words.as_deref()
    }
    #[must_use]
    pub fn raw_hex(&self) -> Option<&str> {
        self.raw_hex.as_deref()
    }

    #[must_use]
    pub const fn query_enabled(&self) -> bool {
        self.query
    }
    pub fn set_query(&mut self, query: bool) {
        self.query = query;
    }
    pub fn toggle_query(&mut self) {
        self.query = !self.query;
    }

    #[must_use]
    pub const fn write_pending(&self) -> bool {
        self.write_pending
    }

    /// Stage a raw-domain value; the next sweep writes it.
    pub fn stage_write(&mut self, value: Value) {
        self.value = Some(value);
        self.write_pending = true;
    }

    /// Clear the pending flag and hand out the staged value.
    pub(crate) fn take_pending_write(&mut self) -> Option<Value> {
        if !self.write_pending {
            return None;
        }
        self.write_pending = false;
        self.value.clone()
    }

    /// Store a read payload and decode it. A decode failure leaves no value.
    pub(crate) fn record_read(&mut self, words: Vec<u16>) -> Result<(), RegMapError> {
        self.raw_hex = Some(
            words
                .iter()
                .map(|w| format!("{w:04x}"))
                .collect::<String>(),
        );
        let decoded = self.descriptor.codec().decode(&words);
        self.raw_words = Some(words);
        match decoded {
            Ok(v) => {
                self.value = Some(v);
                Ok(())
            }
            Err(e) => {
                self.value = None;
                Err(e)
            }
        }
    }
}
