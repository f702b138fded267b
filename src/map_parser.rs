//! Register map text parsing.
//!
//! A map is a sequence of CSV-like lines. Comment lines start with `#`; two of
//! them form the legend:
//!
//! ```text
//! # title: modbus register map for <free text>
//! # uuid: <8-4-4-4-12 hex>
//! 10,2,2,1,"TEMP","<f,*0.001,+200","C","{value:.2f}","Temperature"
//! ```
//!
//! Data fields: address, words out, words in, persist, name, packing, unit,
//! format string, hint.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::RegMapError;
use crate::mb_define::NULL_UUID;
use crate::register::RegisterDescriptor;

const MIN_FIELDS: usize = 9;

static TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^# *?title *?: *modbus register map for ([ -~]*)$").expect("static title pattern")
});

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^# *?uuid *?: *?([0-9a-fA-F]{8}(?:-[0-9a-fA-F]{4}){3}-[0-9a-fA-F]{12})$")
        .expect("static uuid pattern")
});

/// Title in a `# title: modbus register map for ...` line.
#[must_use]
pub fn match_title(line: &str) -> Option<String> {
    TITLE_RE
        .captures(line.trim_end())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// UUID in a `# uuid: ...` line. The all-zero sentinel counts as absent.
#[must_use]
pub fn match_uuid(line: &str) -> Option<String> {
    let uuid = UUID_RE.captures(line.trim_end())?.get(1)?.as_str();
    if uuid == NULL_UUID {
        None
    } else {
        Some(uuid.to_string())
    }
}

/// What feeding one line to [`DeviceLegend::observe`] resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LegendEvent {
    Nothing,
    Title,
    Uuid,
}

/// Header metadata carried by comment lines of a map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeviceLegend {
    pub title: Option<String>,
    pub uuid: Option<String>,
}

impl DeviceLegend {
    /// Feed one line. Each field resolves once; a line that resolves the
    /// title is not examined for a UUID.
    pub fn observe(&mut self, line: &str) -> LegendEvent {
        if !line.starts_with('#') {
            return LegendEvent::Nothing;
        }
        if self.title.is_none() {
            if let Some(title) = match_title(line) {
                log::debug!("map title: {title}");
                self.title = Some(title);
                return LegendEvent::Title;
            }
        }
        if self.uuid.is_none() {
            if let Some(uuid) = match_uuid(line) {
                log::debug!("map uuid: {uuid}");
                self.uuid = Some(uuid);
                return LegendEvent::Uuid;
            }
        }
        LegendEvent::Nothing
    }

    /// Title for log messages.
    #[must_use]
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("unknown device")
    }
}

/// Parsed descriptors in map order, unique by name.
#[derive(Clone, Debug, Default)]
pub struct RegisterMap {
    entries: Vec<RegisterDescriptor>,
    index: HashMap<String, usize>,
}

impl RegisterMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor. A repeated name replaces the earlier definition in
    /// its original position.
    pub fn insert(&mut self, descriptor: RegisterDescriptor) {
        if let Some(&pos) = self.index.get(descriptor.name()) {
            log::debug!("register {:?} redefined", descriptor.name());
            self.entries[pos] = descriptor;
        } else {
            self.index
                .insert(descriptor.name().to_string(), self.entries.len());
            self.entries.push(descriptor);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisterDescriptor> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.entries.iter()
    }
}

impl IntoIterator for RegisterMap {
    type Item = RegisterDescriptor;
    type IntoIter = std::vec::IntoIter<RegisterDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

fn split_fields(line: &str) -> Result<Vec<String>, RegMapError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        None => Ok(Vec::new()),
        Some(Ok(record)) => Ok(record
            .iter()
            .map(|f| f.trim().trim_matches('"').to_string())
            .collect()),
        Some(Err(e)) => Err(RegMapError::Parse(format!("{e}"))),
    }
}

fn parse_int<T: std::str::FromStr>(field: &str, what: &str) -> Result<T, RegMapError> {
    field
        .trim()
        .parse()
        .map_err(|_| RegMapError::Parse(format!("bad {what} {field:?}")))
}

/// `*<float>` or a bare float. Empty means no scale.
fn parse_scale(expr: &str) -> Result<Option<f64>, RegMapError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(None);
    }
    if expr.starts_with('/') {
        return Err(RegMapError::Parse(format!(
            "division scale {expr:?} is not supported"
        )));
    }
    let number = expr.strip_prefix('*').unwrap_or(expr).trim();
    number
        .parse()
        .map(Some)
        .map_err(|_| RegMapError::Parse(format!("bad scale {expr:?}")))
}

fn parse_offset(expr: &str) -> Result<Option<f64>, RegMapError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(None);
    }
    expr.parse()
        .map(Some)
        .map_err(|_| RegMapError::Parse(format!("bad offset {expr:?}")))
}

/// Parse one map line.
///
/// Blank and comment lines yield `Ok(None)`.
///
/// # Errors
///
/// `RegMapError::Parse` for a data line that is malformed.
pub fn parse_line(line: &str) -> Result<Option<RegisterDescriptor>, RegMapError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let fields = split_fields(line)?;
    if fields.len() < MIN_FIELDS {
        return Err(RegMapError::Parse(format!(
            "{} fields, at least {MIN_FIELDS} required",
            fields.len()
        )));
    }
    let address: u16 = parse_int(&fields[0], "address")?;
    let words_out: u16 = parse_int(&fields[1], "read word count")?;
    let words_in: u16 = parse_int(&fields[2], "write word count")?;
    let persist: i32 = parse_int(&fields[3], "persist flag")?;

    let mut packing_parts = fields[5].split(',');
    let packing = packing_parts.next().unwrap_or_default().trim();
    let scale = parse_scale(packing_parts.next().unwrap_or_default())?;
    let offset = parse_offset(packing_parts.next().unwrap_or_default())?;

    Ok(Some(
        RegisterDescriptor::builder(address, fields[4].as_str())
            .words(words_out, words_in)
            .persist(persist)
            .packing(packing)
            .scale(scale, offset)
            .display(fields[6].as_str(), fields[7].as_str(), fields[8].as_str())
            .build(),
    ))
}

/// Parse a whole map: descriptors in map order plus the legend.
///
/// Malformed data lines are logged and skipped.
pub fn parse_map<I, S>(lines: I) -> (RegisterMap, DeviceLegend)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut map = RegisterMap::new();
    let mut legend = DeviceLegend::default();
    for (n, line) in lines.into_iter().enumerate() {
        let line = line.as_ref();
        legend.observe(line);
        match parse_line(line) {
            Ok(Some(descriptor)) => map.insert(descriptor),
            Ok(None) => {}
            Err(e) => log::warn!("skipping map line {}: {e}: {line:?}", n + 1),
        }
    }
    (map, legend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{SemanticType, Value};

    #[test]
    fn parses_scaled_float_line() {
        let d = parse_line(r#"10,2,2,1,"TEMP","<f,*0.001,+200","C","{value:.2f}","Temperature""#)
            .unwrap()
            .unwrap();
        assert_eq!(d.address(), 10);
        assert_eq!(d.words_out(), 2);
        assert_eq!(d.words_in(), 2);
        assert_eq!(d.persist(), 1);
        assert_eq!(d.name(), "TEMP");
        assert_eq!(d.packing(), "<f");
        assert_eq!(d.scale(), Some(0.001));
        assert_eq!(d.offset(), Some(200.0));
        assert_eq!(d.unit(), "C");
        assert_eq!(d.format_str(), "{value:.2f}");
        assert_eq!(d.hint(), "Temperature");
        assert_eq!(d.semantic_type(), SemanticType::Float);
    }

    #[test]
    fn bare_scale_and_missing_offset() {
        let d = parse_line(r#"20,1,1,0,"V","<h,0.5","V","","""#)
            .unwrap()
            .unwrap();
        assert_eq!(d.scale(), Some(0.5));
        assert_eq!(d.offset(), None);
        let d = parse_line(r#"21,1,1,0,"RAW",">H","","","""#)
            .unwrap()
            .unwrap();
        assert_eq!(d.scale(), None);
        assert_eq!(d.semantic_type(), SemanticType::Integer);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_line(r#"10,2,2,"TEMP","<f""#).is_err());
        assert!(parse_line(r#"x,2,2,1,"TEMP","<f","C","","""#).is_err());
        assert!(parse_line(r#"10,2,2,1,"TEMP","<f,/10","C","","""#).is_err());
        assert!(parse_line(r#"10,2,2,1,"TEMP","<f,*abc","C","","""#).is_err());
    }

    #[test]
    fn comments_and_blanks_are_not_records() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("# uuid: 11111111-2222-3333-4444-555555555555")
            .unwrap()
            .is_none());
    }

    #[test]
    fn null_uuid_never_resolves() {
        let mut legend = DeviceLegend::default();
        assert_eq!(
            legend.observe("# uuid: 00000000-0000-0000-0000-000000000000"),
            LegendEvent::Nothing
        );
        assert!(legend.uuid.is_none());
    }

    #[test]
    fn first_uuid_wins() {
        let mut legend = DeviceLegend::default();
        assert_eq!(
            legend.observe("# uuid: 11111111-2222-3333-4444-555555555555"),
            LegendEvent::Uuid
        );
        assert_eq!(
            legend.observe("# uuid: 99999999-2222-3333-4444-555555555555"),
            LegendEvent::Nothing
        );
        assert_eq!(
            legend.uuid.as_deref(),
            Some("11111111-2222-3333-4444-555555555555")
        );
    }

    #[test]
    fn title_then_uuid() {
        let mut legend = DeviceLegend::default();
        assert_eq!(
            legend.observe("# title: modbus register map for Pump Controller v2"),
            LegendEvent::Title
        );
        assert_eq!(legend.observe("# some other comment"), LegendEvent::Nothing);
        assert_eq!(
            legend.observe("#uuid:abcdefab-2222-3333-4444-555555555555"),
            LegendEvent::Uuid
        );
        assert_eq!(legend.display_title(), "Pump Controller v2");
        assert_eq!(
            legend.observe("# title: modbus register map for Other"),
            LegendEvent::Nothing
        );
    }

    #[test]
    fn duplicate_names_keep_first_position() {
        let lines = [
            "# title: modbus register map for Test",
            r#"1,1,1,0,"A",">H","","","""#,
            r#"2,1,1,0,"B",">H","","","""#,
            "garbage line",
            r#"3,1,1,0,"A",">h","","","""#,
        ];
        let (map, legend) = parse_map(lines);
        assert_eq!(legend.title.as_deref(), Some("Test"));
        assert_eq!(map.len(), 2);
        let names: Vec<_> = map.iter().map(RegisterDescriptor::name).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(map.get("A").unwrap().address(), 3);
    }

    #[test]
    fn oversized_packing_only_disables_its_register() {
        let lines = [
            r#"10,1,1,0,"BIG",">4611686018427387904Q","","","""#,
            r#"11,1,1,0,"OK",">H","","","""#,
        ];
        let (map, _) = parse_map(lines);
        assert_eq!(map.len(), 2);
        let big = map.get("BIG").unwrap();
        assert!(big.codec().spec().is_none());
        assert!(big.codec().decode(&[0]).is_err());
        assert_eq!(map.get("OK").unwrap().codec().decode(&[7]).unwrap(), Value::UInt(7));
    }
}
