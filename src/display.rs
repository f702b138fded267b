//! Human-readable register values.
//!
//! A register's format string is a template in which `{value}` or
//! `{value:spec}` is replaced by the decoded value. The spec follows the
//! familiar `[[fill]align][sign][#][0][width][.precision][type]` layout with
//! types `d f F e E x X b o s`. `{{` and `}}` produce literal braces.

use crate::codec::{SemanticType, Value};
use crate::register::Register;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    plus: bool,
    alternate: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> FormatSpec {
    let mut out = FormatSpec::default();
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|&c| is_align(c)) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if chars.get(i) == Some(&'+') {
        out.plus = true;
        i += 1;
    } else if matches!(chars.get(i), Some('-' | ' ')) {
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let mut width = String::new();
    while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
        width.push(*c);
        i += 1;
    }
    out.width = width.parse().unwrap_or(0);
    if chars.get(i) == Some(&',') {
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let mut precision = String::new();
        while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
            precision.push(*c);
            i += 1;
        }
        out.precision = precision.parse().ok();
    }
    out.kind = chars.get(i).copied();
    out
}

/// Exponent with sign and at least two digits: `1.5e3` becomes `1.5e+03`.
fn exp_notation(v: f64, precision: usize, upper: bool) -> String {
    let s = format!("{v:.precision$e}");
    let (mantissa, exp) = s.split_once('e').unwrap_or((s.as_str(), "0"));
    let (sign, digits) = exp
        .strip_prefix('-')
        .map_or(("+", exp), |d| ("-", d));
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{digits:0>2}")
}

fn radix(v: i64, kind: char, alternate: bool) -> String {
    let (neg, mag) = (v < 0, v.unsigned_abs());
    let body = match kind {
        'x' => format!("{mag:x}"),
        'X' => format!("{mag:X}"),
        'b' => format!("{mag:b}"),
        _ => format!("{mag:o}"),
    };
    let prefix = match (alternate, kind) {
        (false, _) => "",
        (true, 'x') => "0x",
        (true, 'X') => "0X",
        (true, 'b') => "0b",
        (true, _) => "0o",
    };
    format!("{}{prefix}{body}", if neg { "-" } else { "" })
}

fn render_one(value: &Value, spec: &FormatSpec) -> String {
    let body = match (spec.kind, value) {
        (_, Value::Bytes(_) | Value::List(_)) => value.to_string(),
        (Some('d'), v) => v.as_i64().map_or_else(|| v.to_string(), |i| i.to_string()),
        (Some(k @ ('x' | 'X' | 'b' | 'o')), v) => v
            .as_i64()
            .map_or_else(|| v.to_string(), |i| radix(i, k, spec.alternate)),
        (Some('f' | 'F'), v) => v.as_f64().map_or_else(
            || v.to_string(),
            |f| format!("{:.*}", spec.precision.unwrap_or(6), f),
        ),
        (Some(k @ ('e' | 'E')), v) => v.as_f64().map_or_else(
            || v.to_string(),
            |f| exp_notation(f, spec.precision.unwrap_or(6), k == 'E'),
        ),
        (_, Value::Float(f)) if spec.precision.is_some() => {
            format!("{:.*}", spec.precision.unwrap_or(6), f)
        }
        (_, v) => v.to_string(),
    };
    let body = if spec.plus && value.as_f64().is_some_and(|f| f >= 0.0) && !body.starts_with('-')
    {
        format!("+{body}")
    } else {
        body
    };
    pad(body, spec, value.is_numeric())
}

fn pad(body: String, spec: &FormatSpec, numeric: bool) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body;
    }
    let missing = spec.width - len;
    if spec.zero && spec.align.is_none() && numeric {
        let sign_len = usize::from(body.starts_with(['-', '+']));
        let prefix_len = if spec.alternate
            && ["0x", "0X", "0b", "0o"]
                .iter()
                .any(|p| body[sign_len..].starts_with(p))
        {
            2
        } else {
            0
        };
        let (head, digits) = body.split_at(sign_len + prefix_len);
        return format!("{head}{}{digits}", "0".repeat(missing));
    }
    let fill = spec.fill.unwrap_or(' ').to_string();
    let align = spec
        .align
        .unwrap_or(if numeric { '>' } else { '<' });
    match align {
        '>' | '=' => format!("{}{body}", fill.repeat(missing)),
        '^' => {
            let left = missing / 2;
            format!("{}{body}{}", fill.repeat(left), fill.repeat(missing - left))
        }
        _ => format!("{body}{}", fill.repeat(missing)),
    }
}

fn render_value(value: &Value, spec: &FormatSpec) -> String {
    match value {
        Value::List(items) if spec.kind != Some('s') => items
            .iter()
            .map(|v| render_one(v, spec))
            .collect::<Vec<_>>()
            .join(","),
        v => render_one(v, spec),
    }
}

/// Expand a `{value[:spec]}` template.
#[must_use]
pub fn render_template(template: &str, value: &Value) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }
        let Some(end) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };
        let field = &tail[1..end];
        let spec = field.split_once(':').map_or("", |(_, s)| s);
        out.push_str(&render_value(value, &parse_spec(spec)));
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

fn plain(register: &Register, value: &Value) -> String {
    let text = match (register.descriptor().semantic_type(), value) {
        (SemanticType::String, Value::Bytes(_)) => value.as_text().unwrap_or_default(),
        (SemanticType::Float, v) if !register.descriptor().is_list() => v
            .as_f64()
            .map_or_else(|| v.to_string(), |f| Value::Float(f).to_string()),
        (_, v) => v.to_string(),
    };
    let unit = register.descriptor().unit();
    if unit.is_empty() {
        text
    } else {
        format!("{text} {unit}")
    }
}

/// Render a register's value through its format string, or as plain text
/// followed by the unit when it has none. `"None"` before the first read.
#[must_use]
pub fn portray(register: &Register) -> String {
    let Some(value) = register.value() else {
        return "None".to_string();
    };
    let template = register.descriptor().format_str();
    if template.trim().is_empty() {
        plain(register, value)
    } else {
        render_template(template, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterDescriptor;

    fn reg(packing: &str, format_str: &str, unit: &str) -> Register {
        Register::new(
            RegisterDescriptor::builder(1, "R")
                .words(2, 2)
                .packing(packing)
                .display(unit, format_str, "")
                .build(),
        )
    }

    #[test]
    fn template_types() {
        let v = Value::Float(201.256);
        assert_eq!(render_template("{value:.2f}", &v), "201.26");
        assert_eq!(render_template("T={value:8.1f} C", &v), "T=   201.3 C");
        assert_eq!(render_template("{value:.3e}", &v), "2.013e+02");
        assert_eq!(render_template("{value:05d}", &Value::Int(-42)), "-0042");
        assert_eq!(render_template("{value:#06x}", &Value::UInt(255)), "0x00ff");
        assert_eq!(render_template("{value:X}", &Value::UInt(255)), "FF");
        assert_eq!(render_template("{value:b}", &Value::UInt(5)), "101");
        assert_eq!(render_template("{value:+d}", &Value::UInt(5)), "+5");
        assert_eq!(render_template("{value:*^7}", &Value::Int(5)), "***5***");
        assert_eq!(render_template("{{{value}}}", &Value::Int(5)), "{5}");
    }

    #[test]
    fn lists_render_element_wise() {
        let v = Value::List(vec![Value::UInt(1), Value::UInt(2)]);
        assert_eq!(render_template("{value:02d}", &v), "01,02");
    }

    #[test]
    fn portray_without_template_appends_unit() {
        let mut r = reg(">H", "", "rpm");
        assert_eq!(portray(&r), "None");
        r.record_read(vec![1500, 0]).unwrap();
        assert_eq!(portray(&r), "1500 rpm");

        let mut r = reg(">4s", "", "");
        r.record_read(vec![0x4F4B, 0x0000]).unwrap();
        assert_eq!(portray(&r), "OK");
    }

    #[test]
    fn portray_with_template() {
        let mut r = reg(">H", "{value:04x}", "");
        r.record_read(vec![0x00AB, 0]).unwrap();
        assert_eq!(portray(&r), "00ab");
    }
}
