//! Fixed-width string rendering for panel text buffers.
//!
//! The pipeline takes already-resolved source values (numbers, remote
//! strings, or config literals) and produces the exact byte buffer the
//! hardware expects:
//!
//! 1. unescape backslash byte-escapes in literal parts (`\\`, `\xHH`);
//! 2. transform numbers with `(v + offset) * scale` and the rounding
//!    policy, held at 6-decimal working precision;
//! 3. compose via a positional template, a direct single-value render, or
//!    ordered concatenation;
//! 4. fit to the display width (clip side, pad side, pad character);
//! 5. guarantee the result is exactly the catalog max length, so every
//!    write fully overwrites the previous buffer contents on the panel.

use serde::{Deserialize, Serialize};

use super::RoundMode;

/// Which end survives when rendered text exceeds the display width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipSide {
    /// Keep the leftmost bytes.
    #[default]
    Left,
    /// Keep the rightmost bytes.
    Right,
}

/// Which end receives padding when rendered text is shorter than the width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadSide {
    Left,
    #[default]
    Right,
}

/// User-facing format block of an output mapping, as found in config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Positional template, e.g. `"{0:000.000}"`.  Literal parts may use
    /// byte escapes.
    #[serde(default)]
    pub template: Option<String>,
    /// Numeric directive applied when rendering a single value without a
    /// template, e.g. `"0.00"`.
    #[serde(default)]
    pub numeric: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub round: RoundMode,
    /// Display width override; defaults to the catalog max length.
    #[serde(default)]
    pub width: Option<usize>,
    #[serde(default)]
    pub clip: ClipSide,
    #[serde(default)]
    pub pad: PadSide,
    #[serde(default = "default_pad_char")]
    pub pad_char: char,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            template: None,
            numeric: None,
            scale: default_scale(),
            offset: 0.0,
            round: RoundMode::default(),
            width: None,
            clip: ClipSide::default(),
            pad: PadSide::default(),
            pad_char: default_pad_char(),
        }
    }
}

fn default_scale() -> f64 {
    1.0
}
fn default_pad_char() -> char {
    ' '
}

impl FormatConfig {
    /// Splits the config into the value-rendering half.
    pub fn style(&self) -> TextStyle {
        TextStyle {
            template: self.template.clone(),
            numeric: self.numeric.clone(),
            scale: self.scale,
            offset: self.offset,
            round: self.round,
        }
    }

    /// Splits the config into the width-fitting half.
    pub fn fit(&self) -> FitSpec {
        FitSpec {
            width: self.width,
            clip: self.clip,
            pad: self.pad,
            // Non-ASCII pad characters cannot be a single display cell.
            pad_char: if self.pad_char.is_ascii() {
                self.pad_char as u8
            } else {
                b' '
            },
        }
    }
}

/// Resolved value-rendering spec, frozen into a resolved output mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub template: Option<String>,
    pub numeric: Option<String>,
    pub scale: f64,
    pub offset: f64,
    pub round: RoundMode,
}

impl Default for TextStyle {
    fn default() -> Self {
        FormatConfig::default().style()
    }
}

/// Resolved width-fitting spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitSpec {
    pub width: Option<usize>,
    pub clip: ClipSide,
    pub pad: PadSide,
    pub pad_char: u8,
}

impl Default for FitSpec {
    fn default() -> Self {
        FormatConfig::default().fit()
    }
}

/// One already-resolved source value handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    /// A numeric remote-variable reading.
    Number(f64),
    /// A string remote-variable reading, inserted verbatim.
    Text(String),
    /// A config literal; byte escapes are honoured.
    Literal(String),
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Renders `values` into exactly `max_len` bytes.
pub fn render_text(
    style: &TextStyle,
    fit: &FitSpec,
    max_len: usize,
    values: &[SourceValue],
) -> Vec<u8> {
    let composed = if let Some(template) = &style.template {
        compose_template(template, style, values)
    } else if values.len() == 1 {
        render_value(&values[0], style, style.numeric.as_deref())
    } else {
        let mut out = Vec::new();
        for value in values {
            out.extend_from_slice(&render_value(value, style, None));
        }
        out
    };

    let width = fit.width.unwrap_or(max_len);
    let mut fitted = fit_to_width(composed, width, fit);

    // Exact-length guarantee: the write must overwrite the whole buffer.
    if fitted.len() > max_len {
        fitted.truncate(max_len);
    }
    while fitted.len() < max_len {
        fitted.push(b' ');
    }
    fitted
}

/// Evaluates a bit output: `value > threshold`, XOR the invert flag.
pub fn bit_state(value: f64, threshold: f64, invert: bool) -> bool {
    (value > threshold) != invert
}

/// Applies `(v + offset) * scale` and the rounding policy at 6-decimal
/// working precision.
pub fn transform_number(style: &TextStyle, value: f64) -> f64 {
    let scaled = (value + style.offset) * style.scale;
    style.round.apply(scaled * 1e6) / 1e6
}

fn render_value(value: &SourceValue, style: &TextStyle, directive: Option<&str>) -> Vec<u8> {
    match value {
        SourceValue::Number(n) => {
            let n = transform_number(style, *n);
            match directive {
                Some(d) if is_zero_directive(d) => format_directive(n, d),
                _ => default_number(n).into_bytes(),
            }
        }
        SourceValue::Text(s) => s.as_bytes().to_vec(),
        SourceValue::Literal(s) => unescape_bytes(s),
    }
}

/// Substitutes `{idx}` / `{idx:directive}` placeholders; literal segments
/// between placeholders are unescaped.
fn compose_template(template: &str, style: &TextStyle, values: &[SourceValue]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut literal = String::new();
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(close) = template[i + 1..].find('}') {
                let inner = &template[i + 1..i + 1 + close];
                let (idx_part, directive) = match inner.split_once(':') {
                    Some((idx, d)) => (idx, Some(d)),
                    None => (inner, None),
                };
                if let Ok(idx) = idx_part.trim().parse::<usize>() {
                    out.extend_from_slice(&unescape_bytes(&literal));
                    literal.clear();
                    if let Some(value) = values.get(idx) {
                        out.extend_from_slice(&render_value(value, style, directive));
                    }
                    i += close + 2;
                    continue;
                }
            }
        }
        literal.push(template[i..].chars().next().unwrap_or('\u{FFFD}'));
        i += template[i..].chars().next().map_or(1, char::len_utf8);
    }
    out.extend_from_slice(&unescape_bytes(&literal));
    out
}

/// Renders a number without a directive: integers lose the fraction, other
/// values keep up to 6 decimals with trailing zeros trimmed.
fn default_number(n: f64) -> String {
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        let mut s = format!("{n:.6}");
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        s
    }
}

fn is_zero_directive(directive: &str) -> bool {
    !directive.is_empty() && directive.chars().all(|c| c == '0' || c == '.')
}

/// Renders per a zero-pattern directive like `000.000`: the fractional
/// pattern length fixes the decimal count, the integral pattern length
/// zero-pads the integer part.
fn format_directive(n: f64, directive: &str) -> Vec<u8> {
    let (int_pat, frac_pat) = match directive.split_once('.') {
        Some((i, f)) => (i, f),
        None => (directive, ""),
    };
    let decimals = frac_pat.len();
    let mut s = format!("{n:.decimals$}");

    let negative = s.starts_with('-');
    if negative {
        s.remove(0);
    }
    let int_len = s.split('.').next().map_or(0, str::len);
    let mut padded = String::new();
    for _ in int_len..int_pat.len() {
        padded.push('0');
    }
    padded.push_str(&s);
    if negative {
        padded.insert(0, '-');
    }
    padded.into_bytes()
}

fn fit_to_width(mut bytes: Vec<u8>, width: usize, fit: &FitSpec) -> Vec<u8> {
    if bytes.len() > width {
        match fit.clip {
            ClipSide::Left => bytes.truncate(width),
            ClipSide::Right => {
                bytes.drain(..bytes.len() - width);
            }
        }
    } else if bytes.len() < width {
        let missing = width - bytes.len();
        match fit.pad {
            PadSide::Left => {
                let mut padded = vec![fit.pad_char; missing];
                padded.extend_from_slice(&bytes);
                bytes = padded;
            }
            PadSide::Right => bytes.extend(std::iter::repeat(fit.pad_char).take(missing)),
        }
    }
    bytes
}

/// Expands `\\` and `\xHH` byte escapes; unrecognised escapes pass through
/// verbatim.
pub fn unescape_bytes(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'\\' => {
                    out.push(b'\\');
                    i += 2;
                    continue;
                }
                b'x' | b'X'
                    if i + 4 <= bytes.len()
                        && bytes[i + 2].is_ascii_hexdigit()
                        && bytes[i + 3].is_ascii_hexdigit() =>
                {
                    // The guard makes this parse infallible.
                    let b = u8::from_str_radix(&s[i + 2..i + 4], 16).unwrap_or(0);
                    out.push(b);
                    i += 4;
                    continue;
                }
                _ => {
                    out.push(b'\\');
                    i += 1;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
