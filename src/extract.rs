//! Structured-output extraction for LLM answers.
//!
//! Models are asked for JSON and usually return it, but not always cleanly:
//! answers arrive wrapped in markdown fences, with typographic quotes, with
//! trailing commas, or cut off mid-object when the token budget runs out.
//! [`extract`] runs a fixed chain of repair tiers, each tried only when the
//! previous one failed:
//!
//! 1. [`RepairTier::Direct`]: parse as-is
//! 2. [`RepairTier::Normalized`]: strip fences, keep the outer `{...}`,
//!    fix smart quotes used as delimiters, drop trailing commas
//! 3. [`RepairTier::Structural`]: close an unterminated string and the open
//!    containers; if that is not enough, cut back to the last complete element
//! 4. [`RepairTier::Salvaged`]: parse the well-formed objects of the shape's
//!    top-level array one by one
//! 5. [`RepairTier::Delegated`]: ask a secondary text port to rewrite the
//!    answer as strict JSON ([`extract_or_delegate`] only)
//!
//! A tier only succeeds when it yields a JSON object carrying every key the
//! [`ExpectedShape`] requires. Repair tiers never hand back an empty array
//! for the shape's array field: no data is not data.

use crate::api::with_backoff;
use crate::cancel::Cancellation;
use crate::config::RetryConfig;
use crate::error::ExtractionError;
use crate::ports::{PortRequest, TextPort};
use crate::prompts;
use crate::utils::{head_tail, looks_truncated, truncate_for_log};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

/// Characters kept from each end of the raw answer in error context.
const CONTEXT_CHARS: usize = 200;

/// Upper bound on cut-back attempts in the structural tier.
const MAX_CUT_BACKS: usize = 64;

/// What a caller expects the model to have answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedShape {
    /// Human-readable name, used in logs, errors and the repair prompt.
    pub name: &'static str,
    /// Keys the top-level object must carry.
    pub required: &'static [&'static str],
    /// Top-level array field whose elements may be salvaged one by one.
    pub array_field: Option<&'static str>,
    /// Whether the secondary repair port may be asked to rewrite the answer.
    pub delegate: bool,
}

impl ExpectedShape {
    /// `{"topics": [...]}` as returned by discovery.
    pub const TOPIC_LIST: ExpectedShape = ExpectedShape {
        name: "topic list",
        required: &["topics"],
        array_field: Some("topics"),
        delegate: false,
    };

    /// Research dossier: any object; the fields are all optional.
    pub const DOSSIER: ExpectedShape = ExpectedShape {
        name: "research dossier",
        required: &[],
        array_field: None,
        delegate: true,
    };

    fn accepts(&self, value: &Value) -> bool {
        match value.as_object() {
            Some(obj) => self.required.iter().all(|k| obj.contains_key(*k)),
            None => false,
        }
    }

    /// Stricter check for repaired output: the array field must not come back empty.
    fn accepts_repaired(&self, value: &Value) -> bool {
        if !self.accepts(value) {
            return false;
        }
        match self.array_field {
            Some(field) => value
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| !items.is_empty()),
            None => true,
        }
    }
}

/// Which tier produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairTier {
    Direct,
    Normalized,
    Structural,
    Salvaged,
    Delegated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub value: Value,
    pub tier: RepairTier,
}

/// Run tiers 1 to 4 over `raw`.
#[instrument(level = "debug", skip(raw), fields(shape = shape.name, raw_len = raw.len()))]
pub fn extract(raw: &str, shape: &ExpectedShape) -> Result<Extracted, ExtractionError> {
    if let Some(value) = parse_direct(raw, shape) {
        return Ok(Extracted {
            value,
            tier: RepairTier::Direct,
        });
    }

    let tiers: [(RepairTier, fn(&str, &ExpectedShape) -> Option<Value>); 3] = [
        (RepairTier::Normalized, parse_normalized),
        (RepairTier::Structural, parse_structural),
        (RepairTier::Salvaged, parse_salvaged),
    ];
    for (tier, run) in tiers {
        if let Some(value) = run(raw, shape) {
            info!(shape = shape.name, ?tier, "Recovered structured output after repair");
            return Ok(Extracted { value, tier });
        }
    }

    warn!(
        shape = shape.name,
        head = %truncate_for_log(raw, 300),
        "Structured output could not be repaired"
    );
    Err(ExtractionError::Unparseable {
        shape: shape.name.to_string(),
        head_tail: head_tail(raw, CONTEXT_CHARS),
    })
}

/// [`extract`], then, for shapes that allow it, delegation to `repair`.
///
/// The repair answer itself only goes through tiers 1 and 2; a secondary
/// model that cannot produce strict JSON is not worth repairing further.
#[instrument(level = "info", skip_all, fields(shape = shape.name))]
pub async fn extract_or_delegate<R: TextPort>(
    raw: &str,
    shape: &ExpectedShape,
    repair: &R,
    policy: &RetryConfig,
    cancel: &Cancellation,
) -> Result<Extracted, ExtractionError> {
    let err = match extract(raw, shape) {
        Ok(extracted) => return Ok(extracted),
        Err(e) if !shape.delegate => return Err(e),
        Err(e) => e,
    };

    if cancel.is_cancelled() {
        return Err(err);
    }
    info!(shape = shape.name, "Delegating unparseable answer to the repair model");
    let request = PortRequest::new(prompts::json_repair(shape.name, raw))
        .system(prompts::JSON_REPAIR_SYSTEM)
        .temperature(0.0)
        .json();

    let response = match with_backoff(policy, "repair", cancel, || repair.generate(&request)).await {
        Ok(response) => response,
        Err(e) => {
            warn!(shape = shape.name, error = %e, "Repair model call failed");
            return Err(err);
        }
    };

    match parse_direct(&response.text, shape).or_else(|| parse_normalized(&response.text, shape)) {
        Some(value) => Ok(Extracted {
            value,
            tier: RepairTier::Delegated,
        }),
        None => {
            warn!(shape = shape.name, "Repair model answer is not valid JSON either");
            Err(err)
        }
    }
}

fn parse_direct(raw: &str, shape: &ExpectedShape) -> Option<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if shape.accepts(&value) => Some(value),
        Ok(_) => None,
        Err(e) => {
            if looks_truncated(&e) {
                debug!(shape = shape.name, "Answer looks truncated");
            }
            None
        }
    }
}

fn parse_normalized(raw: &str, shape: &ExpectedShape) -> Option<Value> {
    let text = normalize(raw);
    let value: Value = serde_json::from_str(&text).ok()?;
    shape.accepts(&value).then_some(value)
}

fn parse_structural(raw: &str, shape: &ExpectedShape) -> Option<Value> {
    let text = prepare(raw)?;
    let state = scan(&text);
    // balanced input is not truncated; nothing to close
    if state.stack.is_empty() && !state.in_string {
        return None;
    }

    if let Some(value) = close_and_parse(&text, &state, shape) {
        return Some(value);
    }

    for &cut in state.commas.iter().rev().take(MAX_CUT_BACKS) {
        let head = &text[..cut];
        if let Some(value) = close_and_parse(head, &scan(head), shape) {
            debug!(shape = shape.name, cut, "Cut back to last complete element");
            return Some(value);
        }
    }
    None
}

fn parse_salvaged(raw: &str, shape: &ExpectedShape) -> Option<Value> {
    let field = shape.array_field?;
    let text = prepare(raw)?;
    let start = find_array_start(&text, field)?;

    let items: Vec<Value> = object_fragments(&text[start..])
        .into_iter()
        .filter_map(|fragment| serde_json::from_str::<Value>(&remove_trailing_commas(fragment)).ok())
        .filter(Value::is_object)
        .collect();
    if items.is_empty() {
        return None;
    }
    debug!(shape = shape.name, recovered = items.len(), "Salvaged array fragments");

    let mut obj = Map::new();
    obj.insert(field.to_string(), Value::Array(items));
    let value = Value::Object(obj);
    shape.accepts_repaired(&value).then_some(value)
}

/// Strip markdown code fences around an answer.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Tier 2 text: fences stripped, outer object kept, quotes and commas fixed.
fn normalize(raw: &str) -> String {
    let stripped = strip_code_blocks(raw);
    let outer = match (stripped.find('{'), stripped.rfind('}')) {
        (Some(start), Some(end)) if end > start => &stripped[start..=end],
        _ => stripped,
    };
    remove_trailing_commas(&fix_smart_quotes(outer))
}

/// Tier 3/4 text: like [`normalize`] but keeps everything after the first `{`,
/// since a truncated answer has no matching closer.
fn prepare(raw: &str) -> Option<String> {
    let stripped = strip_code_blocks(raw);
    let start = stripped.find('{')?;
    Some(remove_trailing_commas(&fix_smart_quotes(&stripped[start..])))
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from..].iter().copied().find(|c| !c.is_whitespace())
}

/// Replace typographic double quotes with `"` where they delimit a string.
///
/// A smart quote outside a string opens one. Inside a string it closes it
/// only when followed by a delimiter (`: , } ]` or end of input); anywhere
/// else it is content and kept. A plain `"` inside a smart-quoted string that
/// is not followed by a delimiter is escaped.
fn fix_smart_quotes(text: &str) -> String {
    if !text.contains(['\u{201C}', '\u{201D}']) {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut smart_open = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        let is_smart = c == '\u{201C}' || c == '\u{201D}';
        if !in_string {
            if c == '"' || is_smart {
                in_string = true;
                smart_open = is_smart;
                out.push('"');
            } else {
                out.push(c);
            }
            continue;
        }
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' if !smart_open => {
                in_string = false;
                out.push('"');
            }
            '"' | '\u{201C}' | '\u{201D}' if smart_open => {
                let closes = matches!(next_significant(&chars, i + 1), None | Some(':' | ',' | '}' | ']'));
                if closes {
                    in_string = false;
                    out.push('"');
                } else if c == '"' {
                    out.push_str("\\\"");
                } else {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Drop commas directly followed (modulo whitespace) by `}` or `]`.
fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' if matches!(next_significant(&chars, i + 1), Some('}' | ']')) => {}
            _ => out.push(c),
        }
    }
    out
}

/// String-aware structural state of a (possibly truncated) JSON text.
#[derive(Debug, Default)]
struct Scan {
    /// Open containers, innermost last.
    stack: Vec<char>,
    in_string: bool,
    /// Input ends right after a backslash inside a string.
    dangling_escape: bool,
    /// Byte offsets of commas outside strings.
    commas: Vec<usize>,
}

fn scan(text: &str) -> Scan {
    let mut s = Scan::default();
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if s.in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                s.in_string = false;
            }
            continue;
        }
        match c {
            '"' => s.in_string = true,
            '{' | '[' => s.stack.push(c),
            '}' | ']' => {
                s.stack.pop();
            }
            ',' => s.commas.push(i),
            _ => {}
        }
    }
    s.dangling_escape = escaped;
    s
}

fn close_and_parse(text: &str, state: &Scan, shape: &ExpectedShape) -> Option<Value> {
    let mut fixed = text.to_string();
    if state.in_string {
        if state.dangling_escape {
            fixed.pop();
        }
        fixed.push('"');
    }
    let trimmed_len = fixed.trim_end().len();
    fixed.truncate(trimmed_len);
    if fixed.ends_with(',') {
        fixed.pop();
    }
    for open in state.stack.iter().rev() {
        fixed.push(if *open == '{' { '}' } else { ']' });
    }
    let value: Value = serde_json::from_str(&fixed).ok()?;
    shape.accepts_repaired(&value).then_some(value)
}

/// Byte offset just past the `[` opening `"field": [`.
fn find_array_start(text: &str, field: &str) -> Option<usize> {
    let key = format!("\"{field}\"");
    let key_at = text.find(&key)?;
    let rest = &text[key_at + key.len()..];
    let colon = rest.find(':')?;
    if !rest[..colon].trim().is_empty() {
        return None;
    }
    let after_colon = &rest[colon + 1..];
    let bracket = after_colon.find('[')?;
    if !after_colon[..bracket].trim().is_empty() {
        return None;
    }
    Some(key_at + key.len() + colon + 1 + bracket + 1)
}

/// Complete top-level `{...}` fragments of an array body, in order.
fn object_fragments(text: &str) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => {
                if depth == 0 && c == '{' {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' | ']' => {
                if depth == 0 {
                    // end of the enclosing array
                    break;
                }
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        fragments.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    fragments
}
