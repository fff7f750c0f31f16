//! Template helpers.
//!
//! A fixed, closed set of helpers available to every report template. Report data is full of
//! optional fields, so every helper degrades to `null` (renders nothing) or a safe default on
//! absent or non-numeric input instead of failing. The only helper that can fail a render is
//! `for`, which refuses steps that would never reach the end of the range.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use handlebars::{
    BlockContext, Context, Handlebars, Helper, HelperDef, HelperResult, JsonRender, Output,
    RenderContext, RenderError, RenderErrorReason, Renderable, ScopedJson,
};
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Romanian month names, indexed by zero-based month.
pub const MONTHS: [&str; 12] = [
    "Ianuarie",
    "Februarie",
    "Martie",
    "Aprilie",
    "Mai",
    "Iunie",
    "Iulie",
    "August",
    "Septembrie",
    "Octombrie",
    "Noiembrie",
    "Decembrie",
];

/// Upper bound on `for` iterations in a single invocation.
pub const MAX_LOOP_ITERATIONS: usize = 10_000;

const PARAGRAPH_OPEN: &str = "<p class=\"nopadding-top-bottom\">";
const INDENT_OPEN: &str = "<p class=\"indent nopadding-top-bottom\">";

/// Helpers producing a value (usable inline and as sub-expressions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueHelper {
    Currency,
    MonthName,
    DateMonthYear,
    Math,
    Uppercase,
    GetChar,
    SliceStr,
    Calculate,
    Paragraphize,
    Increment,
    Float,
}

/// Helpers selecting or repeating a template block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHelper {
    NotEqual,
    Compare,
    IsEven,
    ForRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateHelper {
    Value(ValueHelper),
    Block(BlockHelper),
}

/// Every helper name a template may use.
pub const HELPERS: &[(&str, TemplateHelper)] = &[
    ("currencyLei", TemplateHelper::Value(ValueHelper::Currency)),
    ("currency", TemplateHelper::Value(ValueHelper::Currency)),
    ("monthDate", TemplateHelper::Value(ValueHelper::MonthName)),
    ("monthName", TemplateHelper::Value(ValueHelper::MonthName)),
    ("dateMonthYear", TemplateHelper::Value(ValueHelper::DateMonthYear)),
    ("math", TemplateHelper::Value(ValueHelper::Math)),
    ("uppercase", TemplateHelper::Value(ValueHelper::Uppercase)),
    ("getChar", TemplateHelper::Value(ValueHelper::GetChar)),
    ("sliceStr", TemplateHelper::Value(ValueHelper::SliceStr)),
    ("calculate", TemplateHelper::Value(ValueHelper::Calculate)),
    ("replace", TemplateHelper::Value(ValueHelper::Paragraphize)),
    ("paragraphize", TemplateHelper::Value(ValueHelper::Paragraphize)),
    ("inc", TemplateHelper::Value(ValueHelper::Increment)),
    ("increment", TemplateHelper::Value(ValueHelper::Increment)),
    ("float", TemplateHelper::Value(ValueHelper::Float)),
    ("notEqual", TemplateHelper::Block(BlockHelper::NotEqual)),
    ("compare", TemplateHelper::Block(BlockHelper::Compare)),
    ("isEven", TemplateHelper::Block(BlockHelper::IsEven)),
    ("for", TemplateHelper::Block(BlockHelper::ForRange)),
    ("forRange", TemplateHelper::Block(BlockHelper::ForRange)),
];

/// Register the whole helper table into a template registry.
pub fn register_all(registry: &mut Handlebars<'_>) {
    for (name, helper) in HELPERS {
        match *helper {
            TemplateHelper::Value(h) => {
                registry.register_helper(name, Box::new(h));
            }
            TemplateHelper::Block(h) => {
                registry.register_helper(name, Box::new(h));
            }
        }
    }
}

fn param<'a>(h: &'a Helper<'_>, index: usize) -> &'a Value {
    h.param(index).map(|p| p.value()).unwrap_or(&Value::Null)
}

impl HelperDef for ValueHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let value = match self {
            Self::Currency => currency(param(h, 0)).map(Value::String),
            Self::MonthName => month_name(param(h, 0)).map(|m| Value::String(m.to_string())),
            Self::DateMonthYear => date_month_year(param(h, 0)).map(Value::String),
            Self::Math => Some(math(param(h, 0), param(h, 1), param(h, 2))),
            Self::Uppercase => Some(Value::String(uppercase(param(h, 0)))),
            Self::GetChar => get_char(param(h, 0), param(h, 1)).map(Value::String),
            Self::SliceStr => slice_str(param(h, 0), param(h, 1), param(h, 2)).map(Value::String),
            Self::Calculate => calculate(param(h, 0), param(h, 1), param(h, 2)).map(Value::String),
            Self::Paragraphize => Some(paragraphize(param(h, 0))),
            Self::Increment => increment(param(h, 0)).map(Value::from),
            Self::Float => float(param(h, 0)).map(Value::String),
        };

        Ok(ScopedJson::Derived(value.unwrap_or(Value::Null)))
    }
}

impl HelperDef for BlockHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let matched = match self {
            Self::NotEqual => not_equal(param(h, 0), param(h, 1)),
            Self::IsEven => is_even(param(h, 0)),
            Self::Compare => {
                let operator = param(h, 1).render();
                match compare(param(h, 0), &operator, param(h, 2)) {
                    Some(matched) => matched,
                    None => {
                        log::warn!("compare helper: unsupported operator '{}'", operator);
                        return Ok(());
                    }
                }
            }
            Self::ForRange => return render_range(h, r, ctx, rc, out),
        };

        let branch = if matched { h.template() } else { h.inverse() };
        match branch {
            Some(t) => t.render(r, ctx, rc, out),
            None => Ok(()),
        }
    }
}

fn render_range<'reg: 'rc, 'rc>(
    h: &Helper<'rc>,
    r: &'reg Handlebars<'reg>,
    ctx: &'rc Context,
    rc: &mut RenderContext<'reg, 'rc>,
    out: &mut dyn Output,
) -> HelperResult {
    let steps = range_steps(param(h, 0), param(h, 1), param(h, 2))
        .map_err(|message| RenderError::from(RenderErrorReason::Other(message)))?;

    let Some(body) = h.template() else {
        return Ok(());
    };

    for i in steps {
        let mut block = BlockContext::new();
        block.set_base_value(number_value(i));
        rc.push_block(block);
        let result = body.render(r, ctx, rc, out);
        rc.pop_block();
        result?;
    }
    Ok(())
}

// ============================================================================
// Value coercion
// ============================================================================

/// Loose numeric conversion: numbers as is, trimmed numeric strings (empty is 0),
/// booleans as 1/0, null as 0. `None` when the value is not a number.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::String(s) => {
            let trimmed = s.trim();
            match trimmed {
                "" => Some(0.0),
                "Infinity" | "+Infinity" => Some(f64::INFINITY),
                "-Infinity" => Some(f64::NEG_INFINITY),
                _ if trimmed
                    .chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')) =>
                {
                    trimmed.parse::<f64>().ok()
                }
                _ => None,
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Parses the longest leading float literal of a string (`"12.5px"` is 12.5).
pub fn parse_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float_prefix(s),
        _ => None,
    }
}

fn parse_float_prefix(text: &str) -> Option<f64> {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    if s[end..].starts_with("Infinity") {
        return Some(if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok()
}

/// Parses the leading integer of a value, truncating numbers.
pub fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim_start();
            let (sign, rest) = match s.as_bytes().first() {
                Some(b'-') => (-1, &s[1..]),
                Some(b'+') => (1, &s[1..]),
                _ => (1, s),
            };
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<i64>().ok().map(|n| sign * n)
        }
        _ => None,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.render()),
    }
}

/// Converts a float into a JSON value; non-finite results are kept as their textual form.
pub fn number_value(value: f64) -> Value {
    if value.is_nan() {
        return Value::String("NaN".to_string());
    }
    if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        return Value::String(text.to_string());
    }
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        return Value::from(value as i64);
    }
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

/// Fixed formatting policy: `decimals` fractional digits, `,` thousands separator, `.`
/// decimal separator. Rounds half away from zero; a value rounding to zero has no sign.
pub fn format_grouped(value: f64, decimals: usize) -> String {
    let scale = 10f64.powi(decimals as i32);
    let units = (value.abs() * scale).round();
    let mut digits = format!("{:.0}", units);
    if digits.len() <= decimals {
        digits = format!("{:0>width$}", digits, width = decimals + 1);
    }

    let (int_part, frac_part) = digits.split_at(digits.len() - decimals);
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && units != 0.0 { "-" } else { "" };
    if decimals == 0 {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac_part}")
    }
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.date_naive())
                .ok()
                .or_else(|| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                        .map(|dt| dt.date())
                        .ok()
                })
        }
        _ => None,
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// `currencyLei`: `null` for zero or non-numeric amounts, else `1,234.50`.
pub fn currency(amount: &Value) -> Option<String> {
    to_number(amount)
        .filter(|n| *n != 0.0 && n.is_finite())
        .map(|n| format_grouped(n, 2))
}

/// `monthDate`: Romanian long month name of a date.
pub fn month_name(date: &Value) -> Option<&'static str> {
    parse_date(date).map(|d| MONTHS[d.month0() as usize])
}

/// `dateMonthYear`: `dd/mm/yyyy`.
pub fn date_month_year(date: &Value) -> Option<String> {
    parse_date(date).map(|d| d.format("%d/%m/%Y").to_string())
}

/// `notEqual`: true when the values differ under strict equality.
pub fn not_equal(a: &Value, b: &Value) -> bool {
    !strict_eq(a, b)
}

fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => a == b,
        _ => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn relational(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    to_number(a)?.partial_cmp(&to_number(b)?)
}

/// `compare`: `None` for an unsupported operator.
pub fn compare(a: &Value, operator: &str, b: &Value) -> Option<bool> {
    let result = match operator {
        "!=" => !loose_eq(a, b),
        "==" => loose_eq(a, b),
        "===" => strict_eq(a, b),
        "<" => relational(a, b) == Some(Ordering::Less),
        "<=" => matches!(relational(a, b), Some(Ordering::Less | Ordering::Equal)),
        ">" => relational(a, b) == Some(Ordering::Greater),
        ">=" => matches!(relational(a, b), Some(Ordering::Greater | Ordering::Equal)),
        _ => return None,
    };
    Some(result)
}

/// `math`: float arithmetic; `null` for an unsupported operator.
pub fn math(a: &Value, operator: &Value, b: &Value) -> Value {
    let lhs = parse_float(a).unwrap_or(f64::NAN);
    let rhs = parse_float(b).unwrap_or(f64::NAN);

    let result = match operator.as_str().unwrap_or_default() {
        "+" => lhs + rhs,
        "-" => lhs - rhs,
        "*" => lhs * rhs,
        "/" => lhs / rhs,
        "%" => lhs % rhs,
        _ => return Value::Null,
    };
    number_value(result)
}

pub fn uppercase(text: &Value) -> String {
    value_text(text).map(|s| s.to_uppercase()).unwrap_or_default()
}

/// `getChar`: character at the given index, `None` when there is no base string.
pub fn get_char(text: &Value, index: &Value) -> Option<String> {
    let text = value_text(text)?;
    let index = parse_int(index).unwrap_or(0);
    if index < 0 {
        return Some(String::new());
    }
    Some(
        text.chars()
            .nth(index as usize)
            .map(String::from)
            .unwrap_or_default(),
    )
}

/// `sliceStr`: slice with negative indices counting from the end; an absent end means the
/// end of the string.
pub fn slice_str(text: &Value, start: &Value, end: &Value) -> Option<String> {
    let text = value_text(text)?;
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len() as i64;

    let clamp = |index: i64| -> usize {
        let index = if index < 0 { len + index } else { index };
        index.clamp(0, len) as usize
    };
    let from = clamp(parse_int(start).unwrap_or(0));
    let to = match end {
        Value::Null => len as usize,
        other => clamp(parse_int(other).unwrap_or(0)),
    };

    if from >= to {
        return Some(String::new());
    }
    Some(chars[from..to].iter().collect())
}

/// `calculate`: adds or subtracts two amounts, tolerating a missing operand.
pub fn calculate(a: &Value, operator: &Value, b: &Value) -> Option<String> {
    let lhs = to_number(a).filter(|n| *n != 0.0);
    let rhs = to_number(b).filter(|n| *n != 0.0);

    let amount = match (lhs, rhs) {
        (Some(x), Some(y)) => match operator.as_str() {
            Some("+") => Some(x + y),
            Some("-") => Some(x - y),
            _ => None,
        },
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    };

    amount
        .filter(|n| *n != 0.0 && n.is_finite())
        .map(|n| format_grouped(n, 0))
}

/// Loop counters for `for from to incr`.
pub fn range_steps(from: &Value, to: &Value, incr: &Value) -> Result<Vec<f64>, String> {
    let (Some(from), Some(to), Some(incr)) = (to_number(from), to_number(to), to_number(incr))
    else {
        return Err("for helper: bounds and step must be numeric".to_string());
    };
    if !from.is_finite() || !to.is_finite() || !incr.is_finite() || incr <= 0.0 {
        return Err(format!(
            "for helper: step {incr} never reaches {to} from {from}"
        ));
    }

    let mut steps = Vec::new();
    let mut i = from;
    while i < to {
        if steps.len() == MAX_LOOP_ITERATIONS {
            return Err(format!(
                "for helper: more than {MAX_LOOP_ITERATIONS} iterations"
            ));
        }
        steps.push(i);
        i += incr;
    }
    Ok(steps)
}

/// `replace`: newlines become paragraph breaks, tabs become indented paragraph breaks.
pub fn paragraphize(text: &Value) -> Value {
    let Value::String(text) = text else {
        return text.clone();
    };
    if text.is_empty() {
        return Value::String(String::new());
    }

    let mut html = String::with_capacity(text.len() + PARAGRAPH_OPEN.len() * 2);
    html.push_str(PARAGRAPH_OPEN);
    for ch in text.chars() {
        match ch {
            '\n' => {
                html.push_str("</p>");
                html.push_str(PARAGRAPH_OPEN);
            }
            '\t' => {
                html.push_str("</p>");
                html.push_str(INDENT_OPEN);
            }
            '\r' => {}
            other => html.push(other),
        }
    }
    html.push_str("</p>");
    Value::String(html)
}

/// `isEven`: positive and divisible by two.
pub fn is_even(value: &Value) -> bool {
    to_number(value).is_some_and(|n| n > 0.0 && n % 2.0 == 0.0)
}

pub fn increment(value: &Value) -> Option<i64> {
    parse_int(value).and_then(|n| n.checked_add(1))
}

/// `float`: two decimals with grouped thousands.
pub fn float(value: &Value) -> Option<String> {
    parse_float(value)
        .filter(|n| n.is_finite())
        .map(|n| format_grouped(n, 2))
}
