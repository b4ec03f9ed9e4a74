use crate::diag::Reporter;
use crate::options::Options;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum State {
    Sign,
    Exact,
    Align,
    Width,
    Frac,
    Prec,
    Done,
    Invalid,
}

/// A print format spec, parsed one character at a time:
/// `[sign][#][-][0][width][.frac][qprec]type`, with type one of
/// `d u X x b o f s`.
#[derive(Debug, Clone)]
pub struct FormatSpec {
    state: State,
    sign: Option<char>,
    exact: bool,
    align_left: bool,
    pad_zero: bool,
    width: usize,
    has_frac: bool,
    frac_width: usize,
    has_prec: bool,
    precision: usize,
    kind: char,
    valid: bool,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            state: State::Sign,
            sign: None,
            exact: false,
            align_left: false,
            pad_zero: false,
            width: 0,
            has_frac: false,
            frac_width: 0,
            has_prec: false,
            precision: 0,
            kind: 's',
            valid: false,
        }
    }
}

impl FormatSpec {
    pub fn parse(spec: &str) -> Self {
        let mut parsed = Self::default();
        for ch in spec.chars() {
            parsed.use_character(ch);
        }
        parsed.finish_characters();
        parsed
    }

    pub fn use_character(&mut self, ch: char) {
        if self.state == State::Invalid {
            return;
        }

        match ch {
            ' ' | '+' => {
                if self.state <= State::Sign {
                    self.state = State::Exact;
                    self.sign = Some(ch);
                    return;
                }
            }
            '#' => {
                if self.state <= State::Exact {
                    self.state = State::Align;
                    self.exact = true;
                    return;
                }
            }
            '-' => {
                if self.state <= State::Align {
                    self.state = State::Width;
                    self.align_left = true;
                    return;
                }
            }
            '0'..='9' => {
                let digit = (ch as u8 - b'0') as usize;
                if self.state < State::Width {
                    if ch == '0' {
                        self.pad_zero = true;
                    }
                    self.state = State::Width;
                    self.width = digit;
                    return;
                } else if self.state == State::Width {
                    self.width = self.width * 10 + digit;
                    return;
                } else if self.state == State::Frac {
                    self.frac_width = self.frac_width * 10 + digit;
                    return;
                } else if self.state == State::Prec {
                    self.precision = self.precision * 10 + digit;
                    return;
                }
            }
            '.' => {
                if self.state <= State::Width {
                    self.state = State::Frac;
                    self.has_frac = true;
                    return;
                }
            }
            'q' => {
                if self.state <= State::Prec {
                    self.state = State::Prec;
                    self.has_prec = true;
                    return;
                }
            }
            'd' | 'u' | 'X' | 'x' | 'b' | 'o' | 'f' | 's' => {
                if self.state < State::Done {
                    self.state = State::Done;
                    self.valid = true;
                    self.kind = ch;
                    return;
                }
            }
            _ => {}
        }

        self.state = State::Invalid;
        self.valid = false;
    }

    pub fn finish_characters(&mut self) {
        if !self.is_valid() {
            self.state = State::Invalid;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state == State::Sign
    }

    pub fn is_valid(&self) -> bool {
        self.valid || self.is_empty()
    }

    pub fn append_string(&self, out: &mut String, value: &str, diag: &mut Reporter) {
        // No format at all means plain string output.
        let kind = if self.is_empty() { 's' } else { self.kind };

        if let Some(sign) = self.sign {
            diag.error(format!("Formatting string with sign flag '{sign}'"));
        }
        if self.pad_zero {
            diag.error("Formatting string with padding flag '0'");
        }
        if self.has_frac {
            diag.error("Formatting string with fractional width");
        }
        if self.has_prec {
            diag.error("Formatting string with fractional precision");
        }
        if kind != 's' {
            diag.error(format!("Formatting string as type '{kind}'"));
        }

        let value = if self.exact {
            escape_string(value)
        } else {
            value.to_string()
        };
        let pad = self.width.saturating_sub(value.chars().count());
        if self.align_left {
            out.push_str(&value);
            out.extend(std::iter::repeat(' ').take(pad));
        } else {
            out.extend(std::iter::repeat(' ').take(pad));
            out.push_str(&value);
        }
    }

    pub fn append_number(
        &self,
        out: &mut String,
        value: u32,
        options: &Options,
        diag: &mut Reporter,
    ) {
        // No format defaults to uppercase $hex.
        let (kind, exact) = if self.is_empty() {
            ('X', true)
        } else {
            (self.kind, self.exact)
        };

        if exact && !matches!(kind, 'X' | 'x' | 'b' | 'o' | 'f') {
            diag.error(format!("Formatting type '{kind}' with exact flag '#'"));
        }
        if kind != 'f' && self.has_frac {
            diag.error(format!("Formatting type '{kind}' with fractional width"));
        }
        if kind != 'f' && self.has_prec {
            diag.error(format!("Formatting type '{kind}' with fractional precision"));
        }
        if kind == 's' {
            diag.error("Formatting number as type 's'");
        }

        let mut sign_char = self.sign;
        let mut magnitude = value;
        if matches!(kind, 'd' | 'f') {
            let signed = value as i32;
            if signed < 0 {
                sign_char = Some('-');
                magnitude = signed.unsigned_abs();
            }
        }

        let prefix_char = match (exact, kind) {
            (true, 'X') | (true, 'x') => Some('$'),
            (true, 'b') => Some('%'),
            (true, 'o') => Some('&'),
            _ => None,
        };

        let digits = match kind {
            'b' => format!("{magnitude:b}"),
            'f' => {
                let mut frac_width = if self.has_frac { self.frac_width } else { 5 };
                if frac_width > 255 {
                    diag.error(format!(
                        "Fractional width {frac_width} too long, limiting to 255"
                    ));
                    frac_width = 255;
                }

                let default_prec = options.q_precision as usize;
                let mut precision = if self.has_prec {
                    self.precision
                } else {
                    default_prec
                };
                if !(1..=31).contains(&precision) {
                    diag.error(format!(
                        "Fixed-point constant precision {precision} invalid, \
                         defaulting to {default_prec}"
                    ));
                    precision = default_prec;
                }

                let fval = magnitude as f64 / 2f64.powi(precision as i32);
                if exact {
                    format!("{fval:.frac_width$}q{precision}")
                } else {
                    format!("{fval:.frac_width$}")
                }
            }
            'd' | 'u' => format!("{magnitude}"),
            'X' => format!("{magnitude:X}"),
            'x' => format!("{magnitude:x}"),
            'o' => format!("{magnitude:o}"),
            _ => format!("{magnitude}"),
        };

        let number_len =
            usize::from(sign_char.is_some()) + usize::from(prefix_char.is_some()) + digits.len();
        let pad = self.width.saturating_sub(number_len);

        if self.align_left {
            if let Some(sign) = sign_char {
                out.push(sign);
            }
            if let Some(prefix) = prefix_char {
                out.push(prefix);
            }
            out.push_str(&digits);
            out.extend(std::iter::repeat(' ').take(pad));
        } else if self.pad_zero {
            // Sign, then prefix, then zero padding.
            if let Some(sign) = sign_char {
                out.push(sign);
            }
            if let Some(prefix) = prefix_char {
                out.push(prefix);
            }
            out.extend(std::iter::repeat('0').take(pad));
            out.push_str(&digits);
        } else {
            // Space padding, then sign, then prefix.
            out.extend(std::iter::repeat(' ').take(pad));
            if let Some(sign) = sign_char {
                out.push(sign);
            }
            if let Some(prefix) = prefix_char {
                out.push(prefix);
            }
            out.push_str(&digits);
        }
    }
}

fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '\0' => escaped.push_str("\\0"),
            '\\' | '"' | '{' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// One PRINT argument.
#[derive(Debug, Clone)]
pub enum FormatArg {
    Number(i32),
    Str(String),
}

/// Expand `{spec}` holes in `fmt` with the given arguments, in order.
/// `{{` and `}}` escape literal braces.
pub fn interpolate(
    fmt: &str,
    args: &[FormatArg],
    options: &Options,
    diag: &mut Reporter,
) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    let mut next_arg = 0usize;

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut spec = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    spec.push(inner);
                }
                if !closed {
                    diag.error("Unterminated format spec in string");
                    break;
                }

                let parsed = FormatSpec::parse(&spec);
                if !parsed.is_valid() {
                    diag.error(format!("Invalid format spec '{{{spec}}}'"));
                    continue;
                }

                let Some(arg) = args.get(next_arg) else {
                    diag.error("Not enough arguments for format string");
                    continue;
                };
                next_arg += 1;

                match arg {
                    FormatArg::Number(value) => {
                        parsed.append_number(&mut out, *value as u32, options, diag);
                    }
                    FormatArg::Str(value) => parsed.append_string(&mut out, value, diag),
                }
            }
            _ => out.push(ch),
        }
    }

    if next_arg < args.len() {
        diag.error(format!(
            "Too many arguments for format string ({} unused)",
            args.len() - next_arg
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt_number(spec: &str, value: u32) -> (String, usize) {
        let mut out = String::new();
        let mut diag = Reporter::new();
        FormatSpec::parse(spec).append_number(&mut out, value, &Options::default(), &mut diag);
        (out, diag.error_count())
    }

    fn fmt_string(spec: &str, value: &str) -> (String, usize) {
        let mut out = String::new();
        let mut diag = Reporter::new();
        FormatSpec::parse(spec).append_string(&mut out, value, &mut diag);
        (out, diag.error_count())
    }

    #[test]
    fn empty_spec_defaults_to_prefixed_hex() {
        assert_eq!(fmt_number("", 0xC0DE), ("$C0DE".to_string(), 0));
    }

    #[test]
    fn decimal_handles_negative_values() {
        assert_eq!(fmt_number("d", (-42i32) as u32), ("-42".to_string(), 0));
    }

    #[test]
    fn zero_padding_goes_after_sign_and_prefix() {
        assert_eq!(fmt_number("08d", (-42i32) as u32), ("-0000042".to_string(), 0));
        assert_eq!(fmt_number("#06x", 0xBEEF), ("$0beef".to_string(), 0));
    }

    #[test]
    fn space_padding_goes_before_the_sign() {
        assert_eq!(fmt_number("+6d", 42), ("   +42".to_string(), 0));
    }

    #[test]
    fn left_alignment_pads_on_the_right() {
        assert_eq!(fmt_number("-6u", 42), ("42    ".to_string(), 0));
    }

    #[test]
    fn binary_uses_the_percent_prefix() {
        assert_eq!(fmt_number("#b", 0b1010), ("%1010".to_string(), 0));
        assert_eq!(fmt_number("b", 0), ("0".to_string(), 0));
    }

    #[test]
    fn fixed_point_uses_the_default_precision() {
        // 1.5 in Q16.16.
        assert_eq!(fmt_number("f", 0x0001_8000), ("1.50000".to_string(), 0));
        assert_eq!(
            fmt_number("#.2f", 0x0001_8000),
            ("1.50q16".to_string(), 0)
        );
    }

    #[test]
    fn fixed_point_precision_out_of_range_is_an_error() {
        let (out, errors) = fmt_number(".1q40f", 0x0001_8000);
        assert_eq!(errors, 1);
        // Falls back to the default precision.
        assert_eq!(out, "1.5");
    }

    #[test]
    fn invalid_specs_are_detected() {
        assert!(!FormatSpec::parse("z").is_valid());
        assert!(!FormatSpec::parse("d9").is_valid());
        assert!(!FormatSpec::parse("#-#d").is_valid());
        assert!(FormatSpec::parse("+#-09.3q8f").is_valid());
    }

    #[test]
    fn strings_pad_to_width() {
        assert_eq!(fmt_string("8s", "ok"), ("      ok".to_string(), 0));
        assert_eq!(fmt_string("-4s", "ok"), ("ok  ".to_string(), 0));
    }

    #[test]
    fn exact_strings_are_escaped() {
        assert_eq!(
            fmt_string("#s", "a\"b\nc"),
            ("a\\\"b\\nc".to_string(), 0)
        );
    }

    #[test]
    fn numeric_flags_on_strings_are_errors() {
        let (_, errors) = fmt_string("+0.2d", "oops");
        // Sign, zero-pad, fractional width, and the numeric type each
        // report separately.
        assert_eq!(errors, 4);
    }

    #[test]
    fn interpolation_fills_holes_in_order() {
        let mut diag = Reporter::new();
        let out = interpolate(
            "pc={} name={s}!",
            &[FormatArg::Number(0x150), FormatArg::Str("Main".into())],
            &Options::default(),
            &mut diag,
        );
        assert_eq!(out, "pc=$150 name=Main!");
        assert_eq!(diag.error_count(), 0);
    }

    #[test]
    fn interpolation_reports_arity_mismatches() {
        let mut diag = Reporter::new();
        interpolate("{d} {d}", &[FormatArg::Number(1)], &Options::default(), &mut diag);
        assert_eq!(diag.error_count(), 1);

        let mut diag = Reporter::new();
        interpolate("{d}", &[FormatArg::Number(1), FormatArg::Number(2)], &Options::default(), &mut diag);
        assert_eq!(diag.error_count(), 1);
    }

    #[test]
    fn doubled_braces_are_literal() {
        let mut diag = Reporter::new();
        let out = interpolate("{{not a hole}}", &[], &Options::default(), &mut diag);
        assert_eq!(out, "{not a hole}");
        assert_eq!(diag.error_count(), 0);
    }
}
