//! Typed extraction from captured command output.

use corral_shared::errors::ParseError;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// A regular expression plus the capture group holding the value of interest.
#[derive(Clone, Debug)]
pub struct OutputPattern {
    regex: Regex,
    capture: usize,
}

impl OutputPattern {
    /// Compile `pattern`, extracting capture group `capture` (0 is the whole
    /// match).
    pub fn new(pattern: &str, capture: usize) -> Result<Self, ParseError> {
        let regex = Regex::new(pattern)
            .map_err(|e| ParseError::invalid_pattern(pattern, e.to_string()))?;
        if capture >= regex.captures_len() {
            return Err(ParseError::invalid_pattern(
                pattern,
                format!(
                    "capture group {} requested but pattern has {}",
                    capture,
                    regex.captures_len() - 1
                ),
            ));
        }
        Ok(Self { regex, capture })
    }

    /// Matches the `/etc/group` line of `group` and captures its gid, as
    /// printed by `getent group <name>`. Only ASCII digits count as a gid.
    pub fn group_line(group: &str) -> Result<Self, ParseError> {
        Self::new(&format!(r"(?m)^{}:[^:\n]*:([0-9]+):", regex::escape(group)), 1)
    }

    /// Captures the `field`-th (0-based) colon separated field of the first
    /// line.
    pub fn colon_field(field: usize) -> Result<Self, ParseError> {
        Self::new(&format!(r"^(?:[^:\n]*:){{{}}}([^:\n]*)", field), 1)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// The captured text, if the pattern matches.
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(self.capture))
            .map(|m| m.as_str())
    }
}

impl fmt::Display for OutputPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/ group {}", self.regex.as_str(), self.capture)
    }
}

/// Parses values out of captured output.
pub struct OutputParser;

impl OutputParser {
    /// Extract a `T` from `text`.
    ///
    /// Fails with a format mismatch if the pattern does not match, and with a
    /// numeric conversion error if the captured text does not parse (for
    /// example because it overflows `T`). Both carry the offending input.
    ///
    /// ```
    /// use corral::{OutputParser, OutputPattern};
    ///
    /// let pattern = OutputPattern::group_line("docker").unwrap();
    /// let gid: u32 = OutputParser::parse(&pattern, "docker:x:121:ubuntu\n").unwrap();
    /// assert_eq!(gid, 121);
    /// ```
    pub fn parse<T>(pattern: &OutputPattern, text: &str) -> Result<T, ParseError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let captured = pattern
            .find(text)
            .ok_or_else(|| ParseError::format_mismatch(text))?;
        captured
            .trim()
            .parse::<T>()
            .map_err(|e| ParseError::numeric_conversion(captured, e.to_string()))
    }

    /// Like [`parse`](Self::parse) but for bytes, decoded lossily.
    pub fn parse_bytes<T>(pattern: &OutputPattern, bytes: &[u8]) -> Result<T, ParseError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Self::parse(pattern, &String::from_utf8_lossy(bytes))
    }
}
