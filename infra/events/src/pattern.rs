use crate::error::EventBusError;
use std::borrow::Cow;
use std::fmt;

/// Default segment delimiter of namespaces and patterns.
pub const DEFAULT_DELIMITER: char = '.';
/// Matches exactly one segment.
pub const WILDCARD_SINGLE: &str = "*";
/// Default marker matching zero or more trailing segments.
pub const DEFAULT_DEEP_WILDCARD: &str = "**";

/// Lexical rules used to parse subscription patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternSyntax {
    delimiter: char,
    deep_wildcard: Cow<'static, str>,
}

impl Default for PatternSyntax {
    fn default() -> Self {
        Self { delimiter: DEFAULT_DELIMITER, deep_wildcard: Cow::Borrowed(DEFAULT_DEEP_WILDCARD) }
    }
}

impl PatternSyntax {
    /// Builds a custom syntax, e.g. NATS-style `PatternSyntax::new('.', ">")`.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidConfiguration`] if the deep-wildcard marker is
    /// empty, equals the single-segment wildcard, or contains the delimiter.
    pub fn new(
        delimiter: char,
        deep_wildcard: impl Into<Cow<'static, str>>,
    ) -> Result<Self, EventBusError> {
        let deep_wildcard = deep_wildcard.into();

        let problem = if deep_wildcard.is_empty() {
            Some("deep wildcard marker cannot be empty")
        } else if deep_wildcard == WILDCARD_SINGLE {
            Some("deep wildcard marker must differ from the single-segment wildcard")
        } else if deep_wildcard.contains(delimiter) {
            Some("deep wildcard marker cannot contain the delimiter")
        } else {
            None
        };

        if let Some(problem) = problem {
            return Err(EventBusError::InvalidConfiguration {
                message: problem.into(),
                context: Some(format!("delimiter '{delimiter}', marker '{deep_wildcard}'").into()),
            });
        }

        Ok(Self { delimiter, deep_wildcard })
    }

    #[must_use]
    pub const fn delimiter(&self) -> char {
        self.delimiter
    }

    #[must_use]
    pub fn deep_wildcard(&self) -> &str {
        &self.deep_wildcard
    }
}

/// One parsed segment of a [`Pattern`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Must equal the namespace segment exactly.
    Literal(Box<str>),
    /// `*`: any single segment.
    Any,
    /// Deep wildcard: zero or more trailing segments. Always the last segment.
    Deep,
}

/// A validated subscription pattern such as `order.created`, `order.*` or `order.**`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    raw: Box<str>,
    segments: Box<[Segment]>,
    delimiter: char,
}

impl Pattern {
    /// Parses `raw` under the given syntax.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidPattern`] when the pattern is empty, has an
    /// empty segment, places the deep wildcard anywhere but last, or mixes wildcard
    /// characters with literal text inside one segment.
    ///
    /// # Examples
    /// ```rust
    /// use relay_event_bus::{Pattern, PatternSyntax};
    ///
    /// let syntax = PatternSyntax::default();
    /// let pattern = Pattern::parse("order.*", &syntax).unwrap();
    /// assert!(pattern.matches("order.created"));
    /// assert!(!pattern.matches("order.created.extra"));
    /// assert!(Pattern::parse("order..created", &syntax).is_err());
    /// ```
    pub fn parse(raw: &str, syntax: &PatternSyntax) -> Result<Self, EventBusError> {
        let invalid = |reason: &'static str| EventBusError::InvalidPattern {
            message: raw.to_owned().into(),
            context: Some(reason.into()),
        };

        if raw.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let deep = syntax.deep_wildcard();
        let parts: Vec<&str> = raw.split(syntax.delimiter()).collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.into_iter().enumerate() {
            let segment = if part.is_empty() {
                return Err(invalid("empty segment"));
            } else if part == deep {
                if i != last {
                    return Err(invalid("deep wildcard must be the last segment"));
                }
                Segment::Deep
            } else if part == WILDCARD_SINGLE {
                Segment::Any
            } else if part.contains(WILDCARD_SINGLE) || part.contains(deep) {
                return Err(invalid("wildcards cannot be mixed with literal text"));
            } else {
                Segment::Literal(part.into())
            };
            segments.push(segment);
        }

        Ok(Self { raw: raw.into(), segments: segments.into(), delimiter: syntax.delimiter() })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True if the pattern contains no wildcard segments.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Shorthand for [`matches`]`(self, namespace)`.
    #[must_use]
    pub fn matches(&self, namespace: &str) -> bool {
        matches(self, namespace)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Pure namespace matching predicate.
///
/// * literal segments must be equal,
/// * `*` consumes exactly one non-empty segment,
/// * the deep wildcard consumes everything that is left, including nothing.
#[must_use]
pub fn matches(pattern: &Pattern, namespace: &str) -> bool {
    let mut parts = namespace.split(pattern.delimiter);

    for segment in pattern.segments.iter() {
        match segment {
            Segment::Deep => return true,
            Segment::Any => match parts.next() {
                Some(part) if !part.is_empty() => {},
                _ => return false,
            },
            Segment::Literal(literal) => {
                if parts.next() != Some(literal.as_ref()) {
                    return false;
                }
            },
        }
    }

    parts.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Pattern {
        Pattern::parse(raw, &PatternSyntax::default()).unwrap()
    }

    #[test]
    fn test_literal_pattern() {
        let p = parse("order.created");
        assert!(p.is_literal());
        assert!(p.matches("order.created"));
        assert!(!p.matches("order"));
        assert!(!p.matches("order.created.extra"));
        assert!(!p.matches("order.shipped"));
    }

    #[test]
    fn test_single_wildcard_matches_exactly_one_segment() {
        let p = parse("order.*");
        assert!(p.matches("order.created"));
        assert!(p.matches("order.shipped"));
        assert!(!p.matches("order"));
        assert!(!p.matches("order.created.extra"));
        assert!(!p.matches("order."));
    }

    #[test]
    fn test_deep_wildcard_matches_zero_or_more_segments() {
        let p = parse("order.**");
        assert!(p.matches("order"));
        assert!(p.matches("order.created"));
        assert!(p.matches("order.created.extra"));
        assert!(!p.matches("orders.created"));

        assert!(parse("**").matches("anything.at.all"));
    }

    #[test]
    fn test_inner_single_wildcard() {
        let p = parse("*.created");
        assert!(p.matches("order.created"));
        assert!(p.matches("user.created"));
        assert!(!p.matches("order.shipped"));
        assert!(!p.matches("created"));
    }

    #[test]
    fn test_invalid_patterns_are_rejected() {
        let syntax = PatternSyntax::default();
        for raw in ["", ".", "a..b", ".a", "a.", "a.**.b", "ord*", "a.b**", "**x"] {
            let result = Pattern::parse(raw, &syntax);
            assert!(
                matches!(result, Err(EventBusError::InvalidPattern { .. })),
                "pattern {raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_custom_syntax() {
        let syntax = PatternSyntax::new('/', ">").unwrap();
        let p = Pattern::parse("orders/>", &syntax).unwrap();
        assert!(p.matches("orders"));
        assert!(p.matches("orders/eu/created"));
        assert!(!p.matches("orders.eu"));
        assert_eq!(p.segments().last(), Some(&Segment::Deep));
    }

    #[test]
    fn test_invalid_syntax_is_rejected() {
        assert!(PatternSyntax::new('.', "").is_err());
        assert!(PatternSyntax::new('.', "*").is_err());
        assert!(PatternSyntax::new('.', "a.b").is_err());
    }
}
