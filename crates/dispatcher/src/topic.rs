//! TopicPattern - configured topic, literal or regular expression
//!
//! A pattern like `/net/wlan/ap-(?P<ap>\d+)/clients` is subscribed at the
//! broker as `/net/wlan/#`; the regex then narrows what arrives and its
//! named groups become tags.

use std::borrow::Cow;

use regex::Regex;

use contracts::Tags;

use crate::DispatcherError;

/// Multi-level wildcard segment
pub const WILDCARD: &str = "#";

/// Compiled topic pattern
#[derive(Debug, Clone)]
pub struct TopicPattern {
    pattern: String,
    subscribe_topic: String,
    regex: Option<Regex>,
}

impl TopicPattern {
    /// Compile a pattern.
    ///
    /// Literal patterns are matched by string equality. Anything else is
    /// compiled as a regex anchored at the end (not at the start).
    pub fn new(pattern: &str) -> Result<Self, DispatcherError> {
        let (subscribe_topic, is_regex) = non_regex_topic(pattern);
        let regex = if is_regex {
            let source = if pattern.ends_with('$') {
                pattern.to_string()
            } else {
                format!("{pattern}$")
            };
            let re = Regex::new(&source)
                .map_err(|e| DispatcherError::invalid_pattern(pattern, e))?;
            Some(re)
        } else {
            None
        };

        Ok(Self {
            pattern: pattern.to_string(),
            subscribe_topic,
            regex,
        })
    }

    /// Configured pattern text
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Broker-level subscription covering every topic the pattern matches
    pub fn subscribe_topic(&self) -> &str {
        &self.subscribe_topic
    }

    pub fn is_regex(&self) -> bool {
        self.regex.is_some()
    }

    pub fn matches(&self, topic: &str) -> bool {
        match &self.regex {
            None => topic == self.subscribe_topic,
            Some(re) => re.is_match(topic),
        }
    }

    /// Tags for `topic`: static tags overlaid with non-empty named captures.
    ///
    /// Returns `None` when the regex does not match. Literal patterns always
    /// hand back the static tags untouched.
    pub fn tags<'a>(&self, topic: &str, static_tags: &'a Tags) -> Option<Cow<'a, Tags>> {
        let Some(re) = &self.regex else {
            return Some(Cow::Borrowed(static_tags));
        };
        let captures = re.captures(topic)?;

        let mut tags = static_tags.clone();
        for name in re.capture_names().flatten() {
            if let Some(m) = captures.name(name) {
                if !m.as_str().is_empty() {
                    tags.insert(name.to_string(), m.as_str().to_string());
                }
            }
        }
        Some(Cow::Owned(tags))
    }
}

/// Split a pattern into its broker-level subscription.
///
/// Leading segments made of `[A-Za-z0-9_-]` are kept; the first segment
/// containing anything else is replaced by `#` and the rest is cut off.
/// Returns the subscription and whether a regex is needed.
pub fn non_regex_topic(pattern: &str) -> (String, bool) {
    let mut result = String::with_capacity(pattern.len());
    for segment in pattern.split('/') {
        if is_literal_segment(segment) {
            result.push_str(segment);
            result.push('/');
        } else {
            result.push_str(WILDCARD);
            return (result, true);
        }
    }
    (pattern.to_string(), false)
}

fn is_literal_segment(segment: &str) -> bool {
    segment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Split a topic into router path segments
pub fn split_topic(topic: &str) -> Vec<String> {
    topic.split('/').map(str::to_string).collect()
}
