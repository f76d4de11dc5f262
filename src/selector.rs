//! `name` / `name:alias` selectors for captured headers and metadata.

use std::fmt;

/// A header or metadata key to capture, optionally renamed in the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    name: String,
    alias: Option<String>,
}

impl Selector {
    pub fn new(name: impl Into<String>, alias: Option<String>) -> Self {
        Selector {
            name: name.into(),
            alias: alias.filter(|a| !a.is_empty()),
        }
    }

    /// Parses `name` or `name:alias`. Never fails.
    ///
    /// A colon at position 0 belongs to the name (pseudo-fields such as
    /// `:authority`); for such names the alias is split off at the last colon.
    ///
    /// ```rust
    /// use actix_web_middleware_accesslog::Selector;
    ///
    /// let s = Selector::parse(":authority:host");
    /// assert_eq!(s.name(), ":authority");
    /// assert_eq!(s.label(), "host");
    /// ```
    pub fn parse(s: &str) -> Self {
        let (name, alias) = match s.find(':') {
            None => (s, ""),
            Some(0) => match s.rfind(':') {
                Some(last) if last > 0 => (&s[..last], &s[last + 1..]),
                _ => (s, ""),
            },
            Some(first) => (&s[..first], &s[first + 1..]),
        };
        Selector::new(name, Some(alias.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Key used in the emitted event.
    pub fn label(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Whether the name is a transport pseudo-field like `:authority`.
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{}:{}", self.name, alias),
            None => f.write_str(&self.name),
        }
    }
}

/// Ordered set of selectors keyed by source name.
///
/// Repeating a name keeps its first position and takes the later alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selectors(Vec<Selector>);

impl Selectors {
    pub fn new() -> Self {
        Selectors::default()
    }

    pub fn insert(&mut self, selector: Selector) {
        match self.0.iter_mut().find(|s| s.name == selector.name) {
            Some(existing) => *existing = selector,
            None => self.0.push(selector),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Selector> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for Selectors {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut selectors = Selectors::new();
        for s in iter {
            selectors.insert(Selector::parse(s.as_ref()));
        }
        selectors
    }
}

impl<'a> IntoIterator for &'a Selectors {
    type Item = &'a Selector;
    type IntoIter = std::slice::Iter<'a, Selector>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
