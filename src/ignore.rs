//! Method-keyed glob patterns for requests that must not be logged.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;

/// Shell-style pattern over request paths.
///
/// `*` matches any run of characters except `/`, `?` a single non-`/`
/// character, `[abc]`, `[a-z]` and `[!abc]` a character class, and `\`
/// escapes the next character.
#[derive(Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    /// Compiles `pattern`. Returns `None` for malformed patterns.
    pub fn new(pattern: &str) -> Option<Glob> {
        let source = translate(pattern)?;
        let regex = Regex::new(&source).ok()?;
        Some(Glob {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Glob").field(&self.pattern).finish()
    }
}

fn translate(pattern: &str) -> Option<String> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '\\' => {
                let escaped = chars.next()?;
                out.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4])));
            }
            '[' => {
                out.push('[');
                let mut first = true;
                loop {
                    let c = chars.next()?;
                    match c {
                        ']' if !first => break,
                        '!' | '^' if first => out.push('^'),
                        '\\' => {
                            let escaped = chars.next()?;
                            out.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4])));
                        }
                        '-' => out.push('-'),
                        c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
                    }
                    first = false;
                }
                out.push(']');
            }
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }

    out.push('$');
    Some(out)
}

/// Request paths that are served but never logged, grouped by HTTP method.
#[derive(Debug, Clone, Default)]
pub struct IgnoredPaths(HashMap<String, Vec<Glob>>);

impl IgnoredPaths {
    pub fn new() -> Self {
        IgnoredPaths::default()
    }

    /// Adds `pattern` for `method`. Malformed patterns are dropped with a warning.
    pub fn insert(&mut self, method: &str, pattern: &str) {
        match Glob::new(pattern) {
            Some(glob) => self
                .0
                .entry(method.to_ascii_uppercase())
                .or_default()
                .push(glob),
            None => log::warn!("ignoring malformed path pattern {pattern:?} for {method}"),
        }
    }

    /// Whether a `method` request to `path` should be left out of the access log.
    pub fn is_ignored(&self, method: &str, path: &str) -> bool {
        let Some(globs) = self.0.get(method) else {
            return false;
        };

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        globs.iter().any(|g| g.is_match(&path))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<M, P, I> FromIterator<(M, I)> for IgnoredPaths
where
    M: AsRef<str>,
    P: AsRef<str>,
    I: IntoIterator<Item = P>,
{
    fn from_iter<T: IntoIterator<Item = (M, I)>>(iter: T) -> Self {
        let mut paths = IgnoredPaths::new();
        for (method, patterns) in iter {
            for p in patterns {
                paths.insert(method.as_ref(), p.as_ref());
            }
        }
        paths
    }
}
