use crate::error::Result;
use regex::Regex;

/// Ordered list of regular expressions. A line matches when any pattern does.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Regex>,
}

impl PatternSet {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Matches any data at all; used to detect activity rather than content.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(line))
    }

    /// First line of `chunk` that matches, in order.
    pub fn first_match<'a>(&self, chunk: &'a str) -> Option<&'a str> {
        split_lines(chunk).find(|line| self.is_match(line))
    }

    /// Every matching line of `chunk`, each at most once.
    pub fn matching_lines<'a>(&self, chunk: &'a str) -> impl Iterator<Item = &'a str> {
        split_lines(chunk).filter(move |line| self.is_match(line))
    }

    pub fn describe(&self) -> String {
        self.patterns
            .iter()
            .map(|p| format!("/{}/", p.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Splits on `\n`, dropping a trailing `\r` from each piece.
pub fn split_lines(chunk: &str) -> impl Iterator<Item = &str> {
    chunk.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l))
}
