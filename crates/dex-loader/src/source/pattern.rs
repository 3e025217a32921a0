//! Shell-style file name patterns (`*_Daily*.csv`)

use dex_common::{DexError, Result};
use regex::Regex;

/// Compiled glob matched against whole file names.
///
/// Supports `*`, `?`, `[abc]`, `[a-z]` and `[!abc]` with `fnmatch`
/// semantics; matching is case-sensitive. Inside a set every character is
/// literal apart from ranges, so `[^a]` matches `^` or `a`.
#[derive(Debug, Clone)]
pub struct NamePattern {
    glob: String,
    regex: Regex,
}

impl NamePattern {
    pub fn new(glob: &str) -> Result<Self> {
        let regex = Regex::new(&translate(glob))
            .map_err(|e| DexError::config(format!("invalid name pattern '{}': {}", glob, e)))?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

impl std::fmt::Display for NamePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.glob)
    }
}

fn translate(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("(?s)^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // `]` directly after `[` or `[!` is part of the set
                let mut j = i + 1;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }

                if j >= chars.len() {
                    out.push_str(r"\[");
                } else {
                    out.push_str(&translate_set(&chars[i + 1..j]));
                    i = j;
                }
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// Regex class for the body of a `[...]` set
fn translate_set(body: &[char]) -> String {
    let (negated, body) = match body.split_first() {
        Some(('!', rest)) => (true, rest),
        _ => (false, body),
    };

    let mut class = String::new();
    let mut k = 0;
    while k < body.len() {
        let lo = body[k];
        if k + 2 < body.len() && body[k + 1] == '-' {
            let hi = body[k + 2];
            // A reversed range matches nothing
            if lo <= hi {
                class.push_str(&regex::escape(&lo.to_string()));
                class.push('-');
                class.push_str(&regex::escape(&hi.to_string()));
            }
            k += 3;
        } else {
            class.push_str(&regex::escape(&lo.to_string()));
            k += 1;
        }
    }

    match (class.is_empty(), negated) {
        (true, true) => ".".to_string(),
        (true, false) => "[a&&b]".to_string(),
        (false, true) => format!("[^{}]", class),
        (false, false) => format!("[{}]", class),
    }
}
