//! Shell-style wildcard matching (`*`, `?`, `[...]`), case-insensitive

use regex::Regex;

use crate::error::{RecoveryError, Result};

#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

/// Translate a glob into an anchored regex. `*` also crosses `/`, so
/// `*.txt` matches both a bare name and a full path.
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("(?s)^");
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut j = i;
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
                    out.push_str("\\[");
                    continue;
                }

                let mut class: String = chars[i..j].iter().collect();
                i = j + 1;
                let negated = class.starts_with('!');
                if negated {
                    class.remove(0);
                }
                let mut body = String::new();
                for ch in class.chars() {
                    match ch {
                        '\\' | '[' | ']' | '&' | '~' | '^' => {
                            body.push('\\');
                            body.push(ch);
                        }
                        _ => body.push(ch),
                    }
                }
                out.push('[');
                if negated {
                    out.push('^');
                }
                out.push_str(&body);
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    out
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&translate(&pattern.to_lowercase()))
            .map_err(|e| RecoveryError::Pattern(format!("{}: {}", pattern, e)))?;
        Ok(GlobPattern {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(&text.to_lowercase())
    }
}
