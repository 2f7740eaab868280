//! Shell-style tokenizer and option parser.
//!
//! ## Tokenizer
//!
//! - Unquoted whitespace separates tokens.
//! - `'...'` and `"..."` group text into the surrounding token; the quotes are dropped.
//! - An unterminated quote runs to the end of input.
//! - Backslashes are ordinary characters, so Windows paths and namespaced filters survive untouched.
//!
//! ## Option grammar
//!
//! | Input             | Result                                   |
//! |-------------------|------------------------------------------|
//! | `--key=value`     | `key` → `value`                          |
//! | `--key value`     | `key` → `value` (next token not an option) |
//! | `--key`           | `key` → flag                             |
//! | `-k value`, `-kv` | `k` → `value` / `v`                      |
//! | `--`              | everything after is positional           |
//!
//! Repeating a key accumulates its values in order. Options keep first-seen order.

use serde::Serialize;

/// Value recorded for one option name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Flag,
    One(String),
    Many(Vec<String>),
}

impl OptionValue {
    fn merge(self, next: OptionValue) -> OptionValue {
        match (self, next) {
            (OptionValue::Flag, other) | (other, OptionValue::Flag) => other,
            (OptionValue::One(a), OptionValue::One(b)) => OptionValue::Many(vec![a, b]),
            (OptionValue::Many(mut values), OptionValue::One(b)) => {
                values.push(b);
                OptionValue::Many(values)
            }
            (OptionValue::One(a), OptionValue::Many(rest)) => {
                let mut values = vec![a];
                values.extend(rest);
                OptionValue::Many(values)
            }
            (OptionValue::Many(mut values), OptionValue::Many(rest)) => {
                values.extend(rest);
                OptionValue::Many(values)
            }
        }
    }

    /// The last value given, if any.
    pub fn last(&self) -> Option<&str> {
        match self {
            OptionValue::Flag => None,
            OptionValue::One(value) => Some(value),
            OptionValue::Many(values) => values.last().map(String::as_str),
        }
    }

    /// Serialize back to command-line tokens.
    ///
    /// Long names use `--key` / `--key=value`; single-letter names use `-k` / `-k value`.
    pub fn to_tokens(&self, key: &str) -> Vec<String> {
        let short = key.chars().count() == 1;
        let one = |value: &str| -> Vec<String> {
            if short {
                vec![format!("-{key}"), value.to_string()]
            } else {
                vec![format!("--{key}={value}")]
            }
        };
        match self {
            OptionValue::Flag if short => vec![format!("-{key}")],
            OptionValue::Flag => vec![format!("--{key}")],
            OptionValue::One(value) => one(value),
            OptionValue::Many(values) => values.iter().flat_map(|v| one(v)).collect(),
        }
    }
}

/// Positional arguments plus ordered, possibly repeated options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedArguments {
    pub positionals: Vec<String>,
    pub options: Vec<(String, OptionValue)>,
}

impl ParsedArguments {
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.options.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Record a value, merging with an earlier occurrence of the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: OptionValue) {
        let key = key.into();
        match self.options.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                let previous = std::mem::replace(existing, OptionValue::Flag);
                *existing = previous.merge(value);
            }
            None => self.options.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<OptionValue> {
        let index = self.options.iter().position(|(k, _)| k == key)?;
        Some(self.options.remove(index).1)
    }

    /// Positionals first, then each option in first-seen order.
    pub fn to_tokens(&self) -> Vec<String> {
        let mut tokens = self.positionals.clone();
        for (key, value) in &self.options {
            tokens.extend(value.to_tokens(key));
        }
        tokens
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

/// Split a command line into tokens using shell-style quoting.
pub fn split(input: &str) -> Vec<String> {
    tokenize(input, None)
}

/// Like [`split`], but inside quotes `escape` protects the following character (both are kept verbatim).
///
/// Service messages escape a literal quote as `|'`, so the quote must not close the value.
pub fn split_escaped(input: &str, escape: char) -> Vec<String> {
    tokenize(input, Some(escape))
}

fn tokenize(input: &str, escape: Option<char>) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match quote {
            Some(open) => {
                if Some(ch) == escape {
                    current.push(ch);
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else if ch == open {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => {
                if ch == '\'' || ch == '"' {
                    quote = Some(ch);
                    in_token = true;
                } else if ch.is_whitespace() {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                } else {
                    current.push(ch);
                    in_token = true;
                }
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    tokens
}

// ============================================================================
// Option parser
// ============================================================================

/// Tokenize `input` and parse it into positionals and options.
///
/// `aliases` maps an option name to its canonical name, e.g. `("c", "configuration")`.
pub fn parse(input: &str, aliases: &[(&str, &str)]) -> ParsedArguments {
    parse_tokens(split(input), aliases)
}

/// Parse already-tokenized arguments.
pub fn parse_tokens<I>(tokens: I, aliases: &[(&str, &str)]) -> ParsedArguments
where
    I: IntoIterator<Item = String>,
{
    let canonical = |key: &str| -> String {
        aliases
            .iter()
            .find(|(alias, _)| *alias == key)
            .map_or_else(|| key.to_string(), |(_, name)| name.to_string())
    };

    let mut parsed = ParsedArguments::default();
    let mut tokens = tokens.into_iter().peekable();
    let mut only_positionals = false;

    while let Some(token) = tokens.next() {
        if only_positionals || !is_option(&token) {
            parsed.positionals.push(token);
            continue;
        }
        if token == "--" {
            only_positionals = true;
            continue;
        }

        let (key, inline) = if let Some(long) = token.strip_prefix("--") {
            match long.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (long.to_string(), None),
            }
        } else {
            let short = &token[1..];
            let mut chars = short.chars();
            let key = chars.next().map(String::from).unwrap_or_default();
            let rest = chars.as_str();
            let rest = rest.strip_prefix('=').unwrap_or(rest);
            (key, (!rest.is_empty()).then(|| rest.to_string()))
        };

        let value = match inline {
            Some(value) => OptionValue::One(value),
            None => match tokens.next_if(|next| !is_option(next)) {
                Some(value) => OptionValue::One(value),
                None => OptionValue::Flag,
            },
        };

        parsed.insert(canonical(&key), value);
    }

    parsed
}

/// `-x`, `--xyz` and `--` are options; `-`, `-1` and `-.5` are not.
fn is_option(token: &str) -> bool {
    let Some(rest) = token.strip_prefix('-') else {
        return false;
    };
    match rest.chars().next() {
        None => false,
        Some(c) => !(c.is_ascii_digit() || c == '.'),
    }
}
