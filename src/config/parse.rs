//! Strict YAML walking with path tracking.
//!
//! Every value is visited through a [`ParseContext`] which knows its position
//! in the document (e.g. `.tft[0].connections[1]`), so errors point at the
//! offending key. Mappings are consumed key by key through [`StrDict`]; keys
//! left over at the end are reported as unknown.

use std::fmt;

use serde_yaml::Value;
use thiserror::Error;

/// Configuration schema or constraint violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ConfigError {
    pub yamlpath: String,
    pub key: Option<String>,
    pub msg: String,
}

impl ConfigError {
    pub fn new(yamlpath: &str, key: Option<&str>, msg: impl Into<String>) -> Self {
        Self {
            yamlpath: yamlpath.to_string(),
            key: key.map(str::to_string),
            msg: msg.into(),
        }
    }

    /// The full path of the offending value, including the key.
    pub fn full_path(&self) -> String {
        match &self.key {
            Some(key) => format!("{}.{}", self.yamlpath, key),
            None => self.yamlpath.clone(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.full_path();
        let path = if path.is_empty() { "." } else { path.as_str() };
        write!(f, "\"{}\": {}", path, self.msg)
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// A YAML value together with its position in the document.
#[derive(Debug, Clone)]
pub struct ParseContext<'a> {
    pub value: &'a Value,
    pub yamlidx: usize,
    pub yamlpath: String,
}

impl<'a> ParseContext<'a> {
    pub fn root(value: &'a Value) -> Self {
        Self {
            value,
            yamlidx: 0,
            yamlpath: String::new(),
        }
    }

    pub fn error(&self, msg: impl Into<String>) -> ConfigError {
        ConfigError::new(&self.yamlpath, None, msg)
    }

    /// Open a mapping for key-by-key consumption. Null counts as empty.
    pub fn strdict(&self) -> ConfigResult<StrDict<'a>> {
        let entries = match self.value {
            Value::Null => Vec::new(),
            Value::Mapping(m) => {
                let mut entries = Vec::with_capacity(m.len());
                for (k, v) in m {
                    match k {
                        Value::String(k) => entries.push((k.clone(), v)),
                        _ => return Err(self.error("expects all dictionary keys to be strings")),
                    }
                }
                entries
            }
            _ => return Err(self.error("expects a dictionary")),
        };
        Ok(StrDict {
            yamlpath: self.yamlpath.clone(),
            entries,
        })
    }

    /// Iterate the items of a sequence. Null counts as empty.
    pub fn list(&self) -> ConfigResult<Vec<ParseContext<'a>>> {
        match self.value {
            Value::Null => Ok(Vec::new()),
            Value::Sequence(seq) => Ok(seq
                .iter()
                .enumerate()
                .map(|(idx, value)| ParseContext {
                    value,
                    yamlidx: idx,
                    yamlpath: format!("{}[{}]", self.yamlpath, idx),
                })
                .collect()),
            _ => Err(self.error("expects a list")),
        }
    }
}

/// A mapping whose keys are consumed one by one.
#[derive(Debug)]
pub struct StrDict<'a> {
    yamlpath: String,
    entries: Vec<(String, &'a Value)>,
}

impl<'a> StrDict<'a> {
    pub fn yamlpath(&self) -> &str {
        &self.yamlpath
    }

    pub fn error(&self, key: &str, msg: impl Into<String>) -> ConfigError {
        ConfigError::new(&self.yamlpath, Some(key), msg)
    }

    /// Remove `key` and return its value. A null value counts as absent.
    pub fn pop(&mut self, key: &str) -> Option<ParseContext<'a>> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        let (k, value) = self.entries.remove(pos);
        if value.is_null() {
            return None;
        }
        Some(ParseContext {
            value,
            yamlidx: 0,
            yamlpath: format!("{}.{}", self.yamlpath, k),
        })
    }

    /// Like [`StrDict::pop`], trying each alias in order. All aliases are
    /// consumed; setting more than one is an error.
    pub fn pop_any(&mut self, keys: &[&str]) -> ConfigResult<Option<(String, ParseContext<'a>)>> {
        let mut found: Option<(String, ParseContext<'a>)> = None;
        for key in keys {
            if let Some(v) = self.pop(key) {
                if let Some((first, _)) = &found {
                    return Err(self.error(key, format!("cannot be set together with \"{first}\"")));
                }
                found = Some((key.to_string(), v));
            }
        }
        Ok(found)
    }

    pub fn pop_str(&mut self, key: &str) -> ConfigResult<Option<String>> {
        match self.pop(key) {
            None => Ok(None),
            Some(v) => match v.value {
                Value::String(s) => Ok(Some(s.clone())),
                _ => Err(self.error(key, "expects a string")),
            },
        }
    }

    /// A string that must not be empty (or only white space).
    pub fn pop_nonempty_str(&mut self, key: &str) -> ConfigResult<Option<String>> {
        match self.pop_str(key)? {
            Some(s) if s.trim().is_empty() => Err(self.error(key, "invalid string")),
            other => Ok(other),
        }
    }

    pub fn pop_bool(&mut self, key: &str) -> ConfigResult<Option<bool>> {
        match self.pop(key) {
            None => Ok(None),
            Some(v) => match v.value {
                Value::Bool(b) => Ok(Some(*b)),
                Value::String(s) => parse_bool_str(s)
                    .map(Some)
                    .ok_or_else(|| self.error(key, "expects a boolean")),
                _ => Err(self.error(key, "expects a boolean")),
            },
        }
    }

    pub fn pop_int(&mut self, key: &str) -> ConfigResult<Option<i64>> {
        match self.pop(key) {
            None => Ok(None),
            Some(v) => match v.value {
                Value::Number(n) => n
                    .as_i64()
                    .map(Some)
                    .ok_or_else(|| self.error(key, "expects an integer")),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| self.error(key, "expects an integer")),
                _ => Err(self.error(key, "expects an integer")),
            },
        }
    }

    /// Reject whatever keys were not consumed.
    pub fn finish(self) -> ConfigResult<()> {
        match self.entries.first() {
            None => Ok(()),
            Some((key, _)) => Err(self.error(key, "unknown key")),
        }
    }
}

fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "true" | "on" => Some(true),
        "0" | "n" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Split a command line the way a POSIX shell would, without expansion.
pub fn shell_split(s: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut cur = String::new();
    let mut in_word = false;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        c => cur.push(c),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => match chars.next()? {
                            c @ ('"' | '\\' | '$' | '`') => cur.push(c),
                            '\n' => {}
                            c => {
                                cur.push('\\');
                                cur.push(c);
                            }
                        },
                        c => cur.push(c),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some('\n') | None => {}
                    Some(c) => cur.push(c),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut cur));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                cur.push(c);
            }
        }
    }
    if in_word {
        words.push(cur);
    }
    Some(words)
}

/// Quote one word so that [`shell_split`] returns it unchanged.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}
