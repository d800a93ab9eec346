//! Decorated variable names
//!
//! A name used for save/read/delete has the shape
//! `[~][level][_sub][?]:name[.path]`. It is parsed once into an [`Address`]
//! and then dispatched by [`Level`].

use super::errors::AddressError;
use super::providers::Providers;

/// Where an address points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Level {
    /// The current scope (or the properties store when there is no request)
    Current,
    /// N frames up the scope chain; `0` is the current scope
    Ancestor(usize),
    /// `$:expr`, read-only
    Expression,
    /// `_:json`, read-only
    Literal,
    /// `'text'`, read-only
    Quoted,
    /// A storage provider keyword such as `session` or `map`
    Provider(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub level: Level,
    /// Provider bucket (`map_users:` gives `users`)
    pub sub_level: String,
    /// Variable name, or the expression / literal text for read-only levels
    pub name: String,
    /// Dotted path into the stored value
    pub path: Option<String>,
    /// Provider failures abort the request unless the level ends with `?`
    pub fatal: bool,
}

impl Address {
    pub fn parse(text: &str, providers: &Providers) -> Result<Self, AddressError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AddressError::Empty);
        }

        if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
            return Ok(Address {
                level: Level::Quoted,
                sub_level: String::new(),
                name: text[1..text.len() - 1].to_string(),
                path: None,
                fatal: true,
            });
        }

        let mut level = Level::Current;
        let mut sub_level = String::new();
        let mut fatal = true;
        let mut path_allowed = true;
        let mut rest = text;

        if let Some(colon) = text.find(':') {
            let mut selector = text[..colon].trim();
            rest = &text[colon + 1..];

            if let Some(stripped) = selector.strip_prefix('~') {
                selector = stripped;
                path_allowed = false;
            }
            if let Some(p) = selector.find('_').filter(|&p| p > 0) {
                let mut sub = selector[p + 1..].trim();
                if let Some(stripped) = sub.strip_suffix('?') {
                    sub = stripped.trim_end();
                    fatal = false;
                }
                sub_level = sub.to_string();
                selector = selector[..p].trim();
            }
            if let Some(stripped) = selector.strip_suffix('?') {
                selector = stripped.trim_end();
                fatal = false;
            }

            let selector = selector.to_lowercase();
            level = match selector.as_str() {
                "" => Level::Current,
                "$" => Level::Expression,
                "_" => Level::Literal,
                s if s.bytes().all(|b| b.is_ascii_digit()) => Level::Ancestor(
                    s.parse()
                        .map_err(|_| AddressError::BadAncestor(s.to_string()))?,
                ),
                s => match providers.path_supported(s) {
                    Some(supported) => {
                        path_allowed &= supported;
                        Level::Provider(s.to_string())
                    }
                    None => return Err(AddressError::UnknownLevel(s.to_string())),
                },
            };
        }

        if matches!(level, Level::Expression | Level::Literal) {
            return Ok(Address {
                level,
                sub_level,
                name: rest.trim().to_string(),
                path: None,
                fatal,
            });
        }

        let (name, path) = match rest.find('.').filter(|_| path_allowed) {
            Some(dot) => (&rest[..dot], Some(rest[dot + 1..].trim().to_string())),
            None => (rest, None),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(AddressError::Empty);
        }

        Ok(Address {
            level,
            sub_level,
            name: name.to_string(),
            path: path.filter(|p| !p.is_empty()),
            fatal,
        })
    }

    /// The same address without its path, naming the whole container.
    pub fn container(&self) -> Address {
        Address {
            path: None,
            ..self.clone()
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.level, Level::Expression | Level::Literal | Level::Quoted)
    }
}
