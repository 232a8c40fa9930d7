use std::collections::BTreeMap;

use super::lexer::{Token, tokenize};

/// A preprocessor macro definition.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Macro {
    /// `#define NAME body`
    Object(String),
    /// `#define NAME(params) body`
    Function {
        params: Vec<String>,
        variadic: bool,
        body: String,
    },
}

impl Macro {
    /// Parses the text following `#define`, returning the macro name and its
    /// definition.
    pub fn parse_definition(text: &str) -> Result<(String, Macro), String> {
        let text = text.trim_start();

        let name_len = text
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(text.len());
        let name = &text[..name_len];

        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err("macro names must be identifiers".to_string());
        }

        let rest = &text[name_len..];

        // Only a parenthesis directly after the name makes a function-like macro.
        let Some(rest) = rest.strip_prefix('(') else {
            return Ok((name.to_string(), Macro::Object(rest.trim().to_string())));
        };

        let Some((params, body)) = rest.split_once(')') else {
            return Err(format!("missing ')' in parameter list of `{name}`"));
        };

        let mut variadic = false;
        let mut names = Vec::new();
        for param in params.split(',').map(str::trim) {
            if variadic {
                return Err(format!("`...` must be the last parameter of `{name}`"));
            }

            if param == "..." {
                variadic = true;
            } else if !param.is_empty() {
                if !param.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(format!("invalid parameter `{param}` of `{name}`"));
                }
                names.push(param.to_string());
            } else if !params.trim().is_empty() {
                return Err(format!("empty parameter in the parameter list of `{name}`"));
            }
        }

        Ok((
            name.to_string(),
            Macro::Function {
                params: names,
                variadic,
                body: body.trim().to_string(),
            },
        ))
    }

    pub fn body(&self) -> &str {
        match self {
            Macro::Object(body) | Macro::Function { body, .. } => body,
        }
    }

    pub(crate) fn body_tokens(&self) -> Result<Vec<Token>, String> {
        tokenize(self.body())
    }
}

/// A set of macro definitions, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Macros(BTreeMap<String, Macro>);

impl Macros {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, definition: Macro) {
        self.0.insert(name.into(), definition);
    }

    /// Defines an object-like macro.
    pub fn define_object(&mut self, name: impl Into<String>, value: impl ToString) {
        self.define(name, Macro::Object(value.to_string()));
    }

    pub fn undef(&mut self, name: &str) -> Option<Macro> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.0.get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// The replacement text of an object-like macro.
    pub fn value_of(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Macro::Object(value) => Some(value),
            Macro::Function { .. } => None,
        }
    }

    /// Adds the definitions of `other`, replacing existing ones.
    pub fn extend(&mut self, other: Macros) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Macro)> {
        self.0.iter().map(|(name, definition)| (name.as_str(), definition))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Macros {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut macros = Self::new();
        for (name, value) in iter {
            macros.define_object(name, value);
        }
        macros
    }
}
