//! `#{name}` placeholders for command templates. `##` is a literal `#`.

use std::{borrow::Cow, collections::BTreeMap, ffi::OsStr, path::Path};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error("Undefined variable '{0}' at {1} in template '{2}'")]
    UndefinedVar(String, usize, String),

    #[error("Unclosed brace (found open brace at {0}) in template '{1}'")]
    UnclosedBrace(usize, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    /// Inserted as is, so it may carry shell syntax.
    Text(String),
    /// Shell-quoted when rendered into a script.
    Path(String),
}

impl Value {
    fn raw(&self) -> &str {
        match self {
            Value::Text(s) | Value::Path(s) => s,
        }
    }
}

/// Variables available to command templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    vars: BTreeMap<String, Value>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(name.into(), Value::Text(value.into()));
        self
    }

    pub fn set_path(&mut self, name: impl Into<String>, path: impl AsRef<Path>) -> &mut Self {
        let value = OsStr::to_string_lossy(path.as_ref().as_os_str()).into_owned();
        self.vars.insert(name.into(), Value::Path(value));
        self
    }

    pub fn with_path(mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.set_path(name, path);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(Value::raw)
    }

    /// Renders a shell script. Path values are quoted as single words.
    pub fn render(&self, template: &str) -> Result<String, InterpError> {
        interp(template, |name| {
            self.vars.get(name).map(|v| match v {
                Value::Text(s) => Cow::Borrowed(s.as_str()),
                Value::Path(s) => shell_escape::unix::escape(Cow::Borrowed(s.as_str())),
            })
        })
    }

    /// Renders a plain string such as a path, with every value as is.
    pub fn render_plain(&self, template: &str) -> Result<String, InterpError> {
        interp(template, |name| self.get(name).map(Cow::Borrowed))
    }
}

/// Expands `#{name}` with `lookup(name)`. Positions in errors are 1-based
/// char offsets.
pub fn interp<'v, F>(template: &str, lookup: F) -> Result<String, InterpError>
where
    F: Fn(&str) -> Option<Cow<'v, str>>,
{
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Text,
        Hash,
        Name { open_at: usize },
    }

    let mut state = State::Text;
    let mut out = String::with_capacity(template.len() * 2);
    let mut name = String::new();

    for (i, c) in template.chars().enumerate() {
        state = match (state, c) {
            (State::Text, '#') => State::Hash,
            (State::Text, _) => {
                out.push(c);
                State::Text
            }
            (State::Hash, '#') => {
                out.push('#');
                State::Text
            }
            (State::Hash, '{') => {
                name.clear();
                State::Name { open_at: i }
            }
            (State::Hash, _) => {
                out.push('#');
                out.push(c);
                State::Text
            }
            (State::Name { open_at }, '}') => {
                let value = lookup(&name).ok_or_else(|| {
                    InterpError::UndefinedVar(name.clone(), open_at + 1, template.to_owned())
                })?;
                out.push_str(&value);
                State::Text
            }
            (st @ State::Name { .. }, _) => {
                name.push(c);
                st
            }
        };
    }

    match state {
        State::Text => Ok(out),
        State::Hash => {
            out.push('#');
            Ok(out)
        }
        State::Name { open_at } => Err(InterpError::UnclosedBrace(open_at + 1, template.to_owned())),
    }
}
