//! Template expansion for stage manifests and value files.
//!
//! Templates are plain text with `{{ ... }}` actions. An action is either a
//! value reference or a call into the function map, optionally chained with
//! `|` so the previous result becomes the last argument of the next call:
//!
//! ```text
//! image: {{ .registry }}/api@{{ getDigest "api:latest" }}
//! password: {{ fromSecret "db-creds" .namespace "json" | parseJSON "password" }}
//! ```
//!
//! Arguments are double-quoted strings or `.name` value references.

mod functions;

pub use functions::{FunctionMap, TemplateFunction};

use crate::errors::RenderError;
use crate::values::Values;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("action pattern is valid"));

/// A single argument to a template function.
#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Literal(String),
    Value(String),
}

/// One stage of an action pipeline.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Value(String),
    Call { function: String, args: Vec<Arg> },
}

/// Renders templates against a value mapping using a fixed function map.
#[derive(Clone)]
pub struct TemplateEngine {
    functions: FunctionMap,
}

impl TemplateEngine {
    /// Create an engine exposing the given functions to templates.
    pub fn new(functions: FunctionMap) -> Self {
        Self { functions }
    }

    /// Names of the functions templates may call.
    pub fn function_names(&self) -> Vec<&str> {
        self.functions.names()
    }

    /// Read and render a single template file.
    pub async fn render_file(&self, path: &Path, values: &Values) -> Result<Vec<u8>, RenderError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RenderError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        self.render_str(&path.display().to_string(), &text, values)
            .await
    }

    /// Render every template in order and concatenate the output.
    pub async fn render_all(
        &self,
        paths: &[PathBuf],
        values: &Values,
    ) -> Result<Vec<u8>, RenderError> {
        let mut out = Vec::new();
        for path in paths {
            out.extend(self.render_file(path, values).await?);
        }
        Ok(out)
    }

    /// Render template text. `name` is only used in error messages.
    pub async fn render_str(
        &self,
        name: &str,
        text: &str,
        values: &Values,
    ) -> Result<Vec<u8>, RenderError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for caps in ACTION.captures_iter(text) {
            let whole = caps.get(0).expect("group 0 always matches");
            out.push_str(&text[last..whole.start()]);
            last = whole.end();

            let expression = &caps[1];
            let commands = parse_action(expression).ok_or_else(|| RenderError::Syntax {
                template: name.to_string(),
                expression: expression.to_string(),
            })?;
            out.push_str(&self.evaluate(name, &commands, values).await?);
        }
        out.push_str(&text[last..]);

        Ok(out.into_bytes())
    }

    async fn evaluate(
        &self,
        template: &str,
        commands: &[Command],
        values: &Values,
    ) -> Result<String, RenderError> {
        let mut piped: Option<String> = None;

        for command in commands {
            let result = match command {
                Command::Value(name) => lookup(template, name, values)?,
                Command::Call { function, args } => {
                    let func = self.functions.get(function).ok_or_else(|| {
                        RenderError::UnknownFunction {
                            template: template.to_string(),
                            function: function.clone(),
                        }
                    })?;

                    let mut resolved = Vec::with_capacity(args.len() + 1);
                    for arg in args {
                        resolved.push(match arg {
                            Arg::Literal(s) => s.clone(),
                            Arg::Value(name) => lookup(template, name, values)?,
                        });
                    }
                    if let Some(prev) = piped.take() {
                        resolved.push(prev);
                    }

                    let failed = |message: String| RenderError::FunctionFailed {
                        template: template.to_string(),
                        function: function.clone(),
                        message,
                    };
                    if resolved.len() != func.arity() {
                        return Err(failed(format!(
                            "expected {} arguments, got {}",
                            func.arity(),
                            resolved.len()
                        )));
                    }
                    func.call(&resolved)
                        .await
                        .map_err(|e| failed(format!("{:#}", e)))?
                }
            };
            piped = Some(result);
        }

        Ok(piped.unwrap_or_default())
    }
}

fn lookup(template: &str, name: &str, values: &Values) -> Result<String, RenderError> {
    values
        .get(name)
        .cloned()
        .ok_or_else(|| RenderError::MissingValue {
            template: template.to_string(),
            name: name.to_string(),
        })
}

/// Split an action into its `|`-separated commands.
fn parse_action(expression: &str) -> Option<Vec<Command>> {
    let mut commands = Vec::new();
    let mut tokens: Vec<Arg> = Vec::new();
    let mut chars = expression.chars().peekable();

    let finish = |tokens: &mut Vec<Arg>, commands: &mut Vec<Command>| -> Option<()> {
        let mut iter = tokens.drain(..);
        let command = match iter.next()? {
            Arg::Value(name) => {
                if iter.next().is_some() {
                    return None;
                }
                Command::Value(name)
            }
            Arg::Literal(function) => Command::Call {
                function,
                args: iter.collect(),
            },
        };
        commands.push(command);
        Some(())
    };

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '|' => finish(&mut tokens, &mut commands)?,
            '"' => {
                let mut s = String::new();
                loop {
                    match chars.next()? {
                        '\\' => s.push(chars.next()?),
                        '"' => break,
                        other => s.push(other),
                    }
                }
                // A quoted token is never a function name.
                if tokens.is_empty() {
                    return None;
                }
                tokens.push(Arg::Literal(s));
            }
            _ => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || next == '|' || next == '"' {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                let token = if let Some(name) = word.strip_prefix('.') {
                    if name.is_empty() {
                        return None;
                    }
                    Arg::Value(name.to_string())
                } else if tokens.is_empty() {
                    Arg::Literal(word)
                } else {
                    // Bare words are only allowed in function position.
                    return None;
                };
                tokens.push(token);
            }
        }
    }
    finish(&mut tokens, &mut commands)?;

    Some(commands)
}
