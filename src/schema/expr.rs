//! Validator expression parser
//!
//! Parses leaf expressions such as `str(required=False)`,
//! `list(include('rule'), min=1)` or `any(str(), null())` into [`Rule`]s.
//! Single pass over `char_indices`, no regex.

use std::iter::Peekable;
use std::str::CharIndices;

use regex::Regex;

use super::{Literal, Rule, Validator};

/// Parsed argument of a call expression
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Arg {
    Str(String),
    Int(i64),
    Num(f64),
    Bool(bool),
    Null,
    Call(Call),
}

/// `name(args..., key=value...)`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Call {
    pub name: String,
    pub args: Vec<Arg>,
    pub kwargs: Vec<(String, Arg)>,
}

impl Call {
    fn kwarg(&self, key: &str) -> Option<&Arg> {
        self.kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

struct Parser<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn pos(&mut self) -> usize {
        self.chars.peek().map(|(i, _)| *i).unwrap_or(self.src.len())
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), String> {
        self.skip_ws();
        let at = self.pos();
        match self.chars.next() {
            Some((_, c)) if c == want => Ok(()),
            Some((_, c)) => Err(format!("expected '{}' at {}, found '{}'", want, at, c)),
            None => Err(format!("expected '{}' at {}, found end of input", want, at)),
        }
    }

    fn ident(&mut self) -> Result<String, String> {
        self.skip_ws();
        let start = self.pos();
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.chars.next();
        }
        let end = self.pos();
        if start == end {
            return Err(format!("expected identifier at {}", start));
        }
        Ok(self.src[start..end].to_string())
    }

    fn call(&mut self) -> Result<Call, String> {
        let name = self.ident()?;
        self.call_with_name(name)
    }

    fn call_with_name(&mut self, name: String) -> Result<Call, String> {
        self.expect('(')?;
        let mut call = Call {
            name,
            args: Vec::new(),
            kwargs: Vec::new(),
        };

        self.skip_ws();
        if self.peek() == Some(')') {
            self.chars.next();
            return Ok(call);
        }

        loop {
            self.skip_ws();
            let starts_ident = matches!(self.peek(), Some(c) if c.is_ascii_alphabetic() || c == '_');
            if starts_ident {
                let word = self.ident()?;
                self.skip_ws();
                match self.peek() {
                    Some('=') => {
                        self.chars.next();
                        let value = self.arg()?;
                        call.kwargs.push((word, value));
                    }
                    Some('(') => call.args.push(Arg::Call(self.call_with_name(word)?)),
                    _ => call.args.push(keyword(&word)?),
                }
            } else {
                call.args.push(self.arg()?);
            }

            self.skip_ws();
            let at = self.pos();
            match self.chars.next() {
                Some((_, ',')) => continue,
                Some((_, ')')) => return Ok(call),
                Some((_, c)) => return Err(format!("unexpected '{}' at {}", c, at)),
                None => return Err(format!("unterminated call '{}'", call.name)),
            }
        }
    }

    fn arg(&mut self) -> Result<Arg, String> {
        self.skip_ws();
        match self.peek() {
            Some(q @ ('\'' | '"')) => {
                self.chars.next();
                self.string(q).map(Arg::Str)
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let word = self.ident()?;
                self.skip_ws();
                if self.peek() == Some('(') {
                    Ok(Arg::Call(self.call_with_name(word)?))
                } else {
                    keyword(&word)
                }
            }
            Some(c) => Err(format!("unexpected '{}' at {}", c, self.pos())),
            None => Err("unexpected end of input".to_string()),
        }
    }

    /// Backslash escapes only the quote and itself; `\d` stays `\d` for regexes
    fn string(&mut self, quote: char) -> Result<String, String> {
        let mut out = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '\\' => match self.peek() {
                    Some(n) if n == quote || n == '\\' => {
                        out.push(n);
                        self.chars.next();
                    }
                    _ => out.push('\\'),
                },
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err("unterminated string literal".to_string())
    }

    fn number(&mut self) -> Result<Arg, String> {
        let start = self.pos();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || "+-.eE_".contains(c)) {
            self.chars.next();
        }
        let end = self.pos();
        let raw: String = self.src[start..end].chars().filter(|c| *c != '_').collect();
        if raw.contains(['.', 'e', 'E']) {
            raw.parse::<f64>()
                .map(Arg::Num)
                .map_err(|_| format!("invalid number '{}'", raw))
        } else {
            raw.parse::<i64>()
                .map(Arg::Int)
                .map_err(|_| format!("invalid integer '{}'", raw))
        }
    }
}

fn keyword(word: &str) -> Result<Arg, String> {
    match word {
        "True" | "true" => Ok(Arg::Bool(true)),
        "False" | "false" => Ok(Arg::Bool(false)),
        "None" | "null" => Ok(Arg::Null),
        other => Err(format!("unknown keyword '{}'", other)),
    }
}

/// Parse a complete expression into a call tree
pub(crate) fn parse(src: &str) -> Result<Call, String> {
    let mut parser = Parser::new(src);
    let call = parser.call()?;
    parser.skip_ws();
    if parser.peek().is_some() {
        return Err(format!("trailing input at {}", parser.pos()));
    }
    Ok(call)
}

/// Compile a leaf expression into a field rule
pub(crate) fn compile(src: &str) -> Result<Rule, String> {
    let call = parse(src).map_err(|e| format!("'{}': {}", src, e))?;
    let required = match call.kwarg("required") {
        None => true,
        Some(Arg::Bool(b)) => *b,
        Some(other) => return Err(format!("'{}': required= expects a bool, got {:?}", src, other)),
    };
    let validator = to_validator(&call).map_err(|e| format!("'{}': {}", src, e))?;
    Ok(Rule {
        validator,
        required,
    })
}

fn check_kwargs(call: &Call, allowed: &[&str]) -> Result<(), String> {
    for (key, _) in &call.kwargs {
        if key != "required" && !allowed.contains(&key.as_str()) {
            return Err(format!("{}() does not accept '{}='", call.name, key));
        }
    }
    Ok(())
}

fn kw_f64(call: &Call, key: &str) -> Result<Option<f64>, String> {
    match call.kwarg(key) {
        None => Ok(None),
        Some(Arg::Int(i)) => Ok(Some(*i as f64)),
        Some(Arg::Num(n)) => Ok(Some(*n)),
        Some(other) => Err(format!("{}= expects a number, got {:?}", key, other)),
    }
}

fn kw_usize(call: &Call, key: &str) -> Result<Option<usize>, String> {
    match call.kwarg(key) {
        None => Ok(None),
        Some(Arg::Int(i)) if *i >= 0 => Ok(Some(*i as usize)),
        Some(other) => Err(format!("{}= expects a non-negative integer, got {:?}", key, other)),
    }
}

fn nested(call: &Call) -> Result<Vec<Validator>, String> {
    call.args
        .iter()
        .map(|arg| match arg {
            Arg::Call(inner) => to_validator(inner),
            other => Err(format!("{}() expects validators, got {:?}", call.name, other)),
        })
        .collect()
}

fn to_validator(call: &Call) -> Result<Validator, String> {
    match call.name.as_str() {
        "str" => {
            check_kwargs(call, &["min", "max"])?;
            Ok(Validator::Str {
                min: kw_usize(call, "min")?,
                max: kw_usize(call, "max")?,
            })
        }
        "int" => {
            check_kwargs(call, &["min", "max"])?;
            Ok(Validator::Int {
                min: kw_f64(call, "min")?,
                max: kw_f64(call, "max")?,
            })
        }
        "num" => {
            check_kwargs(call, &["min", "max"])?;
            Ok(Validator::Num {
                min: kw_f64(call, "min")?,
                max: kw_f64(call, "max")?,
            })
        }
        "bool" => {
            check_kwargs(call, &[])?;
            Ok(Validator::Bool)
        }
        "null" => {
            check_kwargs(call, &[])?;
            Ok(Validator::Null)
        }
        "any" => {
            check_kwargs(call, &[])?;
            if call.args.is_empty() {
                Ok(Validator::Anything)
            } else {
                Ok(Validator::Any(nested(call)?))
            }
        }
        "enum" => {
            check_kwargs(call, &[])?;
            if call.args.is_empty() {
                return Err("enum() needs at least one value".to_string());
            }
            let literals = call
                .args
                .iter()
                .map(|arg| match arg {
                    Arg::Str(s) => Ok(Literal::Str(s.clone())),
                    Arg::Int(i) => Ok(Literal::Num(*i as f64)),
                    Arg::Num(n) => Ok(Literal::Num(*n)),
                    Arg::Bool(b) => Ok(Literal::Bool(*b)),
                    other => Err(format!("enum() cannot hold {:?}", other)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Validator::Enum(literals))
        }
        "regex" => {
            check_kwargs(call, &[])?;
            if call.args.is_empty() {
                return Err("regex() needs at least one pattern".to_string());
            }
            let patterns = call
                .args
                .iter()
                .map(|arg| match arg {
                    Arg::Str(s) => Regex::new(s).map_err(|e| format!("bad pattern '{}': {}", s, e)),
                    other => Err(format!("regex() expects strings, got {:?}", other)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Validator::Regex(patterns))
        }
        "list" => {
            check_kwargs(call, &["min", "max"])?;
            Ok(Validator::List {
                items: nested(call)?,
                min: kw_usize(call, "min")?,
                max: kw_usize(call, "max")?,
            })
        }
        "map" => {
            check_kwargs(call, &["min", "max", "key"])?;
            let key = match call.kwarg("key") {
                None => None,
                Some(Arg::Call(inner)) => Some(Box::new(to_validator(inner)?)),
                Some(other) => return Err(format!("key= expects a validator, got {:?}", other)),
            };
            Ok(Validator::Map {
                values: nested(call)?,
                key,
                min: kw_usize(call, "min")?,
                max: kw_usize(call, "max")?,
            })
        }
        "include" => {
            check_kwargs(call, &[])?;
            match call.args.as_slice() {
                [Arg::Str(name)] => Ok(Validator::Include(name.clone())),
                _ => Err("include() takes exactly one schema name".to_string()),
            }
        }
        other => Err(format!("unknown validator '{}'", other)),
    }
}
