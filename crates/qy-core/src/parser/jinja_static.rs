//! Static scan of templated SQL for call sites.
//!
//! Parsers never evaluate templates. This module lexes the contents of
//! `{{ ... }}` and `{% ... %}` tags just far enough to find `ref`, `source`,
//! `config`, `var`, `env_var`, `doc` and `metric` calls with literal
//! arguments, plus the names of any other functions called (candidate macro
//! calls).

use crate::node::{RefCall, SourceCall};
use crate::serde_helpers::scalar_to_string;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// An inline `config(...)` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigCall {
    /// Keyword arguments whose values are literals
    pub values: BTreeMap<String, Value>,
    /// Source text of every keyword argument value
    pub unrendered: BTreeMap<String, String>,
}

/// Everything found by a scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticCalls {
    pub refs: Vec<RefCall>,
    pub sources: Vec<SourceCall>,
    pub configs: Vec<ConfigCall>,
    pub vars: Vec<String>,
    pub env_vars: Vec<String>,
    /// `(package, name)` of `doc(...)` calls
    pub docs: Vec<(Option<String>, String)>,
    pub metrics: Vec<Vec<String>>,
    /// Other called names, deduplicated in first-seen order
    pub macro_calls: Vec<String>,
}

impl StaticCalls {
    /// Merged config of every `config(...)` call, later calls winning
    pub fn merged_config(&self) -> (BTreeMap<String, Value>, BTreeMap<String, String>) {
        let mut values = BTreeMap::new();
        let mut unrendered = BTreeMap::new();
        for call in &self.configs {
            for (k, v) in &call.values {
                values.insert(k.clone(), v.clone());
            }
            for (k, v) in &call.unrendered {
                unrendered.insert(k.clone(), v.clone());
            }
        }
        (values, unrendered)
    }

    fn push_macro_call(&mut self, name: &str) {
        if !self.macro_calls.iter().any(|m| m == name) {
            self.macro_calls.push(name.to_string());
        }
    }
}

/// Names that are never user macros
const NOT_MACROS: &[&str] = &[
    "ref", "source", "config", "var", "env_var", "doc", "metric", "return", "range", "dict",
    "list", "lipsum", "cycler", "joiner", "namespace", "caller", "super", "varargs", "kwargs",
    "is_incremental", "log", "print", "zip", "tojson", "fromjson", "toyaml", "fromyaml",
    "run_query", "statement", "set", "this", "loop", "local_md5", "set_strict", "try_or_compiler_error",
    "debug", "load_result", "store_result", "store_raw_result", "write", "render",
];

/// Scan `text` for call sites
pub fn scan(text: &str) -> StaticCalls {
    let mut calls = StaticCalls::default();
    for tag in tags(text) {
        let tokens = lex(tag.body);
        scan_tokens(tag.body, &tokens, &mut calls);
    }
    calls
}

struct Tag<'a> {
    body: &'a str,
}

/// Bodies of expression and statement tags, skipping comments and raw blocks
fn tags(text: &str) -> Vec<Tag<'_>> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let close = match bytes[i + 1] {
            b'{' => "}}",
            b'%' => "%}",
            b'#' => "#}",
            _ => {
                i += 1;
                continue;
            }
        };
        let start = i + 2;
        let Some(rel_end) = text[start..].find(close) else {
            break;
        };
        let end = start + rel_end;
        let body = text[start..end].trim_matches(|c: char| c == '-' || c == '+' || c == '~');
        i = end + 2;
        if close == "#}" {
            continue;
        }
        if close == "%}" && body.trim() == "raw" {
            match text[i..].find("endraw") {
                Some(pos) => {
                    let after = i + pos;
                    i = text[after..].find("%}").map(|p| after + p + 2).unwrap_or(bytes.len());
                }
                None => break,
            }
            continue;
        }
        out.push(Tag { body });
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum TokKind {
    Ident(String),
    Str(String),
    Num(String),
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokKind,
    start: usize,
    end: usize,
}

fn lex(src: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut i = 0;
    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' || c == '"' {
            let quote = c;
            let mut value = String::new();
            let mut j = i + 1;
            let mut closed = false;
            while j < chars.len() {
                let (_, d) = chars[j];
                if d == '\\' && j + 1 < chars.len() {
                    value.push(chars[j + 1].1);
                    j += 2;
                    continue;
                }
                if d == quote {
                    closed = true;
                    break;
                }
                value.push(d);
                j += 1;
            }
            let end = if closed && j < chars.len() {
                chars[j].0 + chars[j].1.len_utf8()
            } else {
                src.len()
            };
            tokens.push(Token {
                kind: TokKind::Str(value),
                start: pos,
                end,
            });
            i = j + 1;
        } else if c.is_ascii_digit() {
            let mut j = i;
            while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.' || chars[j].1 == '_') {
                j += 1;
            }
            let end = if j < chars.len() { chars[j].0 } else { src.len() };
            tokens.push(Token {
                kind: TokKind::Num(src[pos..end].replace('_', "")),
                start: pos,
                end,
            });
            i = j;
        } else if c.is_alphabetic() || c == '_' {
            let mut j = i;
            while j < chars.len() && (chars[j].1.is_alphanumeric() || chars[j].1 == '_') {
                j += 1;
            }
            let end = if j < chars.len() { chars[j].0 } else { src.len() };
            tokens.push(Token {
                kind: TokKind::Ident(src[pos..end].to_string()),
                start: pos,
                end,
            });
            i = j;
        } else {
            tokens.push(Token {
                kind: TokKind::Punct(c),
                start: pos,
                end: pos + c.len_utf8(),
            });
            i += 1;
        }
    }
    tokens
}

fn is_punct(tok: Option<&Token>, c: char) -> bool {
    matches!(tok, Some(Token { kind: TokKind::Punct(p), .. }) if *p == c)
}

fn ident(tok: Option<&Token>) -> Option<&str> {
    match tok {
        Some(Token {
            kind: TokKind::Ident(name),
            ..
        }) => Some(name.as_str()),
        _ => None,
    }
}

/// A parsed call argument
#[derive(Debug, Clone)]
struct Arg {
    keyword: Option<String>,
    literal: Option<Value>,
    raw: String,
}

fn scan_tokens(src: &str, tokens: &[Token], calls: &mut StaticCalls) {
    for i in 0..tokens.len() {
        let Some(name) = ident(tokens.get(i)) else {
            continue;
        };
        if !is_punct(tokens.get(i + 1), '(') {
            continue;
        }
        // definitions, filters and tests are not calls
        let prev = if i > 0 { tokens.get(i - 1) } else { None };
        if matches!(
            ident(prev),
            Some("macro" | "test" | "materialization" | "is" | "snapshot")
        ) || is_punct(prev, '|')
        {
            continue;
        }
        let qualifier = if is_punct(prev, '.') && i >= 2 {
            ident(tokens.get(i - 2))
        } else {
            None
        };
        let args = parse_args(src, tokens, i + 1);

        match (qualifier, name) {
            (None, "ref") | (Some("builtins"), "ref") => {
                if let Some(call) = ref_call(&args) {
                    if !calls.refs.contains(&call) {
                        calls.refs.push(call);
                    }
                }
            }
            (None, "source") | (Some("builtins"), "source") => {
                let positional = literal_strings(&args);
                if positional.len() == 2 {
                    let call = SourceCall {
                        source_name: positional[0].clone(),
                        table_name: positional[1].clone(),
                    };
                    if !calls.sources.contains(&call) {
                        calls.sources.push(call);
                    }
                }
            }
            (None, "config") => calls.configs.push(config_call(&args)),
            (None, "var") => {
                if let Some(name) = args.first().and_then(|a| a.literal.as_ref()).and_then(Value::as_str) {
                    if !calls.vars.iter().any(|v| v == name) {
                        calls.vars.push(name.to_string());
                    }
                }
            }
            (None, "env_var") => {
                if let Some(name) = args.first().and_then(|a| a.literal.as_ref()).and_then(Value::as_str) {
                    if !calls.env_vars.iter().any(|v| v == name) {
                        calls.env_vars.push(name.to_string());
                    }
                }
            }
            (None, "doc") => {
                let positional = literal_strings(&args);
                match positional.len() {
                    1 => calls.docs.push((None, positional[0].clone())),
                    2 => calls.docs.push((Some(positional[0].clone()), positional[1].clone())),
                    _ => {}
                }
            }
            (None, "metric") => {
                let positional = literal_strings(&args);
                if !positional.is_empty() {
                    calls.metrics.push(positional);
                }
            }
            (Some("adapter"), "dispatch") => {
                if let Some(name) = args.first().and_then(|a| a.literal.as_ref()).and_then(Value::as_str) {
                    calls.push_macro_call(name);
                }
            }
            (None, other) if !NOT_MACROS.contains(&other) => calls.push_macro_call(other),
            (Some(pkg), other) if !is_builtin_namespace(pkg) => {
                calls.push_macro_call(&format!("{}.{}", pkg, other))
            }
            _ => {}
        }
    }
}

fn is_builtin_namespace(name: &str) -> bool {
    matches!(
        name,
        "builtins" | "adapter" | "exceptions" | "modules" | "config" | "this" | "target"
            | "api" | "model" | "graph" | "flags" | "loop" | "caller" | "dbt" | "context"
    ) || name.starts_with('_')
}

fn ref_call(args: &[Arg]) -> Option<RefCall> {
    let mut positional = Vec::new();
    let mut version = None;
    for arg in args {
        match arg.keyword.as_deref() {
            Some("v") | Some("version") => {
                version = arg.literal.as_ref().and_then(scalar_to_string);
            }
            Some(_) => {}
            None => positional.push(arg.literal.as_ref()?.as_str()?.to_string()),
        }
    }
    match positional.len() {
        1 => Some(RefCall {
            package: None,
            name: positional.remove(0),
            version,
        }),
        2 => {
            let name = positional.remove(1);
            Some(RefCall {
                package: Some(positional.remove(0)),
                name,
                version,
            })
        }
        _ => None,
    }
}

fn config_call(args: &[Arg]) -> ConfigCall {
    let mut call = ConfigCall::default();
    for arg in args {
        let Some(key) = &arg.keyword else {
            // config({...}) with a dict literal
            if let Some(Value::Object(map)) = &arg.literal {
                for (k, v) in map {
                    call.values.insert(k.clone(), v.clone());
                    call.unrendered.insert(k.clone(), v.to_string());
                }
            }
            continue;
        };
        call.unrendered.insert(key.clone(), arg.raw.clone());
        if let Some(value) = &arg.literal {
            call.values.insert(key.clone(), value.clone());
        }
    }
    call
}

fn literal_strings(args: &[Arg]) -> Vec<String> {
    args.iter()
        .filter(|a| a.keyword.is_none())
        .filter_map(|a| a.literal.as_ref().and_then(Value::as_str).map(str::to_string))
        .collect()
}

/// Parse the arguments of the call whose `(` is at `open`
fn parse_args(src: &str, tokens: &[Token], open: usize) -> Vec<Arg> {
    let mut args = Vec::new();
    let mut i = open + 1;
    if is_punct(tokens.get(i), ')') {
        return args;
    }
    loop {
        if i >= tokens.len() {
            break;
        }
        let mut keyword = None;
        if let (Some(k), true) = (ident(tokens.get(i)), is_punct(tokens.get(i + 1), '=')) {
            if !is_punct(tokens.get(i + 2), '=') {
                keyword = Some(k.to_string());
                i += 2;
            }
        }
        let start = i;
        let end = find_arg_end(tokens, i);
        let literal = parse_literal(&tokens[start..end]);
        let raw = match (tokens.get(start), end.checked_sub(1).and_then(|e| tokens.get(e))) {
            (Some(first), Some(last)) if end > start => src[first.start..last.end].trim().to_string(),
            _ => String::new(),
        };
        args.push(Arg {
            keyword,
            literal,
            raw,
        });
        i = end;
        if is_punct(tokens.get(i), ',') {
            i += 1;
            continue;
        }
        break;
    }
    args
}

/// Index of the `,` or `)` ending the argument starting at `start`
fn find_arg_end(tokens: &[Token], start: usize) -> usize {
    let mut depth = 0i32;
    let mut i = start;
    while i < tokens.len() {
        if let TokKind::Punct(c) = tokens[i].kind {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    if depth == 0 {
                        return i;
                    }
                    depth -= 1;
                }
                ',' if depth == 0 => return i,
                _ => {}
            }
        }
        i += 1;
    }
    tokens.len()
}

/// Parse a literal expression spanning exactly `tokens`
fn parse_literal(tokens: &[Token]) -> Option<Value> {
    let (value, used) = literal_at(tokens, 0)?;
    (used == tokens.len()).then_some(value)
}

fn literal_at(tokens: &[Token], i: usize) -> Option<(Value, usize)> {
    let tok = tokens.get(i)?;
    match &tok.kind {
        TokKind::Str(s) => {
            // adjacent string literals concatenate
            let mut out = s.clone();
            let mut j = i + 1;
            while let Some(Token {
                kind: TokKind::Str(next),
                ..
            }) = tokens.get(j)
            {
                out.push_str(next);
                j += 1;
            }
            Some((Value::String(out), j))
        }
        TokKind::Num(n) => Some((number(n)?, i + 1)),
        TokKind::Punct('-') => match tokens.get(i + 1).map(|t| &t.kind) {
            Some(TokKind::Num(n)) => Some((number(&format!("-{}", n))?, i + 2)),
            _ => None,
        },
        TokKind::Ident(word) => match word.as_str() {
            "true" | "True" => Some((Value::Bool(true), i + 1)),
            "false" | "False" => Some((Value::Bool(false), i + 1)),
            "none" | "None" => Some((Value::Null, i + 1)),
            _ => None,
        },
        TokKind::Punct('[') | TokKind::Punct('(') => {
            let close = if tok.kind == TokKind::Punct('[') { ']' } else { ')' };
            let mut items = Vec::new();
            let mut j = i + 1;
            loop {
                if is_punct(tokens.get(j), close) {
                    return Some((Value::Array(items), j + 1));
                }
                let (item, next) = literal_at(tokens, j)?;
                items.push(item);
                j = next;
                if is_punct(tokens.get(j), ',') {
                    j += 1;
                } else if !is_punct(tokens.get(j), close) {
                    return None;
                }
            }
        }
        TokKind::Punct('{') => {
            let mut map = Map::new();
            let mut j = i + 1;
            loop {
                if is_punct(tokens.get(j), '}') {
                    return Some((Value::Object(map), j + 1));
                }
                let (key, next) = literal_at(tokens, j)?;
                let key = scalar_to_string(&key)?;
                if !is_punct(tokens.get(next), ':') {
                    return None;
                }
                let (value, after) = literal_at(tokens, next + 1)?;
                map.insert(key, value);
                j = after;
                if is_punct(tokens.get(j), ',') {
                    j += 1;
                } else if !is_punct(tokens.get(j), '}') {
                    return None;
                }
            }
        }
        _ => None,
    }
}

fn number(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    let f = text.parse::<f64>().ok()?;
    Number::from_f64(f).map(Value::Number)
}

#[cfg(test)]
#[path = "jinja_static_test.rs"]
mod tests;
