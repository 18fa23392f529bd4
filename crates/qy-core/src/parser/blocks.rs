//! Extraction of top-level `{% name ... %} ... {% endname %}` blocks.

use regex::Regex;
use std::sync::OnceLock;

/// Kind of a top-level block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Macro,
    Test,
    Docs,
    Snapshot,
    Materialization,
}

impl BlockKind {
    fn keyword(&self) -> &'static str {
        match self {
            BlockKind::Macro => "macro",
            BlockKind::Test => "test",
            BlockKind::Docs => "docs",
            BlockKind::Snapshot => "snapshot",
            BlockKind::Materialization => "materialization",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "macro" => Some(BlockKind::Macro),
            "test" => Some(BlockKind::Test),
            "docs" => Some(BlockKind::Docs),
            "snapshot" => Some(BlockKind::Snapshot),
            "materialization" => Some(BlockKind::Materialization),
            _ => None,
        }
    }
}

/// One extracted block
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    pub name: String,
    /// Argument list text between the parentheses, if any
    pub args: String,
    /// `adapter='x'` of a materialization block; `default` when absent
    pub adapter: Option<String>,
    /// Text between the opening and closing tags
    pub body: String,
    /// The whole block including its tags
    pub full: String,
}

impl Block {
    /// Argument names, defaults stripped
    pub fn arg_names(&self) -> Vec<String> {
        split_top_level(&self.args)
            .into_iter()
            .map(|a| a.split('=').next().unwrap_or("").trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    }
}

fn start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{%[-+]?\s*(macro|test|docs|snapshot|materialization)\s+([A-Za-z_][A-Za-z0-9_]*)")
            .expect("valid regex")
    })
}

/// Extract every block of the requested kinds, in source order
pub fn extract(text: &str, kinds: &[BlockKind]) -> Result<Vec<Block>, String> {
    let mut blocks = Vec::new();
    let mut pos = 0;
    while let Some(caps) = start_re().captures_at(text, pos) {
        let (Some(whole), Some(kw), Some(name)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            break;
        };
        let Some(kind) = BlockKind::from_keyword(kw.as_str()) else {
            break;
        };
        let mut cursor = whole.end();

        let mut args = String::new();
        let rest = &text[cursor..];
        let trimmed = rest.trim_start();
        if trimmed.starts_with('(') {
            let open = cursor + (rest.len() - trimmed.len());
            let close = matching_paren(text, open)
                .ok_or_else(|| format!("unclosed argument list for {} '{}'", kw.as_str(), name.as_str()))?;
            args = text[open + 1..close].to_string();
            cursor = close + 1;
        }
        let tag_end = text[cursor..]
            .find("%}")
            .map(|p| cursor + p + 2)
            .ok_or_else(|| format!("unclosed tag for {} '{}'", kw.as_str(), name.as_str()))?;
        let header_tail = text[cursor..tag_end - 2].trim().trim_end_matches(['-', '+']);

        let end_re = Regex::new(&format!(r"\{{%[-+]?\s*end{}\s*[-+]?%\}}", kind.keyword()))
            .map_err(|e| e.to_string())?;
        let end = end_re.find_at(text, tag_end).ok_or_else(|| {
            format!(
                "{} '{}' is missing its end{} tag",
                kw.as_str(),
                name.as_str(),
                kind.keyword()
            )
        })?;

        if kinds.contains(&kind) {
            let adapter = (kind == BlockKind::Materialization).then(|| materialization_adapter(header_tail));
            blocks.push(Block {
                kind,
                name: name.as_str().to_string(),
                args,
                adapter,
                body: text[tag_end..end.start()].to_string(),
                full: text[whole.start()..end.end()].to_string(),
            });
        }
        pos = end.end();
    }
    Ok(blocks)
}

fn materialization_adapter(header_tail: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"adapter\s*=\s*['"]([A-Za-z0-9_]+)['"]"#)
            .expect("valid regex")
    });
    re.captures(header_tail)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "default".to_string())
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in text[open..].char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for c in args.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}
