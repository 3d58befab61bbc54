//! Directive Recognition
//!
//! Splits a logical line into a directive name and its argument text, and
//! decodes the argument forms of `#include` and `#define`.

use crate::lexer::tokenize;
use hdrbind_core::{Token, TokenKind};
use once_cell::sync::Lazy;
use regex::Regex;

static DIRECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*#\s*([A-Za-z_][A-Za-z0-9_]*)?\s*(.*?)\s*$").expect("directive regex is valid")
});

/// A directive line: `# name rest`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveLine {
    /// Directive name; empty for the null directive `#`
    pub name: String,
    pub rest: String,
}

/// Recognize a directive line
pub fn parse_line(text: &str) -> Option<DirectiveLine> {
    let caps = DIRECTIVE_RE.captures(text)?;
    Some(DirectiveLine {
        name: caps.get(1).map_or("", |m| m.as_str()).to_string(),
        rest: caps.get(2).map_or("", |m| m.as_str()).to_string(),
    })
}

/// Argument of `#include`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeSpec {
    /// `<path>`: search paths only
    System(String),
    /// `"path"`: including header's directory first, then search paths
    Quoted(String),
    /// `MACRO`: expand, then reinterpret
    Computed(Vec<Token>),
}

impl IncludeSpec {
    pub fn path(&self) -> Option<&str> {
        match self {
            IncludeSpec::System(p) | IncludeSpec::Quoted(p) => Some(p),
            IncludeSpec::Computed(_) => None,
        }
    }
}

/// Decode the text after `#include`
pub fn parse_include(rest: &str, line: u32) -> Option<IncludeSpec> {
    let rest = rest.trim();
    if let Some(inner) = rest.strip_prefix('<') {
        let end = inner.find('>')?;
        return Some(IncludeSpec::System(inner[..end].to_string()));
    }
    if let Some(inner) = rest.strip_prefix('"') {
        let end = inner.find('"')?;
        return Some(IncludeSpec::Quoted(inner[..end].to_string()));
    }
    let tokens = tokenize(rest, line);
    if tokens.is_empty() {
        None
    } else {
        Some(IncludeSpec::Computed(tokens))
    }
}

/// Reinterpret the expansion of a computed include
pub fn include_from_tokens(tokens: &[Token]) -> Option<IncludeSpec> {
    match tokens {
        [Token {
            kind: TokenKind::Str(s),
            ..
        }] => {
            let inner = s.strip_prefix('"')?.strip_suffix('"')?;
            Some(IncludeSpec::Quoted(inner.to_string()))
        }
        [first, middle @ .., last] if first.is_punct("<") && last.is_punct(">") => {
            let path: String = middle.iter().map(Token::spelling).collect();
            Some(IncludeSpec::System(path))
        }
        _ => None,
    }
}

/// Parsed `#define`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefineSpec {
    pub name: String,
    /// `None` for object-like macros
    pub params: Option<Vec<String>>,
    pub variadic: bool,
    pub body: Vec<Token>,
}

/// Decode the text after `#define`. A parameter list only exists when `(`
/// directly follows the name.
pub fn parse_define(rest: &str, line: u32) -> Option<DefineSpec> {
    let name_end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(rest.len());
    let name = &rest[..name_end];
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let after = &rest[name_end..];

    if let Some(param_text) = after.strip_prefix('(') {
        let close = param_text.find(')')?;
        let mut params = Vec::new();
        let mut variadic = false;
        for raw in param_text[..close].split(',') {
            let param = raw.trim();
            if param.is_empty() {
                continue;
            }
            if param.ends_with("...") {
                // GNU named variadic `args...` binds as __VA_ARGS__
                variadic = true;
            } else {
                params.push(param.to_string());
            }
        }
        return Some(DefineSpec {
            name: name.to_string(),
            params: Some(params),
            variadic,
            body: tokenize(&param_text[close + 1..], line),
        });
    }

    Some(DefineSpec {
        name: name.to_string(),
        params: None,
        variadic: false,
        body: tokenize(after, line),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let d = parse_line("  #  include <windows.h>  ").unwrap();
        assert_eq!(d.name, "include");
        assert_eq!(d.rest, "<windows.h>");

        let null = parse_line("#").unwrap();
        assert_eq!(null.name, "");

        assert!(parse_line("int x; # not a directive").is_none());
    }

    #[test]
    fn test_include_forms() {
        assert_eq!(
            parse_include("<sys/types.h>", 1),
            Some(IncludeSpec::System("sys/types.h".into()))
        );
        assert_eq!(
            parse_include("\"local.h\" // trailing", 1),
            Some(IncludeSpec::Quoted("local.h".into()))
        );
        assert!(matches!(
            parse_include("PLATFORM_HEADER", 1),
            Some(IncludeSpec::Computed(_))
        ));
    }

    #[test]
    fn test_computed_include_reinterpretation() {
        let quoted = tokenize("\"cfg.h\"", 1);
        assert_eq!(include_from_tokens(&quoted), Some(IncludeSpec::Quoted("cfg.h".into())));

        let system = tokenize("<win/cfg.h>", 1);
        assert_eq!(
            include_from_tokens(&system),
            Some(IncludeSpec::System("win/cfg.h".into()))
        );
    }

    #[test]
    fn test_define_forms() {
        let obj = parse_define("MAX_PATH 260", 1).unwrap();
        assert_eq!(obj.name, "MAX_PATH");
        assert!(obj.params.is_none());
        assert_eq!(obj.body.len(), 1);

        // space before the paren makes it object-like
        let spaced = parse_define("WRAP (x)", 1).unwrap();
        assert!(spaced.params.is_none());
        assert_eq!(spaced.body.len(), 3);

        let func = parse_define("MAKEWORD(a, b) ((a) | ((b) << 8))", 1).unwrap();
        assert_eq!(func.params, Some(vec!["a".to_string(), "b".to_string()]));

        let var = parse_define("LOG(fmt, ...) printf(fmt, __VA_ARGS__)", 1).unwrap();
        assert!(var.variadic);
        assert_eq!(var.params, Some(vec!["fmt".to_string()]));

        let empty = parse_define("_INC_WINDOWS", 1).unwrap();
        assert!(empty.body.is_empty());
    }
}
