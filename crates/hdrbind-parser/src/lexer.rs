//! C Lexer
//!
//! Splits header text into logical lines (backslash continuations joined,
//! comments removed) and tokenizes each line. Line numbers always refer to
//! the physical line a logical line starts on.

use hdrbind_core::{Token, TokenKind};

/// A source line after splicing and comment removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// Physical line the logical line starts on (1-based)
    pub line: u32,
    pub text: String,
}

/// Punctuators, longest first so the first prefix match is the longest
const PUNCTUATORS: &[&str] = &[
    "...", "<<=", ">>=", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "*=",
    "/=", "%=", "+=", "-=", "&=", "^=", "|=", "##", "::", "[", "]", "(", ")", "{", "}", ".", "&",
    "*", "+", "-", "~", "!", "/", "%", "<", ">", "^", "|", "?", ":", ";", "=", ",", "#",
];

/// Split source into logical lines
pub fn logical_lines(source: &str) -> Vec<LogicalLine> {
    let mut out = Vec::new();
    let mut in_block_comment = false;
    let mut pending: Option<(u32, String)> = None;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx as u32 + 1;
        let (start, mut text) = pending.take().unwrap_or((line_no, String::new()));

        let trimmed = raw.trim_end();
        if let Some(body) = trimmed.strip_suffix('\\') {
            text.push_str(body);
            pending = Some((start, text));
            continue;
        }
        text.push_str(raw);

        let stripped = strip_comments(&text, &mut in_block_comment);
        out.push(LogicalLine {
            line: start,
            text: stripped,
        });
    }

    if let Some((start, text)) = pending {
        let stripped = strip_comments(&text, &mut in_block_comment);
        out.push(LogicalLine {
            line: start,
            text: stripped,
        });
    }

    out
}

/// Replace comments with a single space. Block comment state carries over
/// between calls.
fn strip_comments(text: &str, in_block_comment: &mut bool) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if *in_block_comment {
            if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                *in_block_comment = false;
                out.push(' ');
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }

        match chars[i] {
            '/' if chars.get(i + 1) == Some(&'/') => break,
            '/' if chars.get(i + 1) == Some(&'*') => {
                *in_block_comment = true;
                i += 2;
            }
            quote @ ('"' | '\'') => {
                let end = scan_quoted(&chars, i, quote);
                out.extend(&chars[i..end]);
                i = end;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Index one past the closing quote, or the end of input if unterminated
fn scan_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Tokenize one logical line
pub fn tokenize(text: &str, line: u32) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_continue(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();

            // Encoding prefixes: L"..", u8"..", u'..'
            if matches!(word.as_str(), "L" | "u" | "U" | "u8") {
                if let Some(&quote @ ('"' | '\'')) = chars.get(i) {
                    let end = scan_quoted(&chars, i, quote);
                    let spelling: String = chars[start..end].iter().collect();
                    tokens.push(Token::new(quoted_kind(quote, spelling), line));
                    i = end;
                    continue;
                }
            }

            tokens.push(Token::new(TokenKind::Ident(word), line));
            continue;
        }

        if c.is_ascii_digit()
            || (c == '.' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit()))
        {
            let start = i;
            i += 1;
            while i < chars.len() {
                let d = chars[i];
                if matches!(d, '+' | '-') && matches!(chars[i - 1], 'e' | 'E' | 'p' | 'P') {
                    i += 1;
                } else if d.is_ascii_alphanumeric() || d == '_' || d == '.' {
                    i += 1;
                } else {
                    break;
                }
            }
            let raw: String = chars[start..i].iter().collect();
            tokens.push(Token::new(TokenKind::Number(raw), line));
            continue;
        }

        if c == '"' || c == '\'' {
            let end = scan_quoted(&chars, i, c);
            let spelling: String = chars[i..end].iter().collect();
            tokens.push(Token::new(quoted_kind(c, spelling), line));
            i = end;
            continue;
        }

        if let Some(p) = match_punct(&chars[i..]) {
            tokens.push(Token::new(TokenKind::Punct(p), line));
            i += p.len();
            continue;
        }

        tokens.push(Token::new(TokenKind::Other(c), line));
        i += 1;
    }

    tokens
}

fn quoted_kind(quote: char, spelling: String) -> TokenKind {
    if quote == '"' {
        TokenKind::Str(spelling)
    } else {
        TokenKind::Char(spelling)
    }
}

fn match_punct(rest: &[char]) -> Option<&'static str> {
    PUNCTUATORS.iter().copied().find(|p| {
        p.len() <= rest.len() && p.chars().zip(rest.iter()).all(|(a, &b)| a == b)
    })
}

/// Tokenize a whole source fragment that contains no directives
pub fn tokenize_source(source: &str) -> Vec<Token> {
    logical_lines(source)
        .into_iter()
        .flat_map(|l| tokenize(&l.text, l.line))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spellings(tokens: &[Token]) -> Vec<String> {
        tokens.iter().map(Token::spelling).collect()
    }

    #[test]
    fn test_line_splicing_keeps_start_line() {
        let src = "int a;\n#define X \\\n  (1 + \\\n   2)\nint b;\n";
        let lines = logical_lines(src);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].line, 2);
        assert!(lines[1].text.contains("(1 +"));
        assert!(lines[1].text.contains("2)"));
        assert_eq!(lines[2].line, 5);
    }

    #[test]
    fn test_block_comment_across_lines() {
        let src = "int a; /* start\n still comment\n end */ int b;\n";
        let lines = logical_lines(src);
        assert_eq!(lines[0].text.trim(), "int a;");
        assert_eq!(lines[1].text.trim(), "");
        assert_eq!(lines[2].text.trim(), "int b;");
    }

    #[test]
    fn test_comment_markers_inside_strings() {
        let lines = logical_lines("const char *s = \"// not a comment\"; // comment\n");
        assert_eq!(lines[0].text.trim(), "const char *s = \"// not a comment\";");
    }

    #[test]
    fn test_tokenize_mixed() {
        let tokens = tokenize("x->y <<= 0x1FUL + L'a' ... ##", 7);
        assert_eq!(
            spellings(&tokens),
            vec!["x", "->", "y", "<<=", "0x1FUL", "+", "L'a'", "...", "##"]
        );
        assert!(tokens.iter().all(|t| t.line == 7));
        assert!(matches!(tokens[6].kind, TokenKind::Char(_)));
    }

    #[test]
    fn test_tokenize_float_exponent() {
        let tokens = tokenize("1.5e-3f", 1);
        assert_eq!(spellings(&tokens), vec!["1.5e-3f"]);
    }
}
