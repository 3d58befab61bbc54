//! Macro Environment
//!
//! The single macro namespace shared by every header of a run. Predefined
//! macros come from the architecture profile and cannot be redefined or
//! undefined; everything else is added by `#define` in traversal order.
//!
//! Expansion follows the hide-set model: each token remembers which macros
//! produced it, and a token naming a macro from its own hide set is never
//! expanded again. Meeting such a token in invocation position means the
//! macro expands to itself, which is reported as a cycle. The top-level
//! expansion it belongs to is abandoned and the original token is kept.

use crate::expr::{eval_condition, parse_expr, ExprError};
use crate::lexer::tokenize;
use hdrbind_core::{ArchProfile, Token, TokenKind};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::debug;

/// Upper bound on macro invocations while expanding one top-level token
const DEFAULT_STEP_LIMIT: usize = 100_000;

/// A macro definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub name: String,
    /// Parameter names; `None` for object-like macros
    pub params: Option<Vec<String>>,
    /// Accepts `...`, bound to `__VA_ARGS__`
    pub variadic: bool,
    pub body: Vec<Token>,
    /// Header that defined it; `None` for predefined macros
    pub header: Option<PathBuf>,
    pub line: u32,
}

impl Macro {
    pub fn object(name: impl Into<String>, body: Vec<Token>) -> Self {
        Self {
            name: name.into(),
            params: None,
            variadic: false,
            body,
            header: None,
            line: 0,
        }
    }

    pub fn is_function_like(&self) -> bool {
        self.params.is_some()
    }
}

/// Result of expanding a token sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    pub tokens: Vec<Token>,
    /// Macros that were found expanding into themselves
    pub cycles: Vec<String>,
}

/// Result of evaluating an `#if` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionOutcome {
    pub value: Result<bool, ExprError>,
    pub cycles: Vec<String>,
}

type HideSet = Rc<BTreeSet<String>>;

#[derive(Debug, Clone)]
struct PpToken {
    tok: Token,
    hide: HideSet,
    /// Index into the input when the token comes straight from it
    origin: Option<usize>,
}

/// Global macro environment
#[derive(Debug, Clone)]
pub struct MacroEnv {
    macros: HashMap<String, Macro>,
    predefined: HashSet<String>,
    step_limit: usize,
}

impl Default for MacroEnv {
    fn default() -> Self {
        Self {
            macros: HashMap::new(),
            predefined: HashSet::new(),
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }
}

impl MacroEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with the profile's predefined macros
    pub fn from_profile(profile: &ArchProfile) -> Self {
        let mut env = Self::new();
        for def in &profile.predefined {
            let body = tokenize(&def.value, 0);
            env.macros
                .insert(def.name.clone(), Macro::object(def.name.clone(), body));
            env.predefined.insert(def.name.clone());
        }
        env
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Record a `#define`. Returns `false` when the name is predefined and
    /// the definition was ignored.
    pub fn define(&mut self, mac: Macro) -> bool {
        if self.predefined.contains(&mac.name) {
            debug!("Ignoring redefinition of predefined macro {}", mac.name);
            return false;
        }
        self.macros.insert(mac.name.clone(), mac);
        true
    }

    /// Record an `#undef`. Predefined macros are immutable.
    pub fn undefine(&mut self, name: &str) -> bool {
        if self.predefined.contains(name) {
            debug!("Ignoring #undef of predefined macro {}", name);
            return false;
        }
        self.macros.remove(name).is_some()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn is_predefined(&self, name: &str) -> bool {
        self.predefined.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Fully macro-expand a token sequence
    pub fn expand(&self, input: &[Token]) -> Expansion {
        let mut queue = Self::seed(input, 0);
        let mut out: Vec<Token> = Vec::with_capacity(input.len());
        let mut cycles = Vec::new();
        // (output length, input index) at the start of the current top-level token
        let mut checkpoint = (0usize, 0usize);
        let mut steps = 0usize;

        while let Some(pt) = queue.pop_front() {
            if let Some(idx) = pt.origin {
                checkpoint = (out.len(), idx);
                steps = 0;
            }

            let mac = match pt.tok.as_ident().and_then(|name| self.macros.get(name)) {
                Some(mac) => mac,
                None => {
                    out.push(pt.tok);
                    continue;
                }
            };

            let invoked = !mac.is_function_like() || next_is_lparen(&queue);
            if !invoked {
                out.push(pt.tok);
                continue;
            }

            steps += 1;
            if pt.hide.contains(&mac.name) || steps > self.step_limit {
                debug!("Macro {} expands into itself", mac.name);
                cycles.push(mac.name.clone());
                let (out_len, idx) = checkpoint;
                out.truncate(out_len);
                out.push(input[idx].clone());
                queue = Self::seed(input, idx + 1);
                continue;
            }

            let mut hide = (*pt.hide).clone();
            hide.insert(mac.name.clone());
            let hide = Rc::new(hide);
            let line = pt.tok.line;

            let replacement = match &mac.params {
                None => mac
                    .body
                    .iter()
                    .map(|t| PpToken {
                        tok: Token::new(t.kind.clone(), line),
                        hide: Rc::clone(&hide),
                        origin: None,
                    })
                    .collect::<Vec<_>>(),
                Some(params) => match collect_args(&mut queue) {
                    Some(args) => self.substitute(mac, params, args, &hide, line),
                    None => {
                        // unterminated argument list: not an invocation
                        out.push(pt.tok);
                        continue;
                    }
                },
            };

            for pt in replacement.into_iter().rev() {
                queue.push_front(pt);
            }
        }

        Expansion { tokens: out, cycles }
    }

    fn seed(input: &[Token], from: usize) -> VecDeque<PpToken> {
        let empty: HideSet = Rc::new(BTreeSet::new());
        input
            .iter()
            .enumerate()
            .skip(from)
            .map(|(i, tok)| PpToken {
                tok: tok.clone(),
                hide: Rc::clone(&empty),
                origin: Some(i),
            })
            .collect()
    }

    /// Replace parameters in a function-like body, handling `#` and `##`.
    ///
    /// Argument tokens keep their own hide sets so a macro may appear in its
    /// own arguments; body tokens get the invocation's hide set.
    fn substitute(
        &self,
        mac: &Macro,
        params: &[String],
        args: Vec<Vec<PpToken>>,
        hide: &HideSet,
        line: u32,
    ) -> Vec<PpToken> {
        let arg_for = |name: &str| -> Option<Vec<PpToken>> {
            if let Some(pos) = params.iter().position(|p| p == name) {
                return Some(args.get(pos).cloned().unwrap_or_default());
            }
            if mac.variadic && name == "__VA_ARGS__" {
                let mut joined = Vec::new();
                for (i, arg) in args.iter().enumerate().skip(params.len()) {
                    if i > params.len() {
                        joined.push(PpToken {
                            tok: Token::punct(",", line),
                            hide: Rc::clone(hide),
                            origin: None,
                        });
                    }
                    joined.extend(arg.iter().cloned());
                }
                return Some(joined);
            }
            None
        };
        let body_token = |tok: &Token| PpToken {
            tok: Token::new(tok.kind.clone(), line),
            hide: Rc::clone(hide),
            origin: None,
        };

        let body = &mac.body;
        let mut out: Vec<PpToken> = Vec::new();
        let mut i = 0;
        while i < body.len() {
            let tok = &body[i];

            // #param
            if tok.is_punct("#") {
                if let Some(arg) = body
                    .get(i + 1)
                    .and_then(|t| t.as_ident())
                    .and_then(|name| arg_for(name))
                {
                    out.push(PpToken {
                        tok: Token::new(TokenKind::Str(stringize(&arg)), line),
                        hide: Rc::clone(hide),
                        origin: None,
                    });
                    i += 2;
                    continue;
                }
            }

            // lhs ## rhs
            if tok.is_punct("##") {
                let rhs: Vec<PpToken> = match body.get(i + 1) {
                    Some(next) => match next.as_ident().and_then(|name| arg_for(name)) {
                        Some(arg) => arg,
                        None => vec![body_token(next)],
                    },
                    None => Vec::new(),
                };
                paste(&mut out, rhs, hide, line);
                i += 2;
                continue;
            }

            match tok.as_ident().and_then(|name| arg_for(name)) {
                Some(arg) => out.extend(arg.into_iter().map(|mut pt| {
                    pt.tok.line = line;
                    pt.origin = None;
                    pt
                })),
                None => out.push(body_token(tok)),
            }
            i += 1;
        }
        out
    }

    /// Evaluate an `#if`/`#elif` expression
    pub fn evaluate_condition(&self, tokens: &[Token]) -> ConditionOutcome {
        let resolved = self.resolve_defined(tokens);
        let expansion = self.expand(&resolved);
        let value = parse_expr(&expansion.tokens, &|_: &str| false)
            .and_then(|expr| eval_condition(&expr))
            .map(|v| v != 0);
        ConditionOutcome {
            value,
            cycles: expansion.cycles,
        }
    }

    /// Replace `defined X` and `defined(X)` before expansion
    fn resolve_defined(&self, tokens: &[Token]) -> Vec<Token> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let tok = &tokens[i];
            if tok.is_ident("defined") {
                let (name, consumed) = match (tokens.get(i + 1), tokens.get(i + 2), tokens.get(i + 3)) {
                    (Some(open), Some(name), Some(close))
                        if open.is_punct("(") && close.is_punct(")") =>
                    {
                        (name.as_ident(), 4)
                    }
                    (Some(name), _, _) => (name.as_ident(), 2),
                    _ => (None, 1),
                };
                if let Some(name) = name {
                    let value = if self.is_defined(name) { "1" } else { "0" };
                    out.push(Token::number(value, tok.line));
                    i += consumed;
                    continue;
                }
            }
            out.push(tok.clone());
            i += 1;
        }
        out
    }
}

fn next_is_lparen(queue: &VecDeque<PpToken>) -> bool {
    queue.front().map_or(false, |pt| pt.tok.is_punct("("))
}

/// Pop a parenthesized argument list off the queue. On an unterminated list
/// the queue is restored and `None` returned.
fn collect_args(queue: &mut VecDeque<PpToken>) -> Option<Vec<Vec<PpToken>>> {
    let mut taken: Vec<PpToken> = Vec::new();
    let mut args: Vec<Vec<PpToken>> = vec![Vec::new()];
    let mut depth = 0usize;

    while let Some(pt) = queue.pop_front() {
        taken.push(pt.clone());
        if taken.len() == 1 {
            // the opening paren
            continue;
        }
        if pt.tok.is_punct("(") {
            depth += 1;
        } else if pt.tok.is_punct(")") {
            if depth == 0 {
                // `F()` has zero arguments, not one empty argument
                if args.len() == 1 && args[0].is_empty() {
                    args.clear();
                }
                return Some(args);
            }
            depth -= 1;
        } else if pt.tok.is_punct(",") && depth == 0 {
            args.push(Vec::new());
            continue;
        }
        if let Some(current) = args.last_mut() {
            current.push(pt);
        }
    }

    for pt in taken.into_iter().rev() {
        queue.push_front(pt);
    }
    None
}

fn stringize(arg: &[PpToken]) -> String {
    let text = arg
        .iter()
        .map(|pt| pt.tok.spelling())
        .collect::<Vec<_>>()
        .join(" ");
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Paste `rhs` onto the last token of `out`
fn paste(out: &mut Vec<PpToken>, mut rhs: Vec<PpToken>, hide: &HideSet, line: u32) {
    let lhs = out.pop();
    let (lhs, first) = match (lhs, rhs.is_empty()) {
        (None, _) => {
            out.extend(rhs);
            return;
        }
        (Some(lhs), true) => {
            out.push(lhs);
            return;
        }
        (Some(lhs), false) => (lhs, rhs.remove(0)),
    };

    let glued = format!("{}{}", lhs.tok.spelling(), first.tok.spelling());
    let relexed = tokenize(&glued, line);
    if relexed.len() == 1 {
        out.extend(relexed.into_iter().map(|tok| PpToken {
            tok,
            hide: Rc::clone(hide),
            origin: None,
        }));
    } else {
        out.push(lhs);
        out.push(first);
    }
    out.extend(rhs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdrbind_core::{Architecture, ArchProfile};
    use pretty_assertions::assert_eq;

    fn define(env: &mut MacroEnv, src: &str) {
        let spec = crate::preprocessor::directive::parse_define(src, 1).unwrap();
        env.define(Macro {
            name: spec.name,
            params: spec.params,
            variadic: spec.variadic,
            body: spec.body,
            header: None,
            line: 1,
        });
    }

    fn expand(env: &MacroEnv, src: &str) -> (String, Vec<String>) {
        let exp = env.expand(&tokenize(src, 1));
        (hdrbind_core::token::spell_tokens(&exp.tokens), exp.cycles)
    }

    #[test]
    fn test_object_like_chain() {
        let mut env = MacroEnv::new();
        define(&mut env, "WINAPI __stdcall");
        define(&mut env, "APIENTRY WINAPI");
        assert_eq!(expand(&env, "int APIENTRY f(void);").0, "int __stdcall f ( void ) ;");
    }

    #[test]
    fn test_function_like_with_nested_parens() {
        let mut env = MacroEnv::new();
        define(&mut env, "MAKEWORD(a, b) ((a) | ((b) << 8))");
        assert_eq!(
            expand(&env, "MAKEWORD(f(1, 2), 3)").0,
            "( ( f ( 1 , 2 ) ) | ( ( 3 ) << 8 ) )"
        );
    }

    #[test]
    fn test_function_like_name_without_args_is_kept() {
        let mut env = MacroEnv::new();
        define(&mut env, "F(x) x");
        assert_eq!(expand(&env, "F + 1").0, "F + 1");
    }

    #[test]
    fn test_arguments_pulled_from_rest_of_input() {
        let mut env = MacroEnv::new();
        define(&mut env, "CALL APPLY");
        define(&mut env, "APPLY(x) (x + 1)");
        assert_eq!(expand(&env, "CALL(2)").0, "( 2 + 1 )");
    }

    #[test]
    fn test_macro_in_own_arguments() {
        let mut env = MacroEnv::new();
        define(&mut env, "ID(x) x");
        let (text, cycles) = expand(&env, "ID(ID(7))");
        assert_eq!(text, "7");
        assert!(cycles.is_empty());
    }

    #[test]
    fn test_stringize_and_paste() {
        let mut env = MacroEnv::new();
        define(&mut env, "STR(x) #x");
        define(&mut env, "CAT(a, b) a ## b");
        define(&mut env, "W(s) L ## s");
        assert_eq!(expand(&env, "STR(a + \"b\")").0, "\"a + \\\"b\\\"\"");
        assert_eq!(expand(&env, "CAT(Get, MessageW)").0, "GetMessageW");
        assert_eq!(expand(&env, "W(\"x\")").0, "L\"x\"");
    }

    #[test]
    fn test_variadic() {
        let mut env = MacroEnv::new();
        define(&mut env, "CALL(f, ...) f(__VA_ARGS__)");
        assert_eq!(expand(&env, "CALL(g, 1, 2)").0, "g ( 1 , 2 )");
    }

    #[test]
    fn test_direct_cycle_keeps_original_token() {
        let mut env = MacroEnv::new();
        define(&mut env, "LOOP LOOP + 1");
        let (text, cycles) = expand(&env, "x = LOOP ;");
        assert_eq!(text, "x = LOOP ;");
        assert_eq!(cycles, vec!["LOOP".to_string()]);
    }

    #[test]
    fn test_indirect_cycle_only_aborts_that_expansion() {
        let mut env = MacroEnv::new();
        define(&mut env, "A B");
        define(&mut env, "B A");
        define(&mut env, "ONE 1");
        let (text, cycles) = expand(&env, "ONE A ONE");
        assert_eq!(text, "1 A 1");
        assert_eq!(cycles, vec!["A".to_string()]);
    }

    #[test]
    fn test_predefined_are_immutable() {
        let profile = ArchProfile::default();
        let mut env = MacroEnv::from_profile(&profile);
        assert!(env.is_defined("_WIN64"));
        assert!(!env.undefine("_WIN64"));
        assert!(!env.define(Macro::object("_WIN64", tokenize("0", 1))));
        assert_eq!(expand(&env, "_WIN64").0, "1");
    }

    #[test]
    fn test_conditions() {
        let mut env = MacroEnv::from_profile(&Architecture::X86_64.profile());
        define(&mut env, "WINVER 0x0A00");

        let eval = |env: &MacroEnv, src: &str| env.evaluate_condition(&tokenize(src, 1)).value;
        assert_eq!(eval(&env, "defined(_WIN64)"), Ok(true));
        assert_eq!(eval(&env, "defined _M_IX86"), Ok(false));
        assert_eq!(eval(&env, "WINVER >= 0x0601 && !defined(_M_IX86)"), Ok(true));
        assert_eq!(eval(&env, "_MSC_VER > 1800"), Ok(true));
        assert_eq!(eval(&env, "UNDEFINED_NAME"), Ok(false));
        assert!(eval(&env, "sizeof(int) == 4").is_err());
    }
}
