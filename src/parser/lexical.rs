//! Heuristic lexical parser
//!
//! [`LexicalParser`] recognizes declarations from a regex token stream
//! without a C++ grammar: includes, macros, namespaces, classes, enums,
//! typedefs, functions, fields and variables, plus call references inside
//! function bodies. Includes are resolved against the including file's folder
//! and the project include directories and traversed recursively; a file is
//! traversed at most once per document.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::trace;

use super::{
    ParseError, ParserCallback, Problem, ProblemCategory, QualifiedName, Scope, Severity,
    SourceElement, SourceParser,
};
use crate::codec::{ElementKind, Role, TypeKind};
use crate::project::{Document, ResourceTree};

/// Deepest include nesting that is still traversed
const MAX_INCLUDE_DEPTH: usize = 32;

/// Stands in for the name of an anonymous aggregate in trailing declarators
const ANONYMOUS: &str = "__anonymous";

const SPECIFIERS: &[&str] = &[
    "inline",
    "static",
    "virtual",
    "explicit",
    "constexpr",
    "consteval",
    "constinit",
    "extern",
    "mutable",
    "thread_local",
    "register",
    "volatile",
];

const KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "return", "sizeof", "catch", "new", "delete", "throw",
    "case", "do", "else", "static_assert", "alignof", "alignas", "decltype", "typeid",
    "static_cast", "dynamic_cast", "const_cast", "reinterpret_cast", "noexcept", "defined",
    "co_await", "co_return", "co_yield", "requires", "operator",
];

/// Words that can end a declaration without being its name
const BUILTIN_TYPES: &[&str] = &[
    "void", "bool", "char", "short", "int", "long", "float", "double", "signed", "unsigned",
    "auto", "wchar_t", "char8_t", "char16_t", "char32_t", "const",
];

const ACCESS_LABELS: &[&str] = &["public", "private", "protected"];

/// Tokens after which `name(` is still an expression rather than a declaration
const EXPRESSION_WORDS: &[&str] = &["return", "else", "throw", "co_return", "co_await", "case", "do"];

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Ident,
    Number,
    Str,
    Punct,
    /// A whole preprocessor line without the leading `#`
    Directive,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    line: u32,
}

impl Token {
    fn is(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    fn ident(&self) -> Option<&str> {
        (self.kind == TokenKind::Ident).then_some(self.text.as_str())
    }

    fn is_word(&self, word: &str) -> bool {
        self.ident() == Some(word)
    }

    fn placeholder(line: u32) -> Self {
        Self {
            kind: TokenKind::Ident,
            text: ANONYMOUS.to_string(),
            line,
        }
    }
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

fn class_kind(token: &Token) -> Option<TypeKind> {
    match token.ident()? {
        "class" => Some(TypeKind::Class),
        "struct" => Some(TypeKind::Struct),
        "union" => Some(TypeKind::Union),
        _ => None,
    }
}

fn forward_kind(kind: TypeKind) -> TypeKind {
    match kind {
        TypeKind::Struct => TypeKind::FwdStruct,
        TypeKind::Union => TypeKind::FwdUnion,
        _ => TypeKind::FwdClass,
    }
}

/// Index just past the group opened at `open`, or the slice length when it
/// never closes
fn skip_group(tokens: &[Token], open: usize, opening: &str, closing: &str) -> usize {
    let mut depth = 0usize;
    for (index, token) in tokens.iter().enumerate().skip(open) {
        if token.is(opening) {
            depth += 1;
        } else if token.is(closing) {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return index + 1;
            }
        }
    }
    tokens.len()
}

/// Split on `separator` outside of brackets, parentheses and template
/// argument lists
fn split_top_level<'t>(tokens: &'t [Token], separator: &str) -> Vec<&'t [Token]> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (index, token) in tokens.iter().enumerate() {
        match token.text.as_str() {
            "(" | "[" | "{" | "<" if token.kind == TokenKind::Punct => depth += 1,
            ")" | "]" | "}" | ">" if token.kind == TokenKind::Punct => depth -= 1,
            _ if depth <= 0 && token.is(separator) => {
                parts.push(&tokens[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts
}

/// Position of the first `punct` outside of any grouping
fn find_top_level(tokens: &[Token], punct: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (index, token) in tokens.iter().enumerate() {
        if depth <= 0 && token.is(punct) {
            return Some(index);
        }
        match token.text.as_str() {
            "(" | "[" | "{" | "<" if token.kind == TokenKind::Punct => depth += 1,
            ")" | "]" | "}" | ">" if token.kind == TokenKind::Punct => depth -= 1,
            _ => {}
        }
    }
    None
}

/// `A::B<T>::C` as segments, with the number of tokens consumed
fn qualified_chain(tokens: &[Token]) -> (Vec<String>, usize) {
    let mut segments = Vec::new();
    let mut index = 0;
    if tokens.first().is_some_and(|token| token.is("::")) {
        index += 1;
    }
    while let Some(name) = tokens.get(index).and_then(Token::ident) {
        segments.push(name.to_string());
        index += 1;
        if tokens.get(index).is_some_and(|token| token.is("<")) {
            index = skip_group(tokens, index, "<", ">");
        }
        if tokens.get(index).is_some_and(|token| token.is("::"))
            && tokens.get(index + 1).is_some_and(|token| token.ident().is_some())
        {
            index += 1;
        } else {
            break;
        }
    }
    (segments, index)
}

#[derive(Debug, Default, Clone, Copy)]
struct Specifiers {
    typedef: bool,
    friend: bool,
}

/// Skip templates, attributes and storage specifiers at the start of a
/// declaration
fn strip_specifiers(tokens: &[Token]) -> (usize, Specifiers) {
    let mut specifiers = Specifiers::default();
    let mut index = 0;
    while let Some(token) = tokens.get(index) {
        if token.is_word("template") && tokens.get(index + 1).is_some_and(|t| t.is("<")) {
            index = skip_group(tokens, index + 1, "<", ">");
        } else if token.is("[") && tokens.get(index + 1).is_some_and(|t| t.is("[")) {
            index = skip_group(tokens, index, "[", "]");
        } else if token.is_word("__attribute__") || token.is_word("__declspec") {
            index = skip_group(tokens, index + 1, "(", ")");
        } else if token.is_word("typedef") {
            specifiers.typedef = true;
            index += 1;
        } else if token.is_word("friend") {
            specifiers.friend = true;
            index += 1;
        } else if token.ident().is_some_and(|word| SPECIFIERS.contains(&word)) {
            index += 1;
        } else {
            break;
        }
    }
    (index, specifiers)
}

/// Name declared by one declarator, qualified when written as `A::name`
///
/// With `require_type`, something must precede the name; `int` alone
/// declares nothing.
fn declarator_name(tokens: &[Token], require_type: bool) -> Option<Vec<String>> {
    let end = [find_top_level(tokens, "="), find_top_level(tokens, "{")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(tokens.len());
    let tokens = &tokens[..end];

    // Function pointer or reference declarators: `int (*name)(int)`
    if let Some(open) = tokens.iter().position(|token| token.is("("))
        && tokens
            .get(open + 1)
            .is_some_and(|token| token.is("*") || token.is("&"))
    {
        let close = skip_group(tokens, open, "(", ")");
        return tokens[open..close]
            .iter()
            .rev()
            .find_map(Token::ident)
            .map(|name| vec![name.to_string()]);
    }

    let mut depth = 0i32;
    let mut name_at = None;
    for (index, token) in tokens.iter().enumerate() {
        match token.text.as_str() {
            "(" | "[" | "<" if token.kind == TokenKind::Punct => depth += 1,
            ")" | "]" | ">" if token.kind == TokenKind::Punct => depth -= 1,
            ":" if depth <= 0 && token.kind == TokenKind::Punct => break,
            _ if depth <= 0 && token.ident().is_some() => name_at = Some(index),
            _ => {}
        }
    }
    let name_at = name_at?;
    let name = tokens[name_at].ident()?;
    if is_keyword(name) || BUILTIN_TYPES.contains(&name) || name == ANONYMOUS {
        return None;
    }

    let mut segments = vec![name.to_string()];
    let mut start = name_at;
    while start >= 2 && tokens[start - 1].is("::") {
        let Some(qualifier) = tokens[start - 2].ident() else {
            break;
        };
        segments.insert(0, qualifier.to_string());
        start -= 2;
    }
    let has_type = tokens[..start]
        .iter()
        .any(|token| token.kind == TokenKind::Ident);
    if require_type && !has_type {
        return None;
    }
    Some(segments)
}

/// A function declarator: qualified name, index of its first token and
/// index of the parameter list
#[derive(Debug)]
struct FunctionName {
    segments: Vec<String>,
    start: usize,
    paren: usize,
}

fn function_name(tokens: &[Token]) -> Option<FunctionName> {
    let paren = find_top_level(tokens, "(")?;
    if paren == 0 {
        return None;
    }

    if let Some(operator) = tokens[..paren].iter().position(|token| token.is_word("operator")) {
        if paren == operator + 1
            && tokens.get(paren + 1).is_some_and(|token| token.is(")"))
            && tokens.get(paren + 2).is_some_and(|token| token.is("("))
        {
            return Some(FunctionName {
                segments: vec!["operator()".to_string()],
                start: operator,
                paren: paren + 2,
            });
        }
        let symbol: String = tokens[operator + 1..paren]
            .iter()
            .map(|token| token.text.as_str())
            .collect();
        let leaf = if symbol.starts_with(|c: char| c.is_ascii_alphabetic()) {
            format!("operator {}", symbol)
        } else {
            format!("operator{}", symbol)
        };
        return Some(FunctionName {
            segments: vec![leaf],
            start: operator,
            paren,
        });
    }

    let name = tokens[paren - 1].ident()?;
    if is_keyword(name) || BUILTIN_TYPES.contains(&name) {
        return None;
    }
    let mut start = paren - 1;
    let mut segments = vec![name.to_string()];
    if start >= 1 && tokens[start - 1].is("~") {
        segments[0] = format!("~{}", name);
        start -= 1;
    }

    while start >= 2 && tokens[start - 1].is("::") {
        let mut qualifier_at = start - 2;
        if tokens[qualifier_at].is(">") {
            // Template arguments of the qualifier: `Foo<T>::bar`
            let mut depth = 0;
            loop {
                if tokens[qualifier_at].is(">") {
                    depth += 1;
                } else if tokens[qualifier_at].is("<") {
                    depth -= 1;
                }
                if depth == 0 || qualifier_at == 0 {
                    break;
                }
                qualifier_at -= 1;
            }
            if qualifier_at == 0 {
                break;
            }
            qualifier_at -= 1;
        }
        let Some(qualifier) = tokens[qualifier_at].ident() else {
            break;
        };
        segments.insert(0, qualifier.to_string());
        start = qualifier_at;
    }
    Some(FunctionName {
        segments,
        start,
        paren,
    })
}

// ============================================================================
// Parser
// ============================================================================

/// Regex-driven declaration scanner
#[derive(Debug, Clone)]
pub struct LexicalParser {
    token_regex: Regex,
    include_regex: Regex,
    define_regex: Regex,
    error_regex: Regex,
}

impl LexicalParser {
    /// Create a parser with compiled regex patterns
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_regex: Regex::new(concat!(
                r#"(?ms)(?P<comment>//[^\n]*|/\*.*?\*/)"#,
                r#"|(?P<directive>^[ \t]*#(?:[^\n\\]|\\.)*)"#,
                r#"|(?P<string>"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*')"#,
                r#"|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)"#,
                r#"|(?P<number>[0-9][A-Za-z0-9_.']*)"#,
                r#"|(?P<punct>::|->|[{}()\[\];:,<>=*&~.])"#,
            ))?,

            // include "util.h" / include <vector>
            include_regex: Regex::new(r#"^include(?:_next)?\s*([<"])([^>"]+)[>"]"#)?,

            // define NAME(args) body
            define_regex: Regex::new(r"^define\s+([A-Za-z_][A-Za-z0-9_]*)")?,

            error_regex: Regex::new(r"^error\b\s*(.*)$")?,
        })
    }

    fn tokenize(&self, text: &str) -> Vec<Token> {
        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(offset, _)| offset + 1))
            .collect();
        let line_of = |offset: usize| line_starts.partition_point(|&start| start <= offset) as u32;

        let mut tokens = Vec::new();
        for captures in self.token_regex.captures_iter(text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let (kind, text) = if captures.name("comment").is_some() {
                continue;
            } else if let Some(directive) = captures.name("directive") {
                let text = directive
                    .as_str()
                    .trim_start()
                    .trim_start_matches('#')
                    .replace("\\\r\n", " ")
                    .replace("\\\n", " ");
                (TokenKind::Directive, text.trim().to_string())
            } else if captures.name("string").is_some() {
                (TokenKind::Str, String::new())
            } else if let Some(ident) = captures.name("ident") {
                (TokenKind::Ident, ident.as_str().to_string())
            } else if let Some(number) = captures.name("number") {
                (TokenKind::Number, number.as_str().to_string())
            } else {
                (TokenKind::Punct, whole.as_str().to_string())
            };
            tokens.push(Token {
                kind,
                text,
                line: line_of(whole.start()),
            });
        }
        tokens
    }
}

impl SourceParser for LexicalParser {
    fn parse(
        &self,
        document: &Document,
        include_dirs: &[PathBuf],
        resources: &dyn ResourceTree,
        callback: &mut dyn ParserCallback,
    ) -> Result<(), ParseError> {
        let text = document
            .load(resources)
            .map_err(|err| ParseError::read(document.path(), err))?;

        let mut session = Session {
            parser: self,
            include_dirs,
            resources,
            callback,
            visited: HashSet::new(),
            depth: 0,
        };
        session.parse_file(document.path(), &text)
    }
}

// ============================================================================
// Per-document state
// ============================================================================

#[derive(Debug)]
enum Frame {
    /// Namespace or class body; `scopes` were announced and are exited in
    /// reverse when the frame closes
    Named {
        scopes: Vec<Scope>,
        name: QualifiedName,
        is_class: bool,
        resume: Vec<Token>,
    },
    Enum {
        scope: Option<Scope>,
        /// Enumeration name, `None` for anonymous enums
        name: Option<QualifiedName>,
        outer: QualifiedName,
        resume: Vec<Token>,
    },
    /// Anonymous namespace or `extern "C"` block
    Transparent,
    /// Function body or braced initializer; only calls are recognized
    Body {
        depth: usize,
        resume: Option<Vec<Token>>,
    },
}

/// Statement assembly for one file
#[derive(Debug, Default)]
struct FileState {
    frames: Vec<Frame>,
    statement: Vec<Token>,
    /// Length of tokens restored after a closing brace; a statement of
    /// exactly that length adds nothing new
    resume_len: Option<usize>,
}

impl FileState {
    fn resume(&mut self, tokens: Vec<Token>) {
        if !tokens.is_empty() {
            self.resume_len = Some(tokens.len());
            self.statement = tokens;
        }
    }

    fn current_name(&self) -> QualifiedName {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| match frame {
                Frame::Named { name, .. } => Some(name.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Whether declarations here are class members
    fn in_class(&self) -> bool {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| match frame {
                Frame::Named { is_class, .. } => Some(*is_class),
                Frame::Enum { .. } | Frame::Body { .. } => Some(false),
                Frame::Transparent => None,
            })
            .unwrap_or(false)
    }
}

struct Session<'s> {
    parser: &'s LexicalParser,
    include_dirs: &'s [PathBuf],
    resources: &'s dyn ResourceTree,
    callback: &'s mut dyn ParserCallback,
    visited: HashSet<PathBuf>,
    depth: usize,
}

impl Session<'_> {
    fn parse_file(&mut self, path: &Path, text: &str) -> Result<(), ParseError> {
        self.visited.insert(path.to_path_buf());
        let tokens = self.parser.tokenize(text);
        trace!("Scanning {} ({} tokens)", path.display(), tokens.len());

        let mut file = FileState::default();
        for index in 0..tokens.len() {
            if self.callback.is_cancelled() {
                return Err(ParseError::Cancelled);
            }
            let token = &tokens[index];
            if token.kind == TokenKind::Directive {
                self.directive(path, token)?;
                continue;
            }
            match file.frames.last() {
                Some(Frame::Body { .. }) => {
                    self.body_token(&mut file, &tokens, index);
                    continue;
                }
                Some(Frame::Enum { .. }) => {
                    self.enum_token(&mut file, token);
                    continue;
                }
                _ => {}
            }

            if token.is("{") {
                self.open_brace(&mut file, token.line);
            } else if token.is(";") {
                self.statement(&mut file);
            } else if token.is("}") {
                self.statement(&mut file);
                self.close_brace(&mut file, token.line);
            } else if token.is(":")
                && file.statement.len() == 1
                && file.statement[0]
                    .ident()
                    .is_some_and(|word| ACCESS_LABELS.contains(&word))
            {
                file.statement.clear();
            } else {
                file.statement.push(token.clone());
            }
        }

        let last_line = tokens.last().map_or(1, |token| token.line);
        self.finish_file(&mut file, last_line);
        Ok(())
    }

    fn declare(&mut self, name: QualifiedName, kind: ElementKind, role: Role, line: u32) {
        self.callback
            .accept(&SourceElement::new(name, kind, role).at_line(line));
    }

    fn problem(&mut self, category: ProblemCategory, severity: Severity, message: String, line: u32) {
        self.callback
            .accept_problem(&Problem::new(category, severity, message, line));
    }

    // ------------------------------------------------------------------------
    // Preprocessor
    // ------------------------------------------------------------------------

    fn directive(&mut self, path: &Path, token: &Token) -> Result<(), ParseError> {
        let parser = self.parser;
        if let Some(captures) = parser.include_regex.captures(&token.text) {
            let quoted = &captures[1] == "\"";
            return self.include(path, &captures[2], quoted, token.line);
        }
        if let Some(captures) = parser.define_regex.captures(&token.text) {
            let name = QualifiedName::new([&captures[1]]);
            self.declare(name, ElementKind::Macro, Role::Declaration, token.line);
        } else if let Some(captures) = parser.error_regex.captures(&token.text) {
            self.problem(
                ProblemCategory::Preprocessor,
                Severity::Error,
                format!("#error {}", &captures[1]),
                token.line,
            );
        }
        Ok(())
    }

    fn resolve_include(&self, from: &Path, name: &str, quoted: bool) -> Option<PathBuf> {
        let local = quoted
            .then(|| from.parent().map(|dir| dir.join(name)))
            .flatten();
        local
            .into_iter()
            .chain(self.include_dirs.iter().map(|dir| dir.join(name)))
            .map(|candidate| normalize(&candidate))
            .find(|candidate| self.resources.exists(candidate))
    }

    fn include(&mut self, from: &Path, name: &str, quoted: bool, line: u32) -> Result<(), ParseError> {
        let Some(resolved) = self.resolve_include(from, name, quoted) else {
            self.problem(
                ProblemCategory::Preprocessor,
                Severity::Warning,
                format!("Unresolved inclusion: {}", name),
                line,
            );
            return Ok(());
        };

        let scope = Scope::include(&resolved);
        self.callback.enter_scope(&scope);
        let mut result = Ok(());
        if !self.visited.contains(&resolved) && self.depth < MAX_INCLUDE_DEPTH {
            match self.resources.read(&resolved) {
                Ok(text) => {
                    self.depth += 1;
                    result = self.parse_file(&resolved, &text);
                    self.depth -= 1;
                }
                Err(err) => self.problem(
                    ProblemCategory::Preprocessor,
                    Severity::Error,
                    format!("Cannot read included file {}: {}", resolved.display(), err),
                    line,
                ),
            }
        }
        self.callback.exit_scope(&scope);
        result
    }

    // ------------------------------------------------------------------------
    // Braces
    // ------------------------------------------------------------------------

    fn open_brace(&mut self, file: &mut FileState, line: u32) {
        let statement = std::mem::take(&mut file.statement);
        file.resume_len = None;
        let (start, _) = strip_specifiers(&statement);
        let head = &statement[start..];
        let current = file.current_name();

        let frame = match head.first() {
            Some(first) if first.is_word("namespace") => {
                let (segments, _) = qualified_chain(&head[1..]);
                if segments.is_empty() {
                    Frame::Transparent
                } else {
                    let mut name = current;
                    let mut scopes = Vec::new();
                    for segment in segments {
                        name = name.child(segment);
                        let scope = Scope::Namespace(name.clone());
                        self.callback.enter_scope(&scope);
                        scopes.push(scope);
                    }
                    Frame::Named {
                        scopes,
                        name,
                        is_class: false,
                        resume: Vec::new(),
                    }
                }
            }
            None => Frame::Body {
                depth: 1,
                resume: None,
            },
            Some(_) if head.iter().all(|token| token.kind == TokenKind::Str) => {
                // extern "C" {
                Frame::Transparent
            }
            Some(first) if first.is_word("enum") => {
                self.open_enum(head, statement.clone(), current, line)
            }
            Some(first) if class_kind(first).is_some() && find_top_level(head, "(").is_none() => {
                self.open_class(head, &statement, start, current, line)
            }
            Some(_) => match function_name(head) {
                Some(function) if find_top_level(head, "=").is_none() => {
                    self.declare_function(function, head, &current, file.in_class(), line);
                    Frame::Body {
                        depth: 1,
                        resume: None,
                    }
                }
                _ => Frame::Body {
                    depth: 1,
                    resume: Some(statement.clone()),
                },
            },
        };
        file.frames.push(frame);
    }

    fn open_class(
        &mut self,
        head: &[Token],
        statement: &[Token],
        start: usize,
        current: QualifiedName,
        line: u32,
    ) -> Frame {
        let kind = class_kind(&head[0]).unwrap_or(TypeKind::Class);
        let mut index = 1;
        while let Some(token) = head.get(index) {
            if token.is("[") {
                index = skip_group(head, index, "[", "]");
            } else if token.is_word("alignas") || token.is_word("__declspec") {
                index = skip_group(head, index + 1, "(", ")");
            } else {
                break;
            }
        }
        let (segments, consumed) = qualified_chain(&head[index..]);
        index += consumed;

        if segments.is_empty() {
            let mut resume = statement[..start + 1].to_vec();
            resume.push(Token::placeholder(line));
            return Frame::Named {
                scopes: Vec::new(),
                name: current,
                is_class: true,
                resume,
            };
        }

        if head.get(index).is_some_and(|token| token.is_word("final")) {
            index += 1;
        }
        if head.get(index).is_some_and(|token| token.is(":")) {
            for base in split_top_level(&head[index + 1..], ",") {
                let skip = base
                    .iter()
                    .take_while(|token| {
                        token
                            .ident()
                            .is_some_and(|word| ACCESS_LABELS.contains(&word) || word == "virtual")
                    })
                    .count();
                let (base_name, _) = qualified_chain(&base[skip..]);
                if !base_name.is_empty() {
                    self.declare(
                        QualifiedName::new(base_name),
                        ElementKind::Type(TypeKind::Derived),
                        Role::Declaration,
                        line,
                    );
                }
            }
        }

        let mut name = current;
        for segment in segments {
            name = name.child(segment);
        }
        let scope = Scope::Class {
            name: name.clone(),
            kind,
        };
        self.callback.enter_scope(&scope);
        Frame::Named {
            scopes: vec![scope],
            name,
            is_class: true,
            resume: statement.to_vec(),
        }
    }

    fn open_enum(
        &mut self,
        head: &[Token],
        statement: Vec<Token>,
        current: QualifiedName,
        line: u32,
    ) -> Frame {
        let mut index = 1;
        if head
            .get(index)
            .is_some_and(|token| token.is_word("class") || token.is_word("struct"))
        {
            index += 1;
        }
        match head.get(index).and_then(Token::ident) {
            Some(enum_name) => {
                let name = current.child(enum_name);
                let scope = Scope::Class {
                    name: name.clone(),
                    kind: TypeKind::Enum,
                };
                self.callback.enter_scope(&scope);
                Frame::Enum {
                    scope: Some(scope),
                    name: Some(name),
                    outer: current,
                    resume: statement,
                }
            }
            None => {
                let mut resume = statement;
                resume.push(Token::placeholder(line));
                Frame::Enum {
                    scope: None,
                    name: None,
                    outer: current,
                    resume,
                }
            }
        }
    }

    fn close_brace(&mut self, file: &mut FileState, line: u32) {
        match file.frames.pop() {
            None => self.problem(
                ProblemCategory::Syntax,
                Severity::Error,
                "Unmatched '}'".to_string(),
                line,
            ),
            Some(Frame::Named { scopes, resume, .. }) => {
                for scope in scopes.iter().rev() {
                    self.callback.exit_scope(scope);
                }
                file.resume(resume);
            }
            Some(Frame::Enum { scope, resume, .. }) => {
                if let Some(scope) = scope {
                    self.callback.exit_scope(&scope);
                }
                file.resume(resume);
            }
            Some(Frame::Transparent) => {}
            Some(Frame::Body { resume, .. }) => file.resume(resume.unwrap_or_default()),
        }
    }

    fn finish_file(&mut self, file: &mut FileState, line: u32) {
        if file.frames.is_empty() {
            return;
        }
        self.problem(
            ProblemCategory::Syntax,
            Severity::Error,
            format!("Missing '}}' for {} open blocks", file.frames.len()),
            line,
        );
        while let Some(frame) = file.frames.pop() {
            match frame {
                Frame::Named { scopes, .. } => {
                    for scope in scopes.iter().rev() {
                        self.callback.exit_scope(scope);
                    }
                }
                Frame::Enum {
                    scope: Some(scope), ..
                } => self.callback.exit_scope(&scope),
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------------
    // Bodies and enumerations
    // ------------------------------------------------------------------------

    fn body_token(&mut self, file: &mut FileState, tokens: &[Token], index: usize) {
        let token = &tokens[index];
        if token.is("{") {
            if let Some(Frame::Body { depth, .. }) = file.frames.last_mut() {
                *depth += 1;
            }
            return;
        }
        if token.is("}") {
            let closed = match file.frames.last_mut() {
                Some(Frame::Body { depth, .. }) => {
                    *depth -= 1;
                    *depth == 0
                }
                _ => false,
            };
            if closed {
                self.close_brace(file, token.line);
            }
            return;
        }

        let Some(name) = token.ident() else {
            return;
        };
        if is_keyword(name) || !tokens.get(index + 1).is_some_and(|next| next.is("(")) {
            return;
        }
        self.call_reference(tokens, index, name);
    }

    fn call_reference(&mut self, tokens: &[Token], index: usize, name: &str) {
        let line = tokens[index].line;
        let mut segments = vec![name.to_string()];
        let mut start = index;
        while start >= 2 && tokens[start - 1].is("::") {
            let Some(qualifier) = tokens[start - 2].ident() else {
                break;
            };
            segments.insert(0, qualifier.to_string());
            start -= 2;
        }

        let previous = start.checked_sub(1).map(|at| &tokens[at]);
        match previous {
            Some(token) if token.is(".") || token.is("->") => {
                self.declare(
                    QualifiedName::new([name]),
                    ElementKind::Method,
                    Role::Reference,
                    line,
                );
            }
            // `Widget w(3)` declares rather than calls
            Some(token)
                if token
                    .ident()
                    .is_some_and(|word| !EXPRESSION_WORDS.contains(&word)) => {}
            Some(token) if token.is("~") || token.is(">") => {}
            _ => self.declare(
                QualifiedName::new(segments),
                ElementKind::Function,
                Role::Reference,
                line,
            ),
        }
    }

    fn enum_token(&mut self, file: &mut FileState, token: &Token) {
        if token.is(",") || token.is("}") {
            let item = std::mem::take(&mut file.statement);
            if let Some(enumerator) = item.iter().find_map(Token::ident)
                && let Some(Frame::Enum { name, outer, .. }) = file.frames.last()
            {
                let qualified = match name {
                    Some(enumeration) => QualifiedName::enumerator(enumeration, enumerator),
                    None => outer.child(enumerator),
                };
                self.declare(
                    qualified,
                    ElementKind::Enumerator,
                    Role::Declaration,
                    token.line,
                );
            }
            if token.is("}") {
                self.close_brace(file, token.line);
            }
        } else if !token.is("{") {
            file.statement.push(token.clone());
        }
    }

    // ------------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------------

    fn statement(&mut self, file: &mut FileState) {
        let statement = std::mem::take(&mut file.statement);
        let resume_len = file.resume_len.take();
        if statement.is_empty() || Some(statement.len()) == resume_len {
            return;
        }

        let (start, specifiers) = strip_specifiers(&statement);
        let head = &statement[start..];
        let Some(first) = head.first() else {
            return;
        };
        let line = first.line;
        let current = file.current_name();

        if first.is_word("using") {
            self.using_declaration(head, &current);
            return;
        }
        if first.is_word("namespace") {
            // namespace alias = target;
            if let Some(equals) = find_top_level(head, "=") {
                let (target, _) = qualified_chain(&head[equals + 1..]);
                if !target.is_empty() {
                    self.declare(
                        QualifiedName::new(target),
                        ElementKind::Namespace,
                        Role::Reference,
                        line,
                    );
                }
            }
            return;
        }
        if first.is_word("static_assert") || first.is_word("template") {
            return;
        }

        if specifiers.typedef {
            for (position, part) in split_top_level(head, ",").into_iter().enumerate() {
                if let Some(name) = declarator_name(part, position == 0) {
                    let leaf = name.last().cloned().unwrap_or_default();
                    self.declare(
                        current.child(leaf),
                        ElementKind::Type(TypeKind::Typedef),
                        Role::Declaration,
                        line,
                    );
                }
            }
            return;
        }

        if let Some(kind) = class_kind(first) {
            let (segments, consumed) = qualified_chain(&head[1..]);
            if !segments.is_empty() && consumed + 1 == head.len() {
                if specifiers.friend {
                    self.declare(
                        QualifiedName::new(segments),
                        ElementKind::Type(TypeKind::Friend),
                        Role::Declaration,
                        line,
                    );
                } else {
                    let mut name = current;
                    for segment in segments {
                        name = name.child(segment);
                    }
                    self.declare(
                        name,
                        ElementKind::Type(forward_kind(kind)),
                        Role::Declaration,
                        line,
                    );
                }
                return;
            }
        }
        if specifiers.friend {
            return;
        }
        if first.is_word("enum") && head.len() <= 4 && find_top_level(head, "=").is_none() {
            // Opaque enum declaration
            return;
        }

        match function_name(head) {
            Some(function) if find_top_level(&head[..function.paren], "=").is_none() => {
                self.declare_function(function, head, &current, file.in_class(), line);
            }
            _ => self.declare_variables(head, &current, file.in_class(), line),
        }
    }

    fn using_declaration(&mut self, head: &[Token], current: &QualifiedName) {
        let line = head[0].line;
        if head.get(1).is_some_and(|token| token.is_word("namespace")) {
            let (target, _) = qualified_chain(&head[2..]);
            if !target.is_empty() {
                self.declare(
                    QualifiedName::new(target),
                    ElementKind::Namespace,
                    Role::Reference,
                    line,
                );
            }
        } else if let Some(alias) = head.get(1).and_then(Token::ident)
            && head.get(2).is_some_and(|token| token.is("="))
        {
            self.declare(
                current.child(alias),
                ElementKind::Type(TypeKind::Typedef),
                Role::Declaration,
                line,
            );
        }
    }

    fn declare_function(
        &mut self,
        function: FunctionName,
        head: &[Token],
        current: &QualifiedName,
        in_class: bool,
        line: u32,
    ) {
        let FunctionName {
            segments,
            start,
            paren,
        } = function;
        let has_return_type = head[..start]
            .iter()
            .any(|token| token.kind == TokenKind::Ident);
        let is_special = segments.len() > 1
            || segments
                .last()
                .is_some_and(|leaf| leaf.starts_with('~') || leaf.starts_with("operator"));
        // A bare `NAME(...)` outside a class is a macro invocation
        if !has_return_type && !in_class && !is_special {
            return;
        }

        let kind = if in_class || segments.len() > 1 {
            ElementKind::Method
        } else {
            ElementKind::Function
        };
        let mut name = current.clone();
        for segment in segments {
            name = name.child(segment);
        }
        self.declare(name, kind, Role::Declaration, line);

        let close = skip_group(head, paren, "(", ")");
        let end = if head.get(close - 1).is_some_and(|token| token.is(")")) {
            close - 1
        } else {
            close
        };
        for parameter in split_top_level(&head[paren + 1..end], ",") {
            if let Some(parameter_name) = declarator_name(parameter, true)
                && let Some(leaf) = parameter_name.last()
            {
                self.declare(
                    QualifiedName::new([leaf.as_str()]),
                    ElementKind::Type(TypeKind::Var),
                    Role::Declaration,
                    parameter.first().map_or(line, |token| token.line),
                );
            }
        }
    }

    fn declare_variables(&mut self, head: &[Token], current: &QualifiedName, in_class: bool, line: u32) {
        let kind = if in_class {
            ElementKind::Field
        } else {
            ElementKind::Type(TypeKind::Var)
        };
        for (position, part) in split_top_level(head, ",").into_iter().enumerate() {
            let Some(segments) = declarator_name(part, position == 0) else {
                continue;
            };
            let kind = if segments.len() > 1 {
                ElementKind::Field
            } else {
                kind
            };
            let mut name = current.clone();
            for segment in segments {
                name = name.child(segment);
            }
            self.declare(name, kind, Role::Declaration, line);
        }
    }
}

/// Resolve `.` and `..` without touching the file system
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::test_utils::TestResources;

    /// Records callback events as readable strings; elements as index keys
    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        cancelled: bool,
    }

    impl Recorder {
        fn elements(&self) -> Vec<&str> {
            self.events
                .iter()
                .filter(|event| !event.starts_with('+') && !event.starts_with('-') && !event.starts_with('!'))
                .map(String::as_str)
                .collect()
        }

        fn scopes(&self) -> Vec<&str> {
            self.events
                .iter()
                .filter(|event| event.starts_with('+') || event.starts_with('-'))
                .map(String::as_str)
                .collect()
        }

        fn problems(&self) -> Vec<&str> {
            self.events
                .iter()
                .filter(|event| event.starts_with('!'))
                .map(String::as_str)
                .collect()
        }
    }

    fn describe(scope: &Scope) -> String {
        match scope {
            Scope::Namespace(name) => format!("namespace {}", name),
            Scope::Class { name, kind } => format!("{:?} {}", kind, name),
            Scope::Include { path } => format!("include {}", path.display()),
        }
    }

    impl ParserCallback for Recorder {
        fn enter_scope(&mut self, scope: &Scope) {
            self.events.push(format!("+{}", describe(scope)));
        }

        fn exit_scope(&mut self, scope: &Scope) {
            self.events.push(format!("-{}", describe(scope)));
        }

        fn accept(&mut self, element: &SourceElement) {
            let key = codec::encode(element.name.segments(), element.kind, element.role)
                .map(|key| key.into_string())
                .unwrap_or_else(|err| format!("invalid: {}", err));
            self.events.push(key);
        }

        fn accept_problem(&mut self, problem: &Problem) {
            self.events
                .push(format!("!{:?} {}: {}", problem.category, problem.line, problem.message));
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled
        }
    }

    fn parse(path: &str, resources: &TestResources, include_dirs: &[PathBuf]) -> Recorder {
        let parser = LexicalParser::new().unwrap();
        let mut recorder = Recorder::default();
        parser
            .parse(&Document::new(path), include_dirs, resources, &mut recorder)
            .unwrap();
        recorder
    }

    #[test]
    fn test_declarations_in_namespace_and_class() {
        let source = r#"
#define MAX_SIZE 10
namespace gfx {
class Widget : public Base, private util::Helper {
public:
    Widget();
    void draw(int depth) const;
    int width;  // pixels
    friend class Painter;
};
enum Color { Red, Green = 2 };
struct Point;
typedef unsigned int Id;
using Handle = void*;
int count = 0, total;
}
"#;
        let resources = TestResources::new().with_file("/p/a.cpp", source);
        let recorder = parse("/p/a.cpp", &resources, &[]);

        assert_eq!(
            recorder.elements(),
            vec![
                "macroDecl/MAX_SIZE",
                "typeDecl/D/Base",
                "typeDecl/D/Helper/util",
                "methodDecl/Widget/Widget/gfx",
                "methodDecl/draw/Widget/gfx",
                "typeDecl/V/depth",
                "fieldDecl/width/Widget/gfx",
                "typeDecl/F/Painter",
                "enumtorDecl/Red/gfx",
                "enumtorDecl/Green/gfx",
                "typeDecl/H/Point/gfx",
                "typeDecl/T/Id/gfx",
                "typeDecl/T/Handle/gfx",
                "typeDecl/V/count/gfx",
                "typeDecl/V/total/gfx",
            ]
        );
        assert_eq!(
            recorder.scopes(),
            vec![
                "+namespace gfx",
                "+Class gfx::Widget",
                "-Class gfx::Widget",
                "+Enum gfx::Color",
                "-Enum gfx::Color",
                "-namespace gfx",
            ]
        );
        assert!(recorder.problems().is_empty());
    }

    #[test]
    fn test_function_definitions_and_calls() {
        let source = r#"
static int helper(int a, const char* name);
int main(int argc, char** argv) {
    Widget w(3);
    int x = helper(argc, "x(");
    w.draw(1);
    if (x) { x++; }
    return util::compute(x);
}
"#;
        let resources = TestResources::new().with_file("/p/main.cpp", source);
        let recorder = parse("/p/main.cpp", &resources, &[]);

        assert_eq!(
            recorder.elements(),
            vec![
                "functionDecl/helper",
                "typeDecl/V/a",
                "typeDecl/V/name",
                "functionDecl/main",
                "typeDecl/V/argc",
                "typeDecl/V/argv",
                "functionRef/helper",
                "methodRef/draw",
                "functionRef/compute/util",
            ]
        );
    }

    #[test]
    fn test_aggregates_and_forward_declarations() {
        let source = "typedef struct { int x; } Point;\nclass Fwd;\nunion U;\nstruct S { int a; } s;\n";
        let resources = TestResources::new().with_file("/p/a.c", source);
        let recorder = parse("/p/a.c", &resources, &[]);

        assert_eq!(
            recorder.elements(),
            vec![
                "fieldDecl/x",
                "typeDecl/T/Point",
                "typeDecl/G/Fwd",
                "typeDecl/I/U",
                "fieldDecl/a/S",
                "typeDecl/V/s",
            ]
        );
    }

    #[test]
    fn test_out_of_line_method_and_nested_namespace() {
        let source = "namespace a::b {\nvoid Widget::draw() {}\nWidget::~Widget() {}\n}\nusing namespace a::b;\n";
        let resources = TestResources::new().with_file("/p/w.cpp", source);
        let recorder = parse("/p/w.cpp", &resources, &[]);

        assert_eq!(
            recorder.elements(),
            vec![
                "methodDecl/draw/Widget/b/a",
                "methodDecl/~Widget/Widget/b/a",
                "namespaceRef/b/a",
            ]
        );
        assert_eq!(
            recorder.scopes(),
            vec![
                "+namespace a",
                "+namespace a::b",
                "-namespace a::b",
                "-namespace a",
            ]
        );
    }

    #[test]
    fn test_includes_resolved_and_traversed_once() {
        let resources = TestResources::new()
            .with_file(
                "/p/src/a.cpp",
                "#include \"util.h\"\n#include <lib.h>\n#include \"missing.h\"\n",
            )
            .with_file("/p/src/util.h", "#include \"util.h\"\nint util_fn();\n")
            .with_file("/p/include/lib.h", "#define LIB 1\n");
        let recorder = parse("/p/src/a.cpp", &resources, &[PathBuf::from("/p/include")]);

        assert_eq!(
            recorder.events,
            vec![
                "+include /p/src/util.h",
                "+include /p/src/util.h",
                "-include /p/src/util.h",
                "functionDecl/util_fn",
                "-include /p/src/util.h",
                "+include /p/include/lib.h",
                "macroDecl/LIB",
                "-include /p/include/lib.h",
                "!Preprocessor 3: Unresolved inclusion: missing.h",
            ]
        );
    }

    #[test]
    fn test_unbalanced_braces_reported() {
        let resources = TestResources::new()
            .with_file("/p/open.cpp", "namespace a {\nvoid f();\n")
            .with_file("/p/close.cpp", "}\nint x;\n");

        let recorder = parse("/p/open.cpp", &resources, &[]);
        assert_eq!(recorder.scopes(), vec!["+namespace a", "-namespace a"]);
        assert_eq!(recorder.problems().len(), 1);
        assert!(recorder.problems()[0].starts_with("!Syntax 2"));

        let recorder = parse("/p/close.cpp", &resources, &[]);
        assert_eq!(recorder.problems(), vec!["!Syntax 1: Unmatched '}'"]);
        assert_eq!(recorder.elements(), vec!["typeDecl/V/x"]);
    }

    #[test]
    fn test_cancelled_parse_stops() {
        let resources = TestResources::new().with_file("/p/a.cpp", "int x;\n");
        let parser = LexicalParser::new().unwrap();
        let mut recorder = Recorder {
            cancelled: true,
            ..Recorder::default()
        };
        let result = parser.parse(&Document::new("/p/a.cpp"), &[], &resources, &mut recorder);
        assert!(matches!(result, Err(ParseError::Cancelled)));
        assert!(recorder.events.is_empty());
    }

    #[test]
    fn test_in_memory_contents_take_precedence() {
        let resources = TestResources::new().with_file("/p/a.cpp", "int on_disk;\n");
        let parser = LexicalParser::new().unwrap();
        let mut recorder = Recorder::default();
        parser
            .parse(
                &Document::with_contents("/p/a.cpp", "int edited;\n"),
                &[],
                &resources,
                &mut recorder,
            )
            .unwrap();
        assert_eq!(recorder.elements(), vec!["typeDecl/V/edited"]);
    }

    #[test]
    fn test_normalize_parent_components() {
        assert_eq!(
            normalize(Path::new("/p/src/../include/./a.h")),
            PathBuf::from("/p/include/a.h")
        );
    }
}
