//! Parser for the query-language subset the schema layer accepts.
//!
//! Supported: a single query operation (keyword and name optional), nested
//! selection sets, aliases, literal arguments, named and inline fragments,
//! and `#` comments. Variables, directives and mutations are rejected.

use std::collections::HashMap;

use crate::error::{Error, Result};

const MAX_DEPTH: usize = 32;
const MAX_FIELDS: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, Value)>,
    pub selection: Vec<Field>,
}

impl Field {
    /// Key this field occupies in the response object.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A parsed operation with fragments already expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub operation_name: Option<String>,
    pub selection: Vec<Field>,
}

pub fn parse(source: &str) -> Result<Document> {
    let tokens = tokenize(source)?;
    Parser { tokens, pos: 0, depth: 0 }.document()
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Punct(char),
    Spread,
    Name(String),
    Str(String),
    Int(i64),
    Float(f64),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Punct(c) => format!("'{c}'"),
            Token::Spread => "'...'".to_string(),
            Token::Name(n) => format!("name '{n}'"),
            Token::Str(_) => "string".to_string(),
            Token::Int(_) | Token::Float(_) => "number".to_string(),
        }
    }
}

fn syntax(msg: impl Into<String>) -> Error {
    Error::QuerySyntax(msg.into())
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' | ',' | '\u{feff}' => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '{' | '}' | '(' | ')' | ':' | '@' | '$' | '!' | '=' | '[' | ']' => {
                tokens.push(Token::Punct(c));
                i += 1;
            }
            '.' => {
                if chars.get(i..i + 3) == Some(&['.', '.', '.'][..]) {
                    tokens.push(Token::Spread);
                    i += 3;
                } else {
                    return Err(syntax(format!("unexpected '.' at offset {i}")));
                }
            }
            '"' => {
                let (s, next) = lex_string(&chars, i)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            '-' | '0'..='9' => {
                let (token, next) = lex_number(&chars, i)?;
                tokens.push(token);
                i = next;
            }
            c if c == '_' || c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i] == '_' || chars[i].is_ascii_alphanumeric()) {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => return Err(syntax(format!("unexpected character '{other}' at offset {i}"))),
        }
    }
    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize)> {
    if chars.get(start..start + 3) == Some(&['"', '"', '"'][..]) {
        let mut i = start + 3;
        while i + 2 < chars.len() {
            if chars[i..i + 3] == ['"', '"', '"'] {
                return Ok((chars[start + 3..i].iter().collect(), i + 3));
            }
            i += 1;
        }
        return Err(syntax("unterminated block string"));
    }

    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((out, i + 1)),
            '\n' | '\r' => break,
            '\\' => {
                let escaped = chars.get(i + 1).ok_or_else(|| syntax("unterminated string"))?;
                match escaped {
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    '/' => out.push('/'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'u' => {
                        let hex: String = chars
                            .get(i + 2..i + 6)
                            .ok_or_else(|| syntax("truncated unicode escape"))?
                            .iter()
                            .collect();
                        let ch = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| syntax(format!("invalid unicode escape \\u{hex}")))?;
                        out.push(ch);
                        i += 4;
                    }
                    other => return Err(syntax(format!("invalid escape \\{other}"))),
                }
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(syntax("unterminated string"))
}

fn lex_number(chars: &[char], start: usize) -> Result<(Token, usize)> {
    let mut i = start;
    if chars[i] == '-' {
        i += 1;
    }
    let digits_start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return Err(syntax(format!("expected digit at offset {i}")));
    }
    let mut is_float = false;
    if i < chars.len() && chars[i] == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        is_float = true;
        i += 1;
        if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
            i += 1;
        }
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }

    let text: String = chars[start..i].iter().collect();
    let token = if is_float {
        Token::Float(text.parse().map_err(|_| syntax(format!("invalid number {text}")))?)
    } else {
        Token::Int(text.parse().map_err(|_| syntax(format!("invalid integer {text}")))?)
    };
    Ok((token, i))
}

// --- Parser ---

#[derive(Debug, Clone)]
enum Selection {
    Field {
        alias: Option<String>,
        name: String,
        arguments: Vec<(String, Value)>,
        selection: Vec<Selection>,
    },
    Spread(String),
    Inline(Vec<Selection>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| syntax("unexpected end of query"))?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        match self.next()? {
            Token::Punct(p) if p == c => Ok(()),
            other => Err(syntax(format!("expected '{c}', found {}", other.describe()))),
        }
    }

    fn name(&mut self) -> Result<String> {
        match self.next()? {
            Token::Name(n) => Ok(n),
            other => Err(syntax(format!("expected name, found {}", other.describe()))),
        }
    }

    fn document(mut self) -> Result<Document> {
        let mut operations = Vec::new();
        let mut fragments: HashMap<String, Vec<Selection>> = HashMap::new();

        while let Some(token) = self.peek().cloned() {
            match token {
                Token::Punct('{') => operations.push((None, self.selection_set()?)),
                Token::Name(keyword) => match keyword.as_str() {
                    "query" => {
                        self.pos += 1;
                        let name = match self.peek() {
                            Some(Token::Name(_)) => Some(self.name()?),
                            _ => None,
                        };
                        self.reject_variables_and_directives()?;
                        operations.push((name, self.selection_set()?));
                    }
                    "fragment" => {
                        self.pos += 1;
                        let name = self.name()?;
                        if name == "on" {
                            return Err(syntax("fragment cannot be named 'on'"));
                        }
                        self.type_condition()?;
                        let body = self.selection_set()?;
                        if fragments.insert(name.clone(), body).is_some() {
                            return Err(syntax(format!("duplicate fragment '{name}'")));
                        }
                    }
                    "mutation" | "subscription" => {
                        return Err(syntax(format!("{keyword} operations are not supported")));
                    }
                    other => return Err(syntax(format!("unexpected '{other}'"))),
                },
                other => return Err(syntax(format!("unexpected {}", other.describe()))),
            }
        }

        let (operation_name, selection) = match operations.len() {
            0 => return Err(syntax("no operation found")),
            1 => operations.remove(0),
            _ => return Err(syntax("exactly one operation is supported")),
        };

        let selection = Expander::new(&fragments).expand(&selection)?;
        Ok(Document { operation_name, selection })
    }

    fn reject_variables_and_directives(&mut self) -> Result<()> {
        match self.peek() {
            Some(Token::Punct('(')) | Some(Token::Punct('$')) => Err(syntax("variables are not supported")),
            Some(Token::Punct('@')) => Err(syntax("directives are not supported")),
            _ => Ok(()),
        }
    }

    fn type_condition(&mut self) -> Result<String> {
        match self.next()? {
            Token::Name(on) if on == "on" => self.name(),
            other => Err(syntax(format!("expected 'on', found {}", other.describe()))),
        }
    }

    fn selection_set(&mut self) -> Result<Vec<Selection>> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(syntax("query is nested too deeply"));
        }
        self.expect('{')?;
        let mut selection = Vec::new();
        while !self.eat('}') {
            selection.push(self.selection()?);
        }
        if selection.is_empty() {
            return Err(syntax("selection set cannot be empty"));
        }
        self.depth -= 1;
        Ok(selection)
    }

    fn selection(&mut self) -> Result<Selection> {
        if self.peek() == Some(&Token::Spread) {
            self.pos += 1;
            return match self.peek().cloned() {
                Some(Token::Name(n)) if n == "on" => {
                    self.type_condition()?;
                    self.reject_variables_and_directives()?;
                    Ok(Selection::Inline(self.selection_set()?))
                }
                Some(Token::Name(_)) => {
                    let name = self.name()?;
                    self.reject_variables_and_directives()?;
                    Ok(Selection::Spread(name))
                }
                Some(Token::Punct('{')) => Ok(Selection::Inline(self.selection_set()?)),
                _ => Err(syntax("expected fragment name or inline fragment after '...'")),
            };
        }

        let first = self.name()?;
        let (alias, name) = if self.eat(':') {
            (Some(first), self.name()?)
        } else {
            (None, first)
        };

        let mut arguments = Vec::new();
        if self.eat('(') {
            while !self.eat(')') {
                let arg = self.name()?;
                self.expect(':')?;
                arguments.push((arg, self.value()?));
            }
        }
        self.reject_variables_and_directives()?;

        let selection = if self.peek() == Some(&Token::Punct('{')) {
            self.selection_set()?
        } else {
            Vec::new()
        };
        Ok(Selection::Field { alias, name, arguments, selection })
    }

    fn value(&mut self) -> Result<Value> {
        match self.next()? {
            Token::Str(s) => Ok(Value::String(s)),
            Token::Int(n) => Ok(Value::Int(n)),
            Token::Float(f) => Ok(Value::Float(f)),
            Token::Name(n) => Ok(match n.as_str() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                "null" => Value::Null,
                _ => Value::Enum(n),
            }),
            Token::Punct('$') => Err(syntax("variables are not supported")),
            other => Err(syntax(format!("unsupported argument value {}", other.describe()))),
        }
    }
}

/// Inline fragment spreads and merge fields that share a response key.
///
/// Each named fragment is expanded once and reused. Every field handed out,
/// cached copies included, is charged against `MAX_FIELDS`.
struct Expander<'a> {
    fragments: &'a HashMap<String, Vec<Selection>>,
    expanded: HashMap<String, (Vec<Field>, usize)>,
    stack: Vec<String>,
    produced: usize,
}

impl<'a> Expander<'a> {
    fn new(fragments: &'a HashMap<String, Vec<Selection>>) -> Self {
        Expander {
            fragments,
            expanded: HashMap::new(),
            stack: Vec::new(),
            produced: 0,
        }
    }

    fn charge(&mut self, count: usize) -> Result<()> {
        self.produced = self.produced.saturating_add(count);
        if self.produced > MAX_FIELDS {
            return Err(syntax(format!("query expands to more than {MAX_FIELDS} fields")));
        }
        Ok(())
    }

    fn expand(&mut self, selection: &[Selection]) -> Result<Vec<Field>> {
        let mut fields = Vec::new();
        for item in selection {
            match item {
                Selection::Field { alias, name, arguments, selection } => {
                    self.charge(1)?;
                    let field = Field {
                        alias: alias.clone(),
                        name: name.clone(),
                        arguments: arguments.clone(),
                        selection: self.expand(selection)?,
                    };
                    merge_into(&mut fields, field)?;
                }
                Selection::Spread(name) => {
                    for field in self.fragment(name)? {
                        merge_into(&mut fields, field)?;
                    }
                }
                Selection::Inline(body) => {
                    for field in self.expand(body)? {
                        merge_into(&mut fields, field)?;
                    }
                }
            }
        }
        Ok(fields)
    }

    fn fragment(&mut self, name: &str) -> Result<Vec<Field>> {
        if let Some((fields, count)) = self.expanded.get(name) {
            let fields = fields.clone();
            let count = *count;
            self.charge(count)?;
            return Ok(fields);
        }
        if self.stack.iter().any(|n| n == name) {
            return Err(syntax(format!("fragment '{name}' spreads itself")));
        }
        let fragments = self.fragments;
        let body = fragments
            .get(name)
            .ok_or_else(|| syntax(format!("unknown fragment '{name}'")))?;
        self.stack.push(name.to_string());
        let fields = self.expand(body)?;
        self.stack.pop();
        self.expanded
            .insert(name.to_string(), (fields.clone(), count_fields(&fields)));
        Ok(fields)
    }
}

fn count_fields(fields: &[Field]) -> usize {
    fields.iter().map(|f| 1 + count_fields(&f.selection)).sum()
}

fn merge_into(fields: &mut Vec<Field>, field: Field) -> Result<()> {
    match fields.iter_mut().find(|f| f.response_key() == field.response_key()) {
        Some(existing) => {
            if existing.name != field.name || existing.arguments != field.arguments {
                return Err(syntax(format!(
                    "fields '{}' conflict because they select different fields or arguments",
                    field.response_key()
                )));
            }
            for child in field.selection {
                merge_into(&mut existing.selection, child)?;
            }
            Ok(())
        }
        None => {
            fields.push(field);
            Ok(())
        }
    }
}
