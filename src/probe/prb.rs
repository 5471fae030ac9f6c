//! PRB probe files
//!
//! A PRB file is a small Python module defining `channel_groups`:
//!
//! ```text
//! channel_groups = {
//!     0: {
//!         'channels': [0, 1, 2, 3],
//!         'geometry': {0: (0, 0), 1: (0, 20), 2: (0, 40), 3: (0, 60)},
//!     },
//! }
//! ```
//!
//! Only the literal subset used by probe files is understood: dicts, lists,
//! tuples, numbers, strings, `True`/`False`/`None`, and `range(...)` /
//! `list(...)` calls. Each channel group becomes one probe.

use super::geometry::{Probe, ProbeGroup};
use crate::error::{StashError, StashResult};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Contact radius assigned to PRB contacts, in µm
const PRB_CONTACT_RADIUS: f64 = 5.0;

/// A parsed Python literal
#[derive(Debug, Clone, PartialEq)]
pub enum PyValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    List(Vec<PyValue>),
    Dict(Vec<(PyValue, PyValue)>),
}

impl PyValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn get(&self, key: &str) -> Option<&PyValue> {
        match self {
            Self::Dict(items) => items
                .iter()
                .find(|(k, _)| matches!(k, PyValue::Str(s) if s == key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    fn lookup_int(&self, key: i64) -> Option<&PyValue> {
        match self {
            Self::Dict(items) => items
                .iter()
                .find(|(k, _)| k.as_i64() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Punct(char),
    Newline,
}

fn parse_err(reason: impl Into<String>) -> StashError {
    StashError::User(format!("invalid PRB: {}", reason.into()))
}

fn tokenize(src: &str) -> StashResult<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = vec![];
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\n' | ';' => {
                tokens.push(Token::Newline);
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                i = start;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(parse_err("unterminated string"));
                }
                tokens.push(Token::Str(chars[start..i].iter().collect()));
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '.' || chars[i] == '_'
                        || ((chars[i] == '-' || chars[i] == '+')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().filter(|&&c| c != '_').collect();
                if let Ok(n) = text.parse::<i64>() {
                    tokens.push(Token::Int(n));
                } else {
                    let f = text
                        .parse::<f64>()
                        .map_err(|_| parse_err(format!("bad number '{}'", text)))?;
                    tokens.push(Token::Float(f));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '{' | '}' | '[' | ']' | '(' | ')' | ':' | ',' | '=' | '-' | '+' => {
                tokens.push(Token::Punct(c));
                i += 1;
            }
            other => return Err(parse_err(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&mut self) -> Option<&Token> {
        // Line breaks only matter at statement level
        if self.depth > 0 {
            while self.tokens.get(self.pos) == Some(&Token::Newline) {
                self.pos += 1;
            }
        }
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        self.peek()?;
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, punct: char) -> StashResult<()> {
        match self.next() {
            Some(Token::Punct(c)) if c == punct => Ok(()),
            other => Err(parse_err(format!("expected '{}', found {:?}", punct, other))),
        }
    }

    fn eat(&mut self, punct: char) -> bool {
        if self.peek() == Some(&Token::Punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Parse `name = value` statements into a map
    fn statements(&mut self) -> StashResult<BTreeMap<String, PyValue>> {
        let mut vars = BTreeMap::new();
        while let Some(token) = self.next() {
            match token {
                Token::Newline => continue,
                Token::Ident(name) => {
                    self.expect('=')?;
                    let value = self.value()?;
                    vars.insert(name, value);
                }
                other => return Err(parse_err(format!("unexpected {:?}", other))),
            }
        }
        Ok(vars)
    }

    fn sequence(&mut self, close: char) -> StashResult<Vec<PyValue>> {
        let mut items = vec![];
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.value()?);
            if !self.eat(',') {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn value(&mut self) -> StashResult<PyValue> {
        self.depth += 1;
        let result = self.value_inner();
        self.depth -= 1;
        result
    }

    fn value_inner(&mut self) -> StashResult<PyValue> {
        match self.next() {
            Some(Token::Int(n)) => Ok(PyValue::Int(n)),
            Some(Token::Float(f)) => Ok(PyValue::Float(f)),
            Some(Token::Str(s)) => Ok(PyValue::Str(s)),
            Some(Token::Punct('-')) => match self.value_inner()? {
                PyValue::Int(n) => Ok(PyValue::Int(-n)),
                PyValue::Float(f) => Ok(PyValue::Float(-f)),
                other => Err(parse_err(format!("cannot negate {:?}", other))),
            },
            Some(Token::Punct('+')) => self.value_inner(),
            Some(Token::Punct('[')) => Ok(PyValue::List(self.sequence(']')?)),
            Some(Token::Punct('(')) => Ok(PyValue::List(self.sequence(')')?)),
            Some(Token::Punct('{')) => {
                let mut items = vec![];
                loop {
                    if self.eat('}') {
                        break;
                    }
                    let key = self.value()?;
                    self.expect(':')?;
                    let value = self.value()?;
                    items.push((key, value));
                    if !self.eat(',') {
                        self.expect('}')?;
                        break;
                    }
                }
                Ok(PyValue::Dict(items))
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "True" => Ok(PyValue::Bool(true)),
                "False" => Ok(PyValue::Bool(false)),
                "None" => Ok(PyValue::None),
                "range" | "list" => {
                    self.expect('(')?;
                    let args = self.sequence(')')?;
                    call(&name, args)
                }
                other => Err(parse_err(format!("unknown name '{}'", other))),
            },
            other => Err(parse_err(format!("unexpected {:?}", other))),
        }
    }
}

fn call(name: &str, args: Vec<PyValue>) -> StashResult<PyValue> {
    match name {
        "list" => match args.into_iter().next() {
            Some(PyValue::List(items)) => Ok(PyValue::List(items)),
            Some(other) => Err(parse_err(format!("list() of {:?}", other))),
            None => Ok(PyValue::List(vec![])),
        },
        _ => {
            let ints: Vec<i64> = args
                .iter()
                .map(|a| a.as_i64().ok_or_else(|| parse_err("range() needs integers")))
                .collect::<StashResult<_>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] if *step != 0 => (*start, *stop, *step),
                _ => return Err(parse_err("range() takes 1 to 3 arguments")),
            };
            let mut values = vec![];
            let mut v = start;
            while (step > 0 && v < stop) || (step < 0 && v > stop) {
                values.push(PyValue::Int(v));
                v += step;
            }
            Ok(PyValue::List(values))
        }
    }
}

/// Parse the literal statements of a PRB file
pub fn parse_literals(src: &str) -> StashResult<BTreeMap<String, PyValue>> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
        depth: 0,
    };
    parser.statements()
}

/// Parse a PRB file into a probe group, one probe per channel group
pub fn parse_prb(src: &str) -> StashResult<ProbeGroup> {
    let vars = parse_literals(src)?;
    let groups = match vars.get("channel_groups") {
        Some(PyValue::Dict(groups)) => groups,
        Some(_) => return Err(parse_err("channel_groups must be a dict")),
        None => return Err(parse_err("missing channel_groups")),
    };

    let mut probe_group = ProbeGroup::default();
    for (group_key, group) in groups {
        let channels: Vec<i64> = match group.get("channels") {
            Some(PyValue::List(items)) => items
                .iter()
                .map(|c| c.as_i64().ok_or_else(|| parse_err("channel ids must be integers")))
                .collect::<StashResult<_>>()?,
            _ => return Err(parse_err(format!("group {:?} has no channel list", group_key))),
        };
        let geometry = group
            .get("geometry")
            .ok_or_else(|| parse_err(format!("group {:?} has no geometry", group_key)))?;

        let mut positions = Vec::with_capacity(channels.len());
        for &ch in &channels {
            let pos = match geometry.lookup_int(ch) {
                Some(PyValue::List(xy)) if xy.len() >= 2 => {
                    match (xy[0].as_f64(), xy[1].as_f64()) {
                        (Some(x), Some(y)) => [x, y],
                        _ => return Err(parse_err(format!("bad position for channel {}", ch))),
                    }
                }
                _ => return Err(parse_err(format!("no position for channel {}", ch))),
            };
            positions.push(pos);
        }

        let mut probe = Probe::with_circle_contacts(positions, PRB_CONTACT_RADIUS);
        probe.set_device_channel_indices(channels)?;
        probe_group.add_probe(probe);
    }

    if probe_group.probes.is_empty() {
        return Err(parse_err("channel_groups is empty"));
    }
    Ok(probe_group)
}

/// Render a probe group as a PRB file, one channel group per probe
pub fn write_prb(group: &ProbeGroup) -> String {
    let mut out = String::from("channel_groups = {\n");
    for (index, probe) in group.probes.iter().enumerate() {
        let wiring = probe.wiring();
        let channels: Vec<String> = wiring.iter().map(|(_, ch)| ch.to_string()).collect();
        let geometry: Vec<String> = wiring
            .iter()
            .map(|&(contact, ch)| {
                let [x, y] = probe.contact_positions[contact];
                format!("{}: ({}, {})", ch, x, y)
            })
            .collect();

        let _ = writeln!(out, "    {}: {{", index);
        let _ = writeln!(out, "        'channels': [{}],", channels.join(", "));
        let _ = writeln!(out, "        'geometry': {{{}}},", geometry.join(", "));
        let _ = writeln!(out, "    }},");
    }
    out.push_str("}\n");
    out
}
