//! Row expressions for `filter_rows` and `derive_column`.
//!
//! A deliberately small language: literals, column references, arithmetic,
//! comparisons, boolean connectives, `in` lists and a fixed set of string
//! functions. Nothing in a rule file can reach beyond the row it evaluates.
//!
//! ```text
//! or      := and (("or" | "||" | "|") and)*
//! and     := not (("and" | "&&" | "&") not)*
//! not     := ("not" | "!" | "~") not | compare
//! compare := sum ((cmp sum) | ("not"? "in" list))*
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | primary
//! primary := literal | column | function "(" args ")" | "(" or ")"
//! ```
//!
//! Column names that are not plain identifiers are written in backticks:
//! `` `Q1 Sales` > 100 ``.

use std::cmp::Ordering;
use std::str::FromStr;

use super::cast::{parse_date, parse_number};
use crate::error::ExpressionError;
use crate::table::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Value),
    Ident(String),
    Quoted(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Cmp(CompareOp),
    And,
    Or,
    Not,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Lower,
    Upper,
    Strip,
    Len,
    Number,
    Contains,
    StartsWith,
    EndsWith,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "lower" => Some(Self::Lower),
            "upper" => Some(Self::Upper),
            "strip" => Some(Self::Strip),
            "len" => Some(Self::Len),
            "number" => Some(Self::Number),
            "contains" => Some(Self::Contains),
            "startswith" => Some(Self::StartsWith),
            "endswith" => Some(Self::EndsWith),
            _ => None,
        }
    }

    fn arity(self) -> usize {
        match self {
            Self::Lower | Self::Upper | Self::Strip | Self::Len | Self::Number => 1,
            Self::Contains | Self::StartsWith | Self::EndsWith => 2,
        }
    }
}

/// Expression tree, generic over how columns are referenced: by name after
/// parsing, by position once bound to a table.
#[derive(Debug, Clone, PartialEq)]
enum Node<C> {
    Literal(Value),
    Column(C),
    Neg(Box<Node<C>>),
    Not(Box<Node<C>>),
    And(Box<Node<C>>, Box<Node<C>>),
    Or(Box<Node<C>>, Box<Node<C>>),
    Arith(ArithOp, Box<Node<C>>, Box<Node<C>>),
    Compare(CompareOp, Box<Node<C>>, Box<Node<C>>),
    In {
        needle: Box<Node<C>>,
        items: Vec<Node<C>>,
        negated: bool,
    },
    Call(Function, Vec<Node<C>>),
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars = source.char_indices().collect::<Vec<_>>();
    let syntax = |position: usize, message: &str| ExpressionError::Syntax {
        expr: source.to_string(),
        position,
        message: message.to_string(),
    };

    let mut tokens = Vec::new();
    let mut index = 0;
    while index < chars.len() {
        let (offset, ch) = chars[index];
        let next = chars.get(index + 1).map(|(_, ch)| *ch);

        if ch.is_whitespace() {
            index += 1;
            continue;
        }

        let (token, width) = match (ch, next) {
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('=', Some('=')) => (Token::Cmp(CompareOp::Eq), 2),
            ('=', _) => return Err(syntax(offset, "use '==' for equality")),
            ('!', Some('=')) => (Token::Cmp(CompareOp::Ne), 2),
            ('<', Some('=')) => (Token::Cmp(CompareOp::Le), 2),
            ('>', Some('=')) => (Token::Cmp(CompareOp::Ge), 2),
            ('<', _) => (Token::Cmp(CompareOp::Lt), 1),
            ('>', _) => (Token::Cmp(CompareOp::Gt), 1),
            ('&', Some('&')) | ('|', Some('|')) => {
                (if ch == '&' { Token::And } else { Token::Or }, 2)
            }
            ('&', _) => (Token::And, 1),
            ('|', _) => (Token::Or, 1),
            ('!' | '~', _) => (Token::Not, 1),
            ('\'' | '"' | '`', _) => {
                let quote = ch;
                let mut text = String::new();
                let mut cursor = index + 1;
                let mut closed = false;
                while let Some(&(_, current)) = chars.get(cursor) {
                    cursor += 1;
                    if current == quote {
                        closed = true;
                        break;
                    }
                    if current == '\\' && quote != '`' {
                        let escaped = chars
                            .get(cursor)
                            .map(|(_, escaped)| *escaped)
                            .ok_or_else(|| syntax(offset, "unterminated escape"))?;
                        cursor += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        continue;
                    }
                    text.push(current);
                }
                if !closed {
                    return Err(syntax(offset, "unterminated quote"));
                }
                let token = if quote == '`' {
                    Token::Quoted(text)
                } else {
                    Token::Literal(Value::Text(text))
                };
                tokens.push((offset, token));
                index = cursor;
                continue;
            }
            (digit, _)
                if digit.is_ascii_digit()
                    || (digit == '.' && next.is_some_and(|n| n.is_ascii_digit())) =>
            {
                let mut cursor = index;
                let mut seen_dot = false;
                while let Some(&(_, current)) = chars.get(cursor) {
                    if current.is_ascii_digit() || current == '_' {
                        cursor += 1;
                    } else if current == '.' && !seen_dot {
                        seen_dot = true;
                        cursor += 1;
                    } else {
                        break;
                    }
                }
                let end = chars.get(cursor).map_or(source.len(), |(end, _)| *end);
                let literal = source[offset..end].replace('_', "");
                let value = if seen_dot {
                    literal.parse::<f64>().map(Value::Float).ok()
                } else {
                    literal.parse::<i64>().map(Value::Int).ok()
                }
                .ok_or_else(|| syntax(offset, "invalid number"))?;
                tokens.push((offset, Token::Literal(value)));
                index = cursor;
                continue;
            }
            (start, _) if start.is_alphabetic() || start == '_' => {
                let mut cursor = index;
                while chars
                    .get(cursor)
                    .is_some_and(|(_, current)| current.is_alphanumeric() || *current == '_')
                {
                    cursor += 1;
                }
                let end = chars.get(cursor).map_or(source.len(), |(end, _)| *end);
                let word = &source[offset..end];
                let token = match word {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "true" | "True" => Token::Literal(Value::Bool(true)),
                    "false" | "False" => Token::Literal(Value::Bool(false)),
                    "null" | "None" => Token::Literal(Value::Null),
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((offset, token));
                index = cursor;
                continue;
            }
            _ => return Err(syntax(offset, &format!("unexpected character '{ch}'"))),
        };

        tokens.push((offset, token));
        index += width;
    }

    Ok(tokens)
}

/// Deepest tree the parser will build. Evaluation recurses over the tree.
const MAX_DEPTH: usize = 128;

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(usize, Token)>,
    position: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<(usize, Token)>) -> Self {
        Self {
            source,
            tokens,
            position: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(_, token)| token)
    }

    fn peek_second(&self) -> Option<&Token> {
        self.tokens.get(self.position + 1).map(|(_, token)| token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|(_, token)| token.clone());
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        let position = self
            .tokens
            .get(self.position)
            .map_or(self.source.len(), |(offset, _)| *offset);
        ExpressionError::Syntax {
            expr: self.source.to_string(),
            position,
            message: message.into(),
        }
    }

    fn descend(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ExpressionError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn parse(mut self) -> Result<Node<String>, ExpressionError> {
        if self.tokens.is_empty() {
            return Err(self.error("empty expression"));
        }
        let node = self.parse_or()?;
        if self.peek().is_some() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(node)
    }

    fn parse_or(&mut self) -> Result<Node<String>, ExpressionError> {
        let depth = self.depth;
        let mut node = self.parse_and()?;
        while self.eat(&Token::Or) {
            self.descend()?;
            let rhs = self.parse_and()?;
            node = Node::Or(Box::new(node), Box::new(rhs));
        }
        self.depth = depth;
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Node<String>, ExpressionError> {
        let depth = self.depth;
        let mut node = self.parse_not()?;
        while self.eat(&Token::And) {
            self.descend()?;
            let rhs = self.parse_not()?;
            node = Node::And(Box::new(node), Box::new(rhs));
        }
        self.depth = depth;
        Ok(node)
    }

    fn parse_not(&mut self) -> Result<Node<String>, ExpressionError> {
        if self.peek() == Some(&Token::Not) && self.peek_second() != Some(&Token::In) {
            self.position += 1;
            self.descend()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Node::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Node<String>, ExpressionError> {
        let depth = self.depth;
        let mut node = self.parse_sum()?;
        loop {
            match self.peek() {
                Some(Token::Cmp(op)) => {
                    let op = *op;
                    self.position += 1;
                    self.descend()?;
                    let rhs = self.parse_sum()?;
                    node = Node::Compare(op, Box::new(node), Box::new(rhs));
                }
                Some(Token::In) => {
                    self.position += 1;
                    self.descend()?;
                    let items = self.parse_list()?;
                    node = Node::In {
                        needle: Box::new(node),
                        items,
                        negated: false,
                    };
                }
                Some(Token::Not) if self.peek_second() == Some(&Token::In) => {
                    self.position += 2;
                    self.descend()?;
                    let items = self.parse_list()?;
                    node = Node::In {
                        needle: Box::new(node),
                        items,
                        negated: true,
                    };
                }
                _ => {
                    self.depth = depth;
                    return Ok(node);
                }
            }
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Node<String>>, ExpressionError> {
        self.expect(&Token::LBracket, "'[' to start a list")?;
        let mut items = Vec::new();
        if self.eat(&Token::RBracket) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_sum()?);
            if self.eat(&Token::RBracket) {
                return Ok(items);
            }
            self.expect(&Token::Comma, "',' or ']'")?;
        }
    }

    fn parse_sum(&mut self) -> Result<Node<String>, ExpressionError> {
        let depth = self.depth;
        let mut node = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => {
                    self.depth = depth;
                    return Ok(node);
                }
            };
            self.position += 1;
            self.descend()?;
            let rhs = self.parse_product()?;
            node = Node::Arith(op, Box::new(node), Box::new(rhs));
        }
    }

    fn parse_product(&mut self) -> Result<Node<String>, ExpressionError> {
        let depth = self.depth;
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::Percent) => ArithOp::Rem,
                _ => {
                    self.depth = depth;
                    return Ok(node);
                }
            };
            self.position += 1;
            self.descend()?;
            let rhs = self.parse_unary()?;
            node = Node::Arith(op, Box::new(node), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Node<String>, ExpressionError> {
        if self.eat(&Token::Minus) {
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Node::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Node<String>, ExpressionError> {
        let Some(token) = self.advance() else {
            return Err(self.error("unexpected end of expression"));
        };

        match token {
            Token::Literal(value) => Ok(Node::Literal(value)),
            Token::Quoted(name) => Ok(Node::Column(name)),
            Token::Ident(name) => {
                if !self.eat(&Token::LParen) {
                    return Ok(Node::Column(name));
                }
                let function =
                    Function::lookup(&name).ok_or(ExpressionError::UnknownFunction(name.clone()))?;
                self.descend()?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.parse_or()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma, "',' or ')'")?;
                    }
                }
                if args.len() != function.arity() {
                    return Err(self.error(format!(
                        "{name}() takes {} argument(s), got {}",
                        function.arity(),
                        args.len()
                    )));
                }
                self.depth -= 1;
                Ok(Node::Call(function, args))
            }
            Token::LParen => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(&Token::RParen, "')'")?;
                self.depth -= 1;
                Ok(inner)
            }
            _ => {
                self.position -= 1;
                Err(self.error("expected a value, column or '('"))
            }
        }
    }
}

fn bind(node: &Node<String>, columns: &[String]) -> Result<Node<usize>, ExpressionError> {
    let boxed = |inner: &Node<String>| bind(inner, columns).map(Box::new);
    Ok(match node {
        Node::Literal(value) => Node::Literal(value.clone()),
        Node::Column(name) => Node::Column(
            columns
                .iter()
                .position(|column| column == name)
                .ok_or_else(|| ExpressionError::UnknownColumn(name.clone()))?,
        ),
        Node::Neg(inner) => Node::Neg(boxed(inner)?),
        Node::Not(inner) => Node::Not(boxed(inner)?),
        Node::And(lhs, rhs) => Node::And(boxed(lhs)?, boxed(rhs)?),
        Node::Or(lhs, rhs) => Node::Or(boxed(lhs)?, boxed(rhs)?),
        Node::Arith(op, lhs, rhs) => Node::Arith(*op, boxed(lhs)?, boxed(rhs)?),
        Node::Compare(op, lhs, rhs) => Node::Compare(*op, boxed(lhs)?, boxed(rhs)?),
        Node::In {
            needle,
            items,
            negated,
        } => Node::In {
            needle: boxed(needle)?,
            items: items
                .iter()
                .map(|item| bind(item, columns))
                .collect::<Result<_, _>>()?,
            negated: *negated,
        },
        Node::Call(function, args) => Node::Call(
            *function,
            args.iter()
                .map(|arg| bind(arg, columns))
                .collect::<Result<_, _>>()?,
        ),
    })
}

/// A parsed expression, not yet tied to any table.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Node<String>,
}

impl Expression {
    /// # Errors
    /// `Syntax` for malformed input, `UnknownFunction` for calls outside the
    /// built-in set.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let root = Parser::new(source, tokens).parse()?;
        Ok(Self { root })
    }

    /// Resolves column names against a table's columns.
    ///
    /// # Errors
    /// `UnknownColumn` for the first name the table does not have.
    pub fn bind(&self, columns: &[String]) -> Result<BoundExpression, ExpressionError> {
        Ok(BoundExpression {
            root: bind(&self.root, columns)?,
        })
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        Self::parse(source)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundExpression {
    root: Node<usize>,
}

impl BoundExpression {
    /// # Errors
    /// `Type` when a boolean context receives a non-boolean value.
    pub fn evaluate(&self, row: &[Value]) -> Result<Value, ExpressionError> {
        evaluate(&self.root, row)
    }

    /// Row predicate: `true` keeps, `false` and `null` drop.
    ///
    /// # Errors
    /// `Type` when the expression does not produce a boolean.
    pub fn matches(&self, row: &[Value]) -> Result<bool, ExpressionError> {
        truthy(&self.evaluate(row)?)
    }
}

fn truthy(value: &Value) -> Result<bool, ExpressionError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Null => Ok(false),
        other => Err(ExpressionError::Type(format!(
            "expected a boolean, found '{other}'"
        ))),
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(number) => Some(*number),
        Value::Text(text) => text.trim().replace(',', "").parse::<i64>().ok(),
        _ => None,
    }
}

fn arithmetic(op: ArithOp, lhs: &Value, rhs: &Value) -> Value {
    if let (ArithOp::Add, Value::Text(left), Value::Text(right)) = (op, lhs, rhs) {
        return Value::Text(format!("{left}{right}"));
    }
    if lhs.is_null() || rhs.is_null() {
        return Value::Null;
    }

    if let (false, Some(left), Some(right)) = (op == ArithOp::Div, as_int(lhs), as_int(rhs)) {
        let result = match op {
            ArithOp::Add => left.checked_add(right),
            ArithOp::Sub => left.checked_sub(right),
            ArithOp::Mul => left.checked_mul(right),
            ArithOp::Rem => {
                if right == 0 {
                    return Value::Null;
                }
                left.checked_rem(right)
            }
            ArithOp::Div => None,
        };
        if let Some(result) = result {
            return Value::Int(result);
        }
    }

    let (Some(left), Some(right)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Value::Null;
    };
    let result = match op {
        ArithOp::Add => left + right,
        ArithOp::Sub => left - right,
        ArithOp::Mul => left * right,
        ArithOp::Div | ArithOp::Rem if right == 0.0 => return Value::Null,
        ArithOp::Div => left / right,
        ArithOp::Rem => left % right,
    };
    Value::Float(result)
}

/// Numbers compare numerically with numeric-looking text and dates with
/// date-looking text; everything else falls back to display strings.
fn ordering(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    let typed = match (lhs, rhs) {
        (Value::Int(left), Value::Int(right)) => Some(left.cmp(right)),
        (Value::Int(_) | Value::Float(_), _) | (_, Value::Int(_) | Value::Float(_)) => {
            match (lhs.as_f64(), rhs.as_f64()) {
                (Some(left), Some(right)) => return left.partial_cmp(&right),
                _ => None,
            }
        }
        (Value::Date(left), Value::Date(right)) => Some(left.cmp(right)),
        (Value::Date(left), Value::Text(text)) => parse_date(text).map(|right| left.cmp(&right)),
        (Value::Text(text), Value::Date(right)) => parse_date(text).map(|left| left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        _ => None,
    };
    typed.or_else(|| Some(lhs.to_string().cmp(&rhs.to_string())))
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> bool {
    if lhs.is_null() || rhs.is_null() {
        let both = lhs.is_null() && rhs.is_null();
        return match op {
            CompareOp::Eq => both,
            CompareOp::Ne => !both,
            _ => false,
        };
    }

    let order = ordering(lhs, rhs);
    match op {
        CompareOp::Eq => order == Some(Ordering::Equal),
        CompareOp::Ne => order != Some(Ordering::Equal),
        CompareOp::Lt => order == Some(Ordering::Less),
        CompareOp::Le => matches!(order, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => order == Some(Ordering::Greater),
        CompareOp::Ge => matches!(order, Some(Ordering::Greater | Ordering::Equal)),
    }
}

fn call(function: Function, args: &[Value]) -> Value {
    let text = |value: &Value| value.to_string();
    match (function, args) {
        (_, [Value::Null, ..]) => Value::Null,
        (Function::Lower, [value]) => Value::Text(text(value).to_lowercase()),
        (Function::Upper, [value]) => Value::Text(text(value).to_uppercase()),
        (Function::Strip, [value]) => Value::Text(text(value).trim().to_string()),
        (Function::Len, [value]) => {
            Value::Int(i64::try_from(text(value).chars().count()).unwrap_or(i64::MAX))
        }
        (Function::Number, [value]) => match value {
            Value::Int(_) | Value::Float(_) => value.clone(),
            other => parse_number(&text(other)).unwrap_or(Value::Null),
        },
        (Function::Contains, [value, needle]) => Value::Bool(text(value).contains(&text(needle))),
        (Function::StartsWith, [value, prefix]) => {
            Value::Bool(text(value).starts_with(&text(prefix)))
        }
        (Function::EndsWith, [value, suffix]) => Value::Bool(text(value).ends_with(&text(suffix))),
        _ => Value::Null,
    }
}

fn evaluate(node: &Node<usize>, row: &[Value]) -> Result<Value, ExpressionError> {
    Ok(match node {
        Node::Literal(value) => value.clone(),
        Node::Column(index) => row.get(*index).cloned().unwrap_or(Value::Null),
        Node::Neg(inner) => match evaluate(inner, row)? {
            Value::Null => Value::Null,
            Value::Int(number) => number.checked_neg().map_or(Value::Null, Value::Int),
            other => other.as_f64().map_or(Value::Null, |number| Value::Float(-number)),
        },
        Node::Not(inner) => Value::Bool(!truthy(&evaluate(inner, row)?)?),
        Node::And(lhs, rhs) => {
            Value::Bool(truthy(&evaluate(lhs, row)?)? && truthy(&evaluate(rhs, row)?)?)
        }
        Node::Or(lhs, rhs) => {
            Value::Bool(truthy(&evaluate(lhs, row)?)? || truthy(&evaluate(rhs, row)?)?)
        }
        Node::Arith(op, lhs, rhs) => arithmetic(*op, &evaluate(lhs, row)?, &evaluate(rhs, row)?),
        Node::Compare(op, lhs, rhs) => {
            Value::Bool(compare(*op, &evaluate(lhs, row)?, &evaluate(rhs, row)?))
        }
        Node::In {
            needle,
            items,
            negated,
        } => {
            let needle = evaluate(needle, row)?;
            let mut found = false;
            for item in items {
                if compare(CompareOp::Eq, &needle, &evaluate(item, row)?) {
                    found = true;
                    break;
                }
            }
            Value::Bool(found != *negated)
        }
        Node::Call(function, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, row))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, &args)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::Expression;
    use crate::error::ExpressionError;
    use crate::table::Value;

    fn columns() -> Vec<String> {
        ["Product", "Q1 Sales", "Status", "Qty"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn row() -> Vec<Value> {
        vec![
            Value::from("Widget"),
            Value::from("1,200"),
            Value::from("final"),
            Value::Int(3),
        ]
    }

    fn eval(source: &str) -> Value {
        Expression::parse(source)
            .expect("expression should parse")
            .bind(&columns())
            .expect("columns should bind")
            .evaluate(&row())
            .expect("expression should evaluate")
    }

    #[test]
    fn arithmetic_coerces_numeric_text() {
        assert_eq!(eval("`Q1 Sales` + Qty"), Value::Int(1203));
        assert_eq!(eval("Qty / 2"), Value::Float(1.5));
        assert_eq!(eval("Qty * 2 - 1"), Value::Int(5));
        assert_eq!(eval("Qty / 0"), Value::Null);
        assert_eq!(eval("-Qty"), Value::Int(-3));
    }

    #[test]
    fn comparisons_and_connectives() {
        assert_eq!(eval("Qty > 2 and Status == 'final'"), Value::Bool(true));
        assert_eq!(eval("Qty > 5 or Status != \"final\""), Value::Bool(false));
        assert_eq!(eval("not (Qty >= 3)"), Value::Bool(false));
        assert_eq!(eval("(Qty > 2) & ~(Qty > 10)"), Value::Bool(true));
        assert_eq!(eval("`Q1 Sales` > 1000"), Value::Bool(true));
    }

    #[test]
    fn membership_lists() {
        assert_eq!(eval("Status in ['draft', 'final']"), Value::Bool(true));
        assert_eq!(eval("Status not in ['draft']"), Value::Bool(true));
        assert_eq!(eval("Qty in [1, 2]"), Value::Bool(false));
    }

    #[test]
    fn functions_and_concatenation() {
        assert_eq!(eval("upper(Status)"), Value::from("FINAL"));
        assert_eq!(eval("Product + '-' + Status"), Value::from("Widget-final"));
        assert_eq!(eval("contains(lower(Product), 'widg')"), Value::Bool(true));
        assert_eq!(eval("number(`Q1 Sales`)"), Value::Int(1200));
        assert_eq!(eval("len(Product)"), Value::Int(6));
    }

    #[test]
    fn null_comparisons() {
        assert_eq!(eval("None == null"), Value::Bool(true));
        assert_eq!(eval("Qty > None"), Value::Bool(false));
        assert_eq!(eval("Qty != None"), Value::Bool(true));
    }

    #[test]
    fn malformed_expressions_are_syntax_errors() {
        for source in ["Qty >", "Qty = 3", "(Qty > 1", "'open", "", "Qty > 1 Qty", "Qty $ 2"] {
            let err = Expression::parse(source).expect_err("should not parse");
            assert!(
                matches!(err, ExpressionError::Syntax { .. }),
                "{source}: {err:?}"
            );
        }
    }

    #[test]
    fn unknown_names_are_reported() {
        let err = Expression::parse("eval(Qty)").expect_err("unknown function");
        assert_eq!(err, ExpressionError::UnknownFunction("eval".to_string()));

        let err = Expression::parse("Missing > 1")
            .expect("parses")
            .bind(&columns())
            .expect_err("unknown column");
        assert_eq!(err, ExpressionError::UnknownColumn("Missing".to_string()));
    }

    #[test]
    fn predicate_requires_boolean() {
        let bound = Expression::parse("Qty + 1")
            .expect("parses")
            .bind(&columns())
            .expect("binds");
        assert!(matches!(bound.matches(&row()), Err(ExpressionError::Type(_))));
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let parens = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let chain = format!("1{}", " + 1".repeat(200_000));
        let negations = format!("{}Qty > 1", "not ".repeat(200_000));
        for source in [parens, chain, negations] {
            let err = Expression::parse(&source).expect_err("too deep");
            assert!(
                matches!(&err, ExpressionError::Syntax { message, .. }
                    if message == "expression nested too deeply"),
                "{err:?}"
            );
        }

        let nested = format!("{}Qty{} > 1", "(".repeat(20), ")".repeat(20));
        assert_eq!(
            Expression::parse(&nested)
                .expect("moderate nesting parses")
                .bind(&columns())
                .expect("binds")
                .matches(&row()),
            Ok(true)
        );
    }
}
