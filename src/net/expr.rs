//! 函数表达式：弧权重与迁移速率可引用其它库所的当前标识。
//!
//! ```text
//! expr   := term (("+" | "-") term)*
//! term   := unary (("*" | "/") unary)*
//! unary  := "-" unary | atom
//! atom   := number | "#(" id ["," color] ")" | "cap(" id ")"
//!         | ("ceil" | "floor" | "min" | "max") "(" expr ("," expr)* ")"
//!         | "(" expr ")" | id
//! ```
//!
//! `#(P)` is the number of tokens of every color in `P`, `#(P, c)` the
//! number of tokens of color `c`, and a bare identifier names a rate
//! parameter.
use std::collections::BTreeSet;
use std::fmt;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::structure::Count;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("cannot parse expression `{input}`: {reason}")]
    Parse { input: String, reason: String },
    #[error("expression references unknown place `{0}`")]
    UnknownPlace(String),
    #[error("expression references unknown color `{0}`")]
    UnknownColor(String),
    #[error("expression references unknown rate parameter `{0}`")]
    UnknownParameter(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("weight evaluates to a negative value ({0})")]
    NegativeWeight(f64),
    #[error("expression evaluates to NaN")]
    NotANumber,
    #[error("`{func}` cannot take {count} arguments")]
    Arity { func: &'static str, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn symbol(self) -> char {
        match self {
            BinOp::Add => '+',
            BinOp::Sub => '-',
            BinOp::Mul => '*',
            BinOp::Div => '/',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Func {
    Ceil,
    Floor,
    Min,
    Max,
}

impl Func {
    fn name(self) -> &'static str {
        match self {
            Func::Ceil => "ceil",
            Func::Floor => "floor",
            Func::Min => "min",
            Func::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64),
    Tokens { place: String, color: Option<String> },
    Capacity(String),
    Parameter(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

/// What an expression can look up while being evaluated.
pub trait EvalContext {
    /// `None` when the place does not exist.
    fn tokens(&self, place: &str, color: Option<&str>) -> Option<Count>;

    fn capacity(&self, place: &str) -> Option<u64>;

    fn parameter(&self, id: &str) -> Result<f64, ExprError>;
}

impl Expr {
    pub fn parse(input: &str) -> Result<Expr, ExprError> {
        match all_consuming(ws(expr))(input) {
            Ok((_, parsed)) => Ok(parsed),
            Err(err) => Err(ExprError::Parse {
                input: input.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    pub fn constant(value: f64) -> Expr {
        Expr::Number(value)
    }

    /// `true` when the value depends on the marking.
    pub fn is_functional(&self) -> bool {
        let mut functional = false;
        self.walk(&mut |node| {
            if !matches!(node, Expr::Number(_) | Expr::Neg(_) | Expr::Binary(..) | Expr::Call(..)) {
                functional = true;
            }
        });
        functional
    }

    pub fn evaluate<C: EvalContext + ?Sized>(&self, ctx: &C) -> Result<f64, ExprError> {
        let value = match self {
            Expr::Number(value) => *value,
            Expr::Tokens { place, color } => ctx
                .tokens(place, color.as_deref())
                .ok_or_else(|| ExprError::UnknownPlace(place.clone()))?
                .as_f64(),
            Expr::Capacity(place) => ctx
                .capacity(place)
                .ok_or_else(|| ExprError::UnknownPlace(place.clone()))? as f64,
            Expr::Parameter(id) => ctx.parameter(id)?,
            Expr::Neg(inner) => -inner.evaluate(ctx)?,
            Expr::Binary(op, lhs, rhs) => {
                let lhs = lhs.evaluate(ctx)?;
                let rhs = rhs.evaluate(ctx)?;
                match op {
                    BinOp::Add => lhs + rhs,
                    BinOp::Sub => lhs - rhs,
                    BinOp::Mul => lhs * rhs,
                    BinOp::Div if rhs == 0.0 => return Err(ExprError::DivisionByZero),
                    BinOp::Div => lhs / rhs,
                }
            }
            Expr::Call(func, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                match (func, values.as_slice()) {
                    (Func::Ceil, [value]) => value.ceil(),
                    (Func::Floor, [value]) => value.floor(),
                    (Func::Min, [_, ..]) => values.iter().copied().fold(f64::INFINITY, f64::min),
                    (Func::Max, [_, ..]) => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    _ => {
                        return Err(ExprError::Arity {
                            func: func.name(),
                            count: values.len(),
                        });
                    }
                }
            }
        };
        if value.is_nan() {
            return Err(ExprError::NotANumber);
        }
        Ok(value)
    }

    /// Evaluates the expression as an arc weight.
    pub fn evaluate_weight<C: EvalContext + ?Sized>(&self, ctx: &C) -> Result<Count, ExprError> {
        to_count(self.evaluate(ctx)?)
    }

    pub fn places(&self) -> BTreeSet<&str> {
        let mut places = BTreeSet::new();
        self.walk(&mut |node| match node {
            Expr::Tokens { place, .. } | Expr::Capacity(place) => {
                places.insert(place.as_str());
            }
            _ => {}
        });
        places
    }

    pub fn colors(&self) -> BTreeSet<&str> {
        let mut colors = BTreeSet::new();
        self.walk(&mut |node| {
            if let Expr::Tokens { color: Some(color), .. } = node {
                colors.insert(color.as_str());
            }
        });
        colors
    }

    pub fn parameters(&self) -> BTreeSet<&str> {
        let mut parameters = BTreeSet::new();
        self.walk(&mut |node| {
            if let Expr::Parameter(id) = node {
                parameters.insert(id.as_str());
            }
        });
        parameters
    }

    pub fn references_place(&self, place: &str) -> bool {
        self.places().contains(place)
    }

    /// Replaces every place id for which `rename` returns a new id.
    pub fn rewrite_places(&mut self, rename: &mut impl FnMut(&str) -> Option<String>) {
        self.walk_mut(&mut |node| match node {
            Expr::Tokens { place, .. } | Expr::Capacity(place) => {
                if let Some(renamed) = rename(place) {
                    *place = renamed;
                }
            }
            _ => {}
        });
    }

    pub fn rewrite_parameters(&mut self, rename: &mut impl FnMut(&str) -> Option<String>) {
        self.walk_mut(&mut |node| {
            if let Expr::Parameter(id) = node {
                if let Some(renamed) = rename(id) {
                    *id = renamed;
                }
            }
        });
    }

    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Neg(inner) => inner.walk(f),
            Expr::Binary(_, lhs, rhs) => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::Call(_, args) => args.iter().for_each(|arg| arg.walk(f)),
            _ => {}
        }
    }

    fn walk_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        f(self);
        match self {
            Expr::Neg(inner) => inner.walk_mut(f),
            Expr::Binary(_, lhs, rhs) => {
                lhs.walk_mut(f);
                rhs.walk_mut(f);
            }
            Expr::Call(_, args) => args.iter_mut().for_each(|arg| arg.walk_mut(f)),
            _ => {}
        }
    }
}

/// Truncates an evaluated weight to a token count.
pub fn to_count(value: f64) -> Result<Count, ExprError> {
    if value.is_nan() {
        Err(ExprError::NotANumber)
    } else if value < 0.0 {
        Err(ExprError::NegativeWeight(value))
    } else if value.is_infinite() {
        Ok(Count::INFINITE)
    } else {
        Ok(Count::finite(value.trunc() as u64))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(value) => write!(f, "{value}"),
            Expr::Tokens { place, color: None } => write!(f, "#({place})"),
            Expr::Tokens { place, color: Some(color) } => write!(f, "#({place},{color})"),
            Expr::Capacity(place) => write!(f, "cap({place})"),
            Expr::Parameter(id) => f.write_str(id),
            Expr::Neg(inner) => write!(f, "-({inner})"),
            Expr::Binary(op, lhs, rhs) => write!(f, "({lhs}{}{rhs})", op.symbol()),
            Expr::Call(func, args) => {
                write!(f, "{}(", func.name())?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '.')(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    map_res(
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        |text: &str| text.parse::<f64>().map(Expr::Number),
    )(input)
}

fn tokens(input: &str) -> IResult<&str, Expr> {
    map(
        preceded(
            tag("#"),
            delimited(
                ws(char('(')),
                pair(ws(identifier), opt(preceded(char(','), ws(identifier)))),
                char(')'),
            ),
        ),
        |(place, color)| Expr::Tokens {
            place: place.to_string(),
            color: color.map(str::to_string),
        },
    )(input)
}

fn capacity(input: &str) -> IResult<&str, Expr> {
    map(
        preceded(tag("cap"), delimited(ws(char('(')), ws(identifier), char(')'))),
        |place: &str| Expr::Capacity(place.to_string()),
    )(input)
}

fn call(input: &str) -> IResult<&str, Expr> {
    map_res(
        pair(
            alt((tag("ceil"), tag("floor"), tag("min"), tag("max"))),
            delimited(ws(char('(')), separated_list1(char(','), ws(expr)), char(')')),
        ),
        |(name, args): (&str, Vec<Expr>)| {
            let func = match name {
                "ceil" => Func::Ceil,
                "floor" => Func::Floor,
                "min" => Func::Min,
                _ => Func::Max,
            };
            if matches!(func, Func::Ceil | Func::Floor) && args.len() != 1 {
                return Err("ceil/floor take exactly one argument");
            }
            Ok(Expr::Call(func, args))
        },
    )(input)
}

fn parenthesized(input: &str) -> IResult<&str, Expr> {
    delimited(char('('), ws(expr), char(')'))(input)
}

fn parameter(input: &str) -> IResult<&str, Expr> {
    map(identifier, |id: &str| Expr::Parameter(id.to_string()))(input)
}

fn atom(input: &str) -> IResult<&str, Expr> {
    ws(alt((number, tokens, capacity, call, parenthesized, parameter)))(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('-')), unary), |inner| Expr::Neg(Box::new(inner))),
        atom,
    ))(input)
}

fn fold(first: Expr, rest: Vec<(char, Expr)>) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| {
        let op = match op {
            '+' => BinOp::Add,
            '-' => BinOp::Sub,
            '*' => BinOp::Mul,
            _ => BinOp::Div,
        };
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    })
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(pair(ws(alt((char('*'), char('/')))), unary))(input)?;
    Ok((input, fold(first, rest)))
}

fn expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(ws(alt((char('+'), char('-')))), term))(input)?;
    Ok((input, fold(first, rest)))
}
