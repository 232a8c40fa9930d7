//! Macro expansion and evaluation of `#if` / `#elif` controlling expressions.

use super::{
    lexer::{Token, spell, tokenize},
    macros::{Macro, Macros},
};

const MAX_EXPANSION_DEPTH: usize = 200;
const MAX_NESTING_DEPTH: usize = 256;

/// Evaluates a controlling expression. Non-zero means the group is taken.
pub(crate) fn evaluate(text: &str, macros: &Macros) -> Result<i64, String> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err("expected an expression".to_string());
    }

    let expanded = expand(&tokens, macros, &mut Vec::new(), true)?;

    let mut parser = Parser {
        tokens: &expanded,
        pos: 0,
        depth: 0,
    };
    let value = parser.conditional(true)?;

    if let Some(token) = parser.peek() {
        return Err(format!("unexpected `{token}` in expression"));
    }

    Ok(value.bits)
}

/// Fully macro-expands `tokens`.
///
/// Names in `active` are being expanded and are left alone. With
/// `in_condition`, `defined` and `__has_include` are resolved as well.
pub(crate) fn expand(
    tokens: &[Token],
    macros: &Macros,
    active: &mut Vec<String>,
    in_condition: bool,
) -> Result<Vec<Token>, String> {
    if active.len() > MAX_EXPANSION_DEPTH {
        return Err("macro expansion too deep".to_string());
    }

    let mut out = Vec::with_capacity(tokens.len());
    let mut pos = 0;

    while pos < tokens.len() {
        let token = &tokens[pos];
        pos += 1;

        let Some(name) = token.ident() else {
            out.push(token.clone());
            continue;
        };

        if in_condition && name == "defined" {
            let (operand, next) = defined_operand(tokens, pos)?;
            pos = next;
            out.push(bool_token(macros.is_defined(operand)));
            continue;
        }

        if in_condition && (name == "__has_include" || name == "__has_include_next") {
            // No include paths are known here, so nothing counts as present.
            let (_, next) = group(tokens, pos).ok_or_else(|| format!("`{name}` needs a header"))?;
            pos = next;
            out.push(bool_token(false));
            continue;
        }

        if active.iter().any(|a| a == name) {
            out.push(token.clone());
            continue;
        }

        match macros.get(name) {
            Some(definition @ Macro::Object(_)) => {
                let body = definition.body_tokens()?;

                active.push(name.to_string());
                let expanded = expand(&body, macros, active, in_condition);
                active.pop();

                out.extend(expanded?);
            }
            Some(Macro::Function {
                params,
                variadic,
                body,
            }) if tokens.get(pos).is_some_and(|t| t.is_punct("(")) => {
                let (args, next) = arguments(tokens, pos)?;
                pos = next;

                let substituted = substitute(
                    name,
                    params,
                    *variadic,
                    body,
                    &args,
                    macros,
                    active,
                    in_condition,
                )?;

                active.push(name.to_string());
                let expanded = expand(&substituted, macros, active, in_condition);
                active.pop();

                out.extend(expanded?);
            }
            _ => out.push(token.clone()),
        }
    }

    Ok(out)
}

fn bool_token(value: bool) -> Token {
    Token::Number(if value { "1" } else { "0" }.to_string())
}

fn defined_operand(tokens: &[Token], pos: usize) -> Result<(&str, usize), String> {
    match tokens.get(pos) {
        Some(Token::Ident(name)) => Ok((name.as_str(), pos + 1)),
        Some(t) if t.is_punct("(") => match (tokens.get(pos + 1), tokens.get(pos + 2)) {
            (Some(Token::Ident(name)), Some(close)) if close.is_punct(")") => {
                Ok((name.as_str(), pos + 3))
            }
            _ => Err("missing ')' after `defined`".to_string()),
        },
        _ => Err("`defined` without an identifier".to_string()),
    }
}

/// The tokens of a parenthesized group starting at `pos`, and the position
/// following it.
fn group(tokens: &[Token], pos: usize) -> Option<(&[Token], usize)> {
    if !tokens.get(pos)?.is_punct("(") {
        return None;
    }

    let mut depth = 0;
    for (i, token) in tokens.iter().enumerate().skip(pos) {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
            if depth == 0 {
                return Some((&tokens[pos + 1..i], i + 1));
            }
        }
    }

    None
}

fn arguments(tokens: &[Token], pos: usize) -> Result<(Vec<Vec<Token>>, usize), String> {
    let (inner, next) = group(tokens, pos).ok_or("unterminated macro invocation")?;

    let mut args = vec![Vec::new()];
    let mut depth = 0;
    for token in inner {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
        } else if token.is_punct(",") && depth == 0 {
            args.push(Vec::new());
            continue;
        }

        if let Some(current) = args.last_mut() {
            current.push(token.clone());
        }
    }

    if args.len() == 1 && args[0].is_empty() {
        args.clear();
    }

    Ok((args, next))
}

#[allow(clippy::too_many_arguments)]
fn substitute(
    name: &str,
    params: &[String],
    variadic: bool,
    body: &str,
    args: &[Vec<Token>],
    macros: &Macros,
    active: &mut Vec<String>,
    in_condition: bool,
) -> Result<Vec<Token>, String> {
    let mut args = args.to_vec();

    // `F()` passes one empty argument to a single parameter macro.
    if params.len() == 1 && args.is_empty() {
        args.push(Vec::new());
    }

    if variadic {
        if args.len() < params.len() {
            return Err(format!("macro `{name}` needs at least {} arguments", params.len()));
        }

        let rest = args.split_off(params.len());
        let mut joined = Vec::new();
        for (i, arg) in rest.into_iter().enumerate() {
            if i > 0 {
                joined.push(Token::Punct(","));
            }
            joined.extend(arg);
        }
        args.push(joined);
    } else if args.len() != params.len() {
        return Err(format!(
            "macro `{name}` takes {} arguments, {} given",
            params.len(),
            args.len()
        ));
    }

    let mut names = params.to_vec();
    if variadic && names.len() < args.len() {
        names.push("__VA_ARGS__".to_string());
    }

    let lookup = |token: &Token| -> Option<usize> {
        let ident = token.ident()?;
        names.iter().position(|n| n == ident)
    };

    let body = tokenize(body)?;
    let mut out: Vec<Token> = Vec::new();
    let mut pos = 0;

    while pos < body.len() {
        let token = &body[pos];

        // `#param`
        if token.is_punct("#") {
            if let Some(index) = body.get(pos + 1).and_then(lookup) {
                let text = spell(&args[index]).replace('\\', "\\\\").replace('"', "\\\"");
                out.push(Token::Str(format!("\"{text}\"")));
                pos += 2;
                continue;
            }
        }

        // `lhs ## rhs`
        if token.is_punct("##") {
            let rhs = match body.get(pos + 1) {
                Some(next) => match lookup(next) {
                    Some(index) => args[index].clone(),
                    None => vec![next.clone()],
                },
                None => return Err(format!("`##` at the end of macro `{name}`")),
            };

            let lhs = out.pop().map(|t| t.to_string()).unwrap_or_default();
            let mut rhs = rhs.into_iter();
            let first = rhs.next().map(|t| t.to_string()).unwrap_or_default();

            out.extend(tokenize(&format!("{lhs}{first}"))?);
            out.extend(rhs);
            pos += 2;
            continue;
        }

        match lookup(token) {
            Some(index) => {
                let pasted = body.get(pos + 1).is_some_and(|t| t.is_punct("##"));
                if pasted {
                    out.extend(args[index].iter().cloned());
                } else {
                    out.extend(expand(&args[index], macros, active, in_condition)?);
                }
            }
            None => out.push(token.clone()),
        }
        pos += 1;
    }

    Ok(out)
}

/// An `intmax_t` or `uintmax_t` value. Both share the bit pattern, the
/// signedness picks comparison, division and right shift semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Value {
    bits: i64,
    unsigned: bool,
}

impl Value {
    fn signed(bits: i64) -> Self {
        Self {
            bits,
            unsigned: false,
        }
    }

    fn from_bool(value: bool) -> Self {
        Self::signed(value as i64)
    }

    fn is_true(self) -> bool {
        self.bits != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Not,
    BitNot,
    Neg,
    Plus,
}

impl UnaryOp {
    fn from_token(token: &Token) -> Option<Self> {
        let op = match token {
            Token::Punct("!") => UnaryOp::Not,
            Token::Punct("~") => UnaryOp::BitNot,
            Token::Punct("-") => UnaryOp::Neg,
            Token::Punct("+") => UnaryOp::Plus,
            _ => return None,
        };

        Some(op)
    }

    fn apply(self, operand: Value) -> Value {
        match self {
            UnaryOp::Not => Value::from_bool(!operand.is_true()),
            UnaryOp::BitNot => Value {
                bits: !operand.bits,
                ..operand
            },
            UnaryOp::Neg => Value {
                bits: operand.bits.wrapping_neg(),
                ..operand
            },
            UnaryOp::Plus => operand,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn from_token(token: &Token) -> Option<(Self, u8)> {
        let Token::Punct(p) = token else {
            return None;
        };

        let op = match *p {
            "||" => (BinaryOp::Or, 1),
            "&&" => (BinaryOp::And, 2),
            "|" => (BinaryOp::BitOr, 3),
            "^" => (BinaryOp::BitXor, 4),
            "&" => (BinaryOp::BitAnd, 5),
            "==" => (BinaryOp::Eq, 6),
            "!=" => (BinaryOp::Ne, 6),
            "<" => (BinaryOp::Lt, 7),
            "<=" => (BinaryOp::Le, 7),
            ">" => (BinaryOp::Gt, 7),
            ">=" => (BinaryOp::Ge, 7),
            "<<" => (BinaryOp::Shl, 8),
            ">>" => (BinaryOp::Shr, 8),
            "+" => (BinaryOp::Add, 9),
            "-" => (BinaryOp::Sub, 9),
            "*" => (BinaryOp::Mul, 10),
            "/" => (BinaryOp::Div, 10),
            "%" => (BinaryOp::Rem, 10),
            _ => return None,
        };

        Some(op)
    }

    /// Applies the operator after the usual arithmetic conversions: if either
    /// operand is unsigned, both are. Errors are only reported for `live`
    /// operations, the others sit in a branch that is never evaluated.
    fn apply(self, lhs: Value, rhs: Value, live: bool) -> Result<Value, String> {
        let unsigned = lhs.unsigned || rhs.unsigned;
        let (l, r) = (lhs.bits, rhs.bits);
        let ordering = if unsigned {
            (l as u64).cmp(&(r as u64))
        } else {
            l.cmp(&r)
        };
        let value = |bits| Value { bits, unsigned };

        let result = match self {
            BinaryOp::Or => Value::from_bool(lhs.is_true() || rhs.is_true()),
            BinaryOp::And => Value::from_bool(lhs.is_true() && rhs.is_true()),
            BinaryOp::Eq => Value::from_bool(l == r),
            BinaryOp::Ne => Value::from_bool(l != r),
            BinaryOp::Lt => Value::from_bool(ordering.is_lt()),
            BinaryOp::Le => Value::from_bool(ordering.is_le()),
            BinaryOp::Gt => Value::from_bool(ordering.is_gt()),
            BinaryOp::Ge => Value::from_bool(ordering.is_ge()),
            BinaryOp::BitOr => value(l | r),
            BinaryOp::BitXor => value(l ^ r),
            BinaryOp::BitAnd => value(l & r),
            BinaryOp::Add => value(l.wrapping_add(r)),
            BinaryOp::Sub => value(l.wrapping_sub(r)),
            BinaryOp::Mul => value(l.wrapping_mul(r)),
            // Shifts keep the type of the left operand.
            BinaryOp::Shl | BinaryOp::Shr => {
                let bits = match u32::try_from(r).ok().filter(|amount| *amount < i64::BITS) {
                    None => 0,
                    Some(amount) if self == BinaryOp::Shl => l << amount,
                    Some(amount) if lhs.unsigned => ((l as u64) >> amount) as i64,
                    Some(amount) => l >> amount,
                };
                Value { bits, ..lhs }
            }
            BinaryOp::Div | BinaryOp::Rem if r == 0 => {
                if live {
                    return Err("division by zero in preprocessor expression".to_string());
                }
                value(0)
            }
            BinaryOp::Div if unsigned => value(((l as u64) / (r as u64)) as i64),
            BinaryOp::Rem if unsigned => value(((l as u64) % (r as u64)) as i64),
            BinaryOp::Div => value(l.wrapping_div(r)),
            BinaryOp::Rem => value(l.wrapping_rem(r)),
        };

        Ok(result)
    }
}

/// Parses and evaluates in one pass. Operands that are never evaluated,
/// like the right side of `0 && x`, are parsed with `live` unset.
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expect(&mut self, punct: &str) -> Result<(), String> {
        match self.next() {
            Some(token) if token.is_punct(punct) => Ok(()),
            Some(token) => Err(format!("expected `{punct}`, found `{token}`")),
            None => Err(format!("expected `{punct}` at the end of the expression")),
        }
    }

    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<Value, String>,
    ) -> Result<Value, String> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err("expression nested too deeply".to_string());
        }

        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;

        result
    }

    fn conditional(&mut self, live: bool) -> Result<Value, String> {
        let cond = self.binary(1, live)?;

        if !self.peek().is_some_and(|t| t.is_punct("?")) {
            return Ok(cond);
        }
        self.pos += 1;

        let taken = cond.is_true();
        let then = self.nested(|parser| parser.conditional(live && taken))?;
        self.expect(":")?;
        let otherwise = self.nested(|parser| parser.conditional(live && !taken))?;

        // The type is the common type of both branches.
        Ok(Value {
            bits: if taken { then.bits } else { otherwise.bits },
            unsigned: then.unsigned || otherwise.unsigned,
        })
    }

    fn binary(&mut self, min_precedence: u8, live: bool) -> Result<Value, String> {
        let mut lhs = self.unary(live)?;

        while let Some((op, precedence)) = self.peek().and_then(BinaryOp::from_token) {
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;

            let rhs_live = match op {
                BinaryOp::And => live && lhs.is_true(),
                BinaryOp::Or => live && !lhs.is_true(),
                _ => live,
            };
            let rhs = self.binary(precedence + 1, rhs_live)?;

            lhs = op.apply(lhs, rhs, live && rhs_live)?;
        }

        Ok(lhs)
    }

    fn unary(&mut self, live: bool) -> Result<Value, String> {
        let Some(op) = self.peek().and_then(UnaryOp::from_token) else {
            return self.primary(live);
        };
        self.pos += 1;

        let operand = self.nested(|parser| parser.unary(live))?;
        Ok(op.apply(operand))
    }

    fn primary(&mut self, live: bool) -> Result<Value, String> {
        match self.next() {
            Some(Token::Number(n)) => parse_integer(n),
            Some(Token::Char(c)) => parse_char(c).map(Value::signed),
            // Identifiers left after expansion are not macros.
            Some(Token::Ident(_)) => Ok(Value::signed(0)),
            Some(Token::Punct("(")) => {
                let inner = self.nested(|parser| parser.conditional(live))?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(token) => Err(format!("unexpected `{token}` in expression")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// A `u` suffix makes a literal unsigned, and so does a value that does not
/// fit `intmax_t`.
fn parse_integer(literal: &str) -> Result<Value, String> {
    let digits = literal.trim_end_matches(['u', 'U', 'l', 'L']);
    let suffix = &literal[digits.len()..];

    let (digits, radix) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (hex, 16)
    } else if let Some(bin) = digits
        .strip_prefix("0b")
        .or_else(|| digits.strip_prefix("0B"))
    {
        (bin, 2)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (&digits[1..], 8)
    } else {
        (digits, 10)
    };

    let value = u64::from_str_radix(digits, radix)
        .map_err(|_| format!("invalid integer literal `{literal}`"))?;

    Ok(Value {
        bits: value as i64,
        unsigned: suffix.contains(['u', 'U']) || i64::try_from(value).is_err(),
    })
}

fn parse_char(literal: &str) -> Result<i64, String> {
    let inner = literal
        .strip_prefix('\'')
        .and_then(|l| l.strip_suffix('\''))
        .ok_or_else(|| format!("invalid character literal {literal}"))?;

    let mut chars = inner.chars();
    let value = match (chars.next(), chars.next()) {
        (Some('\\'), Some(escaped)) => match escaped {
            'n' => '\n' as i64,
            't' => '\t' as i64,
            'r' => '\r' as i64,
            '0' => 0,
            other => other as i64,
        },
        (Some(c), None) => c as i64,
        _ => return Err(format!("unsupported character literal {literal}")),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str, defines: &[(&str, &str)]) -> Result<i64, String> {
        let macros = defines.iter().copied().collect::<Macros>();
        evaluate(text, &macros)
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3", &[]), Ok(7));
        assert_eq!(eval("(1 + 2) * 3", &[]), Ok(9));
        assert_eq!(eval("1 << 4 | 1", &[]), Ok(17));
        assert_eq!(eval("10 - 4 - 3", &[]), Ok(3));
        assert_eq!(eval("-1 < 0", &[]), Ok(1));
        assert_eq!(eval("~0 == -1", &[]), Ok(1));
        assert_eq!(eval("!0 + !5", &[]), Ok(1));
        assert_eq!(eval("0x10 + 010 + 0b11 + 1UL", &[]), Ok(28));
        assert_eq!(eval("'A' == 65", &[]), Ok(1));
    }

    #[test]
    fn ternary_is_right_associative() {
        assert_eq!(eval("0 ? 1 : 0 ? 2 : 3", &[]), Ok(3));
        assert_eq!(eval("1 ? 2 : 3", &[]), Ok(2));
    }

    #[test]
    fn version_checks() {
        let v5_1 = [
            ("ESP_IDF_VERSION_MAJOR", "5"),
            ("ESP_IDF_VERSION_MINOR", "1"),
        ];

        assert_eq!(
            eval(
                "ESP_IDF_VERSION_MAJOR > 5 || ESP_IDF_VERSION_MAJOR == 5 && ESP_IDF_VERSION_MINOR >= 1",
                &v5_1
            ),
            Ok(1)
        );
        assert_eq!(
            eval(
                "ESP_IDF_VERSION_MAJOR > 5 || (ESP_IDF_VERSION_MAJOR == 5 && ESP_IDF_VERSION_MINOR > 1)",
                &v5_1
            ),
            Ok(0)
        );
    }

    #[test]
    fn defined_and_unknown_identifiers() {
        let defines = [("CONFIG_IDF_TARGET_ESP32", "1")];

        assert_eq!(eval("defined(CONFIG_IDF_TARGET_ESP32)", &defines), Ok(1));
        assert_eq!(eval("defined CONFIG_IDF_TARGET_ESP32S2", &defines), Ok(0));
        assert_eq!(eval("CONFIG_IDF_TARGET_ESP32S2", &defines), Ok(0));
        assert_eq!(eval("__has_include(<esp_psram.h>)", &defines), Ok(0));
        assert!(eval("defined(", &defines).is_err());
    }

    #[test]
    fn short_circuit_skips_errors() {
        assert_eq!(eval("0 && 1 / 0", &[]), Ok(0));
        assert_eq!(eval("1 || 1 % 0", &[]), Ok(1));
        assert_eq!(eval("1 ? 1 : 1 / 0", &[]), Ok(1));
        assert!(eval("1 / 0", &[]).is_err());
    }

    #[test]
    fn unsigned_operands_convert_the_other_side() {
        assert_eq!(eval("0xFFFFFFFFFFFFFFFF > 0", &[]), Ok(1));
        assert_eq!(eval("18446744073709551615 == -1", &[]), Ok(1));
        assert_eq!(eval("-1 > 0u", &[]), Ok(1));
        assert_eq!(eval("-1 > 0", &[]), Ok(0));
        assert_eq!(eval("-2 / 2u > 0", &[]), Ok(1));
        assert_eq!(eval("-2 / 2", &[]), Ok(-1));
        assert_eq!(eval("-1u >> 63", &[]), Ok(1));
        assert_eq!(eval("-1 >> 63", &[]), Ok(-1));
        assert_eq!(eval("(0 ? 1u : -1) > 0", &[]), Ok(1));
        assert_eq!(eval("(1 ? -1 : 0) > 0", &[]), Ok(0));
        // Comparisons are signed ints again.
        assert_eq!(eval("(0u < 1) - 2 < 0", &[]), Ok(1));
    }

    #[test]
    fn nesting_is_limited() {
        let parens = |n| format!("{}1{}", "(".repeat(n), ")".repeat(n));

        assert_eq!(eval(&parens(100), &[]), Ok(1));
        assert_eq!(
            eval(&parens(10_000), &[]),
            Err("expression nested too deeply".to_string())
        );
        assert!(eval(&format!("{}1", "!".repeat(10_000)), &[]).is_err());
        assert!(eval(&format!("{}1", "0 ? 0 : ".repeat(10_000)), &[]).is_err());
    }

    #[test]
    fn expands_function_like_macros() {
        let mut macros = Macros::new();
        for definition in [
            "ESP_IDF_VERSION_VAL(major, minor, patch) ((major << 16) | (minor << 8) | (patch))",
            "ESP_IDF_VERSION ESP_IDF_VERSION_VAL(ESP_IDF_VERSION_MAJOR, ESP_IDF_VERSION_MINOR, ESP_IDF_VERSION_PATCH)",
            "ESP_IDF_VERSION_MAJOR 5",
            "ESP_IDF_VERSION_MINOR 1",
            "ESP_IDF_VERSION_PATCH 2",
            "CAT(a, b) a ## b",
            "SELF SELF + 1",
        ] {
            let (name, definition) = Macro::parse_definition(definition).unwrap();
            macros.define(name, definition);
        }

        assert_eq!(
            evaluate("ESP_IDF_VERSION >= ESP_IDF_VERSION_VAL(5, 1, 0)", &macros),
            Ok(1)
        );
        assert_eq!(evaluate("ESP_IDF_VERSION < ESP_IDF_VERSION_VAL(5, 0, 0)", &macros), Ok(0));
        assert_eq!(evaluate("CAT(ESP_IDF_VERSION_, MAJOR)", &macros), Ok(5));
        assert_eq!(evaluate("SELF", &macros), Ok(1));
        assert!(evaluate("ESP_IDF_VERSION_VAL(1, 2)", &macros).is_err());
    }

    #[test]
    fn malformed_expressions() {
        assert!(eval("", &[]).is_err());
        assert!(eval("1 +", &[]).is_err());
        assert!(eval("(1", &[]).is_err());
        assert!(eval("1 2", &[]).is_err());
        assert!(eval("1 ? 2", &[]).is_err());
    }
}
