use core::fmt;

/// Preprocessing tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Ident(String),
    Number(String),
    /// A string literal, quotes included.
    Str(String),
    /// A character literal, quotes included.
    Char(String),
    Punct(&'static str),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) | Token::Number(s) | Token::Str(s) | Token::Char(s) => f.write_str(s),
            Token::Punct(p) => f.write_str(p),
        }
    }
}

impl Token {
    pub fn is_punct(&self, punct: &str) -> bool {
        matches!(self, Token::Punct(p) if *p == punct)
    }

    pub fn ident(&self) -> Option<&str> {
        match self {
            Token::Ident(name) => Some(name),
            _ => None,
        }
    }
}

// Longest first, so that `<<=` wins over `<<` and `<`.
const PUNCTUATORS: &[&str] = &[
    "<<=", ">>=", "...", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "##", "->", "++", "--",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "(", ")", "[", "]", "{", "}", ",", ";", "?",
    ":", "!", "~", "+", "-", "*", "/", "%", "<", ">", "&", "|", "^", "=", "#", ".", "\\", "@",
    "$", "`",
];

pub(crate) fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars = text.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            tokens.push(Token::Ident(chars[start..pos].iter().collect()));
        } else if c.is_ascii_digit()
            || (c == '.' && chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit()))
        {
            let start = pos;
            while pos < chars.len() {
                let c = chars[pos];
                if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                    pos += 1;
                } else if (c == '+' || c == '-')
                    && matches!(chars[pos - 1], 'e' | 'E' | 'p' | 'P')
                {
                    pos += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token::Number(chars[start..pos].iter().collect()));
        } else if c == '"' || c == '\'' {
            let start = pos;
            pos += 1;
            loop {
                match chars.get(pos) {
                    None => return Err(format!("missing terminating {c} character")),
                    Some('\\') => pos += 2,
                    Some(&q) if q == c => {
                        pos += 1;
                        break;
                    }
                    Some(_) => pos += 1,
                }
            }
            let literal = chars[start..pos.min(chars.len())].iter().collect();
            tokens.push(if c == '"' {
                Token::Str(literal)
            } else {
                Token::Char(literal)
            });
        } else {
            let punct = PUNCTUATORS
                .iter()
                .find(|p| {
                    p.chars()
                        .enumerate()
                        .all(|(i, pc)| chars.get(pos + i) == Some(&pc))
                })
                .ok_or_else(|| format!("unexpected character `{c}`"))?;

            pos += punct.chars().count();
            tokens.push(Token::Punct(punct));
        }
    }

    Ok(tokens)
}

/// Joins tokens back into normalized source text.
pub(crate) fn spell(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut previous: Option<&Token> = None;

    for token in tokens {
        let space = match previous {
            None => false,
            Some(p) if p.is_punct("(") => false,
            Some(Token::Ident(_)) if token.is_punct("(") => false,
            _ => !token.is_punct(")") && !token.is_punct(","),
        };

        if space {
            out.push(' ');
        }
        out.push_str(&token.to_string());
        previous = Some(token);
    }

    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn tokenizes_conditions() {
        let tokens = tokenize("defined(CONFIG_A) || X >= 0x1fUL").unwrap();

        assert_eq!(
            tokens,
            [
                Token::Ident("defined".into()),
                Token::Punct("("),
                Token::Ident("CONFIG_A".into()),
                Token::Punct(")"),
                Token::Punct("||"),
                Token::Ident("X".into()),
                Token::Punct(">="),
                Token::Number("0x1fUL".into()),
            ]
        );
    }

    #[test]
    fn tokenizes_literals() {
        let tokens = tokenize(r#""esp \"32\"" 'a' '\'' 1e+5"#).unwrap();

        assert_eq!(
            tokens,
            [
                Token::Str(r#""esp \"32\"""#.into()),
                Token::Char("'a'".into()),
                Token::Char(r"'\''".into()),
                Token::Number("1e+5".into()),
            ]
        );
        assert!(tokenize("\"open").is_err());
    }

    #[test]
    fn spells_tokens() {
        let tokens = tokenize("f( a,b )  + 1").unwrap();

        assert_eq!(spell(&tokens), "f(a, b) + 1");
    }
}
