use crate::error::XPathError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Dot,
    DotDot,
    DoubleColon,
    Pipe,
    Plus,
    Minus,
    Star,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Dollar,
    Name(String),
    Literal(String),
    Number(f64),
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub tok: Tok,
    pub offset: usize,
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

pub(crate) fn tokenize(expr: &str) -> Result<Vec<Token>, XPathError> {
    let chars: Vec<(usize, char)> = expr.char_indices().collect();
    let err = |offset: usize, message: &str| XPathError::Syntax {
        expr: expr.to_string(),
        offset,
        message: message.to_string(),
    };
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, c) = chars[i];
        let peek = chars.get(i + 1).map(|(_, c)| *c);
        let mut push = |tok: Tok, width: usize| {
            out.push(Token { tok, offset });
            width
        };
        let width = match c {
            ' ' | '\t' | '\n' | '\r' => 1,
            '/' if peek == Some('/') => push(Tok::DoubleSlash, 2),
            '/' => push(Tok::Slash, 1),
            '[' => push(Tok::LBracket, 1),
            ']' => push(Tok::RBracket, 1),
            '(' => push(Tok::LParen, 1),
            ')' => push(Tok::RParen, 1),
            '@' => push(Tok::At, 1),
            ',' => push(Tok::Comma, 1),
            '|' => push(Tok::Pipe, 1),
            '+' => push(Tok::Plus, 1),
            '-' => push(Tok::Minus, 1),
            '*' => push(Tok::Star, 1),
            '=' => push(Tok::Eq, 1),
            '$' => push(Tok::Dollar, 1),
            '!' if peek == Some('=') => push(Tok::Neq, 2),
            '<' if peek == Some('=') => push(Tok::Le, 2),
            '<' => push(Tok::Lt, 1),
            '>' if peek == Some('=') => push(Tok::Ge, 2),
            '>' => push(Tok::Gt, 1),
            ':' if peek == Some(':') => push(Tok::DoubleColon, 2),
            '.' if peek == Some('.') => push(Tok::DotDot, 2),
            '.' if !peek.is_some_and(|p| p.is_ascii_digit()) => push(Tok::Dot, 1),
            '"' | '\'' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|(_, q)| *q == c)
                    .ok_or_else(|| err(offset, "unterminated string literal"))?;
                let text: String = chars[i + 1..i + 1 + close].iter().map(|(_, c)| *c).collect();
                push(Tok::Literal(text), close + 2)
            }
            c if c.is_ascii_digit() || c == '.' => {
                let len = chars[i..]
                    .iter()
                    .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
                    .count();
                let text: String = chars[i..i + len].iter().map(|(_, c)| *c).collect();
                let value: f64 = text.parse().map_err(|_| err(offset, "invalid number"))?;
                push(Tok::Number(value), len)
            }
            c if is_name_start(c) => {
                let mut len = chars[i..]
                    .iter()
                    .take_while(|(_, c)| is_name_char(*c))
                    .count();
                // `ancestor::x` must not swallow the axis separator.
                let mut text: String = chars[i..i + len].iter().map(|(_, c)| *c).collect();
                if let Some(pos) = text.find("::") {
                    text.truncate(pos);
                    len = text.chars().count();
                }
                while text.ends_with(':') {
                    text.pop();
                    len -= 1;
                }
                push(Tok::Name(text), len)
            }
            _ => return Err(err(offset, &format!("unexpected character {c:?}"))),
        };
        i += width;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<Tok> {
        tokenize(s).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn splits_axis_names() {
        assert_eq!(
            toks("ancestor::form"),
            vec![
                Tok::Name("ancestor".into()),
                Tok::DoubleColon,
                Tok::Name("form".into())
            ]
        );
    }

    #[test]
    fn hyphenated_names_stay_whole() {
        assert_eq!(
            toks("starts-with(@a,'x')"),
            vec![
                Tok::Name("starts-with".into()),
                Tok::LParen,
                Tok::At,
                Tok::Name("a".into()),
                Tok::Comma,
                Tok::Literal("x".into()),
                Tok::RParen
            ]
        );
    }

    #[test]
    fn numbers_and_dots() {
        assert_eq!(toks("..").len(), 1);
        assert_eq!(toks(".5"), vec![Tok::Number(0.5)]);
        assert_eq!(toks("a[2]")[2], Tok::Number(2.0));
    }

    #[test]
    fn unterminated_literal_is_an_error() {
        assert!(tokenize("//a[@b='x]").is_err());
    }
}
