//! Field names referenced by Python-like view expressions.
//!
//! Attributes such as `invisible="state == 'done' or not partner_id"` or
//! `domain="[('company_id', '=', company_id)]"` are evaluated by the client
//! against the record, so every free name they use must be a field present
//! in the view. The expressions are only tokenized here, never evaluated.

use std::collections::BTreeSet;

use crate::error::ExprError;

/// Names provided by the client's evaluation context.
pub const IGNORED_IN_EXPRESSION: &[&str] = &[
    "True",
    "False",
    "None",
    "self",
    "uid",
    "context",
    "context_today",
    "allowed_company_ids",
    "current_company_id",
    "time",
    "datetime",
    "relativedelta",
    "current_date",
    "today",
    "now",
    "abs",
    "len",
    "bool",
    "float",
    "str",
    "unicode",
    "set",
    "dict",
    "list",
    "tuple",
    "int",
    "chr",
    "isinstance",
    "dateutil",
    "active_id",
    "active_ids",
    "active_model",
];

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "for", "lambda",
];

const DOMAIN_OPERATORS: &[&str] = &[
    "=", "!=", "<>", "<", "<=", ">", ">=", "=?", "=like", "=ilike", "like", "not like",
    "ilike", "not ilike", "in", "not in", "child_of", "parent_of", "any", "not any",
];

#[derive(Debug, Clone, PartialEq)]
enum Tok<'a> {
    Name(&'a str),
    Str(String),
    Num,
    Op(&'a str),
}

const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "<<", ">>", "->", ":=", "(", ")", "[", "]", "{", "}",
    ",", ":", ".", ";", "+", "-", "*", "/", "%", "<", ">", "=", "!", "&", "|", "^", "~", "@",
];

fn tokenize(src: &str) -> Result<Vec<Tok<'_>>, ExprError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut brackets: Vec<u8> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() || c == b'\\' {
            i += 1;
            continue;
        }
        // String literal, with an optional r/b/u/f prefix.
        let prefix = bytes[i..]
            .iter()
            .take_while(|b| matches!(b, b'r' | b'R' | b'b' | b'B' | b'u' | b'U' | b'f' | b'F'))
            .count();
        if prefix <= 2 && matches!(bytes.get(i + prefix), Some(b'\'') | Some(b'"')) {
            let start = i + prefix;
            let quote = bytes[start];
            let triple = bytes.get(start..start + 3) == Some(&[quote, quote, quote][..]);
            let open = if triple { 3 } else { 1 };
            let mut j = start + open;
            let mut value = Vec::new();
            loop {
                match bytes.get(j) {
                    None => return Err(ExprError::UnterminatedString),
                    Some(b'\\') => {
                        if let Some(next) = bytes.get(j + 1) {
                            value.push(*next);
                        }
                        j += 2;
                    }
                    Some(q) if *q == quote => {
                        if !triple {
                            j += 1;
                            break;
                        }
                        if bytes.get(j..j + 3) == Some(&[quote, quote, quote][..]) {
                            j += 3;
                            break;
                        }
                        value.push(*q);
                        j += 1;
                    }
                    Some(b) => {
                        value.push(*b);
                        j += 1;
                    }
                }
            }
            out.push(Tok::Str(String::from_utf8_lossy(&value).into_owned()));
            i = j;
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' || c >= 0x80 {
            let len = bytes[i..]
                .iter()
                .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_' || **b >= 0x80)
                .count();
            out.push(Tok::Name(&src[i..i + len]));
            i += len;
            continue;
        }
        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            let mut j = i;
            while j < bytes.len() {
                let b = bytes[j];
                let exponent_sign = (b == b'+' || b == b'-')
                    && j > i
                    && matches!(bytes[j - 1], b'e' | b'E')
                    && !src[i..j].starts_with("0x");
                if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || exponent_sign {
                    j += 1;
                } else {
                    break;
                }
            }
            out.push(Tok::Num);
            i = j;
            continue;
        }
        let Some(op) = OPERATORS.iter().find(|op| src[i..].starts_with(**op)) else {
            return Err(ExprError::UnexpectedChar(src[i..].chars().next().unwrap_or('?')));
        };
        match *op {
            "(" | "[" | "{" => brackets.push(c),
            ")" | "]" | "}" => {
                let expected = match c {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                if brackets.pop() != Some(expected) {
                    return Err(ExprError::Unbalanced(c as char));
                }
            }
            _ => {}
        }
        out.push(Tok::Op(*op));
        i += op.len();
    }
    if let Some(open) = brackets.pop() {
        return Err(ExprError::Unbalanced(open as char));
    }
    Ok(out)
}

/// Free names of `expr`, minus the evaluation-context names.
///
/// `parent.x` is reported as `"parent.x"`; other attribute accesses
/// (`partner_id.name`) report only their root name.
pub fn expression_field_names(expr: &str) -> Result<BTreeSet<String>, ExprError> {
    let toks = tokenize(expr)?;

    // Comprehension targets and lambda parameters.
    let mut locals = BTreeSet::new();
    let mut i = 0;
    while i < toks.len() {
        let stop = match toks[i] {
            Tok::Name("for") => Tok::Name("in"),
            Tok::Name("lambda") => Tok::Op(":"),
            _ => {
                i += 1;
                continue;
            }
        };
        i += 1;
        while i < toks.len() && toks[i] != stop {
            if let Tok::Name(n) = toks[i] {
                locals.insert(n);
            }
            i += 1;
        }
    }

    let mut names = BTreeSet::new();
    let mut depth: Vec<&str> = Vec::new();
    for (i, tok) in toks.iter().enumerate() {
        let name = match tok {
            Tok::Op(op @ ("(" | "[" | "{")) => {
                depth.push(*op);
                continue;
            }
            Tok::Op(")" | "]" | "}") => {
                depth.pop();
                continue;
            }
            Tok::Name(n) => *n,
            _ => continue,
        };
        if KEYWORDS.contains(&name) || locals.contains(name) {
            continue;
        }
        if i > 0 && toks[i - 1] == Tok::Op(".") {
            continue;
        }
        let next = toks.get(i + 1);
        if next == Some(&Tok::Op("=")) && depth.last() == Some(&"(") {
            continue;
        }
        if name == "parent" && next == Some(&Tok::Op(".")) {
            if let Some(Tok::Name(attr)) = toks.get(i + 2) {
                names.insert(format!("parent.{attr}"));
            }
            continue;
        }
        if IGNORED_IN_EXPRESSION.contains(&name) {
            continue;
        }
        names.insert(name.to_string());
    }
    Ok(names)
}

/// Left operands of the leaves of a domain literal, e.g. `partner_id.name`
/// for `[('partner_id.name', 'ilike', 'x')]`.
pub fn domain_field_paths(domain: &str) -> Result<Vec<String>, ExprError> {
    let toks = tokenize(domain)?;
    let mut paths = Vec::new();
    for window in toks.windows(4) {
        if let [Tok::Op("(" | "["), Tok::Str(path), Tok::Op(","), Tok::Str(op)] = window {
            if DOMAIN_OPERATORS.contains(&op.as_str()) {
                paths.push(path.clone());
            }
        }
    }
    Ok(paths)
}

/// Values of the `group_by` key of a context literal, e.g. `date:month`
/// and `user_id` for `{'group_by': ['date:month', 'user_id']}`.
pub fn context_group_by(context: &str) -> Result<Vec<String>, ExprError> {
    let toks = tokenize(context)?;
    let mut values = Vec::new();
    let mut i = 0;
    while i + 2 < toks.len() {
        if toks[i] == Tok::Str("group_by".to_string()) && toks[i + 1] == Tok::Op(":") {
            let mut j = i + 2;
            match &toks[j] {
                Tok::Str(v) => values.push(v.clone()),
                Tok::Op("[" | "(") => {
                    j += 1;
                    while let Some(tok) = toks.get(j) {
                        match tok {
                            Tok::Str(v) => values.push(v.clone()),
                            Tok::Op(",") => {}
                            _ => break,
                        }
                        j += 1;
                    }
                }
                _ => {}
            }
            i = j;
        }
        i += 1;
    }
    Ok(values)
}
