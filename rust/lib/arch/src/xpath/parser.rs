use super::lexer::{tokenize, Tok, Token};
use crate::error::XPathError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Option<Axis> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "self" => Axis::SelfAxis,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            "following" => Axis::Following,
            "preceding" => Axis::Preceding,
            "attribute" => Axis::Attribute,
            _ => return None,
        })
    }

    /// Reverse axes number their proximity positions backwards.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Parent
                | Axis::Ancestor
                | Axis::AncestorOrSelf
                | Axis::PrecedingSibling
                | Axis::Preceding
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeTest {
    Name(String),
    Any,
    Text,
    Comment,
    Node,
}

#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Func {
    Last,
    Position,
    Count,
    Not,
    True,
    False,
    Boolean,
    String,
    Number,
    Concat,
    Contains,
    StartsWith,
    NormalizeSpace,
    StringLength,
    Name,
    LocalName,
    HasClass,
}

impl Func {
    fn resolve(name: &str, argc: usize) -> Result<Func, XPathError> {
        let (func, min, max) = match name {
            "last" => (Func::Last, 0, 0),
            "position" => (Func::Position, 0, 0),
            "count" => (Func::Count, 1, 1),
            "not" => (Func::Not, 1, 1),
            "true" => (Func::True, 0, 0),
            "false" => (Func::False, 0, 0),
            "boolean" => (Func::Boolean, 1, 1),
            "string" => (Func::String, 0, 1),
            "number" => (Func::Number, 0, 1),
            "concat" => (Func::Concat, 2, usize::MAX),
            "contains" => (Func::Contains, 2, 2),
            "starts-with" => (Func::StartsWith, 2, 2),
            "normalize-space" => (Func::NormalizeSpace, 0, 1),
            "string-length" => (Func::StringLength, 0, 1),
            "name" => (Func::Name, 0, 1),
            "local-name" => (Func::LocalName, 0, 1),
            "hasclass" => (Func::HasClass, 1, usize::MAX),
            _ => return Err(XPathError::UnknownFunction(name.to_string())),
        };
        if argc < min || argc > max {
            let expected = match (min, max) {
                (a, b) if a == b => a.to_string(),
                (a, usize::MAX) => format!("at least {a}"),
                (a, b) => format!("{a} to {b}"),
            };
            return Err(XPathError::Arity {
                name: name.to_string(),
                expected,
                got: argc,
            });
        }
        Ok(func)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Call(Func, Vec<Expr>),
    /// Location path; `absolute` paths start from the document node.
    Path { absolute: bool, steps: Vec<Step> },
    /// Primary expression with predicates, optionally followed by a relative path.
    Filter {
        base: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
}

struct Parser<'a> {
    src: &'a str,
    toks: Vec<Token>,
    pos: usize,
}

pub(crate) fn parse(src: &str) -> Result<Expr, XPathError> {
    let toks = tokenize(src)?;
    let mut p = Parser { src, toks, pos: 0 };
    if p.toks.is_empty() {
        return Err(p.error("empty expression"));
    }
    let expr = p.or_expr()?;
    if p.pos < p.toks.len() {
        return Err(p.error("unexpected trailing tokens"));
    }
    Ok(expr)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|t| &t.tok)
    }

    fn peek_at(&self, n: usize) -> Option<&Tok> {
        self.toks.get(self.pos + n).map(|t| &t.tok)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).map(|t| t.tok.clone());
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), XPathError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn error(&self, message: &str) -> XPathError {
        let offset = self
            .toks
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or(self.src.len());
        XPathError::Syntax {
            expr: self.src.to_string(),
            offset,
            message: message.to_string(),
        }
    }

    fn peek_name(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Tok::Name(n)) if n == name)
    }

    fn or_expr(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.and_expr()?;
        while self.peek_name("or") {
            self.pos += 1;
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.equality_expr()?;
        while self.peek_name("and") {
            self.pos += 1;
            let rhs = self.equality_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality_expr(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.relational_expr()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Eq) => CmpOp::Eq,
                Some(Tok::Neq) => CmpOp::Neq,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.relational_expr()?;
            lhs = Expr::Compare(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn relational_expr(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.additive_expr()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Lt) => CmpOp::Lt,
                Some(Tok::Le) => CmpOp::Le,
                Some(Tok::Gt) => CmpOp::Gt,
                Some(Tok::Ge) => CmpOp::Ge,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive_expr()?;
            lhs = Expr::Compare(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn additive_expr(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.multiplicative_expr()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => ArithOp::Add,
                Some(Tok::Minus) => ArithOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative_expr()?;
            lhs = Expr::Arith(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative_expr(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.unary_expr()?;
        loop {
            // After an operand, `*`, `div` and `mod` can only be operators.
            let op = match self.peek() {
                Some(Tok::Star) => ArithOp::Mul,
                Some(Tok::Name(n)) if n == "div" => ArithOp::Div,
                Some(Tok::Name(n)) if n == "mod" => ArithOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary_expr()?;
            lhs = Expr::Arith(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary_expr(&mut self) -> Result<Expr, XPathError> {
        if self.eat(&Tok::Minus) {
            let inner = self.unary_expr()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.union_expr()
    }

    fn union_expr(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.path_expr()?;
        while self.eat(&Tok::Pipe) {
            let rhs = self.path_expr()?;
            lhs = Expr::Union(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn starts_primary(&self) -> bool {
        match self.peek() {
            Some(Tok::LParen) | Some(Tok::Literal(_)) | Some(Tok::Number(_)) | Some(Tok::Dollar) => {
                true
            }
            Some(Tok::Name(n)) => {
                self.peek_at(1) == Some(&Tok::LParen)
                    && !matches!(n.as_str(), "node" | "text" | "comment" | "processing-instruction")
            }
            _ => false,
        }
    }

    fn path_expr(&mut self) -> Result<Expr, XPathError> {
        if self.starts_primary() {
            let base = self.primary_expr()?;
            let mut predicates = Vec::new();
            while self.peek() == Some(&Tok::LBracket) {
                predicates.push(self.predicate()?);
            }
            let mut steps = Vec::new();
            self.path_tail(&mut steps)?;
            if predicates.is_empty() && steps.is_empty() {
                return Ok(base);
            }
            return Ok(Expr::Filter {
                base: Box::new(base),
                predicates,
                steps,
            });
        }
        self.location_path()
    }

    fn path_tail(&mut self, steps: &mut Vec<Step>) -> Result<(), XPathError> {
        loop {
            match self.peek() {
                Some(Tok::Slash) => {
                    self.pos += 1;
                    steps.push(self.step()?);
                }
                Some(Tok::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(descendant_or_self());
                    steps.push(self.step()?);
                }
                _ => return Ok(()),
            }
        }
    }

    fn location_path(&mut self) -> Result<Expr, XPathError> {
        let mut steps = Vec::new();
        let absolute = match self.peek() {
            Some(Tok::Slash) => {
                self.pos += 1;
                if self.starts_step() {
                    steps.push(self.step()?);
                }
                true
            }
            Some(Tok::DoubleSlash) => {
                self.pos += 1;
                steps.push(descendant_or_self());
                steps.push(self.step()?);
                true
            }
            _ => {
                steps.push(self.step()?);
                false
            }
        };
        self.path_tail(&mut steps)?;
        Ok(Expr::Path { absolute, steps })
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Tok::Name(_)) | Some(Tok::Star) | Some(Tok::At) | Some(Tok::Dot) | Some(Tok::DotDot)
        )
    }

    fn step(&mut self) -> Result<Step, XPathError> {
        match self.peek() {
            Some(Tok::Dot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Some(Tok::DotDot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            _ => {}
        }
        let axis = if self.eat(&Tok::At) {
            Axis::Attribute
        } else if let (Some(Tok::Name(name)), Some(Tok::DoubleColon)) = (self.peek(), self.peek_at(1))
        {
            let axis = Axis::from_name(name)
                .ok_or_else(|| self.error(&format!("unknown axis {name}")))?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };
        let test = match self.bump() {
            Some(Tok::Star) => NodeTest::Any,
            Some(Tok::Name(name)) => {
                if self.peek() == Some(&Tok::LParen) {
                    let test = match name.as_str() {
                        "node" => NodeTest::Node,
                        "text" => NodeTest::Text,
                        "comment" => NodeTest::Comment,
                        _ => {
                            self.pos -= 1;
                            return Err(self.error(&format!("unexpected function {name}() in step")));
                        }
                    };
                    self.pos += 1;
                    self.expect(Tok::RParen, "')'")?;
                    test
                } else {
                    NodeTest::Name(name)
                }
            }
            _ => {
                self.pos -= 1;
                return Err(self.error("expected a node test"));
            }
        };
        let mut predicates = Vec::new();
        while self.peek() == Some(&Tok::LBracket) {
            predicates.push(self.predicate()?);
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn predicate(&mut self) -> Result<Expr, XPathError> {
        self.expect(Tok::LBracket, "'['")?;
        let expr = self.or_expr()?;
        self.expect(Tok::RBracket, "']'")?;
        Ok(expr)
    }

    fn primary_expr(&mut self) -> Result<Expr, XPathError> {
        match self.bump() {
            Some(Tok::LParen) => {
                let expr = self.or_expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(expr)
            }
            Some(Tok::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Tok::Number(n)) => Ok(Expr::Number(n)),
            Some(Tok::Dollar) => Err(XPathError::Unsupported("variables".into())),
            Some(Tok::Name(name)) => {
                self.expect(Tok::LParen, "'('")?;
                let mut args = Vec::new();
                if !self.eat(&Tok::RParen) {
                    loop {
                        args.push(self.or_expr()?);
                        if self.eat(&Tok::RParen) {
                            break;
                        }
                        self.expect(Tok::Comma, "',' or ')'")?;
                    }
                }
                let func = Func::resolve(&name, args.len())?;
                Ok(Expr::Call(func, args))
            }
            _ => {
                self.pos -= 1;
                Err(self.error("expected an expression"))
            }
        }
    }
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_odoo_expressions() {
        for expr in [
            "//field[@name='partner_id']",
            "//group[@name='main']/field[last()]",
            "(//group)[2]",
            "//div[hasclass('oe_title')]/h1",
            "//page[@name='a']/following-sibling::page[1]",
            "/form/sheet",
            ".",
            "//field[@name='x']/..",
            "//tree/field[@name='a'] | //list/field[@name='a']",
            "//field[not(@invisible) and @name!='b']",
            "count(//field) > 2",
        ] {
            assert!(parse(expr).is_ok(), "{expr}");
        }
    }

    #[test]
    fn div_is_both_a_tag_and_an_operator() {
        assert!(matches!(parse("//div").unwrap(), Expr::Path { .. }));
        assert!(matches!(
            parse("4 div 2").unwrap(),
            Expr::Arith(ArithOp::Div, _, _)
        ));
    }

    #[test]
    fn reports_syntax_errors() {
        assert!(matches!(parse("//field[@name="), Err(XPathError::Syntax { .. })));
        assert!(matches!(parse("//a]"), Err(XPathError::Syntax { .. })));
        assert!(matches!(
            parse("frobnicate(1)"),
            Err(XPathError::UnknownFunction(_))
        ));
        assert!(matches!(parse("count()"), Err(XPathError::Arity { .. })));
    }
}
