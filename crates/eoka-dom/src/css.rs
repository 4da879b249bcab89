//! CSS selector subset.
//!
//! Supported: type and universal selectors, `#id`, `.class`, attribute
//! selectors (`[a]`, `=`, `~=`, `|=`, `^=`, `$=`, `*=`, optional `i` flag),
//! the structural pseudo-classes `:nth-child`, `:nth-of-type` (integer,
//! `odd`, `even`), `:first-child`, `:last-child`, `:first-of-type`,
//! `:last-of-type`, `:only-child`, `:root`, all four combinators and comma
//! separated lists. Identifiers and strings honour CSS escapes, so output of
//! `CSS.escape` round-trips.

use crate::{Document, Error, NodeId, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorList(Vec<Complex>);

impl SelectorList {
    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.0.iter().any(|c| c.matches(doc, node))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
    Adjacent,
    Sibling,
}

#[derive(Debug, Clone, PartialEq)]
struct Complex {
    compounds: Vec<Compound>,
    /// `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`.
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSel>,
    pseudos: Vec<Pseudo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals,
    Includes,
    DashMatch,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Debug, Clone, PartialEq)]
struct AttrSel {
    name: String,
    op: AttrOp,
    value: String,
    ignore_case: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nth {
    Index(usize),
    Odd,
    Even,
}

impl Nth {
    fn accepts(&self, position: usize) -> bool {
        match self {
            Nth::Index(i) => position == *i,
            Nth::Odd => position % 2 == 1,
            Nth::Even => position % 2 == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pseudo {
    NthChild(Nth),
    NthOfType(Nth),
    FirstChild,
    LastChild,
    FirstOfType,
    LastOfType,
    OnlyChild,
    Root,
}

/// Parse a selector list.
pub fn parse(input: &str) -> Result<SelectorList> {
    let mut parser = Parser {
        input,
        chars: input.chars().collect(),
        pos: 0,
    };
    parser.selector_list()
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn fail<T>(&self, reason: impl Into<String>) -> Result<T> {
        Err(Error::InvalidSelector {
            selector: self.input.to_string(),
            reason: reason.into(),
        })
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(is_ws) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => self.fail(format!("expected '{}', found '{}'", want, c)),
            None => self.fail(format!("expected '{}', found end of input", want)),
        }
    }

    fn selector_list(&mut self) -> Result<SelectorList> {
        let mut list = Vec::new();
        loop {
            self.skip_ws();
            list.push(self.complex()?);
            self.skip_ws();
            match self.bump() {
                None => break,
                Some(',') => continue,
                Some(c) => return self.fail(format!("unexpected '{}'", c)),
            }
        }
        Ok(SelectorList(list))
    }

    fn complex(&mut self) -> Result<Complex> {
        let mut compounds = vec![self.compound()?];
        let mut combinators = Vec::new();
        loop {
            let had_ws = self.skip_ws();
            let combinator = match self.peek() {
                None | Some(',') => break,
                Some('>') => Combinator::Child,
                Some('+') => Combinator::Adjacent,
                Some('~') => Combinator::Sibling,
                Some(_) if had_ws => Combinator::Descendant,
                Some(c) => return self.fail(format!("unexpected '{}'", c)),
            };
            if combinator != Combinator::Descendant {
                self.pos += 1;
                self.skip_ws();
            }
            combinators.push(combinator);
            compounds.push(self.compound()?);
        }
        Ok(Complex {
            compounds,
            combinators,
        })
    }

    fn compound(&mut self) -> Result<Compound> {
        let mut compound = Compound::default();
        let start = self.pos;
        match self.peek() {
            Some('*') => {
                self.pos += 1;
            }
            Some(c) if starts_ident(c, self.peek_at(1), self.peek_at(2)) => {
                compound.tag = Some(self.ident()?.to_ascii_lowercase());
            }
            _ => {}
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.ids.push(self.ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attrs.push(self.attribute()?);
                }
                Some(':') => {
                    self.pos += 1;
                    compound.pseudos.push(self.pseudo()?);
                }
                _ => break,
            }
        }
        if self.pos == start {
            return match self.peek() {
                None => self.fail("expected selector, found end of input"),
                Some(c) => self.fail(format!("expected selector, found '{}'", c)),
            };
        }
        Ok(compound)
    }

    fn attribute(&mut self) -> Result<AttrSel> {
        self.skip_ws();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_ws();
        let op = match self.bump() {
            Some(']') => {
                return Ok(AttrSel {
                    name,
                    op: AttrOp::Exists,
                    value: String::new(),
                    ignore_case: false,
                })
            }
            Some('=') => AttrOp::Equals,
            Some(c @ ('~' | '|' | '^' | '$' | '*')) => {
                self.expect('=')?;
                match c {
                    '~' => AttrOp::Includes,
                    '|' => AttrOp::DashMatch,
                    '^' => AttrOp::Prefix,
                    '$' => AttrOp::Suffix,
                    _ => AttrOp::Substring,
                }
            }
            Some(c) => return self.fail(format!("unexpected '{}' in attribute selector", c)),
            None => return self.fail("unterminated attribute selector"),
        };
        self.skip_ws();
        let value = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                self.string(q)?
            }
            _ => self.ident()?,
        };
        self.skip_ws();
        let mut ignore_case = false;
        if let Some(flag @ ('i' | 'I' | 's' | 'S')) = self.peek() {
            self.pos += 1;
            ignore_case = flag.eq_ignore_ascii_case(&'i');
            self.skip_ws();
        }
        self.expect(']')?;
        Ok(AttrSel {
            name,
            op,
            value,
            ignore_case,
        })
    }

    fn pseudo(&mut self) -> Result<Pseudo> {
        if self.peek() == Some(':') {
            return self.fail("pseudo-elements are not supported");
        }
        let name = self.ident()?.to_ascii_lowercase();
        let pseudo = match name.as_str() {
            "first-child" => Pseudo::FirstChild,
            "last-child" => Pseudo::LastChild,
            "first-of-type" => Pseudo::FirstOfType,
            "last-of-type" => Pseudo::LastOfType,
            "only-child" => Pseudo::OnlyChild,
            "root" => Pseudo::Root,
            "nth-child" | "nth-of-type" => {
                self.expect('(')?;
                self.skip_ws();
                let nth = self.nth()?;
                self.skip_ws();
                self.expect(')')?;
                if name == "nth-child" {
                    Pseudo::NthChild(nth)
                } else {
                    Pseudo::NthOfType(nth)
                }
            }
            other => return self.fail(format!("unsupported pseudo-class ':{}'", other)),
        };
        Ok(pseudo)
    }

    fn nth(&mut self) -> Result<Nth> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
        {
            self.pos += 1;
        }
        let arg: String = self.chars[start..self.pos].iter().collect();
        match arg.to_ascii_lowercase().as_str() {
            "odd" => Ok(Nth::Odd),
            "even" => Ok(Nth::Even),
            digits => match digits.trim_start_matches('+').parse::<usize>() {
                Ok(n) => Ok(Nth::Index(n)),
                Err(_) => self.fail(format!("unsupported nth argument '{}'", arg)),
            },
        }
    }

    fn ident(&mut self) -> Result<String> {
        let (c0, c1, c2) = (self.peek(), self.peek_at(1), self.peek_at(2));
        match c0 {
            Some(c) if starts_ident(c, c1, c2) => {}
            Some(c) => return self.fail(format!("expected identifier, found '{}'", c)),
            None => return self.fail("expected identifier, found end of input"),
        }
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.pos += 1;
                out.push(self.escape()?);
            } else if is_name_char(c) {
                self.pos += 1;
                out.push(c);
            } else {
                break;
            }
        }
        Ok(out)
    }

    /// Body of an escape; the backslash is already consumed.
    fn escape(&mut self) -> Result<char> {
        match self.peek() {
            None => self.fail("escape at end of input"),
            Some('\n') => self.fail("escaped newline outside a string"),
            Some(c) if c.is_ascii_hexdigit() => {
                let mut code = 0u32;
                let mut len = 0;
                while len < 6 {
                    match self.peek().and_then(|c| c.to_digit(16)) {
                        Some(d) => {
                            code = code * 16 + d;
                            self.pos += 1;
                            len += 1;
                        }
                        None => break,
                    }
                }
                if self.peek().is_some_and(is_ws) {
                    self.pos += 1;
                }
                Ok(match char::from_u32(code) {
                    Some(c) if code != 0 => c,
                    _ => '\u{FFFD}',
                })
            }
            Some(c) => {
                self.pos += 1;
                Ok(c)
            }
        }
    }

    /// Quoted string body; the opening quote is already consumed.
    fn string(&mut self, quote: char) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return self.fail("unterminated string"),
                Some(c) if c == quote => return Ok(out),
                Some('\n') => return self.fail("newline in string"),
                Some('\\') => {
                    if self.peek() == Some('\n') {
                        self.pos += 1;
                    } else {
                        out.push(self.escape()?);
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }
}

fn is_ws(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0c')
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || !c.is_ascii()
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_ascii_digit() || c == '-'
}

fn starts_ident(c0: char, c1: Option<char>, c2: Option<char>) -> bool {
    match c0 {
        '-' => match c1 {
            Some('-') => true,
            Some('\\') => c2.is_some_and(|c| c != '\n'),
            Some(c) => is_name_start(c),
            None => false,
        },
        '\\' => c1.is_some_and(|c| c != '\n'),
        c => is_name_start(c),
    }
}

impl Complex {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.match_at(doc, node, self.compounds.len() - 1)
    }

    fn match_at(&self, doc: &Document, node: NodeId, i: usize) -> bool {
        if !self.compounds[i].matches(doc, node) {
            return false;
        }
        if i == 0 {
            return true;
        }
        match self.combinators[i - 1] {
            Combinator::Child => doc
                .parent(node)
                .is_some_and(|p| self.match_at(doc, p, i - 1)),
            Combinator::Descendant => doc
                .inclusive_ancestors(node)
                .skip(1)
                .any(|a| self.match_at(doc, a, i - 1)),
            Combinator::Adjacent => doc
                .previous_sibling(node)
                .is_some_and(|s| self.match_at(doc, s, i - 1)),
            Combinator::Sibling => {
                std::iter::successors(doc.previous_sibling(node), |s| doc.previous_sibling(*s))
                    .any(|s| self.match_at(doc, s, i - 1))
            }
        }
    }
}

impl Compound {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        if let Some(ref tag) = self.tag {
            if doc.tag(node) != tag {
                return false;
            }
        }
        if !self.ids.iter().all(|id| doc.attr(node, "id") == Some(id.as_str())) {
            return false;
        }
        if !self.classes.is_empty() {
            let classes = doc.classes(node);
            if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
                return false;
            }
        }
        self.attrs.iter().all(|a| a.matches(doc, node))
            && self.pseudos.iter().all(|p| p.matches(doc, node))
    }
}

impl AttrSel {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(actual) = doc.attr(node, &self.name) else {
            return false;
        };
        let (actual, want) = if self.ignore_case {
            (actual.to_lowercase(), self.value.to_lowercase())
        } else {
            (actual.to_string(), self.value.clone())
        };
        match self.op {
            AttrOp::Exists => true,
            AttrOp::Equals => actual == want,
            AttrOp::Includes => actual.split_whitespace().any(|w| w == want),
            AttrOp::DashMatch => actual == want || actual.starts_with(&format!("{}-", want)),
            AttrOp::Prefix => !want.is_empty() && actual.starts_with(&want),
            AttrOp::Suffix => !want.is_empty() && actual.ends_with(&want),
            AttrOp::Substring => !want.is_empty() && actual.contains(&want),
        }
    }
}

impl Pseudo {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let (child_index, child_count) = doc.child_position(node);
        let (type_index, type_count) = doc.same_tag_position(node);
        match self {
            Pseudo::NthChild(nth) => nth.accepts(child_index),
            Pseudo::NthOfType(nth) => nth.accepts(type_index),
            Pseudo::FirstChild => child_index == 1,
            Pseudo::LastChild => child_index == child_count,
            Pseudo::FirstOfType => type_index == 1,
            Pseudo::LastOfType => type_index == type_count,
            Pseudo::OnlyChild => child_count == 1,
            Pseudo::Root => node == doc.root(),
        }
    }
}
