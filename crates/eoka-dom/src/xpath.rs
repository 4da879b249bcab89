//! Positional XPath location paths.
//!
//! Grammar: one or more steps, each `/` or `//` followed by a name test
//! (`name` or `*`) and zero or more positional predicates `[n]`. Enough for
//! absolute paths like `//html[1]/body[1]/div[3]` and simple descendant
//! lookups like `//button`.

use crate::{Document, Error, NodeId, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationPath(Vec<Step>);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    descendant: bool,
    name: Option<String>,
    positions: Vec<usize>,
}

pub fn parse(expr: &str) -> Result<LocationPath> {
    let fail = |reason: &str| Error::InvalidXPath {
        expr: expr.to_string(),
        reason: reason.to_string(),
    };
    let chars: Vec<char> = expr.trim().chars().collect();
    if chars.is_empty() {
        return Err(fail("empty expression"));
    }
    let mut steps = Vec::new();
    let mut pos = 0;
    while pos < chars.len() {
        if chars[pos] != '/' {
            return Err(fail("expected '/'"));
        }
        pos += 1;
        let descendant = chars.get(pos) == Some(&'/');
        if descendant {
            pos += 1;
        }
        let name = match chars.get(pos) {
            Some('*') => {
                pos += 1;
                None
            }
            Some(c) if c.is_alphabetic() || *c == '_' => {
                let start = pos;
                while chars
                    .get(pos)
                    .is_some_and(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
                {
                    pos += 1;
                }
                Some(chars[start..pos].iter().collect::<String>().to_ascii_lowercase())
            }
            _ => return Err(fail("expected a name test")),
        };
        let mut positions = Vec::new();
        while chars.get(pos) == Some(&'[') {
            pos += 1;
            let start = pos;
            while chars.get(pos).is_some_and(|c| *c != ']') {
                pos += 1;
            }
            if pos >= chars.len() {
                return Err(fail("unterminated predicate"));
            }
            let body: String = chars[start..pos].iter().collect();
            pos += 1;
            match body.trim().parse::<usize>() {
                Ok(n) if n >= 1 => positions.push(n),
                _ => return Err(fail("only positional predicates are supported")),
            }
        }
        steps.push(Step {
            descendant,
            name,
            positions,
        });
    }
    Ok(LocationPath(steps))
}

impl LocationPath {
    /// Selected nodes in document order, without duplicates.
    pub fn evaluate(&self, doc: &Document) -> Vec<NodeId> {
        // `None` stands for the document node above the root element.
        let mut context: Vec<Option<NodeId>> = vec![None];
        for step in &self.0 {
            let mut next = Vec::new();
            for ctx in &context {
                let parents = if step.descendant {
                    descendants_or_self(doc, *ctx)
                } else {
                    vec![*ctx]
                };
                for parent in parents {
                    let mut hits: Vec<NodeId> = children(doc, parent)
                        .into_iter()
                        .filter(|c| step.name.as_deref().map_or(true, |n| doc.tag(*c) == n))
                        .collect();
                    for p in &step.positions {
                        hits = hits.get(p - 1).copied().into_iter().collect();
                    }
                    next.extend(hits);
                }
            }
            context = next.into_iter().map(Some).collect();
        }

        let order = doc.document_order();
        let mut out: Vec<NodeId> = context.into_iter().flatten().collect();
        out.sort_by_key(|n| order.get(n).copied().unwrap_or(usize::MAX));
        out.dedup();
        out
    }
}

fn children(doc: &Document, node: Option<NodeId>) -> Vec<NodeId> {
    match node {
        None => vec![doc.root()],
        Some(n) => doc.children(n).to_vec(),
    }
}

fn descendants_or_self(doc: &Document, node: Option<NodeId>) -> Vec<Option<NodeId>> {
    let mut out = vec![node];
    let mut stack = children(doc, node);
    stack.reverse();
    while let Some(n) = stack.pop() {
        out.push(Some(n));
        stack.extend(doc.children(n).iter().rev().copied());
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::{Document, El, Error};

    #[test]
    fn test_absolute_positional_path() {
        let mut doc = Document::new("about:blank");
        let body = doc.body();
        let _first = doc.append(body, El::new("div"));
        let second = doc.append(body, El::new("div").child(El::new("span")));
        let span = doc.children(second)[0];

        assert_eq!(
            doc.evaluate_xpath("//html[1]/body[1]/div[2]").unwrap(),
            vec![second]
        );
        assert_eq!(
            doc.evaluate_xpath("/html/body/div[2]/span[1]").unwrap(),
            vec![span]
        );
        assert!(doc.evaluate_xpath("//html[1]/body[1]/div[3]").unwrap().is_empty());
    }

    #[test]
    fn test_descendant_step_is_per_parent() {
        let mut doc = Document::new("about:blank");
        let body = doc.body();
        let a = doc.append(body, El::new("ul").child(El::new("li")).child(El::new("li")));
        let b = doc.append(body, El::new("ul").child(El::new("li")));
        let first_a = doc.children(a)[0];
        let first_b = doc.children(b)[0];

        assert_eq!(doc.evaluate_xpath("//li[1]").unwrap(), vec![first_a, first_b]);
        assert_eq!(doc.evaluate_xpath("//li").unwrap().len(), 3);
        assert_eq!(doc.evaluate_xpath("//*[1]").unwrap()[0], doc.root());
    }

    #[test]
    fn test_rejects_unsupported_syntax() {
        let doc = Document::new("about:blank");
        for bad in ["", "html", "//", "//div[@id='x']", "//div[0]", "//div[1"] {
            assert!(
                matches!(doc.evaluate_xpath(bad), Err(Error::InvalidXPath { .. })),
                "expected '{}' to be rejected",
                bad
            );
        }
    }
}
