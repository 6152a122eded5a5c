//! Linear document model and its operation algebra.
//!
//! A document is a flat sequence of items: characters, element starts and
//! element ends. `<blip><p>ab</p></blip>` is six items:
//!
//! ```text
//! offset:  0       1    2   3   4     5
//! item:    <blip>  <p>  a   b   </p>  </blip>
//! ```
//!
//! A [`DocOp`] walks the whole document with `Retain`, `Insert` and
//! `Delete` components. Ops support `apply`, `compose` and `transform`;
//! transform resolves concurrent insertions at the same offset by placing
//! the client's insertion first.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// A single document item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocItem {
    Char(char),
    ElementStart(String),
    ElementEnd,
}

/// Document op errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocOpError {
    /// Markup could not be parsed
    Malformed(String),
    /// Op length does not match the document or the opposing op
    LengthMismatch { expected: usize, got: usize },
    /// Deleted items differ from the items actually present
    ContentMismatch { offset: usize },
}

impl fmt::Display for DocOpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocOpError::Malformed(e) => write!(f, "Malformed document: {e}"),
            DocOpError::LengthMismatch { expected, got } => {
                write!(f, "Length mismatch: expected {expected}, got {got}")
            }
            DocOpError::ContentMismatch { offset } => {
                write!(f, "Deleted content does not match document at offset {offset}")
            }
        }
    }
}

impl std::error::Error for DocOpError {}

/// An immutable document state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    items: Vec<DocItem>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<DocItem>) -> Self {
        Self { items }
    }

    /// Parse minimal markup: `<tag>`, `</tag>`, `<tag/>` and text.
    /// Attributes are not supported.
    pub fn parse(markup: &str) -> Result<Self, DocOpError> {
        let mut items = Vec::new();
        let mut open: Vec<String> = Vec::new();
        let mut chars = markup.chars();

        while let Some(c) = chars.next() {
            if c != '<' {
                items.push(DocItem::Char(c));
                continue;
            }
            let mut tag = String::new();
            loop {
                match chars.next() {
                    Some('>') => break,
                    Some(t) => tag.push(t),
                    None => return Err(DocOpError::Malformed(format!("unterminated tag <{tag}"))),
                }
            }
            if let Some(name) = tag.strip_prefix('/') {
                match open.pop() {
                    Some(expected) if expected == name => items.push(DocItem::ElementEnd),
                    Some(expected) => {
                        return Err(DocOpError::Malformed(format!(
                            "closing </{name}> does not match <{expected}>"
                        )))
                    }
                    None => return Err(DocOpError::Malformed(format!("stray </{name}>"))),
                }
            } else if let Some(name) = tag.strip_suffix('/') {
                items.push(DocItem::ElementStart(name.to_string()));
                items.push(DocItem::ElementEnd);
            } else if tag.is_empty() {
                return Err(DocOpError::Malformed("empty tag".to_string()));
            } else {
                open.push(tag.clone());
                items.push(DocItem::ElementStart(tag));
            }
        }

        if let Some(unclosed) = open.pop() {
            return Err(DocOpError::Malformed(format!("unclosed <{unclosed}>")));
        }
        Ok(Self { items })
    }

    /// Render back to markup. Element ends close the innermost open element.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        let mut open: Vec<&str> = Vec::new();
        for item in &self.items {
            match item {
                DocItem::Char(c) => out.push(*c),
                DocItem::ElementStart(tag) => {
                    out.push('<');
                    out.push_str(tag);
                    out.push('>');
                    open.push(tag);
                }
                DocItem::ElementEnd => {
                    out.push_str("</");
                    out.push_str(open.pop().unwrap_or(""));
                    out.push('>');
                }
            }
        }
        out
    }

    /// Concatenated character content, ignoring markup.
    pub fn text(&self) -> String {
        self.items
            .iter()
            .filter_map(|item| match item {
                DocItem::Char(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    pub fn items(&self) -> &[DocItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Apply `op`, producing the next document state.
    pub fn apply(&self, op: &DocOp) -> Result<Document, DocOpError> {
        let mut out = Vec::with_capacity(self.items.len());
        let mut pos = 0usize;
        for component in &op.components {
            match component {
                DocOpComponent::Retain(n) => {
                    let end = pos + n;
                    if end > self.items.len() {
                        return Err(DocOpError::LengthMismatch {
                            expected: self.items.len(),
                            got: end,
                        });
                    }
                    out.extend_from_slice(&self.items[pos..end]);
                    pos = end;
                }
                DocOpComponent::Insert(items) => out.extend(items.iter().cloned()),
                DocOpComponent::Delete(items) => {
                    let end = pos + items.len();
                    if end > self.items.len() || self.items[pos..end] != items[..] {
                        return Err(DocOpError::ContentMismatch { offset: pos });
                    }
                    pos = end;
                }
            }
        }
        if pos != self.items.len() {
            return Err(DocOpError::LengthMismatch {
                expected: self.items.len(),
                got: pos,
            });
        }
        Ok(Document { items: out })
    }
}

/// One component of a [`DocOp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocOpComponent {
    Retain(usize),
    Insert(Vec<DocItem>),
    Delete(Vec<DocItem>),
}

impl DocOpComponent {
    fn len(&self) -> usize {
        match self {
            DocOpComponent::Retain(n) => *n,
            DocOpComponent::Insert(items) | DocOpComponent::Delete(items) => items.len(),
        }
    }

    fn is_insert(&self) -> bool {
        matches!(self, DocOpComponent::Insert(_))
    }

    fn is_delete(&self) -> bool {
        matches!(self, DocOpComponent::Delete(_))
    }

    /// Split off the first `n` items, leaving the remainder in `self`.
    fn split_front(&mut self, n: usize) -> DocOpComponent {
        match self {
            DocOpComponent::Retain(m) => {
                *m -= n;
                DocOpComponent::Retain(n)
            }
            DocOpComponent::Insert(items) => {
                let rest = items.split_off(n);
                DocOpComponent::Insert(std::mem::replace(items, rest))
            }
            DocOpComponent::Delete(items) => {
                let rest = items.split_off(n);
                DocOpComponent::Delete(std::mem::replace(items, rest))
            }
        }
    }
}

/// A normalized document operation.
///
/// Built with [`DocOpBuilder`]; adjacent components of the same kind are
/// merged and an insertion is always placed before an adjacent deletion,
/// so structurally equal ops have equal effects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocOp {
    components: Vec<DocOpComponent>,
}

impl DocOp {
    pub fn builder() -> DocOpBuilder {
        DocOpBuilder::new()
    }

    /// Identity op over a document of `len` items.
    pub fn identity(len: usize) -> Self {
        DocOpBuilder::new().retain(len).finish()
    }

    /// Insert `text` at `offset` in a document of `doc_len` items.
    pub fn insert_text(doc_len: usize, offset: usize, text: &str) -> Self {
        DocOpBuilder::new()
            .retain(offset)
            .characters(text)
            .retain(doc_len.saturating_sub(offset))
            .finish()
    }

    /// Delete `count` items of `doc` starting at `offset`.
    pub fn delete_range(doc: &Document, offset: usize, count: usize) -> Result<Self, DocOpError> {
        let end = offset + count;
        if end > doc.len() {
            return Err(DocOpError::LengthMismatch {
                expected: doc.len(),
                got: end,
            });
        }
        Ok(DocOpBuilder::new()
            .retain(offset)
            .delete(doc.items()[offset..end].to_vec())
            .retain(doc.len() - end)
            .finish())
    }

    pub fn components(&self) -> &[DocOpComponent] {
        &self.components
    }

    /// Length of the document this op applies to.
    pub fn input_len(&self) -> usize {
        self.components
            .iter()
            .filter(|c| !c.is_insert())
            .map(DocOpComponent::len)
            .sum()
    }

    /// Length of the document this op produces.
    pub fn output_len(&self) -> usize {
        self.components
            .iter()
            .filter(|c| !c.is_delete())
            .map(DocOpComponent::len)
            .sum()
    }

    pub fn is_identity(&self) -> bool {
        self.components
            .iter()
            .all(|c| matches!(c, DocOpComponent::Retain(_)))
    }

    /// Compose `self` followed by `next` into a single equivalent op.
    pub fn compose(&self, next: &DocOp) -> Result<DocOp, DocOpError> {
        if self.output_len() != next.input_len() {
            return Err(DocOpError::LengthMismatch {
                expected: self.output_len(),
                got: next.input_len(),
            });
        }
        let mut first = Components::new(&self.components);
        let mut second = Components::new(&next.components);
        let mut out = DocOpBuilder::new();

        loop {
            if first.peek().is_some_and(DocOpComponent::is_delete) {
                out.push(first.take_whole());
                continue;
            }
            if second.peek().is_some_and(DocOpComponent::is_insert) {
                out.push(second.take_whole());
                continue;
            }
            let n = match (first.peek(), second.peek()) {
                (None, None) => break,
                (Some(a), Some(b)) => a.len().min(b.len()),
                _ => {
                    return Err(DocOpError::LengthMismatch {
                        expected: self.output_len(),
                        got: next.input_len(),
                    })
                }
            };
            let offset = out.output_len();
            match (first.take(n), second.take(n)) {
                (DocOpComponent::Retain(n), DocOpComponent::Retain(_)) => {
                    out.push(DocOpComponent::Retain(n))
                }
                (DocOpComponent::Retain(_), DocOpComponent::Delete(items)) => {
                    out.push(DocOpComponent::Delete(items))
                }
                (DocOpComponent::Insert(items), DocOpComponent::Retain(_)) => {
                    out.push(DocOpComponent::Insert(items))
                }
                (DocOpComponent::Insert(inserted), DocOpComponent::Delete(deleted)) => {
                    if inserted != deleted {
                        return Err(DocOpError::ContentMismatch { offset });
                    }
                }
                (a, b) => {
                    return Err(DocOpError::Malformed(format!(
                        "cannot compose {a:?} with {b:?}"
                    )))
                }
            }
        }
        Ok(out.finish())
    }

    /// Transform two concurrent ops over the same document.
    ///
    /// Returns `(client', server')` such that applying `server` then
    /// `client'` equals applying `client` then `server'`.
    pub fn transform(client: &DocOp, server: &DocOp) -> Result<(DocOp, DocOp), DocOpError> {
        if client.input_len() != server.input_len() {
            return Err(DocOpError::LengthMismatch {
                expected: server.input_len(),
                got: client.input_len(),
            });
        }
        let mut c = Components::new(&client.components);
        let mut s = Components::new(&server.components);
        let mut c_out = DocOpBuilder::new();
        let mut s_out = DocOpBuilder::new();

        loop {
            if c.peek().is_some_and(DocOpComponent::is_insert) {
                let inserted = c.take_whole();
                s_out.push(DocOpComponent::Retain(inserted.len()));
                c_out.push(inserted);
                continue;
            }
            if s.peek().is_some_and(DocOpComponent::is_insert) {
                let inserted = s.take_whole();
                c_out.push(DocOpComponent::Retain(inserted.len()));
                s_out.push(inserted);
                continue;
            }
            let n = match (c.peek(), s.peek()) {
                (None, None) => break,
                (Some(a), Some(b)) => a.len().min(b.len()),
                _ => {
                    return Err(DocOpError::LengthMismatch {
                        expected: server.input_len(),
                        got: client.input_len(),
                    })
                }
            };
            match (c.take(n), s.take(n)) {
                (DocOpComponent::Retain(n), DocOpComponent::Retain(_)) => {
                    c_out.push(DocOpComponent::Retain(n));
                    s_out.push(DocOpComponent::Retain(n));
                }
                (DocOpComponent::Delete(items), DocOpComponent::Retain(_)) => {
                    c_out.push(DocOpComponent::Delete(items));
                }
                (DocOpComponent::Retain(_), DocOpComponent::Delete(items)) => {
                    s_out.push(DocOpComponent::Delete(items));
                }
                // Both sides removed the same range.
                (DocOpComponent::Delete(_), DocOpComponent::Delete(_)) => {}
                (a, b) => {
                    return Err(DocOpError::Malformed(format!(
                        "cannot transform {a:?} against {b:?}"
                    )))
                }
            }
        }
        Ok((c_out.finish(), s_out.finish()))
    }
}

/// Growable component buffer; `finish` freezes it into a [`DocOp`].
#[derive(Debug, Default)]
pub struct DocOpBuilder {
    components: Vec<DocOpComponent>,
}

impl DocOpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retain(mut self, n: usize) -> Self {
        self.push(DocOpComponent::Retain(n));
        self
    }

    pub fn characters(mut self, text: &str) -> Self {
        self.push(DocOpComponent::Insert(text.chars().map(DocItem::Char).collect()));
        self
    }

    pub fn element_start(mut self, tag: impl Into<String>) -> Self {
        self.push(DocOpComponent::Insert(vec![DocItem::ElementStart(tag.into())]));
        self
    }

    pub fn element_end(mut self) -> Self {
        self.push(DocOpComponent::Insert(vec![DocItem::ElementEnd]));
        self
    }

    pub fn delete_characters(mut self, text: &str) -> Self {
        self.push(DocOpComponent::Delete(text.chars().map(DocItem::Char).collect()));
        self
    }

    pub fn delete_element_start(mut self, tag: impl Into<String>) -> Self {
        self.push(DocOpComponent::Delete(vec![DocItem::ElementStart(tag.into())]));
        self
    }

    pub fn delete_element_end(mut self) -> Self {
        self.push(DocOpComponent::Delete(vec![DocItem::ElementEnd]));
        self
    }

    pub fn insert(mut self, items: Vec<DocItem>) -> Self {
        self.push(DocOpComponent::Insert(items));
        self
    }

    pub fn delete(mut self, items: Vec<DocItem>) -> Self {
        self.push(DocOpComponent::Delete(items));
        self
    }

    pub fn finish(self) -> DocOp {
        DocOp {
            components: self.components,
        }
    }

    fn output_len(&self) -> usize {
        self.components
            .iter()
            .filter(|c| !c.is_delete())
            .map(DocOpComponent::len)
            .sum()
    }

    fn push(&mut self, component: DocOpComponent) {
        if component.len() == 0 {
            return;
        }
        // Keep insertions ahead of an adjacent deletion.
        if component.is_insert() && self.components.last().is_some_and(DocOpComponent::is_delete) {
            let Some(deleted) = self.components.pop() else {
                return;
            };
            self.push(component);
            self.components.push(deleted);
            return;
        }
        let unmerged = match self.components.last_mut() {
            Some(last) => merge_into(last, component),
            None => Some(component),
        };
        if let Some(component) = unmerged {
            self.components.push(component);
        }
    }
}

/// Merge `component` into `last` if they are the same kind; otherwise hand
/// it back.
fn merge_into(last: &mut DocOpComponent, component: DocOpComponent) -> Option<DocOpComponent> {
    match (last, component) {
        (DocOpComponent::Retain(n), DocOpComponent::Retain(m)) => {
            *n += m;
            None
        }
        (DocOpComponent::Insert(items), DocOpComponent::Insert(more))
        | (DocOpComponent::Delete(items), DocOpComponent::Delete(more)) => {
            items.extend(more);
            None
        }
        (_, component) => Some(component),
    }
}

/// Cursor over op components that can split the head component.
struct Components {
    queue: VecDeque<DocOpComponent>,
}

impl Components {
    fn new(components: &[DocOpComponent]) -> Self {
        Self {
            queue: components.iter().cloned().collect(),
        }
    }

    fn peek(&self) -> Option<&DocOpComponent> {
        self.queue.front()
    }

    fn take_whole(&mut self) -> DocOpComponent {
        self.queue.pop_front().unwrap_or(DocOpComponent::Retain(0))
    }

    /// Take exactly `n` items from the head component; `n` never exceeds
    /// the head's length.
    fn take(&mut self, n: usize) -> DocOpComponent {
        if let Some(head) = self.queue.front_mut().filter(|head| head.len() > n) {
            return head.split_front(n);
        }
        self.take_whole()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(markup: &str) -> Document {
        Document::parse(markup).unwrap()
    }

    #[test]
    fn test_parse_and_render() {
        let d = doc("<blip><p>abc</p><line/></blip>");
        assert_eq!(d.len(), 9);
        assert_eq!(d.items()[2], DocItem::Char('a'));
        assert_eq!(d.to_markup(), "<blip><p>abc</p><line></line></blip>");
        assert_eq!(d.text(), "abc");
    }

    #[test]
    fn test_parse_rejects_mismatched_tags() {
        assert!(Document::parse("<a><b></a></b>").is_err());
        assert!(Document::parse("<a>").is_err());
        assert!(Document::parse("</a>").is_err());
        assert!(Document::parse("<a").is_err());
    }

    #[test]
    fn test_apply_insert_and_delete() {
        let d = doc("<blip><p>abc</p></blip>");
        let inserted = d.apply(&DocOp::insert_text(d.len(), 2, "X")).unwrap();
        assert_eq!(inserted.to_markup(), "<blip><p>Xabc</p></blip>");

        let delete = DocOp::delete_range(&inserted, 3, 2).unwrap();
        let deleted = inserted.apply(&delete).unwrap();
        assert_eq!(deleted.to_markup(), "<blip><p>Xc</p></blip>");
    }

    #[test]
    fn test_apply_rejects_wrong_length() {
        let d = doc("<p>abc</p>");
        assert!(matches!(
            d.apply(&DocOp::identity(3)),
            Err(DocOpError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_apply_rejects_wrong_deleted_content() {
        let d = doc("<p>abc</p>");
        let op = DocOp::builder().retain(1).delete_characters("x").retain(3).finish();
        assert_eq!(d.apply(&op), Err(DocOpError::ContentMismatch { offset: 1 }));
    }

    #[test]
    fn test_builder_normalizes() {
        let op = DocOp::builder()
            .retain(1)
            .retain(0)
            .retain(2)
            .delete_characters("a")
            .characters("x")
            .characters("y")
            .finish();
        assert_eq!(
            op.components(),
            &[
                DocOpComponent::Retain(3),
                DocOpComponent::Insert(vec![DocItem::Char('x'), DocItem::Char('y')]),
                DocOpComponent::Delete(vec![DocItem::Char('a')]),
            ]
        );
        assert_eq!(op.input_len(), 4);
        assert_eq!(op.output_len(), 5);
    }

    #[test]
    fn test_compose_matches_sequential_apply() {
        let d = doc("<p>abc</p>");
        let a = DocOp::insert_text(d.len(), 1, "XY");
        let mid = d.apply(&a).unwrap();
        let b = DocOp::delete_range(&mid, 2, 2).unwrap();

        let composed = a.compose(&b).unwrap();
        assert_eq!(d.apply(&composed).unwrap(), mid.apply(&b).unwrap());
        assert_eq!(d.apply(&composed).unwrap().to_markup(), "<p>Xbc</p>");
    }

    #[test]
    fn test_compose_rejects_length_mismatch() {
        let a = DocOp::identity(3);
        let b = DocOp::identity(4);
        assert!(a.compose(&b).is_err());
    }

    #[test]
    fn test_transform_concurrent_inserts_client_first() {
        let d = doc("<p>abc</p>");
        let client = DocOp::insert_text(d.len(), 1, "C");
        let server = DocOp::insert_text(d.len(), 1, "S");
        let (c2, s2) = DocOp::transform(&client, &server).unwrap();

        let via_server = d.apply(&server).unwrap().apply(&c2).unwrap();
        let via_client = d.apply(&client).unwrap().apply(&s2).unwrap();
        assert_eq!(via_server, via_client);
        assert_eq!(via_server.to_markup(), "<p>CSabc</p>");
    }

    #[test]
    fn test_transform_overlapping_deletes() {
        let d = doc("<p>abcdef</p>");
        let client = DocOp::delete_range(&d, 2, 3).unwrap();
        let server = DocOp::delete_range(&d, 3, 3).unwrap();
        let (c2, s2) = DocOp::transform(&client, &server).unwrap();

        let via_server = d.apply(&server).unwrap().apply(&c2).unwrap();
        let via_client = d.apply(&client).unwrap().apply(&s2).unwrap();
        assert_eq!(via_server, via_client);
        assert_eq!(via_server.to_markup(), "<p>af</p>");
    }

    #[test]
    fn test_transform_rejects_different_bases() {
        let a = DocOp::identity(3);
        let b = DocOp::identity(5);
        assert!(matches!(
            DocOp::transform(&a, &b),
            Err(DocOpError::LengthMismatch { .. })
        ));
    }
}
