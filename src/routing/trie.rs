//! Segment trie over route patterns.
//!
//! Patterns are `/`-separated. A `:name` segment captures one path
//! segment; a final `*name` segment captures the remaining tail (possibly
//! empty). Literal and `:param` children may share a position, and lookup
//! tries literal, then param, then tail. Two different parameter names at
//! one position, or a tail next to any other child, conflict.

use std::collections::BTreeMap;

use crate::error::ConflictReason;

#[derive(Debug, Default)]
struct Node {
    literal: BTreeMap<String, Node>,
    param: Option<(String, Box<Node>)>,
    tail: Option<(String, usize)>,
    value: Option<usize>,
}

impl Node {
    fn has_children(&self) -> bool {
        !self.literal.is_empty() || self.param.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Param(&'a str),
    Tail(&'a str),
}

fn parse(pattern: &str) -> Result<Vec<Segment<'_>>, ConflictReason> {
    let raw: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw.len());
    for (i, segment) in raw.iter().enumerate() {
        let parsed = if let Some(name) = segment.strip_prefix(':') {
            Segment::Param(name)
        } else if let Some(name) = segment.strip_prefix('*') {
            if i + 1 != raw.len() {
                return Err(ConflictReason::Syntax);
            }
            Segment::Tail(name)
        } else {
            Segment::Literal(segment)
        };
        if matches!(parsed, Segment::Param("") | Segment::Tail("")) {
            return Err(ConflictReason::Syntax);
        }
        segments.push(parsed);
    }
    Ok(segments)
}

/// Route trie for one method. Values are indexes into the caller's table.
#[derive(Debug, Default)]
pub struct RouteTrie {
    root: Node,
    len: usize,
}

impl RouteTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `pattern`. On conflict the trie is left unchanged.
    pub fn insert(&mut self, pattern: &str, value: usize) -> Result<(), ConflictReason> {
        let segments = parse(pattern)?;
        Self::check(&self.root, &segments)?;

        let mut node = &mut self.root;
        for segment in &segments {
            node = match segment {
                Segment::Literal(lit) => node.literal.entry((*lit).to_string()).or_default(),
                Segment::Param(name) => {
                    &mut *node
                        .param
                        .get_or_insert_with(|| ((*name).to_string(), Box::default()))
                        .1
                }
                Segment::Tail(name) => {
                    node.tail = Some(((*name).to_string(), value));
                    self.len += 1;
                    return Ok(());
                }
            };
        }
        node.value = Some(value);
        self.len += 1;
        Ok(())
    }

    fn check(mut node: &Node, segments: &[Segment<'_>]) -> Result<(), ConflictReason> {
        for segment in segments {
            match segment {
                Segment::Literal(lit) => {
                    if node.tail.is_some() {
                        return Err(ConflictReason::Wildcard);
                    }
                    match node.literal.get(*lit) {
                        Some(next) => node = next,
                        None => return Ok(()),
                    }
                }
                Segment::Param(name) => {
                    if node.tail.is_some() {
                        return Err(ConflictReason::Wildcard);
                    }
                    match &node.param {
                        Some((existing, _)) if existing != name => {
                            return Err(ConflictReason::Wildcard)
                        }
                        Some((_, next)) => node = next,
                        None => return Ok(()),
                    }
                }
                Segment::Tail(name) => {
                    return match &node.tail {
                        Some((existing, _)) if existing == name => Err(ConflictReason::Duplicate),
                        Some(_) => Err(ConflictReason::Wildcard),
                        None if node.has_children() => Err(ConflictReason::Wildcard),
                        None => Ok(()),
                    };
                }
            }
        }
        if node.value.is_some() {
            Err(ConflictReason::Duplicate)
        } else {
            Ok(())
        }
    }

    /// Finds the value for `path` with its captured parameters.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<(usize, Vec<(String, String)>)> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Vec::new();
        let value = Self::walk(&self.root, &segments, &mut params)?;
        Some((value, params))
    }

    fn walk(node: &Node, segments: &[&str], params: &mut Vec<(String, String)>) -> Option<usize> {
        let Some((first, rest)) = segments.split_first() else {
            if let Some(value) = node.value {
                return Some(value);
            }
            return node.tail.as_ref().map(|(name, value)| {
                params.push((name.clone(), String::new()));
                *value
            });
        };

        if let Some(child) = node.literal.get(*first) {
            if let Some(value) = Self::walk(child, rest, params) {
                return Some(value);
            }
        }
        if let Some((name, child)) = &node.param {
            params.push((name.clone(), (*first).to_string()));
            if let Some(value) = Self::walk(child, rest, params) {
                return Some(value);
            }
            params.pop();
        }
        node.tail.as_ref().map(|(name, value)| {
            params.push((name.clone(), segments.join("/")));
            *value
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie(patterns: &[&str]) -> RouteTrie {
        let mut t = RouteTrie::new();
        for (i, p) in patterns.iter().enumerate() {
            t.insert(p, i).unwrap();
        }
        t
    }

    #[test]
    fn params_and_tails_are_captured() {
        let t = trie(&["/echo/:id", "/files/*rest", "/"]);
        assert_eq!(
            t.lookup("/echo/42"),
            Some((0, vec![("id".into(), "42".into())]))
        );
        assert_eq!(
            t.lookup("/files/a/b.txt"),
            Some((1, vec![("rest".into(), "a/b.txt".into())]))
        );
        assert_eq!(t.lookup("/files"), Some((1, vec![("rest".into(), String::new())])));
        assert_eq!(t.lookup("/"), Some((2, vec![])));
        assert_eq!(t.lookup("/echo"), None);
        assert_eq!(t.lookup("/echo/1/2"), None);
    }

    #[test]
    fn literal_wins_over_param() {
        let t = trie(&["/a/:id", "/a/new"]);
        assert_eq!(t.lookup("/a/new").map(|(v, _)| v), Some(1));
        assert_eq!(t.lookup("/a/7").map(|(v, _)| v), Some(0));
    }

    #[test]
    fn backtracks_from_literal_to_param() {
        let t = trie(&["/a/b/c", "/a/:x/d"]);
        assert_eq!(
            t.lookup("/a/b/d"),
            Some((1, vec![("x".into(), "b".into())]))
        );
    }

    #[test]
    fn conflicts() {
        let mut t = trie(&["/a/:id", "/s/*rest", "/x"]);
        assert_eq!(t.insert("/a/:x", 9), Err(ConflictReason::Wildcard));
        assert_eq!(t.insert("/a/:id", 9), Err(ConflictReason::Duplicate));
        assert_eq!(t.insert("/x/", 9), Err(ConflictReason::Duplicate));
        assert_eq!(t.insert("/s/lit", 9), Err(ConflictReason::Wildcard));
        assert_eq!(t.insert("/s/*other", 9), Err(ConflictReason::Wildcard));
        assert_eq!(t.insert("/a/*rest", 9), Err(ConflictReason::Wildcard));
        assert_eq!(t.insert("/b/*rest/more", 9), Err(ConflictReason::Syntax));
        assert_eq!(t.insert("/b/:", 9), Err(ConflictReason::Syntax));
        assert_eq!(t.len(), 3);
        assert_eq!(t.lookup("/a/1").map(|(v, _)| v), Some(0));
    }
}
