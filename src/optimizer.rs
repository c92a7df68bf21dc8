//! Rewrites the parsed AST before code generation.
//!
//! - comments are removed
//! - specials and raw blocks become text
//! - format nodes are dropped unless whitespace is preserved
//! - adjacent text is merged into a single buffer
//! - references get the auto-escape filter unless `|s` is present
//! - inline partials are hoisted out of the tree, last definition wins
//! - quoted params and partial names without references become plain text

use std::borrow::Cow;

use crate::ast::{AstBodies, AstNode, Param, ParamValue, PartialName};

/// Filter appended to every reference that does not opt out with `|s`.
pub(crate) const AUTO_ESCAPE: &str = "h";
const SUPPRESS_ESCAPE: &str = "s";

pub(crate) struct Optimized<'a> {
    pub(crate) nodes: Vec<AstNode<'a>>,
    /// Hoisted `{<name}` bodies in source order.
    pub(crate) blocks: Vec<(&'a str, Vec<AstNode<'a>>)>,
}

pub(crate) fn optimize(nodes: Vec<AstNode<'_>>, whitespace: bool) -> Optimized<'_> {
    let mut optimizer = Optimizer {
        whitespace,
        blocks: Vec::new(),
    };
    let nodes = optimizer.nodes(nodes);
    Optimized {
        nodes,
        blocks: optimizer.blocks,
    }
}

struct Optimizer<'a> {
    whitespace: bool,
    blocks: Vec<(&'a str, Vec<AstNode<'a>>)>,
}

impl<'a> Optimizer<'a> {
    fn nodes(&mut self, nodes: Vec<AstNode<'a>>) -> Vec<AstNode<'a>> {
        let mut out: Vec<AstNode<'a>> = Vec::with_capacity(nodes.len());
        for node in nodes {
            let Some(node) = self.node(node) else {
                continue;
            };
            if let AstNode::Buffer(text) = &node {
                if text.is_empty() {
                    continue;
                }
                if let Some(AstNode::Buffer(previous)) = out.last_mut() {
                    previous.to_mut().push_str(text);
                    continue;
                }
            }
            out.push(node);
        }
        out
    }

    fn node(&mut self, node: AstNode<'a>) -> Option<AstNode<'a>> {
        match node {
            AstNode::Buffer(text) => Some(AstNode::Buffer(text)),
            AstNode::Format(text) => self
                .whitespace
                .then_some(AstNode::Buffer(Cow::Borrowed(text))),
            AstNode::Special(special) => Some(AstNode::Buffer(Cow::Borrowed(special.text()))),
            AstNode::Raw(text) => Some(AstNode::Buffer(Cow::Borrowed(text))),
            AstNode::Comment(_) => None,
            AstNode::Reference { path, mut filters } => {
                if filters.contains(&SUPPRESS_ESCAPE) {
                    filters.retain(|f| *f != SUPPRESS_ESCAPE);
                } else {
                    filters.push(AUTO_ESCAPE);
                }
                Some(AstNode::Reference { path, filters })
            }
            AstNode::Section {
                kind,
                key,
                context,
                params,
                bodies,
            } => Some(AstNode::Section {
                kind,
                key,
                context,
                params: self.params(params),
                bodies: self.bodies(bodies),
            }),
            AstNode::Helper {
                name,
                context,
                params,
                bodies,
            } => Some(AstNode::Helper {
                name,
                context,
                params: self.params(params),
                bodies: self.bodies(bodies),
            }),
            AstNode::Partial {
                name,
                context,
                params,
            } => {
                let name = match name {
                    PartialName::Static(text) => PartialName::Static(text),
                    PartialName::Interpolated(parts) => match self.text_only(parts) {
                        Ok(text) => PartialName::Static(text),
                        Err(parts) => PartialName::Interpolated(parts),
                    },
                };
                Some(AstNode::Partial {
                    name,
                    context,
                    params: self.params(params),
                })
            }
            AstNode::Block { name, default } => Some(AstNode::Block {
                name,
                default: default.map(|body| self.nodes(body)),
            }),
            AstNode::InlinePartial { name, body } => {
                let body = self.nodes(body);
                self.blocks.push((name, body));
                None
            }
        }
    }

    fn bodies(&mut self, bodies: AstBodies<'a>) -> AstBodies<'a> {
        AstBodies {
            block: bodies.block.map(|body| self.nodes(body)),
            named: bodies
                .named
                .into_iter()
                .map(|(name, body)| (name, self.nodes(body)))
                .collect(),
        }
    }

    fn params(&mut self, params: Vec<Param<'a>>) -> Vec<Param<'a>> {
        params
            .into_iter()
            .map(|Param { key, value }| {
                let value = match value {
                    ParamValue::Interpolated(parts) => match self.text_only(parts) {
                        Ok(text) => ParamValue::Text(text),
                        Err(parts) => ParamValue::Interpolated(parts),
                    },
                    other @ (ParamValue::Text(_)
                    | ParamValue::Int(_)
                    | ParamValue::Float(_)
                    | ParamValue::Path(_)) => other,
                };
                Param { key, value }
            })
            .collect()
    }

    /// Optimizes `parts`; if nothing but text remains, returns that text.
    fn text_only(&mut self, parts: Vec<AstNode<'a>>) -> Result<Cow<'a, str>, Vec<AstNode<'a>>> {
        let mut parts = self.nodes(parts);
        match parts.as_mut_slice() {
            [] => Ok(Cow::Borrowed("")),
            [AstNode::Buffer(text)] => Ok(std::mem::take(text)),
            _ => Err(parts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    macro_rules! buf {
        ($data:expr) => {
            AstNode::Buffer(Cow::Borrowed($data))
        };
    }

    fn optimized(source: &str, whitespace: bool) -> Optimized<'_> {
        optimize(parse(source, None).unwrap(), whitespace)
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_whitespace_dropped_by_default() {
        assert_eq!(optimized("a\n  b\n", false).nodes, vec![buf!("ab")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_whitespace_preserved() {
        assert_eq!(optimized("a\n  b\n", true).nodes, vec![buf!("a\n  b\n")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comments_specials_raw_merge() {
        assert_eq!(
            optimized("a{! gone !}{~n}{~lb}{`{x}`}b", false).nodes,
            vec![buf!("a\n{{x}b")]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literal_brace_merges() {
        assert_eq!(optimized("a { b }", false).nodes, vec![buf!("a { b }")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_auto_escape_filter() {
        let nodes = optimized("{a}{b|s}{c|uc}{d|s|j}", false).nodes;
        let filters: Vec<Vec<&str>> = nodes
            .iter()
            .map(|node| match node {
                AstNode::Reference { filters, .. } => filters.clone(),
                other => panic!("expected reference, got {other:?}"),
            })
            .collect();
        assert_eq!(
            filters,
            vec![vec!["h"], vec![], vec!["uc", "h"], vec!["j"]]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_inline_partials_hoisted() {
        let optimized = optimized("x{<title}One{/title}{#s}{<title}Two{/title}{/s}", false);
        assert_eq!(
            optimized.blocks,
            vec![("title", vec![buf!("One")]), ("title", vec![buf!("Two")])]
        );
        let [AstNode::Buffer(_), AstNode::Section { bodies, .. }] = optimized.nodes.as_slice() else {
            panic!("unexpected nodes {:?}", optimized.nodes);
        };
        assert_eq!(bodies.block, Some(vec![]));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_static_params_and_partial_names() {
        let nodes = optimized(r#"{>"na{~s}me" a="x{~n}y" b="{v}"/}"#, false).nodes;
        let [AstNode::Partial { name, params, .. }] = nodes.as_slice() else {
            panic!("unexpected nodes {nodes:?}");
        };
        assert_eq!(name, &PartialName::Static(Cow::Borrowed("na me")));
        assert_eq!(params[0].value, ParamValue::Text(Cow::Borrowed("x\ny")));
        assert!(matches!(params[1].value, ParamValue::Interpolated(_)));
    }
}
