use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::{AstBodies, AstNode, Param, ParamValue, PartialName, Path, SectionKind};
use crate::error::ParseError;
use crate::optimizer::{Optimized, optimize};
use crate::parser::parse;

/// One instruction of a render program.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Write(String),
    Reference {
        path: Path,
        filters: Vec<String>,
    },
    Section {
        kind: SectionKind,
        key: Path,
        context: Option<Path>,
        params: Vec<ParamStep>,
        bodies: Bodies,
    },
    Helper {
        name: String,
        context: Option<Path>,
        params: Vec<ParamStep>,
        bodies: Bodies,
    },
    Partial {
        name: PartialTarget,
        context: Option<Path>,
        params: Vec<ParamStep>,
    },
    Block {
        name: String,
        default: Option<Body>,
    },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParamStep {
    pub(crate) key: String,
    pub(crate) value: ParamExpr,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParamExpr {
    Text(String),
    Int(i64),
    Float(f64),
    Path(Path),
    /// Quoted value with references, rendered to text before use.
    Body(Body),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PartialTarget {
    Static(String),
    Dynamic(Body),
}

/// A compiled sequence of steps: a template body, a section body or a
/// quoted parameter.
///
/// Bodies are shared, so cloning one is cheap.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body(Arc<Vec<Step>>);

impl Body {
    pub(crate) fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The bodies handed to a section or helper: the main block and the
/// `{:name}` alternatives.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bodies {
    block: Option<Body>,
    named: Vec<(String, Body)>,
}

impl Bodies {
    pub const fn block(&self) -> Option<&Body> {
        self.block.as_ref()
    }

    /// The `{:else}` body.
    pub fn else_body(&self) -> Option<&Body> {
        self.get("else")
    }

    pub fn get(&self, name: &str) -> Option<&Body> {
        self.named
            .iter()
            .find(|(body_name, _)| body_name == name)
            .map(|(_, body)| body)
    }
}

/// The serializable output of [`crate::Engine::compile`].
///
/// Turn it into a [`Template`] with [`crate::Engine::load_source`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub(crate) name: Option<String>,
    pub(crate) body: Body,
    pub(crate) blocks: BTreeMap<String, Body>,
}

impl Compiled {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// An executable template.
///
/// Templates are immutable and shared between renders through `Arc`.
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) name: Option<Arc<str>>,
    pub(crate) body: Body,
    pub(crate) blocks: Arc<BTreeMap<String, Body>>,
}

impl Template {
    /// The name reported by [`crate::Context::template_name`] while this
    /// template renders.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The same program reporting a different name.
    pub fn with_name(&self, name: &str) -> Self {
        Self {
            name: Some(Arc::from(name)),
            body: self.body.clone(),
            blocks: Arc::clone(&self.blocks),
        }
    }

    pub fn to_compiled(&self) -> Compiled {
        Compiled {
            name: self.name.as_deref().map(str::to_owned),
            body: self.body.clone(),
            blocks: self.blocks.as_ref().clone(),
        }
    }
}

impl From<Compiled> for Template {
    fn from(compiled: Compiled) -> Self {
        Self {
            name: compiled.name.map(Arc::from),
            body: compiled.body,
            blocks: Arc::new(compiled.blocks),
        }
    }
}

/// What to render: a registered name or a template in hand.
#[derive(Debug, Clone)]
pub enum TemplateRef {
    Name(String),
    Template(Arc<Template>),
}

impl From<&str> for TemplateRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for TemplateRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Arc<Template>> for TemplateRef {
    fn from(template: Arc<Template>) -> Self {
        Self::Template(template)
    }
}

impl From<&Arc<Template>> for TemplateRef {
    fn from(template: &Arc<Template>) -> Self {
        Self::Template(Arc::clone(template))
    }
}

impl From<Template> for TemplateRef {
    fn from(template: Template) -> Self {
        Self::Template(Arc::new(template))
    }
}

/// Parses, optimizes and generates the render program for `source`.
pub(crate) fn compile(
    source: &str,
    name: Option<&str>,
    whitespace: bool,
) -> Result<Compiled, ParseError> {
    let ast = parse(source, name)?;
    let Optimized { nodes, blocks } = optimize(ast, whitespace);

    let mut compiled_blocks = BTreeMap::new();
    for (block_name, body) in blocks {
        compiled_blocks.insert(block_name.to_owned(), generate(body));
    }

    Ok(Compiled {
        name: name.map(str::to_owned),
        body: generate(nodes),
        blocks: compiled_blocks,
    })
}

fn generate(nodes: Vec<AstNode<'_>>) -> Body {
    Body(Arc::new(nodes.into_iter().filter_map(generate_step).collect()))
}

fn generate_step(node: AstNode<'_>) -> Option<Step> {
    let step = match node {
        AstNode::Buffer(text) => Step::Write(text.into_owned()),
        AstNode::Format(text) | AstNode::Raw(text) => Step::Write(text.to_owned()),
        AstNode::Special(special) => Step::Write(special.text().to_owned()),
        // Hoisted by the optimizer.
        AstNode::Comment(_) | AstNode::InlinePartial { .. } => return None,
        AstNode::Reference { path, filters } => Step::Reference {
            path,
            filters: filters.into_iter().map(str::to_owned).collect(),
        },
        AstNode::Section {
            kind,
            key,
            context,
            params,
            bodies,
        } => Step::Section {
            kind,
            key,
            context,
            params: generate_params(params),
            bodies: generate_bodies(bodies),
        },
        AstNode::Helper {
            name,
            context,
            params,
            bodies,
        } => Step::Helper {
            name: name.to_owned(),
            context,
            params: generate_params(params),
            bodies: generate_bodies(bodies),
        },
        AstNode::Partial {
            name,
            context,
            params,
        } => Step::Partial {
            name: match name {
                PartialName::Static(text) => PartialTarget::Static(text.into_owned()),
                PartialName::Interpolated(parts) => PartialTarget::Dynamic(generate(parts)),
            },
            context,
            params: generate_params(params),
        },
        AstNode::Block { name, default } => Step::Block {
            name: name.to_owned(),
            default: default.map(generate),
        },
    };
    Some(step)
}

fn generate_bodies(bodies: AstBodies<'_>) -> Bodies {
    Bodies {
        block: bodies.block.map(generate),
        named: bodies
            .named
            .into_iter()
            .map(|(name, body)| (name.to_owned(), generate(body)))
            .collect(),
    }
}

fn generate_params(params: Vec<Param<'_>>) -> Vec<ParamStep> {
    params
        .into_iter()
        .map(|Param { key, value }| ParamStep {
            key: key.to_owned(),
            value: match value {
                ParamValue::Text(text) => ParamExpr::Text(text.into_owned()),
                ParamValue::Int(i) => ParamExpr::Int(i),
                ParamValue::Float(f) => ParamExpr::Float(f),
                ParamValue::Path(path) => ParamExpr::Path(path),
                ParamValue::Interpolated(parts) => ParamExpr::Body(generate(parts)),
            },
        })
        .collect()
}
