use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::{Path, Segment};
use crate::parser;
use crate::template::{Body, Template};
use crate::value::Value;

#[derive(Debug)]
struct Frame {
    data: Value,
    iteration: Option<Iteration>,
    parent: Option<Arc<Frame>>,
}

/// Position of a frame pushed by an iterating section.
#[derive(Debug)]
struct Iteration {
    index: usize,
    len: usize,
    index_value: Value,
    len_value: Value,
}

#[derive(Debug)]
struct BlockFrame {
    blocks: Arc<BTreeMap<String, Body>>,
    parent: Option<Arc<BlockFrame>>,
}

/// The scope chain a template renders against.
///
/// A context is immutable: [`Context::push`] returns a new context whose top
/// frame holds the data and whose parent is the receiver, so one base context
/// can be shared by many renders. Lookups walk the frames from the top down
/// and finally consult the globals given to [`Context::base`].
///
/// ```
/// use minidust::{Context, Value};
///
/// let base = Context::base(Value::object([("site", "example")]));
/// let page = base.push(Value::object([("title", "Home")]));
///
/// assert_eq!(page.get("title"), Some(&Value::from("Home")));
/// assert_eq!(page.get("site"), Some(&Value::from("example")));
/// assert_eq!(base.get("title"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    stack: Option<Arc<Frame>>,
    globals: Option<Arc<Value>>,
    blocks: Option<Arc<BlockFrame>>,
    template_name: Option<Arc<str>>,
    depth: usize,
}

impl Context {
    /// A context with no frames, only globals.
    pub fn base<V: Into<Value>>(globals: V) -> Self {
        Self {
            globals: Some(Arc::new(globals.into())),
            ..Self::default()
        }
    }

    pub fn push<V: Into<Value>>(&self, data: V) -> Self {
        self.with_frame(Frame {
            data: data.into(),
            iteration: None,
            parent: self.stack.clone(),
        })
    }

    pub(crate) fn push_iteration(&self, data: Value, index: usize, len: usize) -> Self {
        self.with_frame(Frame {
            data,
            iteration: Some(Iteration {
                index,
                len,
                index_value: Value::from(index),
                len_value: Value::from(len),
            }),
            parent: self.stack.clone(),
        })
    }

    /// Replaces all frames with a single one holding `data`, keeping globals,
    /// blocks and the current template.
    pub fn rebase<V: Into<Value>>(&self, data: V) -> Self {
        self.with_frame(Frame {
            data: data.into(),
            iteration: None,
            parent: None,
        })
    }

    fn with_frame(&self, frame: Frame) -> Self {
        Self {
            stack: Some(Arc::new(frame)),
            ..self.clone()
        }
    }

    /// Data of the top frame.
    pub fn current(&self) -> Option<&Value> {
        self.stack.as_deref().map(|frame| &frame.data)
    }

    pub fn globals(&self) -> Option<&Value> {
        self.globals.as_deref()
    }

    /// Looks up a path such as `user.name`, `.title` or `items[0]`.
    ///
    /// Missing values and malformed paths are `None`, never an error.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let path = parser::parse_path(path).ok()?;
        self.get_path(&path)
    }

    pub(crate) fn get_path(&self, path: &Path) -> Option<&Value> {
        let mut segments = path.segments.iter();
        let mut value = if path.current {
            self.current()?
        } else {
            match segments.next()? {
                Segment::Key(key) => self.find(key)?,
                Segment::Index(_) | Segment::Dynamic(_) => return None,
            }
        };
        for segment in segments {
            value = match segment {
                Segment::Key(key) => value.get_key(key)?,
                Segment::Index(index) => value.get_index(*index)?,
                Segment::Dynamic(inner) => match self.get_path(inner)? {
                    Value::String(key) => value.get_key(key)?,
                    Value::Int(index) => value.get_index(usize::try_from(*index).ok()?)?,
                    _ => return None,
                },
            };
        }
        Some(value)
    }

    /// First frame defining `key`, then the globals.
    fn find(&self, key: &str) -> Option<&Value> {
        let mut frame = self.stack.as_deref();
        while let Some(current) = frame {
            if let Some(iteration) = &current.iteration {
                match key {
                    "$idx" => return Some(&iteration.index_value),
                    "$len" => return Some(&iteration.len_value),
                    _ => {}
                }
            }
            if let Some(value) = current.data.as_object().and_then(|map| map.get(key)) {
                return Some(value);
            }
            frame = current.parent.as_deref();
        }
        self.globals
            .as_deref()
            .and_then(|globals| globals.get_key(key))
    }

    /// Name of the template currently rendering at this point.
    pub fn template_name(&self) -> Option<&str> {
        self.template_name.as_deref()
    }

    /// `(index, len)` when the top frame was pushed by an iterating section.
    pub fn iteration(&self) -> Option<(usize, usize)> {
        self.stack
            .as_deref()
            .and_then(|frame| frame.iteration.as_ref())
            .map(|it| (it.index, it.len))
    }

    pub(crate) const fn depth(&self) -> usize {
        self.depth
    }

    /// The context a template's body renders in.
    pub(crate) fn enter(&self, template: &Template) -> Self {
        let blocks = if template.blocks.is_empty() {
            self.blocks.clone()
        } else {
            Some(Arc::new(BlockFrame {
                blocks: Arc::clone(&template.blocks),
                parent: self.blocks.clone(),
            }))
        };
        Self {
            stack: self.stack.clone(),
            globals: self.globals.clone(),
            blocks,
            template_name: template.name.clone(),
            depth: self.depth.saturating_add(1),
        }
    }

    /// Inline partial overriding `{+name}`, innermost template first.
    pub(crate) fn block(&self, name: &str) -> Option<&Body> {
        let mut frame = self.blocks.as_deref();
        while let Some(current) = frame {
            if let Some(body) = current.blocks.get(name) {
                return Some(body);
            }
            frame = current.parent.as_deref();
        }
        None
    }
}

impl From<Value> for Context {
    /// A context with `value` as its only frame.
    fn from(value: Value) -> Self {
        Self::default().push(value)
    }
}

/// Evaluated parameters of a section, helper or partial tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn insert(&mut self, key: String, value: Value) {
        self.0.insert(key, value);
    }

    pub(crate) fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}
