use std::sync::Arc;

use futures::future::LocalBoxFuture;

use crate::context::{Context, Params};
use crate::error::{MinidustError, MinidustResult};
use crate::render::Chunk;
use crate::template::{Bodies, Template};
use crate::value::Value;

/// What a helper hands back to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Rendered like a reference: HTML-escaped text unless empty.
    Value(Value),
    /// The helper produced its output through the chunk itself.
    Written,
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Reply {
    fn from(value: &str) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<String> for Reply {
    fn from(value: String) -> Self {
        Self::Value(Value::from(value))
    }
}

/// A callable reachable as `{@name}` or stored in data as a
/// [`Value::Function`].
///
/// Closures with the matching signature are helpers.
pub trait Helper: Send + Sync {
    /// # Errors
    /// Whatever the helper reports; the render fails with it.
    fn call(
        &self,
        chunk: &mut Chunk<'_>,
        ctx: &Context,
        bodies: &Bodies,
        params: &Params,
    ) -> MinidustResult<Reply>;
}

impl<F> Helper for F
where
    F: Fn(&mut Chunk<'_>, &Context, &Bodies, &Params) -> MinidustResult<Reply> + Send + Sync,
{
    fn call(
        &self,
        chunk: &mut Chunk<'_>,
        ctx: &Context,
        bodies: &Bodies,
        params: &Params,
    ) -> MinidustResult<Reply> {
        self(chunk, ctx, bodies, params)
    }
}

/// A `{ref|name}` filter.
pub trait Filter: Send + Sync {
    /// # Errors
    /// Fails the render.
    fn apply(&self, value: &Value) -> MinidustResult<Value>;
}

impl<F> Filter for F
where
    F: Fn(&Value) -> MinidustResult<Value> + Send + Sync,
{
    fn apply(&self, value: &Value) -> MinidustResult<Value> {
        self(value)
    }
}

/// Result of asking a [`Loader`] for a template the registry does not hold.
#[derive(Debug, Clone)]
pub enum Loaded {
    /// Template source, compiled under the requested name.
    Source(String),
    /// A ready template, rendered under its own name.
    Template(Arc<Template>),
    /// Render the template called by another name instead. The target is
    /// looked up like a partial: the registry, then this loader again.
    Redirect(String),
}

pub type LoadFuture = LocalBoxFuture<'static, MinidustResult<Loaded>>;

/// Resolves template names missing from the registry.
///
/// Plain closures `Fn(&str) -> MinidustResult<Loaded>` are loaders that
/// answer immediately.
pub trait Loader: Send + Sync {
    fn load(&self, name: &str) -> LoadFuture;
}

impl<F> Loader for F
where
    F: Fn(&str) -> MinidustResult<Loaded> + Send + Sync,
{
    fn load(&self, name: &str) -> LoadFuture {
        Box::pin(futures::future::ready(self(name)))
    }
}

/// Push-style consumer for [`crate::OutputStream::pipe`].
pub trait Sink {
    fn write(&mut self, data: &str);

    fn end(&mut self);

    fn error(&mut self, error: &MinidustError) {
        let _ = error;
    }
}
