use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Config;
use crate::context::{Context, Params};
use crate::diagnostics::{Diagnostics, LogLevel, LogRecord};
use crate::error::{MinidustError, MinidustResult};
use crate::interface::{Filter, Helper, Loaded, Loader, Reply};
use crate::registry::Registry;
use crate::render::Chunk;
use crate::stream::{OutputStream, Render};
use crate::template::{self, Bodies, Compiled, Template, TemplateRef};
use crate::value::Value;
use crate::{filters, helpers};

struct Inner {
    config: RwLock<Config>,
    registry: Registry,
    helpers: RwLock<HashMap<String, Arc<dyn Helper>>>,
    filters: RwLock<HashMap<String, Arc<dyn Filter>>>,
    loader: RwLock<Option<Arc<dyn Loader>>>,
    diagnostics: Diagnostics,
}

/// `Engine` owns everything renders share: the template registry, the
/// helper and filter tables, an optional loader and the configuration.
///
/// Cloning is cheap and every clone sees the same state. A render takes a
/// snapshot of the configuration when it starts.
///
/// # Examples
///
/// ```
/// use minidust::{Context, Engine, Value};
///
/// // Create a new engine
/// let engine = Engine::new();
///
/// // Add a template
/// engine.add_template("greeting", "Hello, {name}!").unwrap();
///
/// // Render it with some data
/// let data = Value::object([("name", "World")]);
/// let output = futures::executor::block_on(engine.render("greeting", Context::base(data))).unwrap();
/// assert_eq!(output, "Hello, World!");
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Creates an engine with the default [`Config`], the built-in helpers
    /// (`sep`, `first`, `last`, `idx`, `size`) and the built-in filters.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an engine like [`Engine::new`] with `config` in place.
    pub fn with_config(config: Config) -> Self {
        let engine = Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                registry: Registry::default(),
                helpers: RwLock::new(HashMap::new()),
                filters: RwLock::new(HashMap::new()),
                loader: RwLock::new(None),
                diagnostics: Diagnostics::default(),
            }),
        };
        for (name, helper) in helpers::BUILTIN {
            engine.register_helper(name, *helper);
        }
        for (name, filter) in filters::BUILTIN {
            engine.register_filter(name, *filter);
        }
        engine
    }

    pub fn config(&self) -> Config {
        *self.inner.config.read()
    }

    /// Replaces the configuration. Renders already running keep theirs.
    pub fn set_config(&self, config: Config) {
        *self.inner.config.write() = config;
    }

    /// Compiles `source` into a serializable template.
    ///
    /// # Arguments
    ///
    /// * `source` - The template text
    /// * `name` - The name the template will be registered under, if any
    ///
    /// # Errors
    ///
    /// * `MinidustError::Parse` if the source contains syntax errors. The
    ///   error names the template and the line and column of the problem.
    ///
    /// # Examples
    ///
    /// ```
    /// use minidust::Engine;
    ///
    /// let engine = Engine::new();
    /// let compiled = engine.compile("Hello {name}!", Some("hello")).unwrap();
    /// assert_eq!(compiled.name(), Some("hello"));
    ///
    /// assert!(engine.compile("{#list}", Some("broken")).is_err());
    /// ```
    #[tracing::instrument(level = "debug", skip(self, source), err)]
    pub fn compile(&self, source: &str, name: Option<&str>) -> MinidustResult<Compiled> {
        let compiled = template::compile(source, name, self.config().whitespace)?;
        Ok(compiled)
    }

    /// Turns a compiled template into a renderable one, registering it
    /// under its name when it has one and caching is enabled.
    pub fn load_source(&self, compiled: Compiled) -> Arc<Template> {
        let template = Arc::new(Template::from(compiled));
        if let Some(name) = template.name() {
            if self.config().cache {
                self.inner.registry.insert(name, Arc::clone(&template));
            }
        }
        template
    }

    /// Compiles `source` and registers it as `name`.
    ///
    /// An existing template of the same name is replaced.
    ///
    /// # Errors
    ///
    /// * `MinidustError::Parse` if the source contains syntax errors
    ///
    /// # Examples
    ///
    /// ```
    /// use minidust::Engine;
    ///
    /// let engine = Engine::new();
    /// engine.add_template("greeting", "Hello, {name}!").unwrap();
    /// assert!(engine.get_template("greeting").is_some());
    /// ```
    pub fn add_template(&self, name: &str, source: &str) -> MinidustResult<Arc<Template>> {
        let compiled = self.compile(source, Some(name))?;
        Ok(self.load_source(compiled))
    }

    /// Compiles `source` into an anonymous template that is never
    /// registered. Render it by passing it to [`Engine::render`].
    ///
    /// # Errors
    ///
    /// * `MinidustError::Parse` if the source contains syntax errors
    pub fn compile_fn(&self, source: &str) -> MinidustResult<Arc<Template>> {
        let compiled = self.compile(source, None)?;
        Ok(Arc::new(Template::from(compiled)))
    }

    pub fn get_template(&self, name: &str) -> Option<Arc<Template>> {
        self.inner.registry.get(name)
    }

    /// Makes the template registered as `name` report `alias` as its name
    /// from now on. The registry key does not change.
    ///
    /// Returns `false` when nothing is registered as `name`.
    pub fn rename_template(&self, name: &str, alias: &str) -> bool {
        self.inner.registry.rename(name, alias)
    }

    pub fn remove_template(&self, name: &str) -> Option<Arc<Template>> {
        self.inner.registry.remove(name)
    }

    pub fn clear_templates(&self) {
        self.inner.registry.clear();
    }

    /// Names of every registered template, sorted.
    pub fn template_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// Makes `helper` callable as `{@name}`, replacing any helper of the
    /// same name, built-ins included.
    ///
    /// # Examples
    ///
    /// ```
    /// use minidust::{Chunk, Context, Engine, Reply};
    ///
    /// let engine = Engine::new();
    /// engine.register_helper("shout", |_: &mut Chunk<'_>, _: &_, _: &_, params: &minidust::Params| {
    ///     let word = params.get("word").map(ToString::to_string).unwrap_or_default();
    ///     Ok(Reply::from(word.to_uppercase()))
    /// });
    /// engine.add_template("t", "{@shout word=\"hey\"/}").unwrap();
    ///
    /// let out = futures::executor::block_on(engine.render("t", Context::default())).unwrap();
    /// assert_eq!(out, "HEY");
    /// ```
    pub fn register_helper<F>(&self, name: &str, helper: F)
    where
        F: Fn(&mut Chunk<'_>, &Context, &Bodies, &Params) -> MinidustResult<Reply>
            + Send
            + Sync
            + 'static,
    {
        self.register_helper_impl(name, Arc::new(helper));
    }

    /// Like [`Engine::register_helper`] for types implementing [`Helper`].
    pub fn register_helper_impl(&self, name: &str, helper: Arc<dyn Helper>) {
        self.inner.helpers.write().insert(name.to_owned(), helper);
    }

    /// Makes `filter` usable as `{ref|name}`.
    pub fn register_filter<F>(&self, name: &str, filter: F)
    where
        F: Fn(&Value) -> MinidustResult<Value> + Send + Sync + 'static,
    {
        self.inner
            .filters
            .write()
            .insert(name.to_owned(), Arc::new(filter));
    }

    /// Consulted for partials and renders naming a template the registry
    /// does not hold, or for every name when caching is disabled.
    pub fn set_loader<L: Loader + 'static>(&self, loader: L) {
        *self.inner.loader.write() = Some(Arc::new(loader));
    }

    pub fn clear_loader(&self) {
        *self.inner.loader.write() = None;
    }

    /// Renders a template and resolves to the whole output.
    ///
    /// # Arguments
    ///
    /// * `target` - A template name or a template
    /// * `ctx` - The render context, or any [`Value`] to use as data
    ///
    /// The returned future fails with the first error of the render; no
    /// partial output is returned in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use minidust::{Context, Engine, MinidustError};
    ///
    /// let engine = Engine::new();
    /// let result = futures::executor::block_on(engine.render("missing", Context::default()));
    /// assert!(matches!(result, Err(MinidustError::TemplateNotFound { .. })));
    /// ```
    pub fn render<T, C>(&self, target: T, ctx: C) -> Render
    where
        T: Into<TemplateRef>,
        C: Into<Context>,
    {
        self.stream(target, ctx).into_render()
    }

    /// Renders to completion on the current thread and hands the result to
    /// `completion` exactly once.
    pub fn render_with<T, C, F>(&self, target: T, ctx: C, completion: F)
    where
        T: Into<TemplateRef>,
        C: Into<Context>,
        F: FnOnce(MinidustResult<String>),
    {
        completion(futures::executor::block_on(self.render(target, ctx)));
    }

    /// Starts a render whose output arrives piece by piece, in template
    /// order, as deferred work completes.
    pub fn stream<T, C>(&self, target: T, ctx: C) -> OutputStream
    where
        T: Into<TemplateRef>,
        C: Into<Context>,
    {
        let ctx = ctx.into();
        match target.into() {
            TemplateRef::Name(name) => {
                OutputStream::new(self.clone(), move |chunk| chunk.partial(&name, &ctx))
            }
            TemplateRef::Template(template) => OutputStream::new(self.clone(), move |chunk| {
                chunk.render_template(&template, &ctx)
            }),
        }
    }

    /// Compiles `source` without registering it and streams its output.
    ///
    /// A compile error is delivered through the stream.
    pub fn render_source<C: Into<Context>>(&self, source: &str, ctx: C) -> OutputStream {
        match self.compile_fn(source) {
            Ok(template) => self.stream(template, ctx),
            Err(error) => OutputStream::failed(self.clone(), error),
        }
    }

    /// Takes the log records captured while [`Config::debug`] was enabled.
    pub fn drain_log(&self) -> Vec<LogRecord> {
        self.inner.diagnostics.drain()
    }

    pub(crate) fn log(&self, level: LogLevel, message: String) {
        self.inner
            .diagnostics
            .record(self.config().debug, level, message);
    }

    pub(crate) fn helper(&self, name: &str) -> Option<Arc<dyn Helper>> {
        self.inner.helpers.read().get(name).cloned()
    }

    pub(crate) fn loader(&self) -> Option<Arc<dyn Loader>> {
        self.inner.loader.read().clone()
    }

    /// Registry hit for `name`. With caching off the registry is skipped
    /// whenever a loader can answer instead.
    pub(crate) fn lookup(&self, name: &str, cache: bool) -> Option<Arc<Template>> {
        if cache || self.inner.loader.read().is_none() {
            self.inner.registry.get(name)
        } else {
            None
        }
    }

    /// Turns a loader answer for `name` into a template.
    ///
    /// A redirect is looked up like a partial: the registry first (subject
    /// to `cache`), then the loader. Chains longer than `limit` fail.
    pub(crate) async fn resolve(
        &self,
        name: &str,
        loaded: Loaded,
        cache: bool,
        limit: usize,
    ) -> MinidustResult<Arc<Template>> {
        let mut name = name.to_owned();
        let mut loaded = loaded;
        for _ in 0..=limit {
            let other = match loaded {
                Loaded::Source(source) => {
                    let compiled = self.compile(&source, Some(name.as_str()))?;
                    return Ok(self.load_source(compiled));
                }
                Loaded::Template(template) => return Ok(template),
                Loaded::Redirect(other) => other,
            };
            if let Some(template) = self.lookup(&other, cache) {
                return Ok(template);
            }
            let Some(loader) = self.loader() else {
                return Err(MinidustError::TemplateNotFound {
                    name: other,
                    template: None,
                });
            };
            self.log(
                LogLevel::Debug,
                format!("Redirecting `{name}` to `{other}`"),
            );
            loaded = loader.load(&other).await?;
            name = other;
        }
        Err(MinidustError::RecursionLimit {
            limit,
            template: Some(name),
        })
    }

    /// Runs `value` through `filters` left to right and renders the result
    /// as text. Unknown filters are skipped with a warning.
    pub(crate) fn apply_filters<S: AsRef<str>>(
        &self,
        value: &Value,
        filters: &[S],
    ) -> MinidustResult<String> {
        let mut current = Cow::Borrowed(value);
        for name in filters {
            let name = name.as_ref();
            let Some(filter) = self.inner.filters.read().get(name).cloned() else {
                self.log(LogLevel::Warn, format!("Invalid filter [{name}]"));
                continue;
            };
            let next = filter
                .apply(&current)
                .map_err(|error| error.in_helper(name, None))?;
            current = Cow::Owned(next);
        }
        Ok(current.to_string())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut helpers: Vec<String> = self.inner.helpers.read().keys().cloned().collect();
        helpers.sort();
        f.debug_struct("Engine")
            .field("config", &self.config())
            .field("templates", &self.template_names())
            .field("helpers", &helpers)
            .field("has_loader", &self.inner.loader.read().is_some())
            .finish_non_exhaustive()
    }
}
