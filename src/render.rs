use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Waker};

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use futures::task::noop_waker;

use crate::ast::{Path, SectionKind};
use crate::chunk::{ChunkId, ChunkList};
use crate::config::Config;
use crate::context::{Context, Params};
use crate::diagnostics::LogLevel;
use crate::engine::Engine;
use crate::error::{MinidustError, MinidustResult};
use crate::interface::{Helper, Reply};
use crate::optimizer::AUTO_ESCAPE;
use crate::stream::Progress;
use crate::template::{Bodies, Body, ParamExpr, ParamStep, PartialTarget, Step, Template};
use crate::value::Value;

/// Work a deferred operation hands back once its future resolves: it writes
/// into the chunk reserved for it.
pub type Continuation = Box<dyn FnOnce(&mut Chunk<'_>) -> MinidustResult<()>>;

type TaskFuture = LocalBoxFuture<'static, MinidustResult<Continuation>>;
type SharedLoad = Shared<LocalBoxFuture<'static, MinidustResult<Arc<Template>>>>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Data(String),
    End,
    Error(MinidustError),
}

struct Task {
    chunk: ChunkId,
    future: TaskFuture,
}

/// Per-render state: the chunk list, parked deferred work and the events
/// waiting to be delivered.
pub(crate) struct Scheduler {
    engine: Engine,
    config: Config,
    chunks: ChunkList,
    tasks: Vec<Task>,
    /// Loads started by this render, shared by every partial that needs them.
    loads: HashMap<String, SharedLoad>,
    events: VecDeque<Event>,
    state: Progress,
    waker: Option<Waker>,
}

impl Scheduler {
    pub(crate) fn new(engine: Engine) -> Self {
        let config = engine.config();
        Self {
            engine,
            config,
            chunks: ChunkList::new(),
            tasks: Vec::new(),
            loads: HashMap::new(),
            events: VecDeque::new(),
            state: Progress::Pending,
            waker: None,
        }
    }

    pub(crate) const fn state(&self) -> Progress {
        self.state
    }

    pub(crate) fn pop_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub(crate) fn set_waker(&mut self, waker: &Waker) {
        self.waker = Some(waker.clone());
    }

    /// Runs `job` against the root chunk and ends the chunk it finishes in.
    pub(crate) fn start<F>(&mut self, job: F)
    where
        F: FnOnce(&mut Chunk<'_>) -> MinidustResult<()>,
    {
        let mut chunk = Chunk {
            scheduler: self,
            id: ChunkList::root(),
        };
        let result = job(&mut chunk).and_then(|()| chunk.finish());
        match result {
            Ok(()) => self.flush(),
            Err(error) => self.fail(error),
        }
    }

    fn spawn(&mut self, chunk: ChunkId, mut future: TaskFuture) -> MinidustResult<()> {
        let waker = self.waker.clone().unwrap_or_else(noop_waker);
        let mut cx = TaskContext::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => self.complete(chunk, result),
            Poll::Pending => {
                tracing::trace!(?chunk, parked = self.tasks.len(), "deferred work parked");
                self.tasks.push(Task { chunk, future });
                Ok(())
            }
        }
    }

    fn complete(&mut self, id: ChunkId, result: MinidustResult<Continuation>) -> MinidustResult<()> {
        let continuation = result?;
        let mut chunk = Chunk {
            scheduler: self,
            id,
        };
        continuation(&mut chunk)?;
        chunk.finish()
    }

    /// Polls parked tasks until none of them makes progress.
    pub(crate) fn poll_tasks(&mut self, cx: &mut TaskContext<'_>) {
        loop {
            let mut progressed = false;
            let mut i = 0;
            while self.state == Progress::Pending {
                let Some(task) = self.tasks.get_mut(i) else {
                    break;
                };
                let Poll::Ready(result) = task.future.as_mut().poll(cx) else {
                    i += 1;
                    continue;
                };
                let task = self.tasks.remove(i);
                progressed = true;
                match self.complete(task.chunk, result) {
                    Ok(()) => self.flush(),
                    Err(error) => self.fail(error),
                }
            }
            if !progressed || self.state != Progress::Pending {
                return;
            }
        }
    }

    fn flush(&mut self) {
        if self.state != Progress::Pending {
            return;
        }
        let (text, done) = self.chunks.flush();
        if !text.is_empty() {
            self.events.push_back(Event::Data(text));
        }
        if done {
            self.state = Progress::Complete;
            self.events.push_back(Event::End);
        }
    }

    /// Fails the render once; later failures are ignored.
    pub(crate) fn fail(&mut self, error: MinidustError) {
        if self.state != Progress::Pending {
            return;
        }
        self.engine.log(LogLevel::Error, error.to_string());
        self.state = Progress::Failed;
        self.chunks.discard();
        self.tasks.clear();
        self.loads.clear();
        self.events.push_back(Event::Error(error));
    }

    fn load(&mut self, name: &str, from: Option<&str>) -> MinidustResult<SharedLoad> {
        if let Some(load) = self.loads.get(name) {
            return Ok(load.clone());
        }
        let Some(loader) = self.engine.loader() else {
            self.engine.log(
                LogLevel::Error,
                format!("Template Not Found: {name}"),
            );
            return Err(MinidustError::TemplateNotFound {
                name: name.to_owned(),
                template: from.map(str::to_owned),
            });
        };

        self.engine
            .log(LogLevel::Debug, format!("Loading template `{name}`"));
        let pending = loader.load(name);
        let engine = self.engine.clone();
        let owned_name = name.to_owned();
        let (cache, limit) = (self.config.cache, self.config.max_partial_depth);
        let load = async move {
            let loaded = pending.await?;
            engine.resolve(&owned_name, loaded, cache, limit).await
        }
        .boxed_local()
        .shared();
        self.loads.insert(name.to_owned(), load.clone());
        Ok(load)
    }
}

/// Handle to the chunk a render step is currently writing into.
///
/// Helpers receive one. Writing appends to the chunk; [`Chunk::defer`]
/// reserves the current position for work that finishes later and moves this
/// handle past it, so output always comes out in template order.
pub struct Chunk<'r> {
    scheduler: &'r mut Scheduler,
    id: ChunkId,
}

impl Chunk<'_> {
    /// # Errors
    /// Only on an internal ordering violation.
    pub fn write(&mut self, text: &str) -> MinidustResult<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.scheduler.chunks.write(self.id, text)
    }

    /// Renders `body` at the current position.
    ///
    /// # Errors
    /// Any error raised while rendering.
    pub fn render(&mut self, body: &Body, ctx: &Context) -> MinidustResult<()> {
        self.exec(body, ctx)
    }

    /// Reserves the current position for `future`.
    ///
    /// The future is polled once right away and its continuation runs inline
    /// when it is already complete. Otherwise it is parked and driven by the
    /// output stream; rendering continues after the reserved position.
    ///
    /// ```
    /// use minidust::{Chunk, Context, Engine, Reply};
    ///
    /// let engine = Engine::new();
    /// engine.register_helper("later", |chunk: &mut Chunk<'_>, _: &_, _: &_, _: &_| {
    ///     chunk.defer(async { Ok(|chunk: &mut Chunk<'_>| chunk.write("B")) })?;
    ///     Ok(Reply::Written)
    /// });
    /// engine.add_template("t", "A{@later/}C").unwrap();
    ///
    /// let out = futures::executor::block_on(engine.render("t", Context::default())).unwrap();
    /// assert_eq!(out, "ABC");
    /// ```
    ///
    /// # Errors
    /// The error of a future that completed immediately, or of its
    /// continuation.
    pub fn defer<F, C>(&mut self, future: F) -> MinidustResult<()>
    where
        F: Future<Output = MinidustResult<C>> + 'static,
        C: FnOnce(&mut Chunk<'_>) -> MinidustResult<()> + 'static,
    {
        let reserved = self.id;
        self.id = self.scheduler.chunks.insert_after(reserved)?;
        let future = future.map(|result| result.map(|c| -> Continuation { Box::new(c) }));
        self.scheduler.spawn(reserved, Box::pin(future))
    }

    /// Reserves the current position for text that arrives later.
    ///
    /// # Errors
    /// See [`Chunk::defer`].
    pub fn defer_text<F>(&mut self, future: F) -> MinidustResult<()>
    where
        F: Future<Output = MinidustResult<String>> + 'static,
    {
        self.defer(async move {
            let text = future.await?;
            Ok(move |chunk: &mut Chunk<'_>| chunk.write(&text))
        })
    }

    /// Renders `body` on the side and returns its text.
    ///
    /// # Errors
    /// Rendering errors, or a helper error when the body defers work that is
    /// not complete immediately.
    pub fn render_to_string(&mut self, body: &Body, ctx: &Context) -> MinidustResult<String> {
        let mut scratch = Scheduler::new(self.scheduler.engine.clone());
        scratch.waker = self.scheduler.waker.clone();
        let mut chunk = Chunk {
            scheduler: &mut scratch,
            id: ChunkList::root(),
        };
        chunk.exec(body, ctx)?;
        chunk.finish()?;
        if !scratch.tasks.is_empty() {
            return Err(MinidustError::Helper {
                helper: None,
                template: ctx.template_name().map(str::to_owned),
                message: "parameter body did not render synchronously".to_owned(),
            });
        }
        Ok(scratch.chunks.flush().0)
    }

    fn finish(&mut self) -> MinidustResult<()> {
        self.scheduler.chunks.end(self.id)
    }

    pub(crate) fn exec(&mut self, body: &Body, ctx: &Context) -> MinidustResult<()> {
        for step in body.steps() {
            match step {
                Step::Write(text) => self.write(text)?,
                Step::Reference { path, filters } => self.reference(path, filters, ctx)?,
                Step::Section {
                    kind,
                    key,
                    context,
                    params,
                    bodies,
                } => self.section(*kind, key, context.as_ref(), params, bodies, ctx)?,
                Step::Helper {
                    name,
                    context,
                    params,
                    bodies,
                } => self.helper(name, context.as_ref(), params, bodies, ctx)?,
                Step::Partial {
                    name,
                    context,
                    params,
                } => self.partial_step(name, context.as_ref(), params, ctx)?,
                Step::Block { name, default } => {
                    if let Some(body) = ctx.block(name).or(default.as_ref()) {
                        self.exec(body, ctx)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn call(
        &mut self,
        helper: &dyn Helper,
        name: &str,
        ctx: &Context,
        bodies: &Bodies,
        params: &Params,
    ) -> MinidustResult<Reply> {
        helper
            .call(self, ctx, bodies, params)
            .map_err(|error| error.in_helper(name, ctx.template_name()))
    }

    fn reference(&mut self, path: &Path, filters: &[String], ctx: &Context) -> MinidustResult<()> {
        match ctx.get_path(path) {
            None => Ok(()),
            Some(Value::Function(function)) => {
                let function = Arc::clone(function);
                let reply = self.call(
                    function.as_ref(),
                    &path.to_string(),
                    ctx,
                    &Bodies::default(),
                    &Params::default(),
                )?;
                match reply {
                    Reply::Value(value) => self.write_filtered(&value, filters),
                    Reply::Written => Ok(()),
                }
            }
            Some(value) => self.write_filtered(value, filters),
        }
    }

    fn write_filtered<S: AsRef<str>>(&mut self, value: &Value, filters: &[S]) -> MinidustResult<()> {
        if value.is_empty() {
            return Ok(());
        }
        let text = self.scheduler.engine.apply_filters(value, filters)?;
        self.write(&text)
    }

    fn eval_params(&mut self, params: &[ParamStep], ctx: &Context) -> MinidustResult<Params> {
        let mut evaluated = Params::default();
        for ParamStep { key, value } in params {
            let value = match value {
                ParamExpr::Text(text) => Value::from(text.as_str()),
                ParamExpr::Int(i) => Value::Int(*i),
                ParamExpr::Float(f) => Value::Float(*f),
                ParamExpr::Path(path) => ctx.get_path(path).cloned().unwrap_or_default(),
                ParamExpr::Body(body) => Value::String(self.render_to_string(body, ctx)?),
            };
            evaluated.insert(key.clone(), value);
        }
        Ok(evaluated)
    }

    /// The context a body runs in: `:ctx` override first, then params pushed.
    fn scope(ctx: &Context, context: Option<&Path>, params: &Params) -> Context {
        let base = match context {
            Some(path) => ctx.rebase(ctx.get_path(path).cloned().unwrap_or_default()),
            None => ctx.clone(),
        };
        if params.is_empty() {
            base
        } else {
            base.push(params.clone().into_value())
        }
    }

    fn section(
        &mut self,
        kind: SectionKind,
        key: &Path,
        context: Option<&Path>,
        params: &[ParamStep],
        bodies: &Bodies,
        ctx: &Context,
    ) -> MinidustResult<()> {
        let params = self.eval_params(params, ctx)?;
        let scoped = Self::scope(ctx, context, &params);
        match ctx.get_path(key) {
            None => self.dispatch(kind, &Value::Null, &scoped, bodies),
            Some(Value::Function(function)) => {
                let function = Arc::clone(function);
                let reply = self.call(function.as_ref(), &key.to_string(), &scoped, bodies, &params)?;
                match reply {
                    Reply::Value(value) => self.dispatch(kind, &value, &scoped, bodies),
                    Reply::Written => Ok(()),
                }
            }
            Some(value) => self.dispatch(kind, value, &scoped, bodies),
        }
    }

    fn dispatch(
        &mut self,
        kind: SectionKind,
        value: &Value,
        ctx: &Context,
        bodies: &Bodies,
    ) -> MinidustResult<()> {
        let empty = value.is_empty();
        match kind {
            SectionKind::Exists => self.either(!empty, bodies, ctx),
            SectionKind::NotExists => self.either(empty, bodies, ctx),
            SectionKind::Iterate if empty => self.either(false, bodies, ctx),
            SectionKind::Iterate => {
                let Some(block) = bodies.block() else {
                    return Ok(());
                };
                match value {
                    Value::Array(items) => {
                        let len = items.len();
                        for (index, item) in items.iter().enumerate() {
                            self.exec(block, &ctx.push_iteration(item.clone(), index, len))?;
                        }
                        Ok(())
                    }
                    Value::Bool(true) => self.exec(block, ctx),
                    other => self.exec(block, &ctx.push(other.clone())),
                }
            }
        }
    }

    /// The main block when `condition` holds, the else body otherwise.
    fn either(&mut self, condition: bool, bodies: &Bodies, ctx: &Context) -> MinidustResult<()> {
        let body = if condition {
            bodies.block()
        } else {
            bodies.else_body()
        };
        match body {
            Some(body) => self.exec(body, ctx),
            None => Ok(()),
        }
    }

    fn helper(
        &mut self,
        name: &str,
        context: Option<&Path>,
        params: &[ParamStep],
        bodies: &Bodies,
        ctx: &Context,
    ) -> MinidustResult<()> {
        let Some(helper) = self.scheduler.engine.helper(name) else {
            self.scheduler
                .engine
                .log(LogLevel::Warn, format!("Invalid helper [{name}]"));
            return Ok(());
        };
        let params = self.eval_params(params, ctx)?;
        let scoped = Self::scope(ctx, context, &Params::default());
        match self.call(helper.as_ref(), name, &scoped, bodies, &params)? {
            Reply::Value(value) => self.write_filtered(&value, &[AUTO_ESCAPE]),
            Reply::Written => Ok(()),
        }
    }

    fn partial_step(
        &mut self,
        target: &PartialTarget,
        context: Option<&Path>,
        params: &[ParamStep],
        ctx: &Context,
    ) -> MinidustResult<()> {
        let name = match target {
            PartialTarget::Static(name) => name.clone(),
            PartialTarget::Dynamic(body) => self.render_to_string(body, ctx)?,
        };
        let params = self.eval_params(params, ctx)?;
        let scoped = Self::scope(ctx, context, &params);
        self.partial(&name, &scoped)
    }

    /// Renders the template called `name` here, loading it first if needed.
    pub(crate) fn partial(&mut self, name: &str, ctx: &Context) -> MinidustResult<()> {
        if let Some(template) = self.scheduler.engine.lookup(name, self.scheduler.config.cache) {
            return self.render_template(&template, ctx);
        }
        let load = self.scheduler.load(name, ctx.template_name())?;
        let ctx = ctx.clone();
        self.defer(async move {
            let template = load.await?;
            Ok(move |chunk: &mut Chunk<'_>| chunk.render_template(&template, &ctx))
        })
    }

    pub(crate) fn render_template(&mut self, template: &Template, ctx: &Context) -> MinidustResult<()> {
        let limit = self.scheduler.config.max_partial_depth;
        if ctx.depth() > limit {
            return Err(MinidustError::RecursionLimit {
                limit,
                template: template.name().map(str::to_owned),
            });
        }
        self.exec(&template.body, &ctx.enter(template))
    }
}
