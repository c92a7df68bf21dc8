use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::Stream;
use futures::StreamExt;
use futures::task::noop_waker;

use crate::engine::Engine;
use crate::error::{MinidustError, MinidustResult};
use crate::interface::Sink;
use crate::render::{Chunk, Event, Scheduler};

/// Where a render stands after being driven.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Progress {
    /// Deferred work is still outstanding.
    Pending,
    /// All output has been delivered.
    Complete,
    /// The render failed; the error has been delivered.
    Failed,
}

type Job = Box<dyn FnOnce(&mut Chunk<'_>) -> MinidustResult<()>>;

#[derive(Default)]
struct Observers {
    data: Vec<Box<dyn FnMut(&str)>>,
    end: Vec<Box<dyn FnMut()>>,
    error: Vec<Box<dyn FnMut(&MinidustError)>>,
    sinks: Vec<Box<dyn Sink>>,
}

impl Observers {
    fn notify(&mut self, event: &Event) {
        match event {
            Event::Data(text) => {
                for observer in &mut self.data {
                    observer(text);
                }
                for sink in &mut self.sinks {
                    sink.write(text);
                }
            }
            Event::End => {
                for observer in &mut self.end {
                    observer();
                }
                for sink in &mut self.sinks {
                    sink.end();
                }
            }
            Event::Error(error) => {
                for observer in &mut self.error {
                    observer(error);
                }
                for sink in &mut self.sinks {
                    sink.error(error);
                }
            }
        }
    }
}

/// Incremental output of a render.
///
/// Nothing runs until the stream is first driven, so observers attached
/// right after creation see the whole output. Every observer receives every
/// event; contiguous output that becomes ready together arrives as one data
/// event.
///
/// Drive it either by hand with [`OutputStream::run_until_stalled`] or as a
/// [`futures::Stream`] of text pieces.
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use minidust::{Context, Engine, Progress};
///
/// let engine = Engine::new();
/// let seen = Rc::new(RefCell::new(String::new()));
///
/// let mut stream = engine.render_source("Hello World", Context::default());
/// let sink = Rc::clone(&seen);
/// stream.on_data(move |data| sink.borrow_mut().push_str(data));
///
/// assert_eq!(stream.run_until_stalled(), Progress::Complete);
/// assert_eq!(*seen.borrow(), "Hello World");
/// ```
pub struct OutputStream {
    scheduler: Scheduler,
    job: Option<Job>,
    observers: Observers,
    /// The stream has yielded its end or error.
    finished: bool,
}

impl OutputStream {
    pub(crate) fn new<F>(engine: Engine, job: F) -> Self
    where
        F: FnOnce(&mut Chunk<'_>) -> MinidustResult<()> + 'static,
    {
        Self {
            scheduler: Scheduler::new(engine),
            job: Some(Box::new(job)),
            observers: Observers::default(),
            finished: false,
        }
    }

    /// A stream that fails with `error` once driven.
    pub(crate) fn failed(engine: Engine, error: MinidustError) -> Self {
        Self::new(engine, move |_| Err(error))
    }

    pub fn on_data<F: FnMut(&str) + 'static>(&mut self, observer: F) -> &mut Self {
        self.observers.data.push(Box::new(observer));
        self
    }

    pub fn on_end<F: FnMut() + 'static>(&mut self, observer: F) -> &mut Self {
        self.observers.end.push(Box::new(observer));
        self
    }

    pub fn on_error<F: FnMut(&MinidustError) + 'static>(&mut self, observer: F) -> &mut Self {
        self.observers.error.push(Box::new(observer));
        self
    }

    /// Writes each piece of output into `sink` as it becomes ready, then
    /// ends it.
    pub fn pipe<S: Sink + 'static>(&mut self, sink: S) -> &mut Self {
        self.observers.sinks.push(Box::new(sink));
        self
    }

    fn start(&mut self) {
        if let Some(job) = self.job.take() {
            self.scheduler.start(job);
        }
    }

    fn next_event(&mut self) -> Option<Event> {
        let event = self.scheduler.pop_event()?;
        self.observers.notify(&event);
        Some(event)
    }

    /// Runs everything that can run without waiting and delivers the
    /// resulting events to the observers.
    pub fn run_until_stalled(&mut self) -> Progress {
        self.start();
        let waker = noop_waker();
        self.scheduler
            .poll_tasks(&mut TaskContext::from_waker(&waker));
        while self.next_event().is_some() {}
        self.scheduler.state()
    }

    /// Collects the remaining output into a single string.
    pub fn into_render(self) -> Render {
        Render {
            stream: self,
            output: String::new(),
        }
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("state", &self.scheduler.state())
            .field("started", &self.job.is_none())
            .finish_non_exhaustive()
    }
}

impl Stream for OutputStream {
    type Item = MinidustResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        this.scheduler.set_waker(cx.waker());
        this.start();
        if this.scheduler.state() == Progress::Pending {
            this.scheduler.poll_tasks(cx);
        }
        match this.next_event() {
            Some(Event::Data(text)) => Poll::Ready(Some(Ok(text))),
            Some(Event::Error(error)) => {
                this.finished = true;
                Poll::Ready(Some(Err(error)))
            }
            Some(Event::End) => {
                this.finished = true;
                Poll::Ready(None)
            }
            // Events were already drained by `run_until_stalled`.
            None if this.scheduler.state() != Progress::Pending => {
                this.finished = true;
                Poll::Ready(None)
            }
            None => Poll::Pending,
        }
    }
}

/// A render in progress, resolving to the joined output or the first error.
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct Render {
    stream: OutputStream,
    output: String,
}

impl Future for Render {
    type Output = MinidustResult<String>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match this.stream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(text))) => this.output.push_str(&text),
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Err(error)),
                Poll::Ready(None) => return Poll::Ready(Ok(std::mem::take(&mut this.output))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
