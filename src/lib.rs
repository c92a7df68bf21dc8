mod ast;
mod chunk;
mod config;
mod context;
mod diagnostics;
mod engine;
mod error;
mod filters;
mod helpers;
mod interface;
mod optimizer;
mod parser;
mod registry;
mod render;
mod stream;
mod template;
mod value;

// Public exports.
pub use config::Config;
pub use context::{Context, Params};
pub use diagnostics::{LogLevel, LogRecord};
pub use engine::Engine;
pub use error::{MinidustError, MinidustResult, ParseError, ParseErrorKind};
pub use interface::{Filter, Helper, LoadFuture, Loaded, Loader, Reply, Sink};
pub use render::{Chunk, Continuation};
pub use stream::{OutputStream, Progress, Render};
pub use template::{Bodies, Body, Compiled, Template, TemplateRef};
pub use value::Value;
