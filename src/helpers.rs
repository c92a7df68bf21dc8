use crate::context::{Context, Params};
use crate::error::MinidustResult;
use crate::interface::Reply;
use crate::render::Chunk;
use crate::template::Bodies;
use crate::value::Value;

pub(crate) type HelperFn =
    fn(&mut Chunk<'_>, &Context, &Bodies, &Params) -> MinidustResult<Reply>;

/// Helpers every engine starts with.
pub(crate) const BUILTIN: &[(&str, HelperFn)] = &[
    ("sep", sep),
    ("first", first),
    ("last", last),
    ("idx", idx),
    ("size", size),
];

fn block_if(
    condition: bool,
    chunk: &mut Chunk<'_>,
    ctx: &Context,
    bodies: &Bodies,
) -> MinidustResult<Reply> {
    if condition {
        if let Some(block) = bodies.block() {
            chunk.render(block, ctx)?;
        }
    }
    Ok(Reply::Written)
}

/// Body on every iteration but the last.
fn sep(chunk: &mut Chunk<'_>, ctx: &Context, bodies: &Bodies, _: &Params) -> MinidustResult<Reply> {
    let last = ctx
        .iteration()
        .is_some_and(|(index, len)| index.saturating_add(1) == len);
    block_if(!last, chunk, ctx, bodies)
}

fn first(chunk: &mut Chunk<'_>, ctx: &Context, bodies: &Bodies, _: &Params) -> MinidustResult<Reply> {
    let first = ctx.iteration().is_some_and(|(index, _)| index == 0);
    block_if(first, chunk, ctx, bodies)
}

fn last(chunk: &mut Chunk<'_>, ctx: &Context, bodies: &Bodies, _: &Params) -> MinidustResult<Reply> {
    let last = ctx
        .iteration()
        .is_some_and(|(index, len)| index.saturating_add(1) == len);
    block_if(last, chunk, ctx, bodies)
}

/// Body with the iteration index pushed, so `{.}` is the index.
fn idx(chunk: &mut Chunk<'_>, ctx: &Context, bodies: &Bodies, _: &Params) -> MinidustResult<Reply> {
    let index = ctx
        .iteration()
        .map_or(Value::Null, |(index, _)| Value::from(index));
    if let Some(block) = bodies.block() {
        chunk.render(block, &ctx.push(index))?;
    }
    Ok(Reply::Written)
}

/// Length of the `key` param: items of an array, entries of an object,
/// characters of a string. Numbers are their own size.
fn size(_: &mut Chunk<'_>, _: &Context, _: &Bodies, params: &Params) -> MinidustResult<Reply> {
    let size = match params.get("key") {
        Some(Value::Array(items)) => Value::from(items.len()),
        Some(Value::Object(map)) => Value::from(map.len()),
        Some(Value::String(text)) => Value::from(text.chars().count()),
        Some(number @ (Value::Int(_) | Value::Float(_))) => number.clone(),
        Some(Value::Null | Value::Bool(_) | Value::Function(_)) | None => Value::Int(0),
    };
    Ok(Reply::Value(size))
}
