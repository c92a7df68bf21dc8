use std::borrow::Cow;

use crate::{
    ast::{AstBodies, AstNode, Param, ParamValue, PartialName, Path, SectionKind, Segment, Special},
    error::{ParseError, ParseErrorKind},
};

type ParseResult<T> = Result<T, ParseError>;

/// What stopped a run of nodes.
#[derive(Debug, PartialEq)]
enum Stop<'a> {
    Eof,
    /// `{:name}`
    Separator(&'a str),
    /// `{/name}`
    Close(&'a str),
}

/// Result of parsing from a `{`.
enum Tag<'a> {
    Node(AstNode<'a>),
    Separator(&'a str),
    Close(&'a str),
    /// The brace did not open a tag and is plain text.
    Literal,
}

#[derive(Clone, Copy)]
struct Checkpoint {
    pos: usize,
    line: usize,
    line_start_pos: usize,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
}

const fn is_key_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

const fn is_key_char(c: char) -> bool {
    is_key_start(c) || c.is_ascii_digit() || c == '-'
}

impl<'a> Parser<'a> {
    const fn new(input: &'a str) -> Self {
        Parser {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
        }
    }

    #[inline]
    const fn current_column(&self) -> usize {
        self.pos - self.line_start_pos + 1
    }

    #[inline]
    const fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            template: None,
            line: self.line,
            column: self.current_column(),
            kind,
        }
    }

    const fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            line: self.line,
            line_start_pos: self.line_start_pos,
        }
    }

    const fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.line = checkpoint.line;
        self.line_start_pos = checkpoint.line_start_pos;
    }

    /// Advances the parser position by char_len bytes, correctly handling
    /// multi-byte characters. Updates line and column numbers if a newline is
    /// encountered.
    #[inline]
    const fn advance_by_char(&mut self, current_char: char, char_len: usize) {
        if current_char == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos + char_len;
        }
        self.pos += char_len;
    }

    /// Advances the parser position by `len` bytes.
    /// The consumed text must not contain newlines.
    #[inline]
    const fn advance_bytes_no_newline(&mut self, len: usize) {
        self.pos += len;
    }

    const fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or_default()
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth_char(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    /// Peek if the remaining input starts with `s`
    fn peek(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    /// Consume `s` if the remaining input starts with it.
    /// Assumes `s` does not contain newlines.
    fn consume(&mut self, s: &str) -> bool {
        if self.peek(s) {
            self.advance_bytes_no_newline(s.len());
            true
        } else {
            false
        }
    }

    fn bump(&mut self) -> Option<char> {
        let current_char = self.peek_char()?;
        self.advance_by_char(current_char, current_char.len_utf8());
        Some(current_char)
    }

    fn slice(&self, start: usize) -> &'a str {
        self.input.get(start..self.pos).unwrap_or_default()
    }

    /// Whitespace inside a tag; parameters may span lines.
    fn consume_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.bump();
        }
        self.pos > start
    }

    /// Expect `s` to be the start of the remaining input, consume it or return Err.
    /// Assumes `s` does not contain newlines.
    fn expect(&mut self, s: &str) -> ParseResult<()> {
        if self.consume(s) {
            return Ok(());
        }
        if self.eof() {
            return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(s))));
        }
        let found: String = self.rest().chars().take(s.len() + 10).collect();
        Err(self.make_error(ParseErrorKind::Expected {
            description: format!("'{s}', found '{found}'"),
        }))
    }

    fn consume_key(&mut self) -> ParseResult<&'a str> {
        let start = self.pos;
        if !self.peek_char().is_some_and(is_key_start) {
            return Err(self.make_error(ParseErrorKind::Expected {
                description: "identifier".to_string(),
            }));
        }
        while self.peek_char().is_some_and(is_key_char) {
            self.bump();
        }
        Ok(self.slice(start))
    }

    fn parse_path(&mut self) -> ParseResult<Path> {
        let mut path = Path::default();
        if self.consume(".") {
            path.current = true;
            if !self.peek_char().is_some_and(is_key_start) {
                // `{.}` refers to the current frame itself.
                return Ok(path);
            }
        }
        path.segments
            .push(Segment::Key(self.consume_key()?.to_owned()));

        loop {
            if self.peek(".") && self.peek_nth_char(1).is_some_and(is_key_start) {
                self.advance_bytes_no_newline(1);
                path.segments
                    .push(Segment::Key(self.consume_key()?.to_owned()));
            } else if self.consume("[") {
                let segment = if self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                    let start = self.pos;
                    while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                        self.bump();
                    }
                    let digits = self.slice(start);
                    let index = digits.parse().map_err(|_| {
                        self.make_error(ParseErrorKind::InvalidPath {
                            path: digits.to_owned(),
                        })
                    })?;
                    Segment::Index(index)
                } else {
                    Segment::Dynamic(self.parse_path()?)
                };
                self.expect("]")?;
                path.segments.push(segment);
            } else {
                break;
            }
        }
        Ok(path)
    }

    /// Plain text up to the next tag opener or line break.
    fn parse_buffer(&mut self) -> AstNode<'a> {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c == '{' || c == '\n' || self.peek("\r\n") {
                break;
            }
            self.advance_by_char(c, c.len_utf8());
        }
        AstNode::Buffer(Cow::Borrowed(self.slice(start)))
    }

    /// A line break and all whitespace following it.
    fn parse_format(&mut self) -> AstNode<'a> {
        let start = self.pos;
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.bump();
        }
        AstNode::Format(self.slice(start))
    }

    fn parse_nodes(&mut self) -> ParseResult<(Vec<AstNode<'a>>, Stop<'a>)> {
        let mut nodes = Vec::new();
        loop {
            if self.eof() {
                return Ok((nodes, Stop::Eof));
            }
            if self.peek("{") {
                match self.parse_tag()? {
                    Tag::Node(node) => nodes.push(node),
                    Tag::Separator(name) => return Ok((nodes, Stop::Separator(name))),
                    Tag::Close(name) => return Ok((nodes, Stop::Close(name))),
                    Tag::Literal => nodes.push(AstNode::Buffer(Cow::Borrowed("{"))),
                }
            } else if self.peek("\n") || self.peek("\r\n") {
                nodes.push(self.parse_format());
            } else {
                nodes.push(self.parse_buffer());
            }
        }
    }

    fn parse_tag(&mut self) -> ParseResult<Tag<'a>> {
        let start = self.checkpoint();
        self.expect("{")?;
        let Some(sigil) = self.peek_char() else {
            return Ok(Tag::Literal);
        };
        match sigil {
            '!' => self.parse_delimited("!", "!}", "comment").map(|text| Tag::Node(AstNode::Comment(text))),
            '`' => self.parse_delimited("`", "`}", "raw block").map(|text| Tag::Node(AstNode::Raw(text))),
            '~' => self.parse_special().map(Tag::Node),
            '#' => self.parse_section(SectionKind::Iterate),
            '?' => self.parse_section(SectionKind::Exists),
            '^' => self.parse_section(SectionKind::NotExists),
            '@' => self.parse_helper(),
            '+' => self.parse_block(),
            '<' => self.parse_inline_partial(),
            '>' => self.parse_partial(),
            '/' => {
                self.advance_bytes_no_newline(1);
                self.consume_whitespace();
                let key_start = self.pos;
                self.parse_path()?;
                let name = self.slice(key_start);
                self.consume_whitespace();
                self.expect("}")?;
                Ok(Tag::Close(name))
            }
            ':' => {
                self.advance_bytes_no_newline(1);
                let name = self.consume_key()?;
                self.expect("}")?;
                Ok(Tag::Separator(name))
            }
            _ => {
                if let Some(node) = self.try_reference() {
                    return Ok(Tag::Node(node));
                }
                self.restore(start);
                self.advance_bytes_no_newline(1);
                Ok(Tag::Literal)
            }
        }
    }

    /// Text between an opener (after `{`) and a closer, e.g. comments.
    fn parse_delimited(&mut self, open: &str, close: &str, what: &str) -> ParseResult<&'a str> {
        self.expect(open)?;
        let start = self.pos;
        while !self.peek(close) {
            if self.bump().is_none() {
                return Err(self.make_error(ParseErrorKind::Unclosed {
                    what: what.to_owned(),
                }));
            }
        }
        let text = self.slice(start);
        self.advance_bytes_no_newline(close.len());
        Ok(text)
    }

    fn parse_special(&mut self) -> ParseResult<AstNode<'a>> {
        self.expect("~")?;
        let name = self.consume_key()?;
        let special = Special::from_name(name).ok_or_else(|| {
            self.make_error(ParseErrorKind::UnknownSpecial {
                name: name.to_owned(),
            })
        })?;
        self.expect("}")?;
        Ok(AstNode::Special(special))
    }

    /// `{path|f1|f2}`; returns `None` when the braces do not hold a reference.
    fn try_reference(&mut self) -> Option<AstNode<'a>> {
        let path = self.parse_path().ok()?;
        let mut filters = Vec::new();
        while self.consume("|") {
            filters.push(self.consume_key().ok()?);
        }
        self.consume("}").then_some(AstNode::Reference { path, filters })
    }

    fn parse_context(&mut self) -> ParseResult<Option<Path>> {
        if self.consume(":") {
            Ok(Some(self.parse_path()?))
        } else {
            Ok(None)
        }
    }

    fn parse_params(&mut self) -> ParseResult<Vec<Param<'a>>> {
        let mut params = Vec::new();
        loop {
            let before = self.checkpoint();
            if !self.consume_whitespace() || !self.peek_char().is_some_and(is_key_start) {
                self.restore(before);
                return Ok(params);
            }
            let key = self.consume_key()?;
            self.expect("=")?;
            let value = self.parse_param_value()?;
            params.push(Param { key, value });
        }
    }

    fn parse_param_value(&mut self) -> ParseResult<ParamValue<'a>> {
        match self.peek_char() {
            Some('"') => Ok(match self.parse_inline()? {
                Inline::Text(text) => ParamValue::Text(text),
                Inline::Parts(parts) => ParamValue::Interpolated(parts),
            }),
            Some(c) if c.is_ascii_digit() || c == '-' => self.parse_number(),
            _ => Ok(ParamValue::Path(self.parse_path()?)),
        }
    }

    fn parse_number(&mut self) -> ParseResult<ParamValue<'a>> {
        let start = self.pos;
        self.consume("-");
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let is_float = self.peek(".") && self.peek_nth_char(1).is_some_and(|c| c.is_ascii_digit());
        if is_float {
            self.advance_bytes_no_newline(1);
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = self.slice(start);
        let invalid = || {
            self.make_error(ParseErrorKind::Expected {
                description: format!("number, found '{text}'"),
            })
        };
        if is_float {
            text.parse().map(ParamValue::Float).map_err(|_| invalid())
        } else {
            text.parse().map(ParamValue::Int).map_err(|_| invalid())
        }
    }

    /// A double-quoted string that may contain references and specials.
    fn parse_inline(&mut self) -> ParseResult<Inline<'a>> {
        self.expect("\"")?;
        let mut parts = Vec::new();
        let mut segment_start = self.pos;
        loop {
            let Some(c) = self.peek_char() else {
                return Err(self.make_error(ParseErrorKind::Unclosed {
                    what: "string".to_owned(),
                }));
            };
            match c {
                '"' => break,
                '\\' if self.peek("\\\"") => {
                    push_text(&mut parts, self.slice(segment_start));
                    self.advance_bytes_no_newline(1);
                    segment_start = self.pos;
                    self.advance_bytes_no_newline(1);
                }
                '{' => {
                    push_text(&mut parts, self.slice(segment_start));
                    let start = self.checkpoint();
                    self.advance_bytes_no_newline(1);
                    let node = if self.peek("~") {
                        Some(self.parse_special()?)
                    } else {
                        self.try_reference()
                    };
                    match node {
                        Some(node) => {
                            parts.push(node);
                            segment_start = self.pos;
                        }
                        None => {
                            self.restore(start);
                            segment_start = self.pos;
                            self.advance_bytes_no_newline(1);
                        }
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }
        push_text(&mut parts, self.slice(segment_start));
        self.expect("\"")?;

        Ok(match parts.as_slice() {
            [] => Inline::Text(Cow::Borrowed("")),
            [AstNode::Buffer(text)] => Inline::Text(text.clone()),
            _ => Inline::Parts(parts),
        })
    }

    /// Everything after a sigil up to and including the closing `}` or `/}`.
    fn parse_tag_head(&mut self, key_is_path: bool) -> ParseResult<TagHead<'a>> {
        self.consume_whitespace();
        let key_start = self.pos;
        let path = if key_is_path {
            Some(self.parse_path()?)
        } else {
            self.consume_key()?;
            None
        };
        let key = self.slice(key_start);
        let context = self.parse_context()?;
        let params = self.parse_params()?;
        self.consume_whitespace();
        let self_closing = self.consume("/");
        self.expect("}")?;
        Ok(TagHead {
            key,
            path,
            context,
            params,
            self_closing,
        })
    }

    /// Parses section bodies until `{/key}`, splitting at `{:name}` separators.
    fn parse_bodies(&mut self, key: &'a str) -> ParseResult<AstBodies<'a>> {
        let mut bodies = AstBodies::default();
        let mut current: Option<&'a str> = None;
        loop {
            let (nodes, stop) = self.parse_nodes()?;
            match current {
                None => bodies.block = Some(nodes),
                Some(name) => bodies.named.push((name, nodes)),
            }
            match stop {
                Stop::Eof => {
                    return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(&format!(
                        "{{/{key}}}"
                    )))));
                }
                Stop::Separator(name) => current = Some(name),
                Stop::Close(found) if found == key => return Ok(bodies),
                Stop::Close(found) => {
                    return Err(self.make_error(ParseErrorKind::MismatchedClose {
                        expected: key.to_owned(),
                        found: found.to_owned(),
                    }));
                }
            }
        }
    }

    fn parse_section(&mut self, kind: SectionKind) -> ParseResult<Tag<'a>> {
        self.advance_bytes_no_newline(1);
        let head = self.parse_tag_head(true)?;
        let bodies = if head.self_closing {
            AstBodies::default()
        } else {
            self.parse_bodies(head.key)?
        };
        Ok(Tag::Node(AstNode::Section {
            kind,
            key: head.path.unwrap_or_default(),
            context: head.context,
            params: head.params,
            bodies,
        }))
    }

    fn parse_helper(&mut self) -> ParseResult<Tag<'a>> {
        self.advance_bytes_no_newline(1);
        let head = self.parse_tag_head(false)?;
        let bodies = if head.self_closing {
            AstBodies::default()
        } else {
            self.parse_bodies(head.key)?
        };
        Ok(Tag::Node(AstNode::Helper {
            name: head.key,
            context: head.context,
            params: head.params,
            bodies,
        }))
    }

    fn parse_block(&mut self) -> ParseResult<Tag<'a>> {
        self.advance_bytes_no_newline(1);
        let head = self.parse_tag_head(false)?;
        let default = if head.self_closing {
            None
        } else {
            self.parse_bodies(head.key)?.block
        };
        Ok(Tag::Node(AstNode::Block {
            name: head.key,
            default,
        }))
    }

    fn parse_inline_partial(&mut self) -> ParseResult<Tag<'a>> {
        self.advance_bytes_no_newline(1);
        let head = self.parse_tag_head(false)?;
        let body = if head.self_closing {
            Vec::new()
        } else {
            self.parse_bodies(head.key)?.block.unwrap_or_default()
        };
        Ok(Tag::Node(AstNode::InlinePartial {
            name: head.key,
            body,
        }))
    }

    fn parse_partial(&mut self) -> ParseResult<Tag<'a>> {
        self.advance_bytes_no_newline(1);
        self.consume_whitespace();
        let name = if self.peek("\"") {
            match self.parse_inline()? {
                Inline::Text(text) => PartialName::Static(text),
                Inline::Parts(parts) => PartialName::Interpolated(parts),
            }
        } else {
            let start = self.pos;
            self.consume_key()?;
            while self.peek_char().is_some_and(|c| is_key_char(c) || c == '.') {
                self.bump();
            }
            PartialName::Static(Cow::Borrowed(self.slice(start)))
        };
        let context = self.parse_context()?;
        let params = self.parse_params()?;
        self.consume_whitespace();
        self.expect("/}")?;
        Ok(Tag::Node(AstNode::Partial {
            name,
            context,
            params,
        }))
    }
}

enum Inline<'a> {
    Text(Cow<'a, str>),
    Parts(Vec<AstNode<'a>>),
}

struct TagHead<'a> {
    /// Key as written, used to match the closing tag.
    key: &'a str,
    /// Set when the key was parsed as a path.
    path: Option<Path>,
    context: Option<Path>,
    params: Vec<Param<'a>>,
    self_closing: bool,
}

fn push_text<'a>(parts: &mut Vec<AstNode<'a>>, text: &'a str) {
    if !text.is_empty() {
        parts.push(AstNode::Buffer(Cow::Borrowed(text)));
    }
}

/// Parses template source into an AST.
///
/// Whitespace is kept as `Format` nodes; the optimizer decides what to do
/// with them.
pub(crate) fn parse<'a>(input: &'a str, template: Option<&str>) -> Result<Vec<AstNode<'a>>, ParseError> {
    let mut parser = Parser::new(input);
    let (nodes, stop) = parser.parse_nodes().map_err(|e| e.named(template))?;
    match stop {
        Stop::Eof => Ok(nodes),
        Stop::Separator(name) => Err(parser
            .make_error(ParseErrorKind::UnexpectedBody {
                name: name.to_owned(),
            })
            .named(template)),
        Stop::Close(found) => Err(parser
            .make_error(ParseErrorKind::UnmatchedClose {
                found: found.to_owned(),
            })
            .named(template)),
    }
}

/// Parses a standalone path such as `user.name` or `items[0]`.
pub(crate) fn parse_path(input: &str) -> Result<Path, ParseError> {
    let mut parser = Parser::new(input);
    let path = parser.parse_path()?;
    if !parser.eof() {
        return Err(parser.make_error(ParseErrorKind::InvalidPath {
            path: input.to_owned(),
        }));
    }
    Ok(path)
}

/// Tests for individual functions in the parser module.
#[cfg(test)]
mod test_utils {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_path_forms() {
        let path = parse_path("user.name").unwrap();
        assert!(!path.current);
        assert_eq!(
            path.segments,
            vec![Segment::Key("user".into()), Segment::Key("name".into())]
        );

        let path = parse_path("items[2].title").unwrap();
        assert_eq!(
            path.segments,
            vec![
                Segment::Key("items".into()),
                Segment::Index(2),
                Segment::Key("title".into())
            ]
        );

        let path = parse_path(".").unwrap();
        assert!(path.current);
        assert!(path.segments.is_empty());

        let path = parse_path("a[b.c]").unwrap();
        assert_eq!(
            path.segments,
            vec![
                Segment::Key("a".into()),
                Segment::Dynamic(parse_path("b.c").unwrap())
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_path_rejects_garbage() {
        assert!(parse_path("").is_err());
        assert!(parse_path("a b").is_err());
        assert!(parse_path("1abc").is_err());
        assert!(parse_path("a[0").is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_path_display_round_trips_source() {
        for source in ["a", "a.b", ".", ".x.y", "a[0].b", "a[b.c]"] {
            assert_eq!(parse_path(source).unwrap().to_string(), source);
        }
    }
}

/// Tests for the parser module via `parse`.
#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    // Helper macros for quick AST node creation in tests
    macro_rules! buf {
        ($data:expr) => {
            AstNode::Buffer(Cow::Borrowed($data))
        };
    }
    macro_rules! reference {
        ($path:expr) => {
            AstNode::Reference {
                path: parse_path($path).unwrap(),
                filters: vec![],
            }
        };
        ($path:expr, $($filter:expr),+) => {
            AstNode::Reference {
                path: parse_path($path).unwrap(),
                filters: vec![$($filter),+],
            }
        };
    }

    fn parse_ok(input: &str) -> Vec<AstNode<'_>> {
        parse(input, Some("test")).unwrap()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_input() {
        assert_eq!(parse_ok(""), vec![]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_simple_buffer() {
        assert_eq!(parse_ok("hello world"), vec![buf!("hello world")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_buffer_and_reference() {
        assert_eq!(
            parse_ok("Hello {world}!"),
            vec![buf!("Hello "), reference!("world"), buf!("!")]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_valid_keys() {
        assert_eq!(
            parse_ok("{_foo}{$bar}{baz1}"),
            vec![reference!("_foo"), reference!("$bar"), reference!("baz1")]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_reference_with_filters() {
        assert_eq!(parse_ok("{name|s|uc}"), vec![reference!("name", "s", "uc")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_braces_that_are_not_tags_stay_text() {
        assert_eq!(
            parse_ok("a { color: red }"),
            vec![buf!("a "), buf!("{"), buf!(" color: red }")]
        );
        assert_eq!(parse_ok("{foo bar}"), vec![buf!("{"), buf!("foo bar}")]);
        assert_eq!(parse_ok("{"), vec![buf!("{")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_format_nodes() {
        assert_eq!(
            parse_ok("a\n  b\r\nc"),
            vec![
                buf!("a"),
                AstNode::Format("\n  "),
                buf!("b"),
                AstNode::Format("\r\n"),
                buf!("c")
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comment_and_raw() {
        assert_eq!(
            parse_ok("a{! note\n more !}b{`{raw}`}"),
            vec![
                buf!("a"),
                AstNode::Comment(" note\n more "),
                buf!("b"),
                AstNode::Raw("{raw}")
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unclosed_comment() {
        let err = parse("{! never closed", None).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Unclosed { ref what } if what == "comment"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_specials() {
        assert_eq!(
            parse_ok("{~n}{~lb}{~rb}"),
            vec![
                AstNode::Special(Special::Newline),
                AstNode::Special(Special::LeftBrace),
                AstNode::Special(Special::RightBrace)
            ]
        );
        let err = parse("{~nope}", None).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnknownSpecial { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_section_with_else() {
        let nodes = parse_ok("{#items}{.}{:else}none{/items}");
        assert_eq!(
            nodes,
            vec![AstNode::Section {
                kind: SectionKind::Iterate,
                key: parse_path("items").unwrap(),
                context: None,
                params: vec![],
                bodies: AstBodies {
                    block: Some(vec![reference!(".")]),
                    named: vec![("else", vec![buf!("none")])],
                },
            }]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_exists_and_not_exists() {
        let nodes = parse_ok("{?a}yes{/a}{^a}no{/a}");
        assert!(matches!(
            nodes.as_slice(),
            [
                AstNode::Section { kind: SectionKind::Exists, .. },
                AstNode::Section { kind: SectionKind::NotExists, .. }
            ]
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_section_context_and_params() {
        let nodes = parse_ok(r#"{#list:ctx.inner a=1 b=-2.5 c=path.x d="lit" e="Hi {name}"/}"#);
        let [AstNode::Section { context, params, bodies, .. }] = nodes.as_slice() else {
            panic!("expected a single section, got {nodes:?}");
        };
        assert_eq!(context.as_ref(), Some(&parse_path("ctx.inner").unwrap()));
        assert_eq!(bodies, &AstBodies::default());
        assert_eq!(
            params,
            &vec![
                Param { key: "a", value: ParamValue::Int(1) },
                Param { key: "b", value: ParamValue::Float(-2.5) },
                Param { key: "c", value: ParamValue::Path(parse_path("path.x").unwrap()) },
                Param { key: "d", value: ParamValue::Text(Cow::Borrowed("lit")) },
                Param {
                    key: "e",
                    value: ParamValue::Interpolated(vec![buf!("Hi "), reference!("name")])
                },
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escaped_quote_in_param() {
        let nodes = parse_ok(r#"{@say text="a \"b\""/}"#);
        let [AstNode::Helper { params, .. }] = nodes.as_slice() else {
            panic!("expected a helper, got {nodes:?}");
        };
        assert_eq!(
            params[0].value,
            ParamValue::Interpolated(vec![buf!("a "), buf!("\"b"), buf!("\"")])
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nested_sections() {
        let nodes = parse_ok("{#a}{#b}{x}{/b}{/a}");
        let [AstNode::Section { bodies, .. }] = nodes.as_slice() else {
            panic!("expected a section");
        };
        let inner = bodies.block.as_ref().unwrap();
        assert!(matches!(inner.as_slice(), [AstNode::Section { .. }]));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_mismatched_close() {
        let err = parse("{#a}x{/b}", Some("page")).unwrap_err();
        assert_eq!(err.template.as_deref(), Some("page"));
        assert_eq!(
            err.kind,
            ParseErrorKind::MismatchedClose {
                expected: "a".to_owned(),
                found: "b".to_owned()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unclosed_section() {
        let err = parse("{#a}\nbody", None).unwrap_err();
        assert!(
            matches!(err.kind, ParseErrorKind::UnexpectedEof { ref expected_what } if expected_what.contains("{/a}"))
        );
        assert_eq!(err.line, 2);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unmatched_close_and_separator() {
        assert!(matches!(
            parse("x{/a}", None).unwrap_err().kind,
            ParseErrorKind::UnmatchedClose { .. }
        ));
        assert!(matches!(
            parse("x{:else}y", None).unwrap_err().kind,
            ParseErrorKind::UnexpectedBody { .. }
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unclosed_tag() {
        let err = parse("{#a b=1", None).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnexpectedEof { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partials() {
        let nodes = parse_ok(r#"{>header/}{>"shared/{kind}":user title="x"/}"#);
        assert_eq!(
            nodes[0],
            AstNode::Partial {
                name: PartialName::Static(Cow::Borrowed("header")),
                context: None,
                params: vec![],
            }
        );
        let AstNode::Partial { name, context, params } = &nodes[1] else {
            panic!("expected partial");
        };
        assert_eq!(
            name,
            &PartialName::Interpolated(vec![buf!("shared/"), reference!("kind")])
        );
        assert_eq!(context.as_ref(), Some(&parse_path("user").unwrap()));
        assert_eq!(params.len(), 1);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partial_requires_self_close() {
        assert!(parse("{>header}", None).is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_blocks_and_inline_partials() {
        let nodes = parse_ok("{+title}Default{/title}{+footer/}{<title}Mine{/title}");
        assert_eq!(
            nodes,
            vec![
                AstNode::Block {
                    name: "title",
                    default: Some(vec![buf!("Default")])
                },
                AstNode::Block {
                    name: "footer",
                    default: None
                },
                AstNode::InlinePartial {
                    name: "title",
                    body: vec![buf!("Mine")]
                },
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_helper_bodies() {
        let nodes = parse_ok("{@sep}, {/sep}{@eq key=a value=1}y{:else}n{/eq}");
        let AstNode::Helper { name, bodies, params, .. } = &nodes[1] else {
            panic!("expected helper");
        };
        assert_eq!(*name, "eq");
        assert_eq!(params.len(), 2);
        assert_eq!(bodies.named.len(), 1);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_multiline_params() {
        let nodes = parse_ok("{@h\n  a=1\n  b=2}x{/h}");
        let AstNode::Helper { params, .. } = &nodes[0] else {
            panic!("expected helper");
        };
        assert_eq!(params.len(), 2);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_location_tracks_lines() {
        let err = parse("line one\nline {#two}\n{/three}", None).unwrap_err();
        assert_eq!(err.line, 3);
    }
}
