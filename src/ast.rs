use std::borrow::Cow;
use std::fmt;

/// A lookup path such as `user.name`, `items[0]`, `.` or `.title`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    /// Path starts with `.`: only the current frame is consulted.
    pub(crate) current: bool,
    pub(crate) segments: Vec<Segment>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Segment {
    Key(String),
    Index(usize),
    /// `a[b.c]`: the bracketed path is resolved and used as key or index.
    Dynamic(Path),
}

#[cfg(test)]
impl Path {
    pub(crate) fn key<K: Into<String>>(key: K) -> Self {
        Self {
            current: false,
            segments: vec![Segment::Key(key.into())],
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.current {
            f.write_str(".")?;
        }
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => f.write_str(key)?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Dynamic(path) => write!(f, "[{path}]")?,
            }
        }
        Ok(())
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum SectionKind {
    /// `{#key}`
    Iterate,
    /// `{?key}`
    Exists,
    /// `{^key}`
    NotExists,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Special {
    Newline,
    CarriageReturn,
    Space,
    LeftBrace,
    RightBrace,
}

impl Special {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "n" => Some(Self::Newline),
            "r" => Some(Self::CarriageReturn),
            "s" => Some(Self::Space),
            "lb" => Some(Self::LeftBrace),
            "rb" => Some(Self::RightBrace),
            _ => None,
        }
    }

    pub(crate) const fn text(self) -> &'static str {
        match self {
            Self::Newline => "\n",
            Self::CarriageReturn => "\r",
            Self::Space => " ",
            Self::LeftBrace => "{",
            Self::RightBrace => "}",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParamValue<'a> {
    Text(Cow<'a, str>),
    Int(i64),
    Float(f64),
    Path(Path),
    /// A quoted value containing references, e.g. `title="Hi {name}"`.
    Interpolated(Vec<AstNode<'a>>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Param<'a> {
    pub(crate) key: &'a str,
    pub(crate) value: ParamValue<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PartialName<'a> {
    Static(Cow<'a, str>),
    Interpolated(Vec<AstNode<'a>>),
}

/// The bodies of a section or helper: the main block plus any `{:name}`
/// bodies, `else` being the common one.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct AstBodies<'a> {
    pub(crate) block: Option<Vec<AstNode<'a>>>,
    pub(crate) named: Vec<(&'a str, Vec<AstNode<'a>>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AstNode<'a> {
    /// A constant block of text from the template.
    ///
    /// Borrowed from the source unless the optimizer had to merge pieces.
    Buffer(Cow<'a, str>),
    /// A line break plus the indentation after it.
    Format(&'a str),
    /// `{~n}` and friends.
    Special(Special),
    /// `` {`raw`} ``
    Raw(&'a str),
    /// `{! ... !}`
    Comment(&'a str),
    /// `{path|filter}`
    Reference { path: Path, filters: Vec<&'a str> },
    Section {
        kind: SectionKind,
        key: Path,
        context: Option<Path>,
        params: Vec<Param<'a>>,
        bodies: AstBodies<'a>,
    },
    /// `{@name}`
    Helper {
        name: &'a str,
        context: Option<Path>,
        params: Vec<Param<'a>>,
        bodies: AstBodies<'a>,
    },
    /// `{>name/}`
    Partial {
        name: PartialName<'a>,
        context: Option<Path>,
        params: Vec<Param<'a>>,
    },
    /// `{+name}default{/name}`
    Block {
        name: &'a str,
        default: Option<Vec<AstNode<'a>>>,
    },
    /// `{<name}body{/name}`
    InlinePartial {
        name: &'a str,
        body: Vec<AstNode<'a>>,
    },
}
