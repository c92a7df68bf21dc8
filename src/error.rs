use thiserror::Error;

pub type MinidustResult<T> = std::result::Result<T, MinidustError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ParseErrorKind {
    #[error("Unexpected EOF{expected_what}")]
    UnexpectedEof {
        /// Describes what was expected, e.g. " (expected '{/items}')"
        expected_what: String,
    },
    #[error("Expected {description}")]
    Expected { description: String },
    #[error("Unclosed {what}")]
    Unclosed { what: String },
    #[error("Expected end tag for {expected} but found {{/{found}}}")]
    MismatchedClose { expected: String, found: String },
    #[error("Unmatched end tag {{/{found}}}")]
    UnmatchedClose { found: String },
    #[error("Unexpected body separator {{:{name}}} outside of a section")]
    UnexpectedBody { name: String },
    #[error("Unknown special character {{~{name}}}")]
    UnknownSpecial { name: String },
    #[error("Invalid path '{path}'")]
    InvalidPath { path: String },
}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<&str>) -> Self {
        Self::UnexpectedEof {
            expected_what: expected.map_or_else(String::new, |e| format!(" (expected '{e}')")),
        }
    }
}

/// A template that could not be compiled.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("Parse error{} at line {line}, column {column}: {kind}", in_template(.template))]
pub struct ParseError {
    pub template: Option<String>,
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub(crate) fn named(mut self, template: Option<&str>) -> Self {
        self.template = template.map(str::to_owned);
        self
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum MinidustError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Template Not Found: {name}{}", in_template(.template))]
    TemplateNotFound {
        name: String,
        template: Option<String>,
    },
    #[error("Loader failed for `{name}`: {message}")]
    Loader { name: String, message: String },
    #[error("Helper{} failed{}: {message}", helper_name(.helper), in_template(.template))]
    Helper {
        helper: Option<String>,
        template: Option<String>,
        message: String,
    },
    #[error("Partial depth limit of {limit} exceeded{}", in_template(.template))]
    RecursionLimit {
        limit: usize,
        template: Option<String>,
    },
    /// A chunk was written after it ended, or ended twice.
    #[error("Chunk protocol violation: {0}")]
    Protocol(String),
}

impl MinidustError {
    /// Error for a helper or filter to return; the engine fills in which
    /// helper and template it came from.
    pub fn helper<M: Into<String>>(message: M) -> Self {
        Self::Helper {
            helper: None,
            template: None,
            message: message.into(),
        }
    }

    pub fn loader<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        Self::Loader {
            name: name.into(),
            message: message.into(),
        }
    }

    pub(crate) fn in_helper(self, name: &str, template: Option<&str>) -> Self {
        match self {
            Self::Helper {
                helper,
                template: origin,
                message,
            } => Self::Helper {
                helper: helper.or_else(|| Some(name.to_owned())),
                template: origin.or_else(|| template.map(str::to_owned)),
                message,
            },
            other @ (Self::Parse(_)
            | Self::TemplateNotFound { .. }
            | Self::Loader { .. }
            | Self::RecursionLimit { .. }
            | Self::Protocol(_)) => other,
        }
    }
}

fn in_template(template: &Option<String>) -> String {
    template
        .as_deref()
        .map_or_else(String::new, |name| format!(" in template `{name}`"))
}

fn helper_name(helper: &Option<String>) -> String {
    helper
        .as_deref()
        .map_or_else(String::new, |name| format!(" `{name}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_mentions_template_and_location() {
        let err = ParseError {
            template: Some("page".to_owned()),
            line: 2,
            column: 7,
            kind: ParseErrorKind::MismatchedClose {
                expected: "items".to_owned(),
                found: "item".to_owned(),
            },
        };
        assert_eq!(
            err.to_string(),
            "Parse error in template `page` at line 2, column 7: Expected end tag for items but found {/item}"
        );
    }

    #[test]
    fn test_helper_error_is_attributed_once() {
        let err = MinidustError::helper("boom")
            .in_helper("first", Some("page"))
            .in_helper("second", Some("other"));
        assert_eq!(
            err.to_string(),
            "Helper `first` failed in template `page`: boom"
        );
    }
}
