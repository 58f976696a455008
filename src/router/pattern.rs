use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::context::ParamVec;

/// Invalid route registration, reported by
/// [`RouteTableBuilder::build`](super::RouteTableBuilder::build).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("route pattern `{pattern}` must start with `/`")]
    MissingLeadingSlash { pattern: String },

    #[error("route pattern `{pattern}` has a parameter segment with no name")]
    EmptyParamName { pattern: String },

    #[error("route pattern `{pattern}` binds `{name}` more than once")]
    DuplicateParam { pattern: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(Arc<str>),
    Param(Arc<str>),
}

/// A compiled path pattern such as `/users/:id/posts/:post_id`.
///
/// Literal segments match exactly. A `:name` segment matches one non-empty
/// segment and binds its percent-decoded value. The root pattern `/` has no
/// segments; a trailing slash adds an empty final segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: Arc<str>,
    segments: Vec<Segment>,
}

/// Split a path into segments. `/` yields none, `/a/` yields `["a", ""]`.
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let mut parts = trimmed.split('/');
    if trimmed.is_empty() {
        parts.next();
    }
    parts
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        if !pattern.starts_with('/') {
            return Err(RouteError::MissingLeadingSlash {
                pattern: pattern.to_string(),
            });
        }

        let mut segments: Vec<Segment> = Vec::new();
        for part in split_path(pattern) {
            match part.strip_prefix(':') {
                Some("") => {
                    return Err(RouteError::EmptyParamName {
                        pattern: pattern.to_string(),
                    })
                }
                Some(name) => {
                    let seen = segments
                        .iter()
                        .any(|s| matches!(s, Segment::Param(n) if n.as_ref() == name));
                    if seen {
                        return Err(RouteError::DuplicateParam {
                            pattern: pattern.to_string(),
                            name: name.to_string(),
                        });
                    }
                    segments.push(Segment::Param(Arc::from(name)));
                }
                None => segments.push(Segment::Literal(Arc::from(part))),
            }
        }

        Ok(Self {
            raw: Arc::from(pattern),
            segments,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub(crate) fn raw(&self) -> &Arc<str> {
        &self.raw
    }

    /// Parameter names in path order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(n) => Some(n.as_ref()),
            Segment::Literal(_) => None,
        })
    }

    /// Match a request path, returning the bound parameters on success.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<ParamVec> {
        let mut params = ParamVec::new();
        let mut parts = split_path(path);
        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(lit) => {
                    if lit.as_ref() != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.push((Arc::clone(name), decode_segment(part)));
                }
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

/// Percent-decode one segment. Sequences that do not decode to UTF-8 are
/// bound verbatim.
fn decode_segment(part: &str) -> String {
    urlencoding::decode(part)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| part.to_string())
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
