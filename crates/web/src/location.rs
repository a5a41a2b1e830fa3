//! Location rules: which handlers serve which requests.
//!
//! Rules are checked in the order they were configured and the first one
//! whose pattern matches wins; there is no specificity ranking. A pattern is
//! a glob, a regular expression or a predicate over the whole request.
//!
//! Globs and regular expressions see the raw request target, path and query
//! string as received. Globs follow the usual shell rules: `*` and `?` stay
//! inside one path segment, `**` spans segments and a leading `.` has to be
//! matched literally. Regular expressions are not anchored, `^/admin` also
//! matches `/administrator`.

use std::fmt;
use std::sync::Arc;

use glob::MatchOptions;
use regex::Regex;
use thiserror::Error;

use crate::RequestInfo;
use crate::handler::{Handler, SharedHandler};

const GLOB_OPTIONS: MatchOptions =
    MatchOptions { case_sensitive: true, require_literal_separator: true, require_literal_leading_dot: true };

pub type Predicate = dyn Fn(&RequestInfo) -> bool + Send + Sync;

#[derive(Error, Debug)]
pub enum LocationError {
    #[error("invalid glob pattern `{pattern}`: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("invalid regex pattern `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Clone)]
pub enum Pattern {
    Glob(glob::Pattern),
    Regex(Regex),
    Predicate(Arc<Predicate>),
}

impl Pattern {
    pub fn matches(&self, target: &str, request: &RequestInfo) -> bool {
        match self {
            Pattern::Glob(glob) => glob.matches_with(target, GLOB_OPTIONS),
            Pattern::Regex(regex) => regex.is_match(target),
            Pattern::Predicate(predicate) => predicate(request),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Glob(glob) => f.debug_tuple("Glob").field(&glob.as_str()).finish(),
            Pattern::Regex(regex) => f.debug_tuple("Regex").field(&regex.as_str()).finish(),
            Pattern::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// A pattern and the handlers that run, in order, for requests it matches.
#[derive(Clone)]
pub struct Location {
    pattern: Pattern,
    handlers: Vec<SharedHandler>,
}

impl Location {
    pub fn new(pattern: Pattern) -> Self {
        Self { pattern, handlers: Vec::new() }
    }

    pub fn glob(pattern: &str) -> Result<Self, LocationError> {
        let glob = glob::Pattern::new(pattern)
            .map_err(|source| LocationError::InvalidGlob { pattern: pattern.to_string(), source })?;
        Ok(Self::new(Pattern::Glob(glob)))
    }

    pub fn regex(pattern: &str) -> Result<Self, LocationError> {
        let regex = Regex::new(pattern).map_err(|source| LocationError::InvalidRegex { pattern: pattern.to_string(), source })?;
        Ok(Self::new(Pattern::Regex(regex)))
    }

    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&RequestInfo) -> bool + Send + Sync + 'static,
    {
        Self::new(Pattern::Predicate(Arc::new(predicate)))
    }

    /// Matches every request, handy as the last rule.
    pub fn any() -> Self {
        Self::predicate(|_| true)
    }

    /// Appends a handler to this location's chain.
    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn shared_handler(mut self, handler: SharedHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn handlers(&self) -> &[SharedHandler] {
        &self.handlers
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Location").field("pattern", &self.pattern).field("handlers", &self.handlers.len()).finish()
    }
}

/// Handlers of the first location matching `target`, `None` when no location
/// matches or there are none.
pub fn match_location<'a>(target: &str, request: &RequestInfo, locations: &'a [Location]) -> Option<&'a [SharedHandler]> {
    locations.iter().find(|location| location.pattern.matches(target, request)).map(Location::handlers)
}
