//! Version rewriting for request heads.
//!
//! # Responsibilities
//! - Strip the `/v1.NN` version segment from the request target
//! - Pin the `Api-Version` header to the daemon's version
//! - Pin the `Docker-Client/<ver>` marker in `User-Agent`
//!
//! # Design Decisions
//! - Pure byte-level transform, no allocation when nothing matches
//! - Path rule only touches the request line; header rules only touch header lines
//! - Rules run in a fixed order: path, then Api-Version, then User-Agent

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::bytes::{Captures, Regex};
use thiserror::Error;

/// `/v<major>.<minor>` as a whole path component.
static PATH_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/v[0-9]+\.[0-9]+([/? ]|$)").unwrap());

static API_VERSION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^(api-version[ \t]*:[ \t]*)[0-9]+(?:\.[0-9]+)*").unwrap());

static CLIENT_AGENT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^(user-agent[ \t]*:[ \t]*docker-client/)[0-9]+(?:\.[0-9]+)*").unwrap()
});

static VERSION_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)*$").unwrap());

/// Version the source system pins clients to.
pub const DEFAULT_TARGET_VERSION: &str = "1.44";

/// Errors building a [`Rewriter`].
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("target version {0:?} is not a dotted numeric version")]
    InvalidTargetVersion(String),
}

/// Which rules apply to a request head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteScope {
    /// Path, Api-Version and User-Agent rules.
    Full,
    /// Only the path rule.
    PathOnly,
}

impl RewriteScope {
    /// Label used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RewriteScope::Full => "full",
            RewriteScope::PathOnly => "path_only",
        }
    }
}

/// Applies the fixed rewrite rule set with a configured target version.
#[derive(Debug, Clone)]
pub struct Rewriter {
    target_version: String,
    /// `${1}<target>` expansion shared by both header rules.
    header_replacement: String,
}

impl Rewriter {
    /// Create a rewriter pinning headers to `target_version`.
    pub fn new(target_version: impl Into<String>) -> Result<Self, RewriteError> {
        let target_version = target_version.into();
        if !is_version_string(&target_version) {
            return Err(RewriteError::InvalidTargetVersion(target_version));
        }
        let header_replacement = format!("${{1}}{}", target_version);
        Ok(Self {
            target_version,
            header_replacement,
        })
    }

    /// The version headers are rewritten to.
    pub fn target_version(&self) -> &str {
        &self.target_version
    }

    /// Rewrite one block of protocol text.
    ///
    /// Returns the input unchanged (borrowed) when no rule matched.
    pub fn rewrite<'a>(&self, text: &'a [u8], scope: RewriteScope) -> Cow<'a, [u8]> {
        let stripped = strip_path_version(text);
        if scope == RewriteScope::Full {
            if let Cow::Owned(rewritten) = self.normalize_headers(&stripped) {
                return Cow::Owned(rewritten);
            }
        }
        stripped
    }

    fn normalize_headers<'a>(&self, text: &'a [u8]) -> Cow<'a, [u8]> {
        let replacement = self.header_replacement.as_bytes();
        let api = API_VERSION_HEADER.replace_all(text, replacement);
        let agent = match CLIENT_AGENT_HEADER.replace_all(&api, replacement) {
            Cow::Owned(rewritten) => Some(rewritten),
            Cow::Borrowed(_) => None,
        };
        match agent {
            Some(rewritten) => Cow::Owned(rewritten),
            None => api,
        }
    }
}

impl Default for Rewriter {
    fn default() -> Self {
        Self {
            target_version: DEFAULT_TARGET_VERSION.to_string(),
            header_replacement: format!("${{1}}{}", DEFAULT_TARGET_VERSION),
        }
    }
}

/// Returns true for strings like `1.44` or `19.03.8`.
pub fn is_version_string(value: &str) -> bool {
    VERSION_STRING.is_match(value.as_bytes())
}

/// Remove version path segments from the first line of `text`.
fn strip_path_version(text: &[u8]) -> Cow<'_, [u8]> {
    let line_end = text
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| if i > 0 && text[i - 1] == b'\r' { i - 1 } else { i })
        .unwrap_or(text.len());
    let (line, rest) = text.split_at(line_end);

    match PATH_VERSION.replace_all(line, |caps: &Captures<'_>| {
        let next = caps.get(1).map(|m| m.as_bytes()).unwrap_or_default();
        let start = caps.get(0).map_or(0, |m| m.start());
        // Only a target reduced to nothing needs a root slash.
        let starts_target = start == 0 || line[start - 1] == b' ';
        if starts_target && next != b"/" {
            [b"/".as_slice(), next].concat()
        } else {
            next.to_vec()
        }
    }) {
        Cow::Borrowed(_) => Cow::Borrowed(text),
        Cow::Owned(mut line) => {
            line.extend_from_slice(rest);
            Cow::Owned(line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(input: &str) -> String {
        let rewriter = Rewriter::default();
        String::from_utf8(rewriter.rewrite(input.as_bytes(), RewriteScope::Full).into_owned()).unwrap()
    }

    #[test]
    fn strips_version_prefix_from_path() {
        assert_eq!(
            full("GET /v1.40/containers/json HTTP/1.1\r\nHost: x\r\n\r\n"),
            "GET /containers/json HTTP/1.1\r\nHost: x\r\n\r\n"
        );
    }

    #[test]
    fn bare_version_path_becomes_root() {
        assert_eq!(full("GET /v1.40 HTTP/1.1\r\n\r\n"), "GET / HTTP/1.1\r\n\r\n");
        assert_eq!(full("GET /v1.40?all=1 HTTP/1.1\r\n\r\n"), "GET /?all=1 HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn trailing_version_segment_keeps_route() {
        assert_eq!(
            full("GET /containers/v1.40 HTTP/1.1\r\n\r\n"),
            "GET /containers HTTP/1.1\r\n\r\n"
        );
        assert_eq!(
            full("GET /containers/v1.40?all=1 HTTP/1.1\r\n\r\n"),
            "GET /containers?all=1 HTTP/1.1\r\n\r\n"
        );
    }

    #[test]
    fn version_lookalikes_are_left_alone() {
        let input = "GET /v1.40abc/x HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(full(input), input);
    }

    #[test]
    fn untouched_input_is_borrowed() {
        let rewriter = Rewriter::default();
        let input = b"GET /containers/json HTTP/1.1\r\nHost: x\r\n\r\n";
        assert!(matches!(rewriter.rewrite(input, RewriteScope::Full), Cow::Borrowed(_)));
        assert!(matches!(rewriter.rewrite(input, RewriteScope::PathOnly), Cow::Borrowed(_)));
    }

    #[test]
    fn api_version_header_pinned() {
        assert_eq!(
            full("GET /_ping HTTP/1.1\r\nHost: x\r\nApi-Version: 1.25\r\nAccept: */*\r\n\r\n"),
            "GET /_ping HTTP/1.1\r\nHost: x\r\nApi-Version: 1.44\r\nAccept: */*\r\n\r\n"
        );
    }

    #[test]
    fn api_version_header_is_case_insensitive() {
        assert_eq!(full("api-version:1.25\r\n"), "api-version:1.44\r\n");
    }

    #[test]
    fn user_agent_keeps_suffix() {
        assert_eq!(
            full("GET /info HTTP/1.1\r\nUser-Agent: Docker-Client/19.03 (linux)\r\n\r\n"),
            "GET /info HTTP/1.1\r\nUser-Agent: Docker-Client/1.44 (linux)\r\n\r\n"
        );
    }

    #[test]
    fn other_user_agents_unchanged() {
        let input = "GET /info HTTP/1.1\r\nUser-Agent: curl/8.5.0\r\n\r\n";
        assert_eq!(full(input), input);
    }

    #[test]
    fn path_only_scope_skips_headers() {
        let rewriter = Rewriter::default();
        let input = b"GET /v1.40/info HTTP/1.1\r\nApi-Version: 1.25\r\nUser-Agent: Docker-Client/19.03\r\n\r\n";
        let out = rewriter.rewrite(input, RewriteScope::PathOnly);
        assert_eq!(
            &out[..],
            b"GET /info HTTP/1.1\r\nApi-Version: 1.25\r\nUser-Agent: Docker-Client/19.03\r\n\r\n"
        );
    }

    #[test]
    fn path_rule_ignores_header_lines() {
        let input = "GET /info HTTP/1.1\r\nReferer: http://h/v1.40/x\r\n\r\n";
        assert_eq!(full(input), input);
    }

    #[test]
    fn custom_target_version() {
        let rewriter = Rewriter::new("1.41").unwrap();
        let out = rewriter.rewrite(b"Api-Version: 1.25\r\n", RewriteScope::Full);
        assert_eq!(&out[..], b"Api-Version: 1.41\r\n");
        assert_eq!(rewriter.target_version(), "1.41");
    }

    #[test]
    fn rejects_bad_target_version() {
        assert!(Rewriter::new("latest").is_err());
        assert!(Rewriter::new("1.").is_err());
        assert!(Rewriter::new("$1").is_err());
    }
}
