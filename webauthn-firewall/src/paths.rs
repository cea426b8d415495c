//! Protected path matching
//!
//! The router matches protected routes on the raw request path only. Backends
//! commonly decode, clean up or case-fold paths before routing, so a request
//! such as `POST /Withdraw/` may reach the same backend handler as
//! `POST /withdraw`. [`ProtectedPaths`] recognizes those alternate spellings
//! so the proxy can refuse them instead of forwarding them ungated.

use percent_encoding::percent_decode_str;

/// Nested encodings (`%2564`) are unwrapped at most this many times
const MAX_DECODE_ROUNDS: usize = 3;

/// Canonical form of a request path.
///
/// Percent-decodes (repeatedly), treats `\` as `/`, drops `;params`, empty
/// and `.` segments, resolves `..` and lowercases ASCII. The result always
/// starts with `/` and never ends with one, except for the root itself.
pub fn canonical_path(raw: &str) -> String {
    let mut decoded = raw.to_string();
    for _ in 0..MAX_DECODE_ROUNDS {
        let next = percent_decode_str(&decoded).decode_utf8_lossy().into_owned();
        if next == decoded {
            break;
        }
        decoded = next;
    }

    let mut segments: Vec<String> = Vec::new();
    for segment in decoded.replace('\\', "/").split('/') {
        let segment = segment.split(';').next().unwrap_or("");
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment.to_ascii_lowercase()),
        }
    }
    format!("/{}", segments.join("/"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    /// `{name}`: exactly one segment
    Param,
    /// `{*name}`: one or more trailing segments
    CatchAll,
}

#[derive(Debug, Clone)]
struct PathPattern {
    path: String,
    segments: Vec<PatternSegment>,
}

impl PathPattern {
    fn parse(path: &str) -> Self {
        let segments = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                if segment.starts_with("{*") && segment.ends_with('}') {
                    PatternSegment::CatchAll
                } else if segment.starts_with('{') && segment.ends_with('}') {
                    PatternSegment::Param
                } else {
                    let literal = canonical_path(segment);
                    PatternSegment::Literal(literal.trim_start_matches('/').to_string())
                }
            })
            .collect();
        Self {
            path: path.to_string(),
            segments,
        }
    }

    fn matches(&self, canonical: &str) -> bool {
        let request: Vec<&str> = canonical.split('/').filter(|s| !s.is_empty()).collect();
        let mut position = 0;
        for segment in &self.segments {
            match segment {
                PatternSegment::CatchAll => return position < request.len(),
                PatternSegment::Param => {
                    if position >= request.len() {
                        return false;
                    }
                }
                PatternSegment::Literal(literal) => {
                    if request.get(position) != Some(&literal.as_str()) {
                        return false;
                    }
                }
            }
            position += 1;
        }
        position == request.len()
    }
}

/// The configured protected paths, matched in canonical form
#[derive(Debug, Clone, Default)]
pub struct ProtectedPaths {
    patterns: Vec<PathPattern>,
}

impl ProtectedPaths {
    pub fn new<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            patterns: paths.into_iter().map(PathPattern::parse).collect(),
        }
    }

    /// The protected path that `raw` is a spelling of, if any
    pub fn protected_by(&self, raw: &str) -> Option<&str> {
        let canonical = canonical_path(raw);
        self.patterns
            .iter()
            .find(|pattern| pattern.matches(&canonical))
            .map(|pattern| pattern.path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_path() {
        assert_eq!(canonical_path("/withdraw"), "/withdraw");
        assert_eq!(canonical_path("/withdraw/"), "/withdraw");
        assert_eq!(canonical_path("//withdraw"), "/withdraw");
        assert_eq!(canonical_path("/Withdraw"), "/withdraw");
        assert_eq!(canonical_path("/with%64raw"), "/withdraw");
        assert_eq!(canonical_path("/with%2564raw"), "/withdraw");
        assert_eq!(canonical_path("/./a/../withdraw"), "/withdraw");
        assert_eq!(canonical_path("/withdraw;jsessionid=1"), "/withdraw");
        assert_eq!(canonical_path("\\withdraw"), "/withdraw");
        assert_eq!(canonical_path("/../.."), "/");
    }

    #[test]
    fn test_literal_paths() {
        let paths = ProtectedPaths::new(["/withdraw", "/api/Transfer"]);
        assert_eq!(paths.protected_by("/WITHDRAW/"), Some("/withdraw"));
        assert_eq!(paths.protected_by("/api//transfer"), Some("/api/Transfer"));
        assert_eq!(paths.protected_by("/withdrawals"), None);
        assert_eq!(paths.protected_by("/api"), None);
        assert_eq!(paths.protected_by("/"), None);
    }

    #[test]
    fn test_parameterized_paths() {
        let paths = ProtectedPaths::new(["/accounts/{id}/close", "/files/{*rest}"]);
        assert_eq!(
            paths.protected_by("/accounts/7/close/"),
            Some("/accounts/{id}/close")
        );
        assert_eq!(paths.protected_by("/accounts/close"), None);
        assert_eq!(paths.protected_by("/Files/a/b"), Some("/files/{*rest}"));
        assert_eq!(paths.protected_by("/files"), None);
        assert_eq!(ProtectedPaths::default().protected_by("/withdraw"), None);
    }
}
