//! `Cache-Control` directive parsing.
//!
//! Grammar: comma-separated `token[=value]` pairs, value optionally quoted.
//! Directives are applied through a declarative table mapping each directive
//! name to a pure transform on the target [`CacheDirectives`], so adding a
//! directive is a single table entry.

/// The recognized caching directives of a request or response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age_seconds: Option<u32>,
    pub s_max_age_seconds: Option<u32>,
    pub max_stale_seconds: Option<u32>,
    pub min_fresh_seconds: Option<u32>,
    pub no_transform: bool,
    pub only_if_cached: bool,
    pub public: bool,
    pub private: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
}

type Apply = fn(Option<&str>, &mut CacheDirectives);

static DIRECTIVES: &[(&str, Apply)] = &[
    ("no-cache", |_, d| d.no_cache = true),
    ("no-store", |_, d| d.no_store = true),
    ("max-age", |p, d| d.max_age_seconds = parse_seconds(p)),
    ("s-max-age", |p, d| d.s_max_age_seconds = parse_seconds(p)),
    ("max-stale", |p, d| d.max_stale_seconds = parse_seconds(p)),
    ("min-fresh", |p, d| d.min_fresh_seconds = parse_seconds(p)),
    ("no-transform", |_, d| d.no_transform = true),
    ("only-if-cached", |_, d| d.only_if_cached = true),
    ("public", |_, d| d.public = true),
    ("private", |_, d| d.private = true),
    ("must-revalidate", |_, d| d.must_revalidate = true),
    ("proxy-revalidate", |_, d| d.proxy_revalidate = true),
];

impl CacheDirectives {
    /// Fold one `Cache-Control` header value into this directive set.
    pub fn parse_into(&mut self, value: &str) {
        let bytes = value.as_bytes();
        let mut pos = 0;
        while pos < bytes.len() {
            let token_start = pos;
            pos = skip_until(value, pos, "=,");
            let directive = value[token_start..pos].trim();

            let parameter = if pos == value.len() || bytes[pos] == b',' {
                pos += 1; // consume ',' (if present)
                None
            } else {
                pos += 1; // consume '='
                pos = skip_whitespace(value, pos);
                if pos < value.len() && bytes[pos] == b'"' {
                    pos += 1; // consume open quote
                    let start = pos;
                    pos = skip_until(value, pos, "\"");
                    let parameter = &value[start..pos];
                    pos += 1; // consume close quote (if present)
                    Some(parameter)
                } else {
                    let start = pos;
                    pos = skip_until(value, pos, ",");
                    Some(value[start..pos].trim())
                }
            };

            self.apply(directive, parameter);
        }
    }

    fn apply(&mut self, directive: &str, parameter: Option<&str>) {
        for (name, apply) in DIRECTIVES {
            if directive.eq_ignore_ascii_case(name) {
                apply(parameter, self);
                return;
            }
        }
        // Unrecognized directives are ignored.
    }
}

/// Next index at or after `pos` containing a character from `characters`,
/// or the input length.
fn skip_until(input: &str, mut pos: usize, characters: &str) -> usize {
    let bytes = input.as_bytes();
    while pos < bytes.len() && !characters.as_bytes().contains(&bytes[pos]) {
        pos += 1;
    }
    pos
}

fn skip_whitespace(input: &str, mut pos: usize) -> usize {
    let bytes = input.as_bytes();
    while pos < bytes.len() && (bytes[pos] == b' ' || bytes[pos] == b'\t') {
        pos += 1;
    }
    pos
}

/// Seconds values: negative clamps to zero, oversized saturates,
/// unparseable (or absent) is ignored.
fn parse_seconds(parameter: Option<&str>) -> Option<u32> {
    let seconds = parameter?.parse::<i64>().ok()?;
    if seconds < 0 {
        Some(0)
    } else if seconds > u32::MAX as i64 {
        Some(u32::MAX)
    } else {
        Some(seconds as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: &str) -> CacheDirectives {
        let mut directives = CacheDirectives::default();
        directives.parse_into(value);
        directives
    }

    #[test]
    fn test_simple_flags() {
        let d = parse("no-cache, no-store");
        assert!(d.no_cache);
        assert!(d.no_store);
        assert!(!d.must_revalidate);
    }

    #[test]
    fn test_max_age() {
        let d = parse("max-age=3600");
        assert_eq!(d.max_age_seconds, Some(3600));
    }

    #[test]
    fn test_quoted_parameter() {
        let d = parse("max-age=\"60\", private");
        assert_eq!(d.max_age_seconds, Some(60));
        assert!(d.private);
    }

    #[test]
    fn test_case_insensitive_directive() {
        let d = parse("Max-Age=10, NO-STORE");
        assert_eq!(d.max_age_seconds, Some(10));
        assert!(d.no_store);
    }

    #[test]
    fn test_negative_seconds_clamped() {
        let d = parse("max-age=-5");
        assert_eq!(d.max_age_seconds, Some(0));
    }

    #[test]
    fn test_oversized_seconds_saturate() {
        let d = parse("max-age=99999999999");
        assert_eq!(d.max_age_seconds, Some(u32::MAX));
    }

    #[test]
    fn test_unparseable_seconds_ignored() {
        let d = parse("max-age=abc, min-fresh");
        assert_eq!(d.max_age_seconds, None);
        assert_eq!(d.min_fresh_seconds, None);
    }

    #[test]
    fn test_unknown_directive_ignored() {
        let d = parse("immutable, stale-while-revalidate=30, max-age=1");
        assert_eq!(d.max_age_seconds, Some(1));
    }

    #[test]
    fn test_whitespace_and_full_set() {
        let d = parse(
            "public ,  s-max-age=600 , max-stale=30, min-fresh=5,\
             no-transform, only-if-cached, must-revalidate, proxy-revalidate",
        );
        assert!(d.public);
        assert_eq!(d.s_max_age_seconds, Some(600));
        assert_eq!(d.max_stale_seconds, Some(30));
        assert_eq!(d.min_fresh_seconds, Some(5));
        assert!(d.no_transform);
        assert!(d.only_if_cached);
        assert!(d.must_revalidate);
        assert!(d.proxy_revalidate);
    }

    #[test]
    fn test_multiple_headers_fold() {
        let mut d = CacheDirectives::default();
        d.parse_into("no-cache");
        d.parse_into("max-age=7");
        assert!(d.no_cache);
        assert_eq!(d.max_age_seconds, Some(7));
    }
}
