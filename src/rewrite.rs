//! Reference rewriter (component B, spec §4.B).
//!
//! Applies a mirror's regex rewrites to the repository portion of a
//! reference. Compilation is deferred to first use and cached; a pattern
//! that fails to compile is logged once and never applied again, but never
//! prevents the mirror's other rewrites (or any other mirror) from working.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use oci_distribution::Reference;
use regex::Regex;
use tracing::warn;

use crate::config::Mirror;

/// Compiled-regex cache, write-once per pattern text, matching the
/// discipline the transport cache uses (spec §5).
#[derive(Default)]
pub struct Rewriter {
    cache: Mutex<HashMap<String, Option<Regex>>>,
}

impl Rewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrites `reference` using `mirror`, if any mirror applies to
    /// `reference`'s registry. Exact-host lookup only; the caller is
    /// responsible for not consulting the wildcard mirror here (spec §4.B
    /// step 1 — rewrites, unlike endpoints, never fall back to `"*"`).
    pub fn rewrite(&self, reference: &Reference, mirror: Option<&Mirror>) -> Reference {
        let Some(mirror) = mirror else {
            return reference.clone();
        };

        let mut patterns: Vec<&String> = mirror.rewrites.keys().collect();
        patterns.sort();

        for pattern in patterns {
            let replacement = &mirror.rewrites[pattern];
            let Some(regex) = self.compiled(pattern) else {
                continue;
            };
            if regex.is_match(reference.repository()) {
                let rewritten_repo = regex
                    .replace(reference.repository(), replacement.as_str())
                    .into_owned();
                return reassemble(reference, &rewritten_repo);
            }
        }

        reference.clone()
    }

    fn compiled(&self, pattern: &str) -> Option<Regex> {
        let mut cache = self.cache.lock().expect("rewrite regex cache poisoned");
        if let Some(entry) = cache.get(pattern) {
            return entry.clone();
        }
        let compiled = match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(err) => {
                warn!(pattern, error = %err, "skipping mirror rewrite: regex does not compile");
                None
            }
        };
        cache.insert(pattern.to_string(), compiled.clone());
        compiled
    }
}

fn reassemble(original: &Reference, new_repository: &str) -> Reference {
    let mut whole = format!("{}/{}", original.registry(), new_repository);
    if let Some(digest) = original.digest() {
        whole.push('@');
        whole.push_str(digest);
    } else if let Some(tag) = original.tag() {
        whole.push(':');
        whole.push_str(tag);
    }
    Reference::from_str(&whole).unwrap_or_else(|_| original.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn mirror(rewrites: &[(&str, &str)]) -> Mirror {
        Mirror {
            endpoints: vec![],
            rewrites: rewrites
                .iter()
                .map(|(p, r)| (p.to_string(), r.to_string()))
                .collect(),
        }
    }

    #[rstest(
        reference,
        pattern,
        replacement,
        expected,
        case(
            "rancher/rancher:v2.5.9",
            "rancher/(.*)",
            "rancher/prod/$1",
            "index.docker.io/rancher/prod/rancher:v2.5.9"
        ),
        // a rewrite that only touches the repository still preserves the digest
        case(
            "busybox@sha256:82becede498899ec668628e7cb0ad87b6e1c371cb0ec6c6eec7bb51a388d6af3",
            "(.*)",
            "docker/$1",
            "index.docker.io/docker/library/busybox@sha256:82becede498899ec668628e7cb0ad87b6e1c371cb0ec6c6eec7bb51a388d6af3"
        ),
        // no backreference at all, still substitutes the whole repository
        case(
            "library/nginx:1.25",
            "library/nginx",
            "mirror/nginx",
            "index.docker.io/mirror/nginx:1.25"
        )
    )]
    fn s1_s2_rewrite_scenarios(reference: &str, pattern: &str, replacement: &str, expected: &str) {
        let rewriter = Rewriter::new();
        let reference = Reference::from_str(reference).unwrap();
        let m = mirror(&[(pattern, replacement)]);
        let rewritten = rewriter.rewrite(&reference, Some(&m));
        assert_eq!(crate::host::display_name(&rewritten), expected);
    }

    #[test]
    fn no_mirror_returns_reference_unchanged() {
        let rewriter = Rewriter::new();
        let reference = Reference::from_str("busybox:latest").unwrap();
        let rewritten = rewriter.rewrite(&reference, None);
        assert_eq!(rewritten.whole(), reference.whole());
    }

    #[test]
    fn bad_regex_is_skipped_not_fatal() {
        let rewriter = Rewriter::new();
        let reference = Reference::from_str("rancher/rancher:v1").unwrap();
        let m = mirror(&[("(unterminated", "x"), ("rancher/(.*)", "ok/$1")]);
        let rewritten = rewriter.rewrite(&reference, Some(&m));
        assert_eq!(rewritten.repository(), "ok/rancher");
    }

    #[test]
    fn rewrite_is_idempotent_given_single_matching_pattern() {
        let rewriter = Rewriter::new();
        let reference = Reference::from_str("rancher/rancher:v2.5.9").unwrap();
        let m = mirror(&[("rancher/(.*)", "rancher/prod/$1")]);
        let once = rewriter.rewrite(&reference, Some(&m));
        let twice = rewriter.rewrite(&once, Some(&m));
        // applying the rewriter again with the same (now non-matching)
        // pattern is a no-op, so the second pass returns the same reference.
        assert_eq!(once.whole(), twice.whole());
    }

    #[test]
    fn evaluation_order_is_sorted_lexicographically() {
        let rewriter = Rewriter::new();
        let reference = Reference::from_str("busybox:latest").unwrap();
        let m = mirror(&[("b.*", "z/$0"), ("a.*", "y/$0")]);
        // "a.*" sorts before "b.*"; "a.*" does not match "busybox", so "b.*" wins.
        let rewritten = rewriter.rewrite(&reference, Some(&m));
        assert!(rewritten.repository().starts_with("z/"));
    }
}
