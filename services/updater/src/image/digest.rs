//! Digest comparison: decide whether a pull is actually needed.

use crate::daemon::ImageInspect;

/// Find the locally recorded repo digest for a repository name.
///
/// Prefers an entry for exactly `repo_name`; falls back to any
/// digest-bearing entry (single-repo images frequently record the digest
/// under a normalized name).
pub fn local_repo_digest(inspect: &ImageInspect, repo_name: &str) -> Option<String> {
    let prefix = format!("{repo_name}@");
    let exact = inspect
        .repo_digests
        .iter()
        .find(|entry| entry.starts_with(&prefix));
    let fallback = inspect.repo_digests.iter().find(|entry| entry.contains('@'));

    exact
        .or(fallback)
        .and_then(|entry| entry.split_once('@'))
        .map(|(_, digest)| digest.to_string())
        .filter(|digest| !digest.is_empty())
}

/// The pull decision rule.
///
/// A pull is skipped only when the digest comparison is trusted for this tag
/// (`latest`, or any tag when `check_all_tags` is set) and both digests are
/// known and equal. A fixed tag can be silently repointed by its publisher,
/// so outside the comparison regime every tick pulls; likewise any missing
/// digest fails safe toward freshness.
pub fn needs_pull(
    effective_tag: &str,
    local_digest: Option<&str>,
    remote_digest: Option<&str>,
    check_all_tags: bool,
) -> bool {
    if effective_tag != "latest" && !check_all_tags {
        return true;
    }
    match (local_digest, remote_digest) {
        (Some(local), Some(remote)) if !local.is_empty() && !remote.is_empty() => local != remote,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn inspect(repo_digests: &[&str]) -> ImageInspect {
        ImageInspect {
            id: "sha256:img".to_string(),
            repo_digests: repo_digests.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_local_digest_prefers_exact_repo() {
        let image = inspect(&["other@sha256:aaa", "nginx@sha256:bbb"]);
        assert_eq!(
            local_repo_digest(&image, "nginx"),
            Some("sha256:bbb".to_string())
        );
    }

    #[test]
    fn test_local_digest_falls_back_to_any_entry() {
        let image = inspect(&["docker.io/library/nginx@sha256:ccc"]);
        assert_eq!(
            local_repo_digest(&image, "nginx"),
            Some("sha256:ccc".to_string())
        );
    }

    #[test]
    fn test_local_digest_none_when_absent() {
        assert_eq!(local_repo_digest(&inspect(&[]), "nginx"), None);
        assert_eq!(local_repo_digest(&inspect(&["garbage"]), "nginx"), None);
    }

    #[rstest]
    // latest + equal digests: the only skip case
    #[case("latest", Some("sha256:a"), Some("sha256:a"), false, false)]
    // latest + differing digests
    #[case("latest", Some("sha256:a"), Some("sha256:b"), false, true)]
    // latest + missing either side
    #[case("latest", None, Some("sha256:b"), false, true)]
    #[case("latest", Some("sha256:a"), None, false, true)]
    #[case("latest", Some(""), Some("sha256:b"), false, true)]
    // fixed tags always pull by default
    #[case("1.25", Some("sha256:a"), Some("sha256:a"), false, true)]
    // unless the comparison regime is widened
    #[case("1.25", Some("sha256:a"), Some("sha256:a"), true, false)]
    #[case("1.25", Some("sha256:a"), Some("sha256:b"), true, true)]
    fn test_needs_pull(
        #[case] tag: &str,
        #[case] local: Option<&str>,
        #[case] remote: Option<&str>,
        #[case] check_all_tags: bool,
        #[case] expected: bool,
    ) {
        assert_eq!(needs_pull(tag, local, remote, check_all_tags), expected);
    }
}
