//! Tarball URL bookkeeping.
//!
//! Two rewrites happen around dist URLs. When a remote version is merged
//! into the cache, the recorded upstream URL adopts the *protocol* of the
//! configured uplink URL when the hosts match, so operators who front an
//! upstream with TLS (or deliberately without) see the scheme they chose.
//! When a manifest is served to a client, every dist URL is rewritten to
//! point at this registry.

use url::Url;

/// Last path segment of a tarball URL, e.g. `foo-1.0.0.tgz`.
pub fn filename_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let filename = url.path_segments()?.next_back()?;
    if filename.is_empty() {
        None
    } else {
        Some(filename.to_string())
    }
}

/// Aligns the protocol of `raw` with the uplink's configured URL when both
/// point at the same host. Anything unparseable is returned untouched.
pub fn align_protocol(raw: &str, uplink_url: &Url) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.host_str() == uplink_url.host_str() && url.scheme() != uplink_url.scheme() {
        if url.set_scheme(uplink_url.scheme()).is_err() {
            return raw.to_string();
        }
    }
    url.to_string()
}

/// Builds the dist URL clients see, pointing back at this registry:
/// `<protocol>://<host><url_prefix><name>/-/<filename>`.
pub fn local_dist_url(
    protocol: &str,
    host: &str,
    url_prefix: &str,
    name: &str,
    filename: &str,
) -> String {
    let prefix = url_prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{protocol}://{host}/{name}/-/{filename}")
    } else {
        format!("{protocol}://{host}/{prefix}/{name}/-/{filename}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://registry.npmjs.org/foo/-/foo-1.0.0.tgz").as_deref(),
            Some("foo-1.0.0.tgz")
        );
        assert_eq!(
            filename_from_url("https://registry.npmjs.org/@scope/foo/-/foo-2.0.0.tgz").as_deref(),
            Some("foo-2.0.0.tgz")
        );
        assert_eq!(filename_from_url("not a url"), None);
        assert_eq!(filename_from_url("https://registry.npmjs.org/"), None);
    }

    #[test]
    fn test_align_protocol_on_matching_host() {
        let uplink = Url::parse("https://registry.npmjs.org/").unwrap();
        assert_eq!(
            align_protocol("http://registry.npmjs.org/foo/-/foo-1.0.0.tgz", &uplink),
            "https://registry.npmjs.org/foo/-/foo-1.0.0.tgz"
        );
    }

    #[test]
    fn test_align_protocol_keeps_foreign_host() {
        let uplink = Url::parse("https://registry.npmjs.org/").unwrap();
        assert_eq!(
            align_protocol("http://cdn.example.com/foo-1.0.0.tgz", &uplink),
            "http://cdn.example.com/foo-1.0.0.tgz"
        );
    }

    #[test]
    fn test_local_dist_url() {
        assert_eq!(
            local_dist_url("http", "localhost:4873", "/", "foo", "foo-1.0.0.tgz"),
            "http://localhost:4873/foo/-/foo-1.0.0.tgz"
        );
        assert_eq!(
            local_dist_url("https", "npm.example.com", "/registry/", "@scope/foo", "foo-1.0.0.tgz"),
            "https://npm.example.com/registry/@scope/foo/-/foo-1.0.0.tgz"
        );
    }
}
