//! Repository URL construction for entitlement-gated archives.
//!
//! Every entitlement repository lives at one of two shapes:
//!
//! * `archive.anbox-cloud.io/stable/` for the `anbox-cloud` entitlement;
//! * `esm.ubuntu.com/<repo_path>/ubuntu/` for everything else.
//!
//! Credentials travel inside the URL as `scheme://bearer:<token>@host/...`.

/// Repository path of the one entitlement served from its own archive.
pub const ANBOX_REPO_PATH: &str = "anbox-cloud";
const ANBOX_HOST_PATH: &str = "archive.anbox-cloud.io/stable/";
const ESM_HOST: &str = "esm.ubuntu.com";

/// Username presented alongside a resource token.
pub const BEARER_LOGIN: &str = "bearer";

/// Scheme-less `host/path/` key used in the credentials file.
pub fn credential_host_path(repo_path: &str) -> String {
    if repo_path == ANBOX_REPO_PATH {
        ANBOX_HOST_PATH.to_string()
    } else {
        format!("{ESM_HOST}/{repo_path}/ubuntu/")
    }
}

/// Upstream base URL used when contract data supplies none.
pub fn default_base_url(repo_path: &str) -> String {
    format!("https://{}", credential_host_path(repo_path))
}

/// Normalise a contract-supplied `aptURL` onto the repository base: a
/// trailing `/` for `anbox-cloud`, a trailing `/ubuntu/` for everything else.
pub fn normalize_apt_url(repo_path: &str, apt_url: &str) -> String {
    if repo_path == ANBOX_REPO_PATH {
        if apt_url.ends_with('/') {
            apt_url.to_string()
        } else {
            format!("{apt_url}/")
        }
    } else if apt_url.ends_with("/ubuntu/") {
        apt_url.to_string()
    } else if apt_url.ends_with('/') {
        format!("{apt_url}ubuntu/")
    } else {
        format!("{apt_url}/ubuntu/")
    }
}

/// Base URL for `repo_path`, preferring the contract's `aptURL` when present.
pub fn base_url(repo_path: &str, apt_url: Option<&str>) -> String {
    match apt_url {
        Some(url) if !url.is_empty() => normalize_apt_url(repo_path, url),
        _ => default_base_url(repo_path),
    }
}

/// Point `url` at a local mirror: scheme and host are replaced by
/// `http://<host>[:<port>]`, the path is kept.  Port 80 is omitted.
pub fn rewrite_for_local_mirror(url: &str, host: &str, port: u16) -> String {
    let path = url.splitn(4, '/').nth(3).unwrap_or("");
    if port == 80 {
        format!("http://{host}/{path}")
    } else {
        format!("http://{host}:{port}/{path}")
    }
}

/// Embed a bearer token as userinfo in an `http`/`https` URL.
pub fn embed_bearer(url: &str, token: &str) -> String {
    for scheme in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            return format!("{scheme}{BEARER_LOGIN}:{token}@{rest}");
        }
    }
    url.to_string()
}
