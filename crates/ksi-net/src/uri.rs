//! URI parsing/composition for endpoint configuration.
//!
//! Grammar: `scheme://[user[:pass]@]host[:port][/path][?query][#fragment]`.
//! Recognized schemes are `ksi`, `ksi+http`, `ksi+https`, `ksi+tcp`, `http`,
//! `https`, `file`; a bare `ksi` scheme is an HTTP alias.

use crate::error::{Result, TransportError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UriParts {
    pub scheme: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

/// The transport a URI scheme resolves to once `ksi`'s HTTP default is
/// applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedScheme {
    Http,
    Https,
    Tcp,
    File,
}

impl UriParts {
    pub fn resolved_scheme(&self) -> Result<ResolvedScheme> {
        match self.scheme.as_str() {
            "ksi" | "ksi+http" | "http" => Ok(ResolvedScheme::Http),
            "ksi+https" | "https" => Ok(ResolvedScheme::Https),
            "ksi+tcp" => Ok(ResolvedScheme::Tcp),
            "file" => Ok(ResolvedScheme::File),
            other => Err(TransportError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Split a URI string into its constituent parts. This is a focused parser
/// for the KSI endpoint grammar, not a general-purpose RFC 3986 parser: it
/// accepts exactly what `uri_compose` can produce.
pub fn uri_split(uri: &str) -> Result<UriParts> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| TransportError::BadUri(uri.to_string()))?;
    if scheme.is_empty() {
        return Err(TransportError::BadUri(uri.to_string()));
    }

    let (rest, fragment) = match rest.split_once('#') {
        Some((r, f)) => (r, Some(f.to_string())),
        None => (rest, None),
    };
    let (rest, query) = match rest.split_once('?') {
        Some((r, q)) => (r, Some(q.to_string())),
        None => (rest, None),
    };
    let (authority, path) = match rest.split_once('/') {
        Some((a, p)) => (a, Some(format!("/{p}"))),
        None => (rest, None),
    };

    let (userinfo, hostport) = match authority.rsplit_once('@') {
        Some((u, h)) => (Some(u), h),
        None => (None, authority),
    };
    let (user, pass) = match userinfo {
        Some(u) => match u.split_once(':') {
            Some((user, pass)) => (Some(user.to_string()), Some(pass.to_string())),
            None => (Some(u.to_string()), None),
        },
        None => (None, None),
    };

    if hostport.is_empty() {
        return Err(TransportError::BadUri(uri.to_string()));
    }
    let (host, port) = match hostport.rsplit_once(':') {
        Some((h, p)) if !h.is_empty() && p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
            let port: u16 = p
                .parse()
                .map_err(|_| TransportError::BadUri(uri.to_string()))?;
            (h.to_string(), Some(port))
        }
        _ => (hostport.to_string(), None),
    };

    Ok(UriParts {
        scheme: scheme.to_string(),
        user,
        pass,
        host,
        port,
        path,
        query,
        fragment,
    })
}

/// Recompose a [`UriParts`] into a URI string. `uri_compose(uri_split(s)) ==
/// s` for every `s` this module can split (spec.md §8 scenario 5).
pub fn uri_compose(parts: &UriParts) -> String {
    let mut out = String::new();
    out.push_str(&parts.scheme);
    out.push_str("://");
    if let Some(user) = &parts.user {
        out.push_str(user);
        if let Some(pass) = &parts.pass {
            out.push(':');
            out.push_str(pass);
        }
        out.push('@');
    }
    out.push_str(&parts.host);
    if let Some(port) = parts.port {
        out.push(':');
        out.push_str(&port.to_string());
    }
    if let Some(path) = &parts.path {
        out.push_str(path);
    }
    if let Some(query) = &parts.query {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = &parts.fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_full_uri() {
        let uri = "ksi+http://u:p@127.0.0.1:80/test/c.txt?a=1#frag";
        let parts = uri_split(uri).unwrap();
        assert_eq!(parts.user.as_deref(), Some("u"));
        assert_eq!(parts.pass.as_deref(), Some("p"));
        assert_eq!(parts.host, "127.0.0.1");
        assert_eq!(parts.port, Some(80));
        assert_eq!(parts.path.as_deref(), Some("/test/c.txt"));
        assert_eq!(parts.query.as_deref(), Some("a=1"));
        assert_eq!(parts.fragment.as_deref(), Some("frag"));
        assert_eq!(uri_compose(&parts), uri);
    }

    #[test]
    fn bare_host_round_trips() {
        let uri = "https://example.com";
        let parts = uri_split(uri).unwrap();
        assert_eq!(parts.host, "example.com");
        assert_eq!(uri_compose(&parts), uri);
    }

    #[test]
    fn ksi_scheme_defaults_to_http() {
        let parts = uri_split("ksi://gateway.example.com:443/sign").unwrap();
        assert_eq!(parts.resolved_scheme().unwrap(), ResolvedScheme::Http);
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let parts = uri_split("ftp://example.com").unwrap();
        assert!(matches!(
            parts.resolved_scheme(),
            Err(TransportError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn missing_scheme_separator_is_rejected() {
        assert!(uri_split("not-a-uri").is_err());
    }
}
