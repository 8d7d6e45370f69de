//! Content URI normalization.
//!
//! Rewrites enrichment-source addresses into fetchable HTTPS form:
//!
//! - `ipfs://` URIs go through a public HTTPS gateway
//! - `https://ipfs.infura.io` is replaced by its successor host
//!
//! Anything else passes through unchanged. The rules rewrite prefixes only,
//! first match wins, and no rewritten URI matches a rule again, so the
//! function is idempotent.

/// HTTPS gateway that serves `ipfs://` content.
pub const IPFS_GATEWAY: &str = "https://cf-ipfs.com/ipfs/";

/// Replacement host for the retired Infura IPFS gateway.
pub const INFURA_GATEWAY: &str = "https://infura-ipfs.io";

const IPFS_SCHEME: &str = "ipfs://";
const INFURA_HOST: &str = "https://ipfs.infura.io";

/// Rewrite a content URI into fetchable form.
pub fn normalize_content_uri(uri: &str) -> String {
    if let Some(rest) = uri.strip_prefix(IPFS_SCHEME) {
        return format!("{IPFS_GATEWAY}{rest}");
    }
    if let Some(rest) = uri.strip_prefix(INFURA_HOST) {
        return format!("{INFURA_GATEWAY}{rest}");
    }
    uri.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipfs_scheme_rewrite() {
        assert_eq!(
            normalize_content_uri("ipfs://Qm123"),
            "https://cf-ipfs.com/ipfs/Qm123"
        );
    }

    #[test]
    fn test_infura_host_rewrite() {
        assert_eq!(
            normalize_content_uri("https://ipfs.infura.io/ipfs/Qm123"),
            "https://infura-ipfs.io/ipfs/Qm123"
        );
    }

    #[test]
    fn test_passthrough() {
        assert_eq!(
            normalize_content_uri("https://example.com/meta.json"),
            "https://example.com/meta.json"
        );
        assert_eq!(normalize_content_uri(""), "");
        assert_eq!(normalize_content_uri("arweave://abc"), "arweave://abc");
    }

    #[test]
    fn test_idempotence() {
        for uri in [
            "ipfs://Qm123",
            "https://ipfs.infura.io/ipfs/Qm123",
            "https://example.com/meta.json",
        ] {
            let once = normalize_content_uri(uri);
            let twice = normalize_content_uri(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_scheme_must_be_prefix() {
        // An ipfs:// occurrence mid-string is not a scheme and is left alone.
        let uri = "https://example.com/?href=ipfs://Qm123";
        assert_eq!(normalize_content_uri(uri), uri);
    }
}
