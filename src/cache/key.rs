//! Cache key derivation.
//!
//! The key is independent of the backend: `cache:<sha256 hex>` over the JSON
//! array
//!
//! ```text
//! [METHOD, path, [[k1, v1], [k2, v2]] (sorted), user id | null, [[name, value], ...]]
//! ```
//!
//! Every component is a JSON string, so decoded query values containing `&`
//! or `=` cannot collide with a different parameter set.

use crate::pipeline::RequestContext;
use sha2::{Digest, Sha256};

pub const KEY_PREFIX: &str = "cache:";

/// Which optional segments go into the key.
#[derive(Debug, Clone, Default)]
pub struct KeyOptions<'a> {
    /// Adds the authenticated user id (or `anonymous`).
    pub user_specific: bool,
    /// Request headers whose values are part of the key, matched case-insensitively.
    pub headers: &'a [String],
}

pub fn cache_key(ctx: &RequestContext, options: &KeyOptions<'_>) -> String {
    let mut params = ctx.query_pairs();
    params.sort();

    let user = options
        .user_specific
        .then(|| ctx.user_id().unwrap_or("anonymous"));

    let mut names: Vec<String> = options.headers.iter().map(|h| h.to_ascii_lowercase()).collect();
    names.sort();
    names.dedup();
    let headers: Vec<(&str, &str)> = names
        .iter()
        .map(|name| (name.as_str(), ctx.header(name).unwrap_or("")))
        .collect();

    let material = serde_json::json!([ctx.method.as_str(), ctx.path, params, user, headers]);
    let digest = Sha256::digest(material.to_string().as_bytes());
    format!("{}{}", KEY_PREFIX, hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use bytes::Bytes;

    fn ctx(uri: &str, headers: &[(&str, &str)]) -> RequestContext {
        let mut builder = http::Request::builder().uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        RequestContext::new(&builder.body(Bytes::new()).unwrap(), None)
    }

    #[test]
    fn test_query_order_does_not_matter() {
        let options = KeyOptions::default();
        let a = cache_key(&ctx("/api/products?b=2&a=1", &[]), &options);
        let b = cache_key(&ctx("/api/products?a=1&b=2", &[]), &options);
        assert_eq!(a, b);
        assert!(a.starts_with(KEY_PREFIX));
        assert_eq!(a.len(), KEY_PREFIX.len() + 64);

        let c = cache_key(&ctx("/api/products?a=1&b=3", &[]), &options);
        assert_ne!(a, c);
    }

    #[test]
    fn test_encoded_separators_do_not_collide() {
        let options = KeyOptions::default();
        let split = cache_key(&ctx("/api/products?a=1&b=2", &[]), &options);
        let packed = cache_key(&ctx("/api/products?a=1%26b%3D2", &[]), &options);
        assert_ne!(split, packed);

        let pipe = cache_key(&ctx("/api/products?a=x%7Cuser%3Au-1", &[]), &options);
        assert_ne!(pipe, cache_key(&ctx("/api/products?a=x", &[]), &options));
    }

    #[test]
    fn test_user_segment() {
        let options = KeyOptions {
            user_specific: true,
            headers: &[],
        };
        let anonymous = cache_key(&ctx("/me", &[]), &options);
        let mut alice = ctx("/me", &[]);
        alice.user = Some(AuthenticatedUser::new("u-1", "alice"));
        assert_ne!(anonymous, cache_key(&alice, &options));

        // Ignored unless enabled.
        assert_eq!(
            cache_key(&alice, &KeyOptions::default()),
            cache_key(&ctx("/me", &[]), &KeyOptions::default())
        );
    }

    #[test]
    fn test_header_subset() {
        let headers = vec!["Accept-Language".to_string()];
        let options = KeyOptions {
            user_specific: false,
            headers: &headers,
        };
        let en = cache_key(&ctx("/", &[("accept-language", "en")]), &options);
        let de = cache_key(&ctx("/", &[("accept-language", "de")]), &options);
        let en_other = cache_key(&ctx("/", &[("accept-language", "en"), ("x-trace", "1")]), &options);
        assert_ne!(en, de);
        assert_eq!(en, en_other);
    }
}
