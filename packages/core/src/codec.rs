//! Flattening of `(node path, key)` pairs into single tokens.
//!
//! Preference files and export streams store every value under one flat
//! token. A key that contains `/` is separated from its path by `//` so it
//! can be told apart from deeper nodes:
//!
//! | path    | key     | token        |
//! |---------|---------|--------------|
//! | `""`    | `a`     | `a`          |
//! | `a/b`   | `c`     | `a/b/c`      |
//! | `""`    | `/a`    | `///a`       |
//! | `a/b`   | `c/d`   | `a/b//c/d`   |
//!
//! Decoding splits at the first `//` when there is one, otherwise at the last
//! `/`.

const DOUBLE_SLASH: &str = "//";

/// Encode a node path and key into a single token.
///
/// `path` must not contain empty segments (`a//b`) or end with `/`; such a
/// token would not decode back to the same pair. Debug builds assert this.
pub fn encode_path(path: &str, key: &str) -> String {
    let separator = if key.contains('/') { "//" } else { "/" };
    let token = if path.is_empty() {
        if key.contains('/') {
            format!("{}{}", DOUBLE_SLASH, key)
        } else {
            key.to_string()
        }
    } else {
        format!("{}{}{}", path, separator, key)
    };
    debug_assert!(
        decode_path(&token) == (path.to_string(), key.to_string()),
        "({:?}, {:?}) does not survive encoding as {:?}",
        path,
        key,
        token
    );
    token
}

/// Split a token back into its node path and key.
///
/// An empty path is returned as `""`. Decoding never fails: every string
/// splits into some pair, so a token that [`encode_path`] could not have
/// produced (`/a`, a bare `//`) decodes without complaint. Stored files and
/// import streams are read this way, so hand-edited tokens still load.
pub fn decode_path(token: &str) -> (String, String) {
    if let Some(index) = token.find(DOUBLE_SLASH) {
        return (
            token[..index].to_string(),
            token[index + DOUBLE_SLASH.len()..].to_string(),
        );
    }
    match token.rfind('/') {
        Some(index) => (token[..index].to_string(), token[index + 1..].to_string()),
        None => (String::new(), token.to_string()),
    }
}

/// The `index`-th non-empty segment of `path`, ignoring leading and trailing
/// slashes.
pub fn segment(path: &str, index: usize) -> Option<&str> {
    path.split('/').filter(|s| !s.is_empty()).nth(index)
}

/// Number of non-empty segments in `path`.
pub fn segment_count(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Strip a single leading `/`.
pub fn make_relative(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VECTORS: &[(&str, &str, &str)] = &[
        ("", "a", "a"),
        ("", "/a", "///a"),
        ("a", "b", "a/b"),
        ("a/b", "c", "a/b/c"),
        ("a/b", "c/d", "a/b//c/d"),
        ("a", "b//c", "a//b//c"),
        ("", "a//b", "//a//b"),
        ("a/b", "c//d", "a/b//c//d"),
        (
            "repositories",
            "cvs://dev.eclipse.org:25/cvsroot",
            "repositories//cvs://dev.eclipse.org:25/cvsroot",
        ),
        (
            "repositories:cvs",
            "dev.eclipse.org:25",
            "repositories:cvs/dev.eclipse.org:25",
        ),
    ];

    #[test]
    fn encode_vectors() {
        for (path, key, token) in VECTORS {
            assert_eq!(encode_path(path, key), *token, "encode({:?}, {:?})", path, key);
        }
    }

    #[test]
    fn decode_vectors() {
        for (path, key, token) in VECTORS {
            assert_eq!(
                decode_path(token),
                (path.to_string(), key.to_string()),
                "decode({:?})",
                token
            );
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not survive encoding")]
    fn encode_rejects_paths_with_empty_segments() {
        encode_path("a//b", "k");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not survive encoding")]
    fn encode_rejects_trailing_slash() {
        encode_path("a/", "k/x");
    }

    #[test]
    fn decode_accepts_tokens_encode_never_writes() {
        assert_eq!(decode_path("/a"), (String::new(), "a".to_string()));
        assert_eq!(decode_path("//a"), (String::new(), "a".to_string()));
        assert_eq!(decode_path(""), (String::new(), String::new()));
        assert_eq!(
            decode_path("/instance/q/k"),
            ("/instance/q".to_string(), "k".to_string())
        );
    }

    #[test]
    fn segments() {
        assert_eq!(segment("/instance/foo", 0), Some("instance"));
        assert_eq!(segment("instance/foo/", 1), Some("foo"));
        assert_eq!(segment("instance", 1), None);
        assert_eq!(segment("", 0), None);
        assert_eq!(segment_count("/instance/foo/"), 2);
        assert_eq!(segment_count("instance"), 1);
        assert_eq!(segment_count("/"), 0);
    }

    #[test]
    fn relative() {
        assert_eq!(make_relative("/a/b"), "a/b");
        assert_eq!(make_relative("a/b"), "a/b");
        assert_eq!(make_relative("/"), "");
    }

    mod proptests {
        use crate::codec::{decode_path, encode_path};
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_roundtrip(
                segments in prop::collection::vec("[^/]{1,8}", 0..4),
                key in "[^/]{1,8}(/{0,2}[^/]{1,8}){0,3}",
            ) {
                let path = segments.join("/");
                let token = encode_path(&path, &key);
                prop_assert_eq!(decode_path(&token), (path, key));
            }

            #[test]
            fn prop_plain_keys_need_no_escape(
                segments in prop::collection::vec("[a-z:.]{1,8}", 1..4),
                key in "[a-z:.]{1,8}",
            ) {
                let path = segments.join("/");
                let token = encode_path(&path, &key);
                prop_assert!(!token.contains("//"));
                prop_assert_eq!(token, format!("{}/{}", path, key));
            }
        }
    }
}
