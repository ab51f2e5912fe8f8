//! Path normalization and hashing shared by directory lookups
//!
//! Archive entries are matched case-insensitively with either slash style
//! accepted, so every lookup key is reduced to the same canonical form
//! before comparison or hashing: backslashes become forward slashes, ASCII
//! letters are lowercased, and a leading/trailing slash is stripped.

/// Normalize a path the way directory lookups expect: backslashes
/// become slashes, ASCII is lowercased, and leading/trailing slashes are
/// trimmed. Non-ASCII bytes are left untouched.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '\\' => out.push('/'),
            c if c.is_ascii() => out.push(c.to_ascii_lowercase()),
            c => out.push(c),
        }
    }
    let trimmed = out.trim_matches('/');
    trimmed.to_string()
}

/// Compute the CRC-32 of a normalized path, used as the lookup key in the
/// hashed flat directory representation.
pub fn hash(path: &str) -> u32 {
    let normalized = normalize(path);
    crc32fast::hash(normalized.as_bytes())
}

/// Split a normalized path into (parent_dir, leaf_name), where `parent_dir`
/// is `""` for a top-level entry.
pub fn split_parent(normalized: &str) -> (&str, &str) {
    match normalized.rfind('/') {
        Some(idx) => (&normalized[..idx], &normalized[idx + 1..]),
        None => ("", normalized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let p = "Some\\Dir\\File.TXT";
        let once = normalize(p);
        let twice = normalize(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "some/dir/file.txt");
    }

    #[test]
    fn normalize_leaves_non_ascii_bytes_untouched() {
        let p = "Café\\Desserts";
        let once = normalize(p);
        let twice = normalize(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "café/desserts");
    }

    #[test]
    fn normalize_strips_enclosing_slashes() {
        assert_eq!(normalize("/a/b/"), "a/b");
        assert_eq!(normalize("\\a\\b\\"), "a/b");
    }

    #[test]
    fn hash_is_case_and_slash_insensitive() {
        assert_eq!(hash("Textures\\Rock.dds"), hash("textures/rock.dds"));
    }

    #[test]
    fn split_parent_handles_top_level() {
        assert_eq!(split_parent("file.txt"), ("", "file.txt"));
        assert_eq!(split_parent("a/b/c.txt"), ("a/b", "c.txt"));
    }
}
