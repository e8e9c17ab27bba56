//! Glob matching for cache invalidation patterns.
//!
//! Supports the subset of Redis glob syntax the engine uses: `*` matches any
//! run of characters, `?` matches exactly one, `\` escapes the next character.

/// Check whether `key` matches `pattern`
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0usize, 0usize);
    // Position after the last `*` and the key index it was tried against
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi + 1, ki));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ki += 1;
                    continue;
                }
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == k[ki] {
                        pi += 2;
                        ki += 1;
                        continue;
                    }
                }
                c if c == k[ki] => {
                    pi += 1;
                    ki += 1;
                    continue;
                }
                _ => {}
            }
        }

        // Mismatch: backtrack to the last star, consuming one more key char
        match star {
            Some((star_pi, star_ki)) => {
                pi = star_pi;
                ki = star_ki + 1;
                star = Some((star_pi, star_ki + 1));
            }
            None => return false,
        }
    }

    // Trailing stars match the empty remainder
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(glob_match("catalog:snapshot", "catalog:snapshot"));
        assert!(!glob_match("catalog:snapshot", "catalog:snapshots"));
    }

    #[test]
    fn test_star() {
        assert!(glob_match("result:*", "result:status:abc"));
        assert!(glob_match("*", ""));
        assert!(glob_match("result:*:abc", "result:status:abc"));
        assert!(!glob_match("result:*:abc", "result:status:abd"));
        assert!(glob_match("a*b*c", "axxbyyc"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match("k?y", "key"));
        assert!(!glob_match("k?y", "ky"));
    }

    #[test]
    fn test_escape() {
        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axb"));
    }
}
