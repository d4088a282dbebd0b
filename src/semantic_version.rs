//! Semantic version comparison used by `semver_*` match types.
//!
//! Versions are compared up to the precision of the *target* (condition) version, so `"2.1"`
//! targets every `2.1.x`. A pre-release suffix (`-`) sorts before the release; a build suffix
//! (`+`) is compared as an opaque string.
use std::cmp::Ordering;

#[derive(Debug, PartialEq)]
pub(crate) struct SemanticVersion<'a> {
    parts: Vec<&'a str>,
    is_pre_release: bool,
}

impl<'a> SemanticVersion<'a> {
    /// Parse `s`, returning `None` if it is not a valid version.
    pub fn parse(s: &'a str) -> Option<SemanticVersion<'a>> {
        if s.contains(char::is_whitespace) {
            return None;
        }

        let dash = s.find('-');
        let plus = s.find('+');
        let is_pre_release = matches!((dash, plus), (Some(d), Some(p)) if d < p)
            || (dash.is_some() && plus.is_none());
        let is_build = matches!((dash, plus), (Some(d), Some(p)) if p < d)
            || (plus.is_some() && dash.is_none());

        let (core, suffix) = if is_pre_release || is_build {
            let separator = if is_pre_release { '-' } else { '+' };
            let (core, suffix) = s.split_once(separator)?;
            if core.is_empty() || suffix.is_empty() {
                return None;
            }
            (core, Some(suffix))
        } else {
            (s, None)
        };

        let mut parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 || !parts.iter().all(|part| is_number(part)) {
            return None;
        }
        parts.extend(suffix);

        Some(SemanticVersion {
            parts,
            is_pre_release,
        })
    }

    /// Compare `self` with `target` up to the precision of `target`.
    pub fn compare(&self, target: &SemanticVersion) -> Ordering {
        for (idx, target_part) in target.parts.iter().enumerate() {
            let Some(part) = self.parts.get(idx) else {
                return if target.is_pre_release {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
            };

            if !is_number(part) {
                match (*part).cmp(*target_part) {
                    Ordering::Less => {
                        return if target.is_pre_release && !self.is_pre_release {
                            Ordering::Greater
                        } else {
                            Ordering::Less
                        };
                    }
                    Ordering::Greater => {
                        return if !target.is_pre_release && self.is_pre_release {
                            Ordering::Less
                        } else {
                            Ordering::Greater
                        };
                    }
                    Ordering::Equal => {}
                }
                continue;
            }

            match (part.parse::<u64>(), target_part.parse::<u64>()) {
                (Ok(part), Ok(target_part)) => match part.cmp(&target_part) {
                    Ordering::Equal => {}
                    other => return other,
                },
                _ => return Ordering::Less,
            }
        }

        if self.is_pre_release && !target.is_pre_release {
            return Ordering::Less;
        }

        Ordering::Equal
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::SemanticVersion;

    fn cmp(version: &str, target: &str) -> Ordering {
        SemanticVersion::parse(version)
            .unwrap()
            .compare(&SemanticVersion::parse(target).unwrap())
    }

    #[test]
    fn rejects_invalid_versions() {
        for invalid in [
            "-", ".", "..", "+", "+test", " ", "2 .3. 0", "2.", ".2.2", "3.7.2.2", "3.x", ",",
            "+build-prerelease", "2..0", "1.0.0-", "1.0.0+",
        ] {
            assert_eq!(SemanticVersion::parse(invalid), None, "{invalid:?}");
        }
    }

    #[test]
    fn compares_with_target_precision() {
        assert_eq!(cmp("2.1.9", "2.1"), Ordering::Equal);
        assert_eq!(cmp("2", "2"), Ordering::Equal);
        assert_eq!(cmp("2.9", "2"), Ordering::Equal);
        assert_eq!(cmp("2.0", "2.1"), Ordering::Less);
        assert_eq!(cmp("2", "2.1"), Ordering::Less);
        assert_eq!(cmp("3.0.0", "2.9.9"), Ordering::Greater);
    }

    #[test]
    fn numeric_parts_are_compared_as_numbers() {
        assert_eq!(cmp("1.10.0", "1.2.0"), Ordering::Greater);
        assert_eq!(cmp("1.2.0", "1.10.0"), Ordering::Less);
    }

    #[test]
    fn pre_release_sorts_before_release() {
        assert_eq!(cmp("3.7.0-beta", "3.7.0"), Ordering::Less);
        assert_eq!(cmp("3.7.0", "3.7.0-beta"), Ordering::Greater);
        assert_eq!(cmp("3.7.0-beta", "3.7.0-beta"), Ordering::Equal);
        assert_eq!(cmp("3.7.0-alpha", "3.7.0-beta"), Ordering::Less);
        assert_eq!(cmp("3.7.0+build", "3.7.0"), Ordering::Equal);
    }
}
