use anyhow::{anyhow, Result};
use sha2::Digest;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Expand a leading `~` so config paths behave like shell paths.
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(rest))
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    let expanded = expand_home(path)?;
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    Ok(base.join(expanded))
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Whole milliseconds for log fields, saturating instead of truncating.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Trim and case-fold a value so identifiers match across runs.
pub fn normalize_identifier(value: Option<&str>) -> String {
    value.unwrap_or("").trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn truncate_string_respects_char_boundaries() {
        assert_eq!(truncate_string("привет", 5), "пр");
        assert_eq!(truncate_string("abc", 10), "abc");
    }

    #[test]
    fn normalize_identifier_folds_case_and_whitespace() {
        assert_eq!(normalize_identifier(Some("  Apollo ")), "apollo");
        assert_eq!(normalize_identifier(Some("ПРОЕКТ")), "проект");
        assert_eq!(normalize_identifier(None), "");
    }

    #[test]
    fn resolve_relative_keeps_absolute_paths() {
        let base = Path::new("/etc/audit");
        assert_eq!(
            resolve_relative(Path::new("/tmp/cache.sqlite"), base).expect("resolve"),
            PathBuf::from("/tmp/cache.sqlite")
        );
        assert_eq!(
            resolve_relative(Path::new("cache.sqlite"), base).expect("resolve"),
            PathBuf::from("/etc/audit/cache.sqlite")
        );
    }
}
