//! Run options - loaded from `converge.toml`, overridden on the command line
//!
//! ```toml
//! tags = ["web"]
//! skip_tags = ["slow"]
//! ignore_schedules = false
//! noop = false
//! ```

use anyhow::{Context, Result};
use catalog::RunOptions;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use crate::paths;

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[[:alnum:]_][[:alnum:]_:.-]*$").expect("tag pattern is valid"));

/// Load run options
///
/// An explicit `path` must exist. Without one, the default config file is
/// used when present and built-in defaults otherwise.
pub fn load(path: Option<&Path>) -> Result<RunOptions> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = paths::config_file()?;
            if !default.exists() {
                log::debug!("No config at {}, using defaults", default.display());
                return Ok(RunOptions::default());
            }
            default
        }
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    let mut options: RunOptions =
        toml::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))?;
    options.tags = normalize(&options.tags)?;
    options.skip_tags = normalize(&options.skip_tags)?;
    log::debug!("Loaded run options from {}", path.display());
    Ok(options)
}

/// Validate and lowercase one tag
pub fn validate_tag(tag: &str) -> catalog::Result<String> {
    let tag = tag.trim().to_lowercase();
    if TAG_PATTERN.is_match(&tag) {
        Ok(tag)
    } else {
        Err(catalog::Error::InvalidTag(tag))
    }
}

/// Parse a comma-separated tag list, e.g. `web,db`
pub fn parse_tags(raw: &str) -> catalog::Result<Vec<String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(validate_tag)
        .collect()
}

/// Validate every tag in a list, splitting any comma-joined entries
pub fn normalize(tags: &[String]) -> catalog::Result<Vec<String>> {
    let mut out = Vec::new();
    for tag in tags {
        out.extend(parse_tags(tag)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags("Web, db ,,").unwrap(), vec!["web", "db"]);
        assert_eq!(parse_tags("apache::mod.ssl-1").unwrap(), vec!["apache::mod.ssl-1"]);
        assert!(parse_tags("").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_tags_rejected() {
        assert!(matches!(
            parse_tags("web,-bad"),
            Err(catalog::Error::InvalidTag(tag)) if tag == "-bad"
        ));
        assert!(validate_tag("has space").is_err());
        assert!(validate_tag("a/b").is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("converge.toml");
        fs::write(
            &path,
            "tags = [\"Web,DB\"]\nskip_tags = [\"slow\"]\nnoop = true\n",
        )
        .unwrap();

        let options = load(Some(&path)).unwrap();
        assert_eq!(options.tags, vec!["web", "db"]);
        assert_eq!(options.skip_tags, vec!["slow"]);
        assert!(options.noop);
        assert!(!options.ignore_schedules);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_load_rejects_bad_tag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("converge.toml");
        fs::write(&path, "tags = [\"no spaces allowed\"]\n").unwrap();
        assert!(load(Some(&path)).is_err());
    }
}
