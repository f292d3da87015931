//! Reader for pip requirements files.
//!
//! Handles the subset pip documents for requirement lines: comments, line
//! continuations, option lines (`-r`, `--index-url`, ...), extras, version
//! specifiers, environment markers, per-requirement options (`--hash=...`)
//! and `name @ url` direct references. Bare URLs, VCS references and local
//! paths are kept verbatim in [`RequirementsFile::direct`].

use crate::manifest::ManifestError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Per-requirement options such as `--hash=sha256:...`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Requirement {
    /// PEP 503 normalized project name.
    pub fn canonical_name(&self) -> String {
        canonical_package_name(&self.name)
    }

    /// The version when the specifier is a single exact `==` pin.
    pub fn pinned_version(&self) -> Option<&str> {
        let spec = self.specifier.as_deref()?;
        if spec.contains(',') {
            return None;
        }
        let version = spec.strip_prefix("==")?.trim();
        if version.is_empty() || version.contains('*') {
            None
        } else {
            Some(version)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequirementsFile {
    pub entries: Vec<Requirement>,
    pub options: Vec<String>,
    pub direct: Vec<String>,
}

impl RequirementsFile {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.direct.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(Requirement::canonical_name).collect()
    }
}

/// Lowercase, with runs of `-`, `_` and `.` collapsed to a single `-`.
pub fn canonical_package_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

pub fn parse_requirements_str(input: &str) -> Result<RequirementsFile, ManifestError> {
    let mut file = RequirementsFile::default();

    for (line_no, logical) in logical_lines(input) {
        let line = strip_comment(&logical).trim().to_owned();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('-') {
            file.options.push(line);
            continue;
        }
        if is_direct_reference(&line) {
            file.direct.push(line);
            continue;
        }
        let (body, options) = split_requirement_options(&line);
        let req = parse_requirement_line(body, options).ok_or_else(|| {
            ManifestError::InvalidRequirement {
                line: line_no,
                content: line.clone(),
            }
        })?;
        file.entries.push(req);
    }

    Ok(file)
}

pub fn parse_requirements_file(path: &Path) -> Result<RequirementsFile, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::InputRead {
        path: path.display().to_string(),
        source,
    })?;
    parse_requirements_str(&content)
}

/// Join `\`-continued lines, keeping the number of the first physical line.
fn logical_lines(input: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut start = 0;
    for (idx, raw) in input.lines().enumerate() {
        if current.is_empty() {
            start = idx + 1;
        }
        if let Some(stripped) = raw.strip_suffix('\\') {
            current.push_str(stripped);
            current.push(' ');
        } else {
            current.push_str(raw);
            out.push((start, std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        out.push((start, current));
    }
    out
}

/// pip treats `#` as a comment only at line start or after whitespace.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}

/// A bare URL (`https://...`, `git+ssh://git@host/...`) or a local path.
/// `name @ url` is not direct: the text before `://` holds the name.
fn is_direct_reference(line: &str) -> bool {
    if line.starts_with('.') || line.starts_with('/') {
        return true;
    }
    match line.find("://") {
        Some(end) => {
            let scheme = &line[..end];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
        }
        None => false,
    }
}

/// Cut the line at the first whitespace-separated token starting with `--`.
fn split_requirement_options(line: &str) -> (&str, Vec<String>) {
    let mut from = 0;
    while let Some(pos) = line[from..].find("--") {
        let at = from + pos;
        if at > 0 && line.as_bytes()[at - 1].is_ascii_whitespace() {
            let options = line[at..].split_whitespace().map(str::to_owned).collect();
            return (line[..at].trim_end(), options);
        }
        from = at + 2;
    }
    (line, Vec::new())
}

fn parse_requirement_line(line: &str, options: Vec<String>) -> Option<Requirement> {
    let (body, marker) = match line.split_once(';') {
        Some((b, m)) => (b.trim(), Some(m.trim().to_owned()).filter(|m| !m.is_empty())),
        None => (line.trim(), None),
    };

    let (body, url) = match body.split_once('@') {
        Some((b, u)) => (b.trim(), Some(u.trim().to_owned()).filter(|u| !u.is_empty())),
        None => (body, None),
    };

    let name_end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(body.len());
    let name = body[..name_end].to_owned();
    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return None;
    }

    let mut rest = body[name_end..].trim_start();
    let mut extras = Vec::new();
    if let Some(after) = rest.strip_prefix('[') {
        let close = after.find(']')?;
        extras = after[..close]
            .split(',')
            .map(|e| e.trim().to_owned())
            .filter(|e| !e.is_empty())
            .collect();
        rest = after[close + 1..].trim_start();
    }

    let specifier = rest.trim();
    if !specifier.is_empty()
        && !specifier.starts_with(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | '('))
    {
        return None;
    }
    let specifier = specifier
        .trim_start_matches('(')
        .trim_end_matches(')')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>();

    Some(Requirement {
        name,
        extras,
        specifier: Some(specifier).filter(|s| !s.is_empty()),
        marker,
        url,
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pins_ranges_and_bare_names() {
        let file = parse_requirements_str(
            "libfoo==1.2\nrequests>=2.31,<3\nrich\n",
        )
        .unwrap();
        assert_eq!(file.entries.len(), 3);
        assert_eq!(file.entries[0].name, "libfoo");
        assert_eq!(file.entries[0].pinned_version(), Some("1.2"));
        assert_eq!(file.entries[1].specifier.as_deref(), Some(">=2.31,<3"));
        assert_eq!(file.entries[1].pinned_version(), None);
        assert_eq!(file.entries[2].specifier, None);
    }

    #[test]
    fn skips_comments_blank_lines_and_collects_options() {
        let file = parse_requirements_str(
            "# analysis stack\n\n--index-url https://pypi.org/simple\n-r base.txt\nnumpy  # pinned by conda\n",
        )
        .unwrap();
        assert_eq!(file.options, vec!["--index-url https://pypi.org/simple", "-r base.txt"]);
        assert_eq!(file.names(), vec!["numpy"]);
    }

    #[test]
    fn parses_extras_and_markers() {
        let file = parse_requirements_str(
            "uvicorn[standard, watch] ~= 0.29 ; python_version >= \"3.9\"\n",
        )
        .unwrap();
        let req = &file.entries[0];
        assert_eq!(req.name, "uvicorn");
        assert_eq!(req.extras, vec!["standard", "watch"]);
        assert_eq!(req.specifier.as_deref(), Some("~=0.29"));
        assert_eq!(req.marker.as_deref(), Some("python_version >= \"3.9\""));
    }

    #[test]
    fn joins_continued_lines() {
        let file = parse_requirements_str("pandas\\\n==2.2.1\nscipy\n").unwrap();
        assert_eq!(file.entries[0].pinned_version(), Some("2.2.1"));
        assert_eq!(file.entries[1].name, "scipy");
    }

    #[test]
    fn keeps_direct_references() {
        let file = parse_requirements_str(
            "https://example.com/pkg-1.0.tar.gz\n./vendor/local\nmylib @ https://example.com/mylib.whl\n\
             git+ssh://git@github.com/org/repo.git#egg=repo\n\
             git+https://github.com/org/tool.git@v1.0#egg=tool\n",
        )
        .unwrap();
        assert_eq!(file.direct.len(), 4);
        assert_eq!(file.direct[2], "git+ssh://git@github.com/org/repo.git#egg=repo");
        assert_eq!(file.entries.len(), 1);
        assert_eq!(file.entries[0].name, "mylib");
        assert_eq!(
            file.entries[0].url.as_deref(),
            Some("https://example.com/mylib.whl")
        );
    }

    #[test]
    fn keeps_hash_options_out_of_the_specifier() {
        let file = parse_requirements_str(
            "numpy==1.26.4 --hash=sha256:abc \\\n    --hash=sha256:def\nrich --config-settings editable_mode=compat\n",
        )
        .unwrap();
        let numpy = &file.entries[0];
        assert_eq!(numpy.specifier.as_deref(), Some("==1.26.4"));
        assert_eq!(numpy.pinned_version(), Some("1.26.4"));
        assert_eq!(numpy.options, vec!["--hash=sha256:abc", "--hash=sha256:def"]);
        assert_eq!(file.entries[1].name, "rich");
        assert_eq!(file.entries[1].specifier, None);
        assert_eq!(
            file.entries[1].options,
            vec!["--config-settings", "editable_mode=compat"]
        );
        assert!(file.options.is_empty());
    }

    #[test]
    fn rejects_malformed_line_with_line_number() {
        let err = parse_requirements_str("numpy\n\n?? what\n").unwrap_err();
        match err {
            ManifestError::InvalidRequirement { line, content } => {
                assert_eq!(line, 3);
                assert_eq!(content, "?? what");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_garbage_after_name() {
        assert!(parse_requirements_str("numpy 1.2\n").is_err());
    }

    #[test]
    fn canonical_names_follow_pep503() {
        assert_eq!(canonical_package_name("Ruamel.YAML"), "ruamel-yaml");
        assert_eq!(canonical_package_name("typing__extensions"), "typing-extensions");
        assert_eq!(canonical_package_name("libfoo"), "libfoo");
    }

    #[test]
    fn empty_file_is_empty() {
        let file = parse_requirements_str("# nothing here\n\n").unwrap();
        assert!(file.is_empty());
    }
}
