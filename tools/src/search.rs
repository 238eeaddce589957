//! Multithreaded keyword/regex file search.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use aho_corasick::AhoCorasick;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::{WalkBuilder, WalkState};
use regex::bytes::Regex;

use super::ToolError;

/// Extensions always treated as text without sniffing.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "rst", "py", "js", "ts", "json", "xml", "yaml", "yml", "toml", "ini", "cfg",
    "csv", "html", "css", "rs", "go", "java", "c", "h", "cpp", "sh",
];

/// Bytes read to decide whether an unknown extension is text.
const TEXT_SNIFF_BYTES: usize = 512;

#[derive(Debug, Clone)]
pub struct SearchToolConfig {
    pub max_workers: usize,
    pub max_results: usize,
    pub max_file_size_bytes: u64,
}

impl Default for SearchToolConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            max_results: 10_000,
            max_file_size_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub directory: PathBuf,
    pub path_keywords: Vec<String>,
    pub content_keywords: Vec<String>,
    pub regex_mode: bool,
    pub max_results: usize,
    /// Restricts candidates by glob on the directory-relative path.
    pub patterns: Option<GlobSet>,
}

/// `search(directory, keywords) -> paths`.
pub trait SearchService: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<Vec<PathBuf>, ToolError>;
}

#[derive(Debug, Clone, Default)]
pub struct ParallelSearcher {
    config: SearchToolConfig,
}

impl ParallelSearcher {
    #[must_use]
    pub fn new(config: SearchToolConfig) -> Self {
        Self { config }
    }
}

enum Matcher {
    Literal(AhoCorasick),
    Regex(Vec<Regex>),
}

impl Matcher {
    fn build(keywords: &[String], regex_mode: bool) -> Result<Option<Self>, ToolError> {
        let keywords: Vec<&str> = keywords
            .iter()
            .map(String::as_str)
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Ok(None);
        }
        if !regex_mode {
            let ac = AhoCorasick::new(&keywords).map_err(|e| ToolError::BadArgs {
                message: format!("invalid keywords: {e}"),
            })?;
            return Ok(Some(Self::Literal(ac)));
        }
        let compiled: Vec<Regex> = keywords
            .iter()
            .filter_map(|pattern| match Regex::new(&format!("(?ms){pattern}")) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "Skipping invalid search regex");
                    None
                }
            })
            .collect();
        Ok(Some(Self::Regex(compiled)))
    }

    fn is_match(&self, haystack: &[u8]) -> bool {
        match self {
            Self::Literal(ac) => ac.is_match(haystack),
            Self::Regex(patterns) => patterns.iter().any(|re| re.is_match(haystack)),
        }
    }
}

impl SearchService for ParallelSearcher {
    fn search(&self, query: &SearchQuery) -> Result<Vec<PathBuf>, ToolError> {
        let path_matcher = Matcher::build(&query.path_keywords, query.regex_mode)?;
        let content_matcher = Matcher::build(&query.content_keywords, query.regex_mode)?;
        let max_results = query.max_results.min(self.config.max_results).max(1);
        let max_size = self.config.max_file_size_bytes;

        let results = Mutex::new(Vec::new());
        let done = AtomicBool::new(false);

        let mut builder = WalkBuilder::new(&query.directory);
        builder
            .threads(self.config.max_workers.max(1))
            .hidden(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false)
            .follow_links(false)
            .filter_entry(|entry| entry.file_name() != ".git");

        builder.build_parallel().run(|| {
            let path_matcher = path_matcher.as_ref();
            let content_matcher = content_matcher.as_ref();
            let results = &results;
            let done = &done;
            let directory = &query.directory;
            let patterns = query.patterns.as_ref();
            Box::new(move |entry| {
                if done.load(Ordering::Relaxed) {
                    return WalkState::Quit;
                }
                let Ok(entry) = entry else {
                    return WalkState::Continue;
                };
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    return WalkState::Continue;
                }
                let path = entry.path();
                let relative = path.strip_prefix(directory).unwrap_or(path);
                if let Some(patterns) = patterns
                    && !patterns.is_match(relative)
                {
                    return WalkState::Continue;
                }

                let path_match = path_matcher
                    .map(|m| m.is_match(relative.to_string_lossy().as_bytes()));
                let matched = match (content_matcher, path_match) {
                    (Some(content), None | Some(true)) => {
                        file_within_limit(&entry, max_size)
                            && is_text_file(path)
                            && std::fs::read(path).is_ok_and(|bytes| content.is_match(&bytes))
                    }
                    (Some(_), Some(false)) => false,
                    (None, path_match) => path_match.unwrap_or(true),
                };
                if !matched {
                    return WalkState::Continue;
                }

                let Ok(mut found) = results.lock() else {
                    return WalkState::Quit;
                };
                if found.len() < max_results {
                    found.push(path.to_path_buf());
                }
                if found.len() >= max_results {
                    done.store(true, Ordering::Relaxed);
                    return WalkState::Quit;
                }
                WalkState::Continue
            })
        });

        let mut found = results.into_inner().map_err(|_| ToolError::ExecutionFailed {
            tool: "find".to_string(),
            message: "search worker panicked".to_string(),
        })?;
        found.sort();
        Ok(found)
    }
}

fn file_within_limit(entry: &ignore::DirEntry, max_size: u64) -> bool {
    entry.metadata().is_ok_and(|m| m.len() <= max_size)
}

/// Known text extension, or a NUL-free UTF-8 prefix.
fn is_text_file(path: &Path) -> bool {
    let known = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    if known {
        return true;
    }
    let Ok(file) = std::fs::File::open(path) else {
        return false;
    };
    let mut prefix = Vec::with_capacity(TEXT_SNIFF_BYTES);
    if file
        .take(TEXT_SNIFF_BYTES as u64)
        .read_to_end(&mut prefix)
        .is_err()
    {
        return false;
    }
    !prefix.contains(&0) && std::str::from_utf8(&prefix).is_ok()
}

/// Compile a list of globs, or `None` for an empty list.
pub fn build_glob_set(patterns: &[String]) -> Result<Option<GlobSet>, ToolError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let trimmed = pat.trim();
        if trimmed.is_empty() {
            return Err(ToolError::BadArgs {
                message: "glob entries must be non-empty".to_string(),
            });
        }
        let mut glob = GlobBuilder::new(trimmed);
        if cfg!(windows) {
            glob.case_insensitive(true);
        }
        let glob = glob.build().map_err(|e| ToolError::BadArgs {
            message: format!("Invalid glob '{trimmed}': {e}"),
        })?;
        builder.add(glob);
    }
    let set = builder.build().map_err(|e| ToolError::BadArgs {
        message: format!("Invalid glob set: {e}"),
    })?;
    Ok(Some(set))
}
