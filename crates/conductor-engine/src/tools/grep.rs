use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use conductor_core::tools::{Tool, ToolContext, ToolError, ToolOutput};
use serde::Deserialize;

/// Directories never worth descending into.
const PRUNED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    "vendor",
];

#[derive(Deserialize)]
struct GrepArgs {
    pattern: String,
    path: Option<String>,
    glob: Option<String>,
    #[serde(default)]
    output_mode: OutputMode,
    head_limit: Option<usize>,
}

#[derive(Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum OutputMode {
    Content,
    #[default]
    FilesWithMatches,
    Count,
}

struct Hit {
    file: String,
    line: usize,
    text: String,
}

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents using regex patterns"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["pattern"],
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search in"
                },
                "glob": {
                    "type": "string",
                    "description": "Glob pattern to filter files (e.g. '*.rs')"
                },
                "output_mode": {
                    "type": "string",
                    "enum": ["content", "files_with_matches", "count"],
                    "description": "Output mode (default: files_with_matches)"
                },
                "head_limit": {
                    "type": "integer",
                    "description": "Limit output to first N results"
                }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let args: GrepArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(format!("bad grep arguments: {e}")))?;

        let regex = regex::Regex::new(&args.pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid regex: {e}")))?;

        let root = match args.path.as_deref() {
            Some(p) => super::resolve_path(p, &ctx.working_directory),
            None => ctx.working_directory.clone(),
        };

        let filter = args.glob.clone();
        let hits = tokio::task::spawn_blocking(move || collect_hits(&root, &regex, filter.as_deref()))
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("search worker failed: {e}")))?;

        let limit = args.head_limit.unwrap_or(usize::MAX);
        Ok(ToolOutput {
            duration: start.elapsed(),
            ..ToolOutput::text(render(&hits, args.output_mode, limit))
        })
    }
}

/// Iterative walk from `root`. Hidden and pruned directories are skipped,
/// as are files that do not read as UTF-8 text.
fn collect_hits(root: &Path, regex: &regex::Regex, filter: Option<&str>) -> Vec<Hit> {
    let mut hits = Vec::new();

    if root.is_file() {
        scan_file(root, regex, &mut hits);
        return hits;
    }

    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_str().unwrap_or("");

            if path.is_dir() {
                if !name.starts_with('.') && !PRUNED_DIRS.contains(&name) {
                    pending.push(path);
                }
            } else if filter.is_none_or(|f| name_passes(name, f)) {
                scan_file(&path, regex, &mut hits);
            }
        }
    }
    hits
}

fn scan_file(path: &Path, regex: &regex::Regex, hits: &mut Vec<Hit>) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    for (idx, line) in content.lines().enumerate() {
        if regex.is_match(line) {
            hits.push(Hit {
                file: path.display().to_string(),
                line: idx + 1,
                text: line.to_string(),
            });
        }
    }
}

/// Supports the two filter shapes models actually send: `*.ext` and an
/// exact file name.
fn name_passes(filename: &str, filter: &str) -> bool {
    match filter.strip_prefix("*.") {
        Some(ext) => Path::new(filename)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(ext)),
        None => filename == filter,
    }
}

fn render(hits: &[Hit], mode: OutputMode, limit: usize) -> String {
    if hits.is_empty() {
        return "No matches found.".to_string();
    }

    let lines: Vec<String> = match mode {
        OutputMode::Content => hits
            .iter()
            .take(limit)
            .map(|h| format!("{}:{}:{}", h.file, h.line, h.text))
            .collect(),
        OutputMode::Count => {
            let mut per_file: BTreeMap<&str, usize> = BTreeMap::new();
            for hit in hits {
                *per_file.entry(&hit.file).or_default() += 1;
            }
            per_file
                .into_iter()
                .take(limit)
                .map(|(file, n)| format!("{file}:{n}"))
                .collect()
        }
        OutputMode::FilesWithMatches => {
            let mut files: Vec<&str> = hits.iter().map(|h| h.file.as_str()).collect();
            files.sort();
            files.dedup();
            files.into_iter().take(limit).map(String::from).collect()
        }
    };
    lines.join("\n")
}
