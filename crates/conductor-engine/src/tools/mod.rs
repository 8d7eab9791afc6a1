pub mod edit;
pub mod glob;
pub mod grep;
pub mod package;
pub mod read;
pub mod shell;
pub mod write;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use conductor_core::tools::Tool;

/// The built-in tool suite. Registered as the lowest layer of the registry,
/// so custom and project-local tools shadow these by name.
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(read::ReadFileTool),
        Arc::new(write::WriteFileTool),
        Arc::new(edit::EditFileTool),
        Arc::new(glob::GlobTool),
        Arc::new(grep::GrepTool),
        Arc::new(shell::ShellTool::new()),
        Arc::new(package::AddPackageTool),
        Arc::new(package::RemovePackageTool),
    ]
}

/// Resolve a path argument against the session working directory.
/// Absolute paths pass through untouched.
pub(crate) fn resolve_path(file_path: &str, working_dir: &Path) -> PathBuf {
    let path = Path::new(file_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_suite_is_complete() {
        let names: Vec<String> = builtin_tools()
            .iter()
            .map(|t| t.name().to_string())
            .collect();

        for expected in [
            "read_file",
            "write_file",
            "edit_file",
            "glob",
            "grep",
            "shell",
            "add_package",
            "remove_package",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
        assert_eq!(names.len(), 8);
    }

    #[test]
    fn resolve_path_handles_absolute_and_relative() {
        let wd = Path::new("/work/project");
        assert_eq!(resolve_path("/etc/hosts", wd), PathBuf::from("/etc/hosts"));
        assert_eq!(
            resolve_path("src/main.rs", wd),
            PathBuf::from("/work/project/src/main.rs")
        );
    }
}
