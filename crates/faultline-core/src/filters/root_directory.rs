use std::path::PathBuf;

use crate::filter_chain::Filter;
use crate::notice::Notice;
use crate::value::Value;

/// Placeholder substituted for the project root in backtrace paths.
pub const PROJECT_ROOT: &str = "/PROJECT_ROOT";

/// Replaces the project root prefix in backtrace file paths.
#[derive(Debug, Clone)]
pub struct RootDirectoryFilter {
    root: String,
}

impl RootDirectoryFilter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into().display().to_string();
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    fn rewrite(&self, file: &str) -> Option<String> {
        let rest = file.strip_prefix(&self.root)?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(format!("{PROJECT_ROOT}{rest}"))
        } else {
            None
        }
    }
}

impl Filter for RootDirectoryFilter {
    fn name(&self) -> &str {
        "root_directory"
    }

    fn call(&self, notice: &mut Notice) -> anyhow::Result<()> {
        if self.root.is_empty() {
            return Ok(());
        }
        let errors = notice.errors()?.lock().clone();
        for error in &errors {
            let Some(backtrace) = error
                .as_map()
                .and_then(|e| e.lock().get("backtrace").cloned())
            else {
                continue;
            };
            let Some(frames) = backtrace.as_list() else {
                continue;
            };
            let frames = frames.lock().clone();
            for frame in frames.iter().filter_map(Value::as_map) {
                let mut frame = frame.lock();
                let rewritten = frame
                    .get("file")
                    .and_then(Value::as_str)
                    .and_then(|file| self.rewrite(file));
                if let Some(file) = rewritten {
                    frame.insert("file".to_string(), Value::String(file));
                }
            }
        }
        Ok(())
    }
}
