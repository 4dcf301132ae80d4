//! Tool executor
//!
//! Sandboxed execution of shell commands, python scripts, and file
//! operations. Every entry point returns a [`ToolResult`]; no failure
//! escapes as an error. Commands are validated against the policy and then
//! spawned directly from their tokens (no shell), with the process group
//! killed on timeout. All paths run through the containment check in
//! [`path_guard`].

pub mod path_guard;
pub mod policy;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{FileOpsPolicy, ToolPolicy};

/// Captured bytes per stream before truncation.
const MAX_CAPTURE_BYTES: usize = 1_000_000;

/// The closed set of tools a plan step or agent may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolSpec {
    #[serde(rename = "execute_bash")]
    ExecuteBash,
    #[serde(rename = "execute_python_script")]
    ExecutePythonScript,
    #[serde(rename = "read_file_tool")]
    ReadFile,
    #[serde(rename = "write_file_tool")]
    WriteFile,
    #[serde(rename = "edit_file_tool")]
    EditFile,
    #[serde(rename = "list_files_tool")]
    ListFiles,
}

impl ToolSpec {
    pub const ALL: [ToolSpec; 6] = [
        ToolSpec::ExecuteBash,
        ToolSpec::ExecutePythonScript,
        ToolSpec::ReadFile,
        ToolSpec::WriteFile,
        ToolSpec::EditFile,
        ToolSpec::ListFiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecuteBash => "execute_bash",
            Self::ExecutePythonScript => "execute_python_script",
            Self::ReadFile => "read_file_tool",
            Self::WriteFile => "write_file_tool",
            Self::EditFile => "edit_file_tool",
            Self::ListFiles => "list_files_tool",
        }
    }

    /// Whether the tool can mutate state. Bash and python count as mutating
    /// here; a step may override with a `"read_only": true` argument, which
    /// the workflow engine consults.
    pub fn can_mutate(&self) -> bool {
        !matches!(self, Self::ReadFile | Self::ListFiles)
    }
}

impl FromStr for ToolSpec {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or(())
    }
}

impl std::fmt::Display for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured outcome of one tool invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: Some(stdout.into()),
            return_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    fn timed(mut self, start: Instant) -> Self {
        self.duration_ms = start.elapsed().as_millis() as u64;
        self
    }
}

/// Executes tools on behalf of agents and the workflow engine.
pub struct ToolExecutor {
    working_dir: PathBuf,
    file_ops: FileOpsPolicy,
    policy: ToolPolicy,
}

impl ToolExecutor {
    pub fn new(working_dir: PathBuf, file_ops: FileOpsPolicy, policy: ToolPolicy) -> Self {
        Self {
            working_dir,
            file_ops,
            policy,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn allowed(&self) -> &[PathBuf] {
        &self.file_ops.allowed_directories
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.policy.default_timeout_seconds)
    }

    // ── Commands ───────────────────────────────────────────────────────

    /// Execute a shell command under the command policy.
    pub async fn execute_bash(
        &self,
        command: &str,
        working_dir: Option<&str>,
        timeout_seconds: Option<u64>,
    ) -> ToolResult {
        let start = Instant::now();
        info!(command, "executing bash command");

        let tokens = match policy::validate_command(command, &self.policy) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(command, error = %e, "blocked command");
                return ToolResult::failure(e).timed(start);
            }
        };

        let cwd = match working_dir {
            Some(dir) => {
                match path_guard::contain(dir, &self.working_dir, self.allowed()) {
                    Ok(p) if p.is_dir() => p,
                    Ok(p) => {
                        return ToolResult::failure(format!(
                            "working directory is not a directory: {}",
                            p.display()
                        ))
                        .timed(start)
                    }
                    Err(e) => return ToolResult::failure(e).timed(start),
                }
            }
            None => self.working_dir.clone(),
        };

        let limit = timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.default_timeout());
        run_process(&tokens, &cwd, limit).await.timed(start)
    }

    /// Execute a python script with the same containment and timeout rules.
    pub async fn execute_python_script(
        &self,
        script_path: &str,
        args: &[String],
        timeout_seconds: Option<u64>,
    ) -> ToolResult {
        let start = Instant::now();

        let script = match path_guard::contain(script_path, &self.working_dir, self.allowed()) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e).timed(start),
        };
        if !script.is_file() {
            return ToolResult::failure(format!("script not found: {}", script.display()))
                .timed(start);
        }

        // The interpreter itself is subject to the command policy.
        if let Err(e) = policy::validate_command("python3", &self.policy) {
            return ToolResult::failure(e).timed(start);
        }

        let mut tokens = vec!["python3".to_string(), script.display().to_string()];
        tokens.extend(args.iter().cloned());

        let limit = timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.default_timeout());
        run_process(&tokens, &self.working_dir, limit)
            .await
            .timed(start)
    }

    // ── File operations ────────────────────────────────────────────────

    /// Read a UTF-8 file, bounded by the configured size limit.
    pub async fn read_file(&self, path: &str) -> ToolResult {
        let start = Instant::now();

        if !self.file_ops.allow_read {
            return ToolResult::failure("file read operations are disabled").timed(start);
        }

        let path = match path_guard::contain(path, &self.working_dir, self.allowed()) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e).timed(start),
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(_) => return ToolResult::failure("file does not exist").timed(start),
        };
        if !metadata.is_file() {
            return ToolResult::failure(format!("not a file: {}", path.display())).timed(start);
        }
        if metadata.len() > self.file_ops.max_file_size_kb * 1024 {
            return ToolResult::failure("file too large").timed(start);
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(content) => ToolResult::ok(content).timed(start),
                Err(e) => ToolResult::failure(format!("file is not valid UTF-8: {e}")).timed(start),
            },
            Err(e) => ToolResult::failure(format!("error reading file: {e}")).timed(start),
        }
    }

    /// Write a file atomically (temp-then-rename in the target directory).
    pub async fn write_file(&self, path: &str, content: &str, overwrite: bool) -> ToolResult {
        let start = Instant::now();

        if !self.file_ops.allow_write {
            return ToolResult::failure("file write operations are disabled").timed(start);
        }
        if content.len() as u64 > self.file_ops.max_file_size_kb * 1024 {
            return ToolResult::failure("file too large").timed(start);
        }

        let target = match path_guard::contain_new(path, &self.working_dir, self.allowed()) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e).timed(start),
        };

        let existed = target.exists();
        if existed && !overwrite {
            return ToolResult::failure(format!(
                "file already exists: {} (pass overwrite to replace)",
                target.display()
            ))
            .timed(start);
        }
        if existed && self.file_ops.overwrite_warning {
            warn!(path = %target.display(), "overwriting existing file");
        }

        if let Some(parent) = target.parent().filter(|p| !p.exists()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::failure(format!("failed to create directory: {e}"))
                    .timed(start);
            }
        }

        match write_atomic(&target, content.as_bytes()).await {
            Ok(()) => ToolResult::ok(format!(
                "wrote {} bytes to {}",
                content.len(),
                target.display()
            ))
            .timed(start),
            Err(e) => ToolResult::failure(format!("error writing file: {e}")).timed(start),
        }
    }

    /// Replace occurrences of `find` with `replace` in a file.
    pub async fn edit_file(&self, path: &str, find: &str, replace: &str) -> ToolResult {
        let start = Instant::now();

        if !self.file_ops.allow_edit {
            return ToolResult::failure("file edit operations are disabled").timed(start);
        }

        let target = match path_guard::contain(path, &self.working_dir, self.allowed()) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e).timed(start),
        };

        let content = match tokio::fs::read_to_string(&target).await {
            Ok(c) => c,
            Err(e) => return ToolResult::failure(format!("error reading file: {e}")).timed(start),
        };

        let count = content.matches(find).count();
        if count == 0 {
            return ToolResult::failure("string not found in file").timed(start);
        }

        if self.file_ops.backup_before_edit {
            let backup = backup_path(&target);
            if let Err(e) = tokio::fs::write(&backup, &content).await {
                return ToolResult::failure(format!("failed to create backup: {e}")).timed(start);
            }
        }

        let updated = content.replace(find, replace);
        match write_atomic(&target, updated.as_bytes()).await {
            Ok(()) => ToolResult::ok(format!(
                "replaced {count} occurrence(s) in {}",
                target.display()
            ))
            .timed(start),
            Err(e) => ToolResult::failure(format!("error writing file: {e}")).timed(start),
        }
    }

    /// List directory entries matching a glob pattern, as a JSON array.
    pub async fn list_files(&self, directory: &str, pattern: Option<&str>) -> ToolResult {
        let start = Instant::now();

        let dir = match path_guard::contain(directory, &self.working_dir, self.allowed()) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e).timed(start),
        };
        if !dir.is_dir() {
            return ToolResult::failure(format!("not a directory: {}", dir.display()))
                .timed(start);
        }

        let matcher = match glob::Pattern::new(pattern.unwrap_or("*")) {
            Ok(m) => m,
            Err(e) => return ToolResult::failure(format!("invalid pattern: {e}")).timed(start),
        };

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) => return ToolResult::failure(format!("error listing files: {e}")).timed(start),
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !matcher.matches(&name) {
                continue;
            }
            let metadata = entry.metadata().await.ok();
            let is_file = metadata.as_ref().map(|m| m.is_file()).unwrap_or(false);
            entries.push(json!({
                "name": name,
                "path": entry.path().display().to_string(),
                "is_file": is_file,
                "is_dir": metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false),
                "size": if is_file { metadata.map(|m| m.len()).unwrap_or(0) } else { 0 },
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        match serde_json::to_string_pretty(&entries) {
            Ok(listing) => ToolResult::ok(listing).timed(start),
            Err(e) => ToolResult::failure(format!("error listing files: {e}")).timed(start),
        }
    }

    // ── Dispatch ───────────────────────────────────────────────────────

    /// Invoke a tool from a plan step's argument map. String paths are
    /// coerced through containment inside each operation.
    pub async fn dispatch(&self, tool: ToolSpec, args: &Value) -> ToolResult {
        match tool {
            ToolSpec::ExecuteBash => {
                let Some(command) = args.get("command").and_then(|c| c.as_str()) else {
                    return ToolResult::failure("missing argument: command");
                };
                let working_dir = args.get("working_dir").and_then(|w| w.as_str());
                let timeout = args.get("timeout_seconds").and_then(|t| t.as_u64());
                self.execute_bash(command, working_dir, timeout).await
            }
            ToolSpec::ExecutePythonScript => {
                let Some(script) = args.get("script_path").and_then(|s| s.as_str()) else {
                    return ToolResult::failure("missing argument: script_path");
                };
                let script_args: Vec<String> = args
                    .get("args")
                    .and_then(|a| a.as_array())
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let timeout = args.get("timeout_seconds").and_then(|t| t.as_u64());
                self.execute_python_script(script, &script_args, timeout)
                    .await
            }
            ToolSpec::ReadFile => {
                let Some(path) = args.get("path").and_then(|p| p.as_str()) else {
                    return ToolResult::failure("missing argument: path");
                };
                self.read_file(path).await
            }
            ToolSpec::WriteFile => {
                let Some(path) = args.get("path").and_then(|p| p.as_str()) else {
                    return ToolResult::failure("missing argument: path");
                };
                let Some(content) = args.get("content").and_then(|c| c.as_str()) else {
                    return ToolResult::failure("missing argument: content");
                };
                let overwrite = args
                    .get("overwrite")
                    .and_then(|o| o.as_bool())
                    .unwrap_or(false);
                self.write_file(path, content, overwrite).await
            }
            ToolSpec::EditFile => {
                let Some(path) = args.get("path").and_then(|p| p.as_str()) else {
                    return ToolResult::failure("missing argument: path");
                };
                let Some(find) = args.get("find").and_then(|f| f.as_str()) else {
                    return ToolResult::failure("missing argument: find");
                };
                let Some(replace) = args.get("replace").and_then(|r| r.as_str()) else {
                    return ToolResult::failure("missing argument: replace");
                };
                self.edit_file(path, find, replace).await
            }
            ToolSpec::ListFiles => {
                let directory = args
                    .get("directory")
                    .or_else(|| args.get("path"))
                    .and_then(|d| d.as_str())
                    .unwrap_or(".");
                let pattern = args.get("pattern").and_then(|p| p.as_str());
                self.list_files(directory, pattern).await
            }
        }
    }
}

// ── Process plumbing ───────────────────────────────────────────────────

async fn run_process(tokens: &[String], cwd: &Path, limit: Duration) -> ToolResult {
    let mut cmd = Command::new(&tokens[0]);
    cmd.args(&tokens[1..])
        .current_dir(cwd)
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return ToolResult::failure(format!("failed to spawn command: {e}")),
    };

    let stdout_task = capture_pipe(child.stdout.take());
    let stderr_task = capture_pipe(child.stderr.take());

    let status = match timeout(limit, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return ToolResult::failure(format!("process wait error: {e}")),
        Err(_) => {
            terminate_process_tree(&mut child).await;
            return ToolResult::failure(format!("timed out after {}s", limit.as_secs()));
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    let code = status.code().unwrap_or(-1);

    ToolResult {
        success: status.success(),
        stdout: Some(stdout),
        stderr: Some(stderr),
        return_code: Some(code),
        error: None,
        duration_ms: 0,
    }
}

/// Drain a pipe into a capped buffer on its own task.
fn capture_pipe<R>(pipe: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return String::new();
        };
        let mut captured = Vec::new();
        let mut chunk = [0u8; 8192];
        let mut truncated = false;
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if captured.len() < MAX_CAPTURE_BYTES {
                        let room = MAX_CAPTURE_BYTES - captured.len();
                        captured.extend_from_slice(&chunk[..n.min(room)]);
                        truncated |= n > room;
                    } else {
                        truncated = true;
                    }
                }
            }
        }
        let mut text = String::from_utf8_lossy(&captured).into_owned();
        if truncated {
            text.push_str("\n[output truncated]");
        }
        text
    })
}

/// Kill the whole process group, escalating TERM → KILL.
async fn terminate_process_tree(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let pgid = format!("-{pid}");
        let _ = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(&pgid)
            .status();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = std::process::Command::new("kill")
            .arg("-KILL")
            .arg(&pgid)
            .status();
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let tmp = path.with_file_name(format!(
        ".{file_name}.tmp-{}",
        uuid::Uuid::new_v4().simple()
    ));
    tokio::fs::write(&tmp, content).await?;
    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(e)
        }
    }
}

/// Sibling backup file written before an edit.
pub fn backup_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!("{file_name}.backup"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor() -> (TempDir, ToolExecutor) {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let file_ops = FileOpsPolicy {
            allowed_directories: vec![work.clone()],
            ..Default::default()
        };
        let exec = ToolExecutor::new(work, file_ops, ToolPolicy::default());
        (tmp, exec)
    }

    #[tokio::test]
    async fn read_existing_file() {
        let (_tmp, exec) = executor();
        std::fs::write(exec.working_dir().join("a.txt"), "hello").unwrap();

        let result = exec.read_file("a.txt").await;
        assert!(result.success);
        assert_eq!(result.stdout.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn path_traversal_is_blocked() {
        let (tmp, exec) = executor();
        std::fs::write(tmp.path().join("secret.txt"), "x").unwrap();

        let result = exec.read_file("../secret.txt").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("not in allowed directories"));
    }

    #[tokio::test]
    async fn dangerous_command_is_blocked_and_safe_passes() {
        let (_tmp, exec) = executor();

        let blocked = exec.execute_bash("rm -rf /", None, None).await;
        assert!(!blocked.success);
        assert_eq!(blocked.error.as_deref(), Some("command not permitted"));

        let ok = exec.execute_bash("echo hi", None, None).await;
        assert!(ok.success, "{ok:?}");
        assert_eq!(ok.stdout.as_deref(), Some("hi\n"));
        assert_eq!(ok.return_code, Some(0));
    }

    #[tokio::test]
    async fn oversized_read_is_refused() {
        let (_tmp, exec) = executor();
        let big = "x".repeat(600 * 1024);
        std::fs::write(exec.working_dir().join("big.txt"), &big).unwrap();

        let result = exec.read_file("big.txt").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("file too large"));
    }

    #[tokio::test]
    async fn write_respects_overwrite_flag() {
        let (_tmp, exec) = executor();

        assert!(exec.write_file("new.txt", "one", false).await.success);
        let refused = exec.write_file("new.txt", "two", false).await;
        assert!(!refused.success);
        assert!(refused.error.unwrap().contains("already exists"));

        assert!(exec.write_file("new.txt", "two", true).await.success);
        let content = std::fs::read_to_string(exec.working_dir().join("new.txt")).unwrap();
        assert_eq!(content, "two");
    }

    #[tokio::test]
    async fn edit_creates_backup_and_replaces() {
        let (_tmp, exec) = executor();
        let path = exec.working_dir().join("code.py");
        std::fs::write(&path, "value = old\n# old comment\n").unwrap();

        let result = exec.edit_file("code.py", "old", "new").await;
        assert!(result.success, "{result:?}");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "value = new\n# new comment\n"
        );
        assert_eq!(
            std::fs::read_to_string(backup_path(&path)).unwrap(),
            "value = old\n# old comment\n"
        );
    }

    #[tokio::test]
    async fn edit_missing_string_fails() {
        let (_tmp, exec) = executor();
        std::fs::write(exec.working_dir().join("a.txt"), "content").unwrap();

        let result = exec.edit_file("a.txt", "absent", "x").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("string not found in file"));
    }

    #[tokio::test]
    async fn list_files_filters_by_pattern() {
        let (_tmp, exec) = executor();
        std::fs::write(exec.working_dir().join("a.txt"), "").unwrap();
        std::fs::write(exec.working_dir().join("b.rs"), "").unwrap();

        let result = exec.list_files(".", Some("*.txt")).await;
        assert!(result.success);
        let listing: Vec<Value> = serde_json::from_str(result.stdout.as_deref().unwrap()).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0]["name"], "a.txt");
    }

    #[tokio::test]
    async fn command_timeout_kills_child() {
        let (tmp, _) = executor();
        let work = tmp.path().join("work");
        let mut policy = ToolPolicy::default();
        policy.safe_commands.insert("sleep".to_string());
        let exec = ToolExecutor::new(
            work.clone(),
            FileOpsPolicy {
                allowed_directories: vec![work],
                ..Default::default()
            },
            policy,
        );

        let result = exec.execute_bash("sleep 30", None, Some(1)).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("timed out after 1s"));
        assert!(result.duration_ms < 10_000);
    }

    #[tokio::test]
    async fn read_disabled_by_policy() {
        let (tmp, _) = executor();
        let work = tmp.path().join("work");
        std::fs::write(work.join("a.txt"), "x").unwrap();
        let exec = ToolExecutor::new(
            work.clone(),
            FileOpsPolicy {
                allow_read: false,
                allowed_directories: vec![work],
                ..Default::default()
            },
            ToolPolicy::default(),
        );

        let result = exec.read_file("a.txt").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn dispatch_routes_by_tool() {
        let (_tmp, exec) = executor();

        let write = exec
            .dispatch(
                ToolSpec::WriteFile,
                &json!({"path": "via.txt", "content": "dispatched"}),
            )
            .await;
        assert!(write.success, "{write:?}");

        let read = exec
            .dispatch(ToolSpec::ReadFile, &json!({"path": "via.txt"}))
            .await;
        assert_eq!(read.stdout.as_deref(), Some("dispatched"));

        let missing = exec.dispatch(ToolSpec::ReadFile, &json!({})).await;
        assert!(!missing.success);
    }

    #[test]
    fn tool_spec_round_trips_names() {
        for tool in ToolSpec::ALL {
            assert_eq!(tool.as_str().parse::<ToolSpec>().unwrap(), tool);
        }
        assert!("write_file".parse::<ToolSpec>().is_err());
    }
}
