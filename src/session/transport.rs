//! Server process launch.
//!
//! A server path is resolved into a launch command by extension, then spawned
//! with piped stdio. The child is killed if its handle is dropped, so a
//! session that is never closed cannot leak the process.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use super::client::SessionError;
use crate::config::ClientConfig;

/// How to launch an MCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    program: OsString,
    args: Vec<OsString>,
    script: PathBuf,
}

impl ServerTarget {
    /// Resolve a server path into a launch command.
    ///
    /// - `.py` runs under the configured Python interpreter
    /// - `.js`, `.mjs`, `.cjs` run under the configured Node binary
    /// - no extension runs the file directly (compiled servers)
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Connection` if the path does not exist, is not
    /// a file, has an unsupported extension, or (on Unix) a file without an
    /// extension is not executable.
    pub fn resolve(path: impl AsRef<Path>, config: &ClientConfig) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|e| {
            SessionError::Connection(format!("Server script {}: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(SessionError::Connection(format!(
                "Server script {} is not a file",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());

        let interpreter = match extension.as_deref() {
            Some("py") => Some(config.python_command.as_str()),
            Some("js") | Some("mjs") | Some("cjs") => Some(config.node_command.as_str()),
            None => None,
            Some(other) => {
                return Err(SessionError::Connection(format!(
                    "Unsupported server type '.{}' for {} (expected .py, .js or an executable)",
                    other,
                    path.display()
                )))
            }
        };

        match interpreter {
            Some(interpreter) => Ok(Self {
                program: interpreter.into(),
                args: vec![path.as_os_str().to_owned()],
                script: path.to_path_buf(),
            }),
            None => {
                ensure_executable(path, &metadata)?;
                Ok(Self {
                    program: path.as_os_str().to_owned(),
                    args: Vec::new(),
                    script: path.to_path_buf(),
                })
            }
        }
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// The server path this target was resolved from.
    pub fn script(&self) -> &Path {
        &self.script
    }
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn ensure_executable(path: &Path, metadata: &std::fs::Metadata) -> Result<(), SessionError> {
    use std::os::unix::fs::PermissionsExt;

    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(SessionError::Connection(format!(
            "Server {} is not executable",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path, _metadata: &std::fs::Metadata) -> Result<(), SessionError> {
    Ok(())
}

/// A running server process with its protocol pipes split off.
pub(crate) struct ChildTransport {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: BufReader<ChildStdout>,
}

/// Spawn the server with piped stdio.
///
/// Stderr is drained on a background task and forwarded to `debug!`, so a
/// chatty server cannot fill the pipe and stall.
pub(crate) fn spawn(target: &ServerTarget) -> Result<ChildTransport, SessionError> {
    info!("Launching MCP server: {}", target);

    let mut child = Command::new(&target.program)
        .args(&target.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SessionError::Connection(format!("Failed to start {}: {}", target, e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| SessionError::Connection("Server stdin was not captured".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SessionError::Connection("Server stdout was not captured".into()))?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "mcpcalc::server_stderr", "{}", line);
            }
        });
    }

    Ok(ChildTransport {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config() -> ClientConfig {
        ClientConfig {
            python_command: "py-test".into(),
            node_command: "node-test".into(),
            ..ClientConfig::default()
        }
    }

    fn script_with_suffix(suffix: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("server")
            .suffix(suffix)
            .tempfile()
            .unwrap();
        writeln!(file, "# test server").unwrap();
        file
    }

    #[test]
    fn test_python_and_node_targets_use_interpreters() {
        let py = script_with_suffix(".py");
        let target = ServerTarget::resolve(py.path(), &config()).unwrap();
        assert_eq!(target.program(), OsStr::new("py-test"));
        assert_eq!(target.args(), &[py.path().as_os_str().to_owned()]);

        for suffix in [".js", ".mjs", ".CJS"] {
            let js = script_with_suffix(suffix);
            let target = ServerTarget::resolve(js.path(), &config()).unwrap();
            assert_eq!(target.program(), OsStr::new("node-test"), "suffix {}", suffix);
            assert_eq!(target.script(), js.path());
        }
    }

    #[test]
    fn test_unsupported_extension_is_connection_error() {
        let txt = script_with_suffix(".txt");
        let err = ServerTarget::resolve(txt.path(), &config()).unwrap_err();
        assert!(matches!(err, SessionError::Connection(_)));
        assert!(err.to_string().contains("Unsupported server type '.txt'"));
    }

    #[test]
    fn test_missing_path_and_directory_are_connection_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.py");
        assert!(matches!(
            ServerTarget::resolve(&missing, &config()),
            Err(SessionError::Connection(_))
        ));
        assert!(matches!(
            ServerTarget::resolve(dir.path(), &config()),
            Err(SessionError::Connection(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_requirement_for_bare_files() {
        use std::os::unix::fs::PermissionsExt;

        let file = script_with_suffix("");
        let path = file.path().to_path_buf();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            ServerTarget::resolve(&path, &config()),
            Err(SessionError::Connection(_))
        ));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let target = ServerTarget::resolve(&path, &config()).unwrap();
        assert_eq!(target.program(), path.as_os_str());
        assert!(target.args().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let py = script_with_suffix(".py");
        let target = ServerTarget::resolve(
            py.path(),
            &ClientConfig {
                python_command: "/definitely/not/a/python".into(),
                ..ClientConfig::default()
            },
        )
        .unwrap();
        let err = spawn(&target).err().expect("spawn should fail");
        assert!(matches!(err, SessionError::Connection(_)));
    }
}
