use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{debug, error, info, instrument, warn};

/// One interactive shell on a pseudo terminal
pub struct PtySession {
    session_id: String,
    master: Option<Box<dyn MasterPty + Send>>,
    child: Box<dyn Child + Send + Sync>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
}

impl PtySession {
    /// Spawn `shell` in `cwd`; the child inherits this process's environment.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub fn spawn(
        session_id: &str,
        shell: &str,
        cwd: &Path,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        info!(session_id = %session_id, shell = %shell, "Creating new PTY session");

        let pty_system = portable_pty::native_pty_system();

        // Create PTY with default size
        let size = PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system.openpty(size)?;
        let master = pair.master;

        // CommandBuilder starts from a copy of the current environment
        let mut cmd = CommandBuilder::new(shell);
        cmd.cwd(cwd);
        cmd.env("TERM", "xterm-256color");

        let child = pair.slave.spawn_command(cmd)?;

        // 关闭父进程中的 slave 端 FD，避免 master reader 永远收不到 EOF
        drop(pair.slave);

        let reader = master.try_clone_reader()?;
        let writer = master.take_writer()?;

        info!(session_id = %session_id, "PTY session created successfully");

        Ok(PtySession {
            session_id: session_id.to_string(),
            master: Some(master),
            child,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    /// 从 session 中取出 reader，用于独立的读取线程
    pub fn take_reader(&mut self) -> io::Result<Box<dyn Read + Send>> {
        self.reader
            .take()
            .ok_or_else(|| io::Error::other("PTY reader already taken"))
    }

    /// 取出 writer，输入由调用方在自己的线程上写入
    pub fn take_writer(&mut self) -> io::Result<Box<dyn Write + Send>> {
        self.writer
            .take()
            .ok_or_else(|| io::Error::other("PTY writer already taken"))
    }

    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub fn kill(&mut self) {
        // 先释放 reader/writer FD
        drop(self.reader.take());
        drop(self.writer.take());

        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(
                    session_id = %self.session_id,
                    exit_code = status.exit_code(),
                    "Child process already exited"
                );
            }
            _ => {
                info!(session_id = %self.session_id, "Killing PTY session");
                if let Err(e) = self.child.kill() {
                    warn!(
                        session_id = %self.session_id,
                        error = %e,
                        "Error sending kill signal to child process"
                    );
                }
                if let Err(e) = self.child.wait() {
                    error!(
                        session_id = %self.session_id,
                        error = %e,
                        "Error waiting for child process to exit"
                    );
                }
            }
        }

        // 最后释放 master FD
        drop(self.master.take());
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        debug!(session_id = %self.session_id, "Dropping PTY session");
        self.kill();
    }
}
