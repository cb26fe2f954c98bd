//! Runs the external tools behind an agent call.
//!
//! Every process gets its stderr captured into `<log_dir>/<name>.log` by a background task,
//! and runs in a process group of its own so cancelling it also stops the processes it
//! started.
//! All operations join every task they start before returning, on success and on error,
//! so logs are complete and processes reaped once a call returns.

use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{
        AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt,
        BufReader, BufWriter,
    },
    process::{Child, ChildStderr, Command},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{ExecutorError, ExecutorResult},
    storage::ObjectStorage,
};

/// How much of a process' stderr log ends up in [`ExecutorError::Exit`].
const STDERR_TAIL: u64 = 8 * 1024;

/// Size of the buffer used to move bytes between a process and storage.
const PUMP_BUFFER: usize = 64 * 1024;

/// Decides the outcome of [`CommandExecutor::run_piped`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PipeMode {
    /// Only the downstream process counts. A failing upstream process is logged, the
    /// call still succeeds when the downstream process accepted its (possibly short)
    /// input.
    #[default]
    Downstream,

    /// Both processes have to exit successfully.
    Strict,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Receives one `<name>.log` file per started process.
    pub log_dir: PathBuf,

    #[serde(default)]
    pub pipe_mode: PipeMode,
}

/// A [`Command`] together with the name of its stderr log.
#[derive(Debug)]
pub struct NamedCommand {
    name: String,
    command: Command,
}

impl NamedCommand {
    pub fn new(name: impl Into<String>, command: Command) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn program(&self) -> String {
        self.command
            .as_std()
            .get_program()
            .to_string_lossy()
            .into_owned()
    }
}

/// A started process with its stderr capture task.
struct Process {
    name: String,
    program: String,
    child: Child,
    log_path: PathBuf,
    stderr_task: JoinHandle<ExecutorResult<()>>,
}

impl Process {
    /// Waits for the process to exit, kills it when `token` is cancelled first.
    async fn wait(&mut self, token: &CancellationToken) -> ExecutorResult<ExitStatus> {
        tokio::select! {
            // An exit that raced the cancellation is still reported as an exit.
            biased;

            status = self.child.wait() => status.map_err(|error| {
                ExecutorError::stream_io(format!("waiting for `{}`", self.name), error)
            }),

            _ = token.cancelled() => {
                warn!(name = %self.name, "cancelled, killing process");
                self.kill_group();
                if let Err(error) = self.child.kill().await {
                    warn!(name = %self.name, %error, "failed to kill process");
                }

                Err(ExecutorError::Cancelled { name: self.name.clone() })
            }
        }
    }

    /// Joins the stderr capture and turns `status` into the result of this process.
    async fn finish(self, status: ExecutorResult<ExitStatus>) -> ExecutorResult<()> {
        let captured = self
            .stderr_task
            .await
            .map_err(|source| ExecutorError::Task {
                name: self.name.clone(),
                source,
            })
            .and_then(|captured| captured);

        let status = status?;
        debug!(name = %self.name, %status, "process exited");

        if !status.success() {
            let stderr = stderr_tail(&self.log_path)
                .await
                .unwrap_or_else(|error| format!("<stderr log unreadable: {error}>"));

            return Err(ExecutorError::Exit {
                name: self.name,
                program: self.program,
                status,
                stderr,
            });
        }

        captured
    }

    /// Kills the process and joins its stderr capture, for error paths that never waited
    /// on it.
    async fn abort(mut self) {
        self.kill_group();
        if let Err(error) = self.child.start_kill() {
            debug!(name = %self.name, %error, "process already gone");
        }

        let status = self.child.wait().await.map_err(|error| {
            ExecutorError::stream_io(format!("waiting for `{}`", self.name), error)
        });
        if let Err(error) = self.finish(status).await {
            debug!(%error, "aborted process");
        }
    }

    /// Sends `SIGKILL` to the process group led by the process, reaching the children a
    /// shell left holding its stderr.
    fn kill_group(&self) {
        // No id once the process has been reaped.
        let Some(pid) = self.child.id().and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };

        if let Err(error) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!(name = %self.name, %error, "failed to kill process group");
        }
    }
}

async fn capture_stderr(
    name: String,
    stderr: ChildStderr,
    log: File,
    log_path: PathBuf,
) -> ExecutorResult<()> {
    let log_error = |source| ExecutorError::Log {
        path: log_path.display().to_string(),
        source,
    };

    let mut reader = BufReader::new(stderr);
    let mut writer = BufWriter::new(log);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(|error| ExecutorError::stream_io(format!("reading stderr of `{name}`"), error))?;
        if read == 0 {
            break;
        }

        debug!(name, line = %String::from_utf8_lossy(&line).trim_end(), "stderr");
        writer.write_all(&line).await.map_err(log_error)?;
    }

    writer.flush().await.map_err(log_error)
}

async fn stderr_tail(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    if len > STDERR_TAIL {
        file.seek(SeekFrom::Start(len - STDERR_TAIL)).await?;
    }

    let mut tail = Vec::new();
    file.read_to_end(&mut tail).await?;

    Ok(String::from_utf8_lossy(&tail).trim().to_owned())
}

/// The end of a [`pump`] that failed.
enum PumpError {
    Read(ExecutorError),
    Write(ExecutorError),
}

impl From<PumpError> for ExecutorError {
    fn from(error: PumpError) -> Self {
        match error {
            PumpError::Read(error) | PumpError::Write(error) => error,
        }
    }
}

/// Copies `reader` into `writer` through a fixed size buffer.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    from: &str,
    to: &str,
) -> Result<u64, PumpError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0; PUMP_BUFFER];
    let mut total = 0;

    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|error| {
                PumpError::Read(ExecutorError::stream_io(format!("reading {from}"), error))
            })?;
        if read == 0 {
            break;
        }

        // `read` never exceeds the length of `buffer`.
        #[allow(clippy::indexing_slicing)]
        let chunk = &buffer[..read];
        writer.write_all(chunk).await.map_err(|error| {
            PumpError::Write(ExecutorError::stream_io(format!("writing {to}"), error))
        })?;
        total += read as u64;
    }

    writer.flush().await.map_err(|error| {
        PumpError::Write(ExecutorError::stream_io(format!("flushing {to}"), error))
    })?;

    Ok(total)
}

/// Runs processes, alone, piped into each other, or streaming to and from storage.
#[derive(Clone, Debug)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Where the stderr of the process called `name` is written.
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.config.log_dir.join(format!("{name}.log"))
    }

    async fn spawn(
        &self,
        command: NamedCommand,
        stdin: Option<Stdio>,
        stdout: Option<Stdio>,
    ) -> ExecutorResult<Process> {
        let log_path = self.log_path(&command.name);
        let log_error = |source| ExecutorError::Log {
            path: log_path.display().to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.config.log_dir)
            .await
            .map_err(log_error)?;
        let log = File::create(&log_path).await.map_err(log_error)?;

        let program = command.program();
        let NamedCommand {
            name,
            command: mut cmd,
        } = command;

        if let Some(stdin) = stdin {
            cmd.stdin(stdin);
        }
        if let Some(stdout) = stdout {
            cmd.stdout(stdout);
        }
        cmd.stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
            name: name.clone(),
            program: program.clone(),
            source,
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ExecutorError::stream_io(
                format!("capturing stderr of `{name}`"),
                io::Error::other("stderr is not piped"),
            )
        })?;

        debug!(name, program, pid = child.id(), "process started");
        let stderr_task = tokio::spawn(capture_stderr(
            name.clone(),
            stderr,
            log,
            log_path.clone(),
        ));

        Ok(Process {
            name,
            program,
            child,
            log_path,
            stderr_task,
        })
    }

    /// Runs `command` to completion.
    #[tracing::instrument(level = "debug", skip_all, fields(name = command.name()), err)]
    pub async fn run(&self, token: &CancellationToken, command: NamedCommand) -> ExecutorResult<()> {
        let mut process = self.spawn(command, None, None).await?;
        let status = process.wait(token).await;

        process.finish(status).await
    }

    /// Runs `upstream` with its stdout connected to the stdin of `downstream`.
    ///
    /// The outcome depends on [`ExecutorConfig::pipe_mode`].
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(upstream = upstream.name(), downstream = downstream.name()),
        err
    )]
    pub async fn run_piped(
        &self,
        token: &CancellationToken,
        upstream: NamedCommand,
        downstream: NamedCommand,
    ) -> ExecutorResult<()> {
        let mut upstream = self.spawn(upstream, None, Some(Stdio::piped())).await?;

        let pipe = upstream
            .child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout is not piped"))
            .and_then(TryInto::<Stdio>::try_into)
            .map_err(|error| {
                ExecutorError::stream_io(
                    format!("connecting `{}` to `{}`", upstream.name, downstream.name()),
                    error,
                )
            });
        let pipe = match pipe {
            Ok(pipe) => pipe,
            Err(error) => {
                upstream.abort().await;
                return Err(error);
            }
        };

        let mut downstream = match self.spawn(downstream, Some(pipe), None).await {
            Ok(downstream) => downstream,
            Err(error) => {
                upstream.abort().await;
                return Err(error);
            }
        };

        // The write end of the pipe lives only in the upstream process, so downstream sees
        // end of input as soon as upstream exits.
        let upstream_token = token.child_token();
        let upstream_task = tokio::spawn({
            let token = upstream_token.clone();
            async move {
                let status = upstream.wait(&token).await;
                if let Ok(status) = &status {
                    info!(name = %upstream.name, %status, "upstream process exited");
                }

                upstream.finish(status).await
            }
        });

        let status = downstream.wait(token).await;
        let downstream_result = downstream.finish(status).await;
        if downstream_result.is_err() {
            upstream_token.cancel();
        }

        let upstream_result = upstream_task.await.map_err(|source| ExecutorError::Task {
            name: "upstream".to_owned(),
            source,
        })?;

        downstream_result?;
        match (self.config.pipe_mode, upstream_result) {
            (_, Ok(())) => Ok(()),
            (PipeMode::Strict, Err(error)) => Err(error),
            (PipeMode::Downstream, Err(error)) => {
                warn!(%error, "upstream process failed but downstream accepted its output");
                Ok(())
            }
        }
    }

    /// Uploads the stdout of `command` to `bucket`/`key` while it runs.
    ///
    /// Returns the number of bytes uploaded. The object is left behind even when the
    /// process fails after the upload completed.
    #[tracing::instrument(level = "debug", skip(self, token, command, storage), fields(name = command.name()), err)]
    pub async fn stream_out(
        &self,
        token: &CancellationToken,
        command: NamedCommand,
        storage: &dyn ObjectStorage,
        bucket: &str,
        key: &str,
    ) -> ExecutorResult<u64> {
        let mut process = self.spawn(command, None, Some(Stdio::piped())).await?;
        let stdout = process.child.stdout.take();
        let name = process.name.clone();
        let process_token = token.child_token();

        let upload = async {
            let mut stdout = stdout.ok_or_else(|| {
                ExecutorError::stream_io(
                    format!("capturing stdout of `{name}`"),
                    io::Error::other("stdout is not piped"),
                )
            })?;
            let mut writer = storage.put_object(bucket, key).await?;

            let sent = pump(
                &mut stdout,
                &mut writer,
                &format!("stdout of `{name}`"),
                &format!("object `{bucket}/{key}`"),
            )
            .await?;
            writer.shutdown().await.map_err(|error| {
                ExecutorError::stream_io(format!("completing upload of `{bucket}/{key}`"), error)
            })?;

            Ok::<_, ExecutorError>(sent)
        };
        let upload = async {
            let uploaded = tokio::select! {
                uploaded = upload => uploaded,
                _ = token.cancelled() => Err(ExecutorError::Cancelled { name: name.clone() }),
            };
            if uploaded.is_err() {
                process_token.cancel();
            }

            uploaded
        };

        let (uploaded, status) = tokio::join!(upload, process.wait(&process_token));
        let finished = process.finish(status).await;

        // A failed upload makes the process die on a closed stdout, report the cause.
        let sent = uploaded?;
        finished?;

        Ok(sent)
    }

    /// Feeds the object at `bucket`/`key` into the stdin of `command`.
    ///
    /// Returns the number of bytes downloaded. When the process stops reading early its
    /// exit status decides the outcome: a failure is reported as [`ExecutorError::Exit`],
    /// a success as the [`ExecutorError::StreamIo`] of the unread input.
    #[tracing::instrument(level = "debug", skip(self, token, command, storage), fields(name = command.name()), err)]
    pub async fn stream_in(
        &self,
        token: &CancellationToken,
        command: NamedCommand,
        storage: &dyn ObjectStorage,
        bucket: &str,
        key: &str,
    ) -> ExecutorResult<u64> {
        let mut reader = storage.get_object(bucket, key).await?;
        let mut process = self.spawn(command, Some(Stdio::piped()), None).await?;
        let stdin = process.child.stdin.take();
        let name = process.name.clone();
        let process_token = token.child_token();

        let download = async {
            let Some(mut stdin) = stdin else {
                process_token.cancel();
                return Err(ExecutorError::stream_io(
                    format!("capturing stdin of `{name}`"),
                    io::Error::other("stdin is not piped"),
                ));
            };

            let pumped = pump(
                &mut reader,
                &mut stdin,
                &format!("object `{bucket}/{key}`"),
                &format!("stdin of `{name}`"),
            )
            .await;
            // Closes the pipe, the process sees end of input.
            drop(stdin);

            match pumped {
                Ok(received) => Ok(received),
                // The process closed its stdin, it is left to exit on its own.
                Err(PumpError::Write(error)) => Err(error),
                Err(PumpError::Read(error)) => {
                    process_token.cancel();
                    Err(error)
                }
            }
        };
        // Cancelling `token` also cancels `process_token`.
        let download = async {
            tokio::select! {
                downloaded = download => downloaded,
                _ = token.cancelled() => Err(ExecutorError::Cancelled { name: name.clone() }),
            }
        };

        let (downloaded, status) = tokio::join!(download, process.wait(&process_token));
        let finished = process.finish(status).await;

        match (downloaded, finished) {
            (Ok(received), Ok(())) => Ok(received),
            // The process was killed because the download failed or was cancelled.
            (Err(error), Err(ExecutorError::Cancelled { .. })) => Err(error),
            // A process exiting early breaks the pipe, its own failure is the cause.
            (_, Err(error)) | (Err(error), Ok(())) => Err(error),
        }
    }
}
