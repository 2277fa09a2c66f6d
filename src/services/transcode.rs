//! Remuxing subprocess wrapper
//!
//! One [`TranscodeProcess`] manages exactly one OS process: the configured
//! command reads the channel's local playlist and writes MPEG-TS to stdout,
//! which is consumed in fixed-size chunks by the owning tuner.

use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command as TokioCommand};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::TranscodeConfig;
use crate::errors::TranscodeError;
use crate::models::Channel;

/// Byte source driven by a tuner's pump loop
#[async_trait]
pub trait StreamProcess: Send {
    /// Spawn the process. No-op once started.
    fn start(&mut self) -> Result<(), TranscodeError>;

    /// Next block of output, `None` once the output is closed
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, TranscodeError>;

    /// Terminate the process. Safe to call repeatedly or before `start`.
    fn stop(&mut self);

    fn is_started(&self) -> bool;
}

/// Creates the process a tuner runs for its channel
pub trait ProcessFactory: Send + Sync {
    fn create(&self, channel: &Channel) -> Box<dyn StreamProcess>;
}

enum ProcessState {
    Unstarted,
    Running { child: Child, stdout: ChildStdout },
    Stopped,
}

pub struct TranscodeProcess {
    channel: String,
    command: String,
    args: Vec<String>,
    chunk_size: usize,
    debug: bool,
    state: ProcessState,
}

impl TranscodeProcess {
    pub fn new(channel: &Channel, input_url: &Url, config: &TranscodeConfig) -> Self {
        let loglevel = if config.debug { "debug" } else { "quiet" };
        let args = config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", input_url.as_str())
                    .replace("{loglevel}", loglevel)
            })
            .collect();

        Self {
            channel: channel.number.clone(),
            command: config.command.clone(),
            args,
            chunk_size: config.chunk_size.max(1),
            debug: config.debug,
            state: ProcessState::Unstarted,
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl StreamProcess for TranscodeProcess {
    fn start(&mut self) -> Result<(), TranscodeError> {
        if !matches!(self.state, ProcessState::Unstarted) {
            return Ok(());
        }

        let mut cmd = TokioCommand::new(&self.command);
        cmd.args(&self.args);
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(if self.debug {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|source| TranscodeError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        if let Some(stderr) = child.stderr.take() {
            let channel = self.channel.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(channel = %channel, "transcode: {}", line);
                }
            });
        }

        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            self.state = ProcessState::Stopped;
            return Err(TranscodeError::NotStarted);
        };

        info!(
            channel = %self.channel,
            pid = ?child.id(),
            command = %self.command,
            args = ?self.args,
            "Started transcode process"
        );
        self.state = ProcessState::Running { child, stdout };
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>, TranscodeError> {
        match &mut self.state {
            ProcessState::Unstarted => Err(TranscodeError::NotStarted),
            ProcessState::Stopped => Ok(None),
            ProcessState::Running { stdout, .. } => {
                let mut buffer = vec![0u8; self.chunk_size];
                let read = stdout.read(&mut buffer).await?;
                if read == 0 {
                    debug!(channel = %self.channel, "Transcode output closed");
                    return Ok(None);
                }
                buffer.truncate(read);
                Ok(Some(Bytes::from(buffer)))
            }
        }
    }

    fn stop(&mut self) {
        if let ProcessState::Running { mut child, .. } =
            std::mem::replace(&mut self.state, ProcessState::Stopped)
        {
            if let Err(e) = child.start_kill() {
                warn!(channel = %self.channel, error = %e, "Failed to kill transcode process");
            } else {
                info!(channel = %self.channel, pid = ?child.id(), "Stopped transcode process");
            }
        }
        self.state = ProcessState::Stopped;
    }

    fn is_started(&self) -> bool {
        !matches!(self.state, ProcessState::Unstarted)
    }
}

impl Drop for TranscodeProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builds [`TranscodeProcess`]es pointed at this server's playlist endpoint
pub struct TranscodeProcessFactory {
    config: TranscodeConfig,
    local_base_url: Url,
}

impl TranscodeProcessFactory {
    pub fn new(config: TranscodeConfig, local_base_url: Url) -> Self {
        Self {
            config,
            local_base_url,
        }
    }

    pub fn input_url(&self, channel: &Channel) -> Url {
        self.local_base_url
            .join(&channel.playlist_path())
            .unwrap_or_else(|_| self.local_base_url.clone())
    }
}

impl ProcessFactory for TranscodeProcessFactory {
    fn create(&self, channel: &Channel) -> Box<dyn StreamProcess> {
        Box::new(TranscodeProcess::new(
            channel,
            &self.input_url(channel),
            &self.config,
        ))
    }
}
