use std::{future::Future, process::Stdio};

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, Command},
    sync::mpsc,
    task::JoinHandle,
};

use crate::{
    error::{HlsError, HlsResult},
    mp4::{FragmentSplitter, RemuxedFragment},
};

/// Repackages MPEG-TS chunks into fragmented MP4 without re-encoding.
pub trait Remuxer: Send {
    /// Feed one ordered chunk. Returns the fragments that became available.
    fn push(
        &mut self,
        chunk: Bytes,
    ) -> impl Future<Output = HlsResult<Vec<RemuxedFragment>>> + Send;

    /// Signal end of input and collect the remaining fragments.
    fn flush(&mut self) -> impl Future<Output = HlsResult<Vec<RemuxedFragment>>> + Send;

    /// Stop remuxing, discarding pending output.
    fn abort(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Remuxer backed by an `ffmpeg` child process reading MPEG-TS on stdin and
/// writing fragmented MP4 on stdout.
pub struct FfmpegRemuxer {
    child: Child,
    stdin: Option<ChildStdin>,
    fragments: mpsc::UnboundedReceiver<HlsResult<RemuxedFragment>>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegRemuxer {
    pub fn spawn() -> HlsResult<Self> {
        let ffmpeg = which::which("ffmpeg")?;
        tracing::debug!("Remuxing with {}", ffmpeg.display());

        let mut child = Command::new(ffmpeg)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "mpegts", "-i", "pipe:0"])
            .args(["-map", "0", "-c", "copy"])
            .args([
                "-f",
                "mp4",
                "-movflags",
                "frag_keyframe+empty_moov+default_base_moof",
                "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| HlsError::RemuxError("ffmpeg stdout unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| HlsError::RemuxError("ffmpeg stderr unavailable".to_string()))?;

        let (tx, fragments) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            let mut splitter = FragmentSplitter::new();
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => {
                        for fragment in splitter.finish() {
                            _ = tx.send(Ok(fragment));
                        }
                        break;
                    }
                    Ok(n) => {
                        for fragment in splitter.push(&buf[..n]) {
                            _ = tx.send(Ok(fragment));
                        }
                    }
                    Err(e) => {
                        _ = tx.send(Err(HlsError::RemuxError(format!(
                            "failed to read ffmpeg output: {e}"
                        ))));
                        break;
                    }
                }
            }
        });
        let stderr = tokio::spawn(async move {
            let mut output = String::new();
            _ = stderr.read_to_string(&mut output).await;
            output
        });

        Ok(Self {
            child,
            stdin,
            fragments,
            reader: Some(reader),
            stderr: Some(stderr),
        })
    }

    fn drain(&mut self) -> HlsResult<Vec<RemuxedFragment>> {
        let mut fragments = Vec::new();
        while let Ok(fragment) = self.fragments.try_recv() {
            fragments.push(fragment?);
        }
        Ok(fragments)
    }

    async fn stderr_output(&mut self) -> String {
        match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

impl Remuxer for FfmpegRemuxer {
    async fn push(&mut self, chunk: Bytes) -> HlsResult<Vec<RemuxedFragment>> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(HlsError::RemuxError("remuxer already flushed".to_string()));
        };
        if let Err(e) = stdin.write_all(&chunk).await {
            let stderr = self.stderr_output().await;
            return Err(HlsError::RemuxError(format!(
                "failed to feed ffmpeg: {e} {}",
                stderr.trim()
            )));
        }
        self.drain()
    }

    async fn flush(&mut self) -> HlsResult<Vec<RemuxedFragment>> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }

        let status = self.child.wait().await?;
        if let Some(reader) = self.reader.take() {
            _ = reader.await;
        }
        let stderr = self.stderr_output().await;
        if !status.success() {
            return Err(HlsError::RemuxError(format!(
                "ffmpeg exited with {status}: {}",
                stderr.trim()
            )));
        }

        let mut fragments = Vec::new();
        while let Some(fragment) = self.fragments.recv().await {
            fragments.push(fragment?);
        }
        Ok(fragments)
    }

    async fn abort(&mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.kill().await {
            tracing::debug!("Failed to kill ffmpeg: {e}");
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
