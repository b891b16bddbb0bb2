//! Separator subprocess runner.
//!
//! Spawns the external separation tool and exposes its merged stdout/stderr
//! as a line channel fed by a dedicated reader task. Reading lines and
//! collecting the exit status are separate steps.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use bytes::BytesMut;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedRead};

/// Model directory Demucs writes into when no model is selected.
pub const DEFAULT_MODEL: &str = "htdemucs";
/// Stem isolated by two-stem mode; its complement becomes `no_<stem>`.
pub const TWO_STEMS: &str = "vocals";

const LINE_CHANNEL_CAPACITY: usize = 64;
const OUTPUT_TAIL_LINES: usize = 32;

/// How to invoke the separation tool.
#[derive(Clone, Debug)]
pub struct SeparatorCommand {
    /// Executable to run (e.g. `python3`).
    pub program: String,
    /// Arguments placed before the separation flags (e.g. `-m demucs`).
    pub args: Vec<String>,
    /// Explicit model name, passed as `-n <model>` when set.
    pub model: Option<String>,
}

impl Default for SeparatorCommand {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-m".to_string(), "demucs".to_string()],
            model: None,
        }
    }
}

impl SeparatorCommand {
    /// Directory name the tool creates under the output root.
    pub fn model_dir(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Full argument list for one input file.
    pub fn arguments(&self, input: &Path, output_root: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        if let Some(model) = self.model.as_deref() {
            args.push("-n".into());
            args.push(model.into());
        }
        args.push("--two-stems".into());
        args.push(TWO_STEMS.into());
        args.push("--out".into());
        args.push(output_root.as_os_str().to_owned());
        args.push(input.as_os_str().to_owned());
        args
    }

    /// Start the tool against `input`, writing stems below `output_root`.
    pub fn spawn(&self, input: &Path, output_root: &Path) -> io::Result<SeparationProcess> {
        let mut child = Command::new(&self.program)
            .args(self.arguments(input, output_root))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("separator stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("separator stderr not captured"))?;

        let (tx, lines) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        tokio::spawn(forward_lines(stdout, stderr, tx));

        Ok(SeparationProcess {
            child,
            lines,
            tail: VecDeque::with_capacity(OUTPUT_TAIL_LINES),
        })
    }
}

/// A running separator with its merged output.
///
/// Dropping the handle kills the child.
pub struct SeparationProcess {
    child: Child,
    lines: mpsc::Receiver<String>,
    tail: VecDeque<String>,
}

impl SeparationProcess {
    /// OS process id, while the child is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next output line; `None` once both pipes are closed.
    pub async fn next_line(&mut self) -> Option<String> {
        let line = self.lines.recv().await?;
        if self.tail.len() == OUTPUT_TAIL_LINES {
            self.tail.pop_front();
        }
        self.tail.push_back(line.clone());
        Some(line)
    }

    /// Wait for the child to exit.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Kill the child and reap it.
    pub async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }

    /// Most recent output lines, oldest first.
    pub fn output_tail(&self) -> impl Iterator<Item = &str> {
        self.tail.iter().map(String::as_str)
    }
}

async fn forward_lines(stdout: ChildStdout, stderr: ChildStderr, tx: mpsc::Sender<String>) {
    let stdout = FramedRead::new(stdout, OutputLineCodec);
    let stderr = FramedRead::new(stderr, OutputLineCodec);
    let mut merged = stream::select(stdout, stderr);
    while let Some(item) = merged.next().await {
        match item {
            Ok(line) => {
                if tx.send(line).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "separator output read failed");
                return;
            }
        }
    }
}

/// Splits tool output on `\n`, `\r\n` and bare `\r`.
///
/// Progress bars redraw in place with carriage returns, so a plain newline
/// split would hold back every update until the bar finishes. Blank segments
/// are dropped and invalid UTF-8 is replaced.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputLineCodec;

impl Decoder for OutputLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        while let Some(pos) = buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let segment = buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&segment[..pos]);
            if !line.trim().is_empty() {
                return Ok(Some(line.into_owned()));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split();
        let line = String::from_utf8_lossy(&rest);
        if line.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(line.into_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn decode_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut codec = OutputLineCodec;
        let mut buf = BytesMut::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk);
            while let Some(line) = codec.decode(&mut buf).unwrap() {
                lines.push(line);
            }
        }
        while let Some(line) = codec.decode_eof(&mut buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn codec_splits_on_carriage_returns() {
        let lines = decode_all(&[b"  5%|#  | 5/100\r 10%|## | 10/100\r", b"done\r\n"]);
        assert_eq!(lines, vec!["  5%|#  | 5/100", " 10%|## | 10/100", "done"]);
    }

    #[test]
    fn codec_joins_lines_across_chunks() {
        let lines = decode_all(&[b"Selected mo", b"del\n\n", b"tail without newline"]);
        assert_eq!(lines, vec!["Selected model", "tail without newline"]);
    }

    #[test]
    fn codec_replaces_invalid_utf8() {
        let lines = decode_all(&[b"bad \xff byte\n"]);
        assert_eq!(lines, vec!["bad \u{fffd} byte"]);
    }

    #[test]
    fn arguments_select_two_stem_mode() {
        let cmd = SeparatorCommand::default();
        let args = cmd.arguments(Path::new("uploads/a/song.mp3"), Path::new("separated/a"));
        let expected: Vec<OsString> = [
            "-m",
            "demucs",
            "--two-stems",
            "vocals",
            "--out",
            "separated/a",
            "uploads/a/song.mp3",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        assert_eq!(args, expected);
        assert_eq!(cmd.model_dir(), "htdemucs");
    }

    #[test]
    fn explicit_model_is_passed_and_names_output_dir() {
        let cmd = SeparatorCommand {
            model: Some("mdx_extra".to_string()),
            ..SeparatorCommand::default()
        };
        let args = cmd.arguments(Path::new("in.wav"), Path::new("out"));
        assert_eq!(args[2], OsString::from("-n"));
        assert_eq!(args[3], OsString::from("mdx_extra"));
        assert_eq!(cmd.model_dir(), "mdx_extra");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn merges_stdout_and_stderr_then_reports_status() {
        let cmd = SeparatorCommand {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "printf 'one\\rtwo\\n'; echo three 1>&2; exit 3".to_string(),
                "separator".to_string(),
            ],
            model: None,
        };
        let mut process = cmd
            .spawn(&PathBuf::from("in.wav"), &PathBuf::from("out"))
            .expect("spawn sh");
        let mut lines = Vec::new();
        while let Some(line) = process.next_line().await {
            lines.push(line);
        }
        lines.sort();
        assert_eq!(lines, vec!["one", "three", "two"]);
        let status = process.wait().await.expect("wait");
        assert_eq!(status.code(), Some(3));
        assert_eq!(process.output_tail().count(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_fails_for_missing_program() {
        let cmd = SeparatorCommand {
            program: "/nonexistent/separator-binary".to_string(),
            args: Vec::new(),
            model: None,
        };
        assert!(cmd.spawn(Path::new("in.wav"), Path::new("out")).is_err());
    }
}
