use super::{types::*, Engine};
use crate::{
    config::Config,
    shutdown::CancelToken,
    split::{part_file_name, ItemRange},
    util::expand_tilde,
};
use anyhow::{anyhow, bail, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const PARTITION_SCRIPT: &str = "partition_runner.py";
const EPUB_SCRIPT: &str = "epub_tool.py";
const MOBI_SCRIPT: &str = "mobi_convert.py";

/// Drives the Python helpers (unstructured, ebooklib, mobi) and the djvutxt
/// binary as child processes speaking JSON over stdin/stdout.
pub struct PythonEngine {
    cfg: Config,
    scripts_dir: PathBuf,
    python_exe: PathBuf,
    djvutxt: DjvuTool,
}

impl PythonEngine {
    pub fn new(cfg: &Config) -> Result<Self> {
        let scripts_dir = PathBuf::from(&cfg.paths.scripts_dir);
        if cfg.security.pin_scripts_dir {
            let cwd = std::env::current_dir().with_context(|| "current_dir")?;
            let canon = scripts_dir
                .canonicalize()
                .with_context(|| format!("canonicalize scripts_dir: {}", scripts_dir.display()))?;
            if !canon.starts_with(&cwd) {
                return Err(anyhow!(
                    "scripts_dir is outside cwd while pin_scripts_dir=true: {}",
                    canon.display()
                ));
            }
        }
        for script in [PARTITION_SCRIPT, EPUB_SCRIPT, MOBI_SCRIPT] {
            let path = scripts_dir.join(script);
            if !path.exists() {
                return Err(anyhow!("missing script: {}", path.display()));
            }
        }
        let python_exe = resolve_python_exe(&cfg.python.exe);
        Ok(Self {
            cfg: cfg.clone(),
            scripts_dir,
            python_exe,
            djvutxt: DjvuTool::new(expand_tilde(&cfg.tools.djvutxt_exe)),
        })
    }

    fn script(&self, name: &str) -> PathBuf {
        self.scripts_dir.join(name)
    }

    fn helper_timeout(&self) -> Option<Duration> {
        secs(self.cfg.python.helper_timeout_seconds)
    }

    fn run_json<I: serde::Serialize, O: for<'de> serde::Deserialize<'de>>(
        &self,
        script: &Path,
        input: &I,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<O> {
        debug!("python run {} timeout={:?}", script.display(), timeout);
        let mut cmd = Command::new(&self.python_exe);
        cmd.arg(script);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        for (k, v) in &self.cfg.python.env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning python: {}", script.display()))?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
            let bytes = serde_json::to_vec(input)?;
            use std::io::Write;
            stdin.write_all(&bytes)?;
            stdin.flush().ok();
        }

        let output = wait_for_child(&mut child, timeout, cancel)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "python script failed: {}\n{}",
                script.display(),
                stderr
            ));
        }

        if self.cfg.debug.keep_python_stderr && !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("python stderr {}: {}", script.display(), stderr.trim());
        }

        let out: O = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("parsing python JSON output: {}", script.display()))?;
        Ok(out)
    }
}

fn secs(n: u64) -> Option<Duration> {
    if n > 0 {
        Some(Duration::from_secs(n))
    } else {
        None
    }
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("UNSTRUCTURED_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from("python3");
    }
    expand_tilde(raw)
}

impl Engine for PythonEngine {
    fn doctor(&self) -> Result<DocDiag> {
        let script = self.script(PARTITION_SCRIPT);
        let mut diag: DocDiag = self.run_json(
            &script,
            &serde_json::json!({"cmd": "doctor"}),
            Some(Duration::from_secs(60)),
            &CancelToken::new(),
        )?;
        if !self.djvutxt.is_available() {
            warn!("djvutxt not found at {}", self.djvutxt.exe.display());
        }
        diag.python_exe = self.python_exe.display().to_string();
        Ok(diag)
    }

    fn partition(&self, req: &PartitionIn, cancel: &CancelToken) -> Result<PartitionOut> {
        let script = self.script(PARTITION_SCRIPT);
        let out: PartitionOut = self.run_json(
            &script,
            &serde_json::json!({"cmd": "partition", "req": req}),
            secs(self.cfg.python.part_timeout_seconds),
            cancel,
        )?;
        if !out.ok {
            let msg = out.error.unwrap_or_else(|| "partition failed".to_string());
            bail!("partitioner error for {}: {msg}", req.input);
        }
        Ok(out)
    }

    fn probe_epub(&self, input: &Path, cancel: &CancelToken) -> Result<EpubProbe> {
        let script = self.script(EPUB_SCRIPT);
        let req = serde_json::json!({"cmd": "probe", "input": input});
        let out: EpubProbe = self.run_json(&script, &req, self.helper_timeout(), cancel)?;
        if let Some(err) = out.error.as_deref() {
            return Err(anyhow!("epub probe error: {err}"));
        }
        Ok(out)
    }

    fn split_epub(
        &self,
        input: &Path,
        out_dir: &Path,
        ranges: &[ItemRange],
        cancel: &CancelToken,
    ) -> Result<Vec<SplitPart>> {
        let script = self.script(EPUB_SCRIPT);
        let parts = ranges
            .iter()
            .enumerate()
            .map(|(index, items)| {
                let file_name = part_file_name(input, index);
                SplitPartIn {
                    index,
                    title: file_name.trim_end_matches(".epub").to_string(),
                    file_name,
                    items: *items,
                }
            })
            .collect();
        let req = SplitIn {
            input: input.display().to_string(),
            out_dir: out_dir.display().to_string(),
            parts,
        };
        let out: SplitOut = self.run_json(
            &script,
            &serde_json::json!({"cmd": "split", "req": req}),
            self.helper_timeout(),
            cancel,
        )?;
        if !out.ok {
            let msg = out.error.unwrap_or_else(|| "epub split failed".to_string());
            return Err(anyhow!(msg));
        }
        Ok(out.outputs)
    }

    fn convert_mobi(&self, input: &Path, out_dir: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        let script = self.script(MOBI_SCRIPT);
        let req = serde_json::json!({"input": input, "out_dir": out_dir});
        let out: ConvertOut = self.run_json(&script, &req, self.helper_timeout(), cancel)?;
        match (out.ok, out.path) {
            (true, Some(path)) => Ok(PathBuf::from(path)),
            (_, _) => Err(anyhow!(
                "mobi conversion failed: {}",
                out.error.unwrap_or_else(|| "no output".to_string())
            )),
        }
    }

    fn extract_djvu(&self, input: &Path, out_txt: &Path, cancel: &CancelToken) -> Result<()> {
        self.djvutxt
            .extract(input, out_txt, self.helper_timeout(), cancel)
    }
}

/// The `djvutxt` command-line extractor.
#[derive(Debug, Clone)]
pub struct DjvuTool {
    exe: PathBuf,
}

impl DjvuTool {
    pub fn new(exe: PathBuf) -> Self {
        Self { exe }
    }

    pub fn is_available(&self) -> bool {
        self.exe.is_file()
    }

    pub fn extract(
        &self,
        input: &Path,
        out_txt: &Path,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<()> {
        if !self.is_available() {
            bail!("djvutxt binary missing: {}", self.exe.display());
        }
        let mut child = Command::new(&self.exe)
            .arg(input)
            .arg(out_txt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {}", self.exe.display()))?;
        let output = wait_for_child(&mut child, timeout, cancel)?;
        if !output.status.success() {
            bail!(
                "djvutxt exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Wait for `child`, killing it on timeout or cancellation.
fn wait_for_child(
    child: &mut Child,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<Output> {
    // Drain pipes while waiting so verbose child logging can't deadlock the
    // child on a full stdout/stderr buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf).with_context(|| "read stdout")?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf).with_context(|| "read stderr")?;
        }
        Ok(buf)
    });

    enum Exit {
        Finished,
        TimedOut,
        Cancelled,
    }

    let start = Instant::now();
    let (status, exit) = loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            break (status, Exit::Finished);
        }

        let exit = if timeout.is_some_and(|t| start.elapsed() > t) {
            Some(Exit::TimedOut)
        } else if cancel.is_cancelled() {
            Some(Exit::Cancelled)
        } else {
            None
        };
        if let Some(exit) = exit {
            let _ = child.kill();
            let status = child.wait().with_context(|| "wait after kill")?;
            break (status, exit);
        }

        std::thread::sleep(Duration::from_millis(50));
    };

    let stdout = stdout_thread
        .join()
        .map_err(|_| anyhow!("stdout reader thread panicked"))??;
    let stderr = stderr_thread
        .join()
        .map_err(|_| anyhow!("stderr reader thread panicked"))??;

    match exit {
        Exit::Finished => Ok(Output {
            status,
            stdout,
            stderr,
        }),
        Exit::TimedOut => {
            warn!("child process timed out after {:?}", timeout);
            Err(anyhow!(
                "child process exceeded timeout ({:?}); stderr: {}",
                timeout,
                String::from_utf8_lossy(&stderr)
            ))
        }
        Exit::Cancelled => Err(anyhow!("child process killed: cancelled")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_djvutxt_fails_without_spawning() {
        let tool = DjvuTool::new(PathBuf::from("/definitely/not/here/djvutxt"));
        assert!(!tool.is_available());
        let err = tool
            .extract(
                Path::new("in.djvu"),
                Path::new("out.txt"),
                None,
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
