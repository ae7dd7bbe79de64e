//! `rollcall setup`: fetches the ONNX models the daemon runs.
//!
//! Filenames, URLs and digests come from the manifest in
//! `rollcall-models`, the same table the daemon checks at startup.

use anyhow::{bail, Context, Result};
use rollcall_models::{sha256_file_hex, verify_models_dir, IntegrityError, ModelFile, MODELS};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Pick the model directory when the user gave none.
///
/// Root installs system-wide under `/var/lib/rollcall/models`, which is
/// where the daemon looks by default. Everyone else gets
/// `$XDG_DATA_HOME/rollcall/models`.
fn default_model_dir() -> PathBuf {
    // SAFETY: geteuid has no preconditions and cannot fail.
    if unsafe { libc::geteuid() } == 0 {
        return PathBuf::from("/var/lib/rollcall/models");
    }

    let data_home = match std::env::var_os("XDG_DATA_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = std::env::var_os("HOME").unwrap_or_else(|| "/tmp".into());
            PathBuf::from(home).join(".local/share")
        }
    };

    data_home.join("rollcall/models")
}

/// Counts bytes through to the underlying writer, printing a progress
/// line at each 10% step when the total size is known.
struct ProgressWriter<W> {
    inner: W,
    written: u64,
    total: Option<u64>,
    next_report: u64,
}

impl<W: Write> ProgressWriter<W> {
    fn new(inner: W, total: Option<u64>) -> Self {
        Self {
            inner,
            written: 0,
            total,
            next_report: 10,
        }
    }
}

impl<W: Write> Write for ProgressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;

        if let Some(total) = self.total.filter(|t| *t > 0) {
            let pct = self.written * 100 / total;
            if pct >= self.next_report {
                print!("  {pct}%\r");
                io::stdout().flush().ok();
                self.next_report = (pct / 10 + 1) * 10;
            }
        }

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Download one model into `dir`, staged under a `.part` name until the
/// digest checks out.
fn fetch_model(model: &ModelFile, dir: &Path) -> Result<()> {
    let staging = dir.join(format!("{}.part", model.name));

    println!("  fetching {} ({})...", model.name, model.size_display);

    let resp = ureq::get(model.url)
        .call()
        .with_context(|| format!("GET {} failed", model.url))?;

    let total: Option<u64> = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let file = fs::File::create(&staging)
        .with_context(|| format!("failed to create {}", staging.display()))?;
    let mut out = ProgressWriter::new(BufWriter::new(file), total);

    io::copy(&mut resp.into_body().into_reader(), &mut out)
        .with_context(|| format!("download of {} interrupted", model.name))?;
    out.flush()
        .with_context(|| format!("failed to flush {}", staging.display()))?;
    drop(out);

    print!("  checking digest... ");
    io::stdout().flush().ok();
    let digest = sha256_file_hex(&staging)?;
    if digest != model.sha256 {
        let _ = fs::remove_file(&staging);
        bail!(
            "downloaded {} does not match the manifest digest\n  expected: {}\n  got:      {digest}",
            model.name,
            model.sha256,
        );
    }
    println!("ok");

    // The real model name is only ever given to a verified file.
    fs::rename(&staging, model.path_in(dir))
        .with_context(|| format!("failed to move {} into place", staging.display()))?;

    Ok(())
}

/// Entry point for `rollcall setup`.
///
/// With `--verify`, checks the existing files against the manifest and
/// downloads nothing.
pub fn run(model_dir: Option<String>, verify_only: bool) -> Result<()> {
    let dir = model_dir.map(PathBuf::from).unwrap_or_else(default_model_dir);

    println!("Model directory: {}", dir.display());

    if verify_only {
        verify_models_dir(&dir).context("model verification failed")?;
        println!("All models present with matching checksums.");
        return Ok(());
    }

    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut fetched = 0;
    for model in MODELS {
        match model.verify_in(&dir) {
            Ok(()) => {
                println!("  {} already present (digest ok)", model.name);
                continue;
            }
            Err(IntegrityError::NotFound { .. }) => {}
            Err(IntegrityError::Digest { .. }) => {
                println!("  {} is stale or corrupt, replacing", model.name);
            }
            Err(err) => {
                println!("  {} could not be verified ({err}), replacing", model.name);
            }
        }

        fetch_model(model, &dir)?;
        fetched += 1;
    }

    println!();
    if fetched > 0 {
        println!("Setup complete: {fetched} model(s) downloaded.");
    } else {
        println!("All models already present. Nothing to download.");
    }

    Ok(())
}
