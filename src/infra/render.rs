//! Headless-Chromium renderer: spawns the browser binary per render and
//! reads the produced PDF back from a scratch directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::fs;
use tokio::process::Command;
use tracing::{info, warn};

use crate::application::renderer::{RenderError, RenderRequest, Renderer};
use crate::domain::types::RenderMode;

/// Grace period added on top of the navigation timeout before the spawned
/// browser is considered hung and killed.
const BROWSER_EXIT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    binary: PathBuf,
}

impl ChromiumRenderer {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    async fn run_browser(
        &self,
        args: Vec<String>,
        output_path: &Path,
        navigation_timeout: Duration,
    ) -> Result<Bytes, RenderError> {
        let started_at = Instant::now();
        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = tokio::time::timeout(navigation_timeout + BROWSER_EXIT_GRACE, command.output());
        let output = match run.await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) if err.kind() == ErrorKind::NotFound => {
                return Err(RenderError::Permanent(format!(
                    "browser binary `{}` not found",
                    self.binary.display()
                )));
            }
            Ok(Err(err)) => {
                return Err(RenderError::Transient(format!(
                    "failed to spawn browser: {err}"
                )));
            }
            Err(_) => {
                warn!(
                    target = "stampa::render",
                    op = "render::browser",
                    result = "timeout",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "browser did not exit within the navigation deadline"
                );
                return Err(RenderError::Transient(format!(
                    "navigation timed out after {}s",
                    navigation_timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "stampa::render",
                op = "render::browser",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = output.status.code().map(i64::from).unwrap_or(-1),
                stderr = %stderr,
                "browser invocation failed"
            );
            return Err(RenderError::Transient(format!(
                "browser exited with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let bytes = match fs::read(output_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RenderError::Transient(
                    "browser produced no output file".to_string(),
                ));
            }
            Err(err) => {
                return Err(RenderError::Transient(format!(
                    "failed to read rendered output: {err}"
                )));
            }
        };

        if bytes.is_empty() {
            return Err(RenderError::Transient(
                "browser produced an empty output file".to_string(),
            ));
        }

        info!(
            target = "stampa::render",
            op = "render::browser",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            output_bytes = bytes.len(),
            "browser render completed"
        );

        Ok(Bytes::from(bytes))
    }

    fn base_args(navigation_timeout: Duration) -> Vec<String> {
        vec![
            "--headless".to_string(),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            format!("--timeout={}", navigation_timeout.as_millis()),
        ]
    }

    async fn print_to_pdf(
        &self,
        url: &str,
        scratch: &Path,
        navigation_timeout: Duration,
        allow_file_access: bool,
    ) -> Result<Bytes, RenderError> {
        let pdf_path = scratch.join("output.pdf");
        let mut args = Self::base_args(navigation_timeout);
        args.push("--no-pdf-header-footer".to_string());
        if allow_file_access {
            args.push("--allow-file-access-from-files".to_string());
        }
        args.push(format!("--print-to-pdf={}", pdf_path.display()));
        args.push(url.to_string());

        self.run_browser(args, &pdf_path, navigation_timeout).await
    }

    async fn screenshot_to_pdf(
        &self,
        url: &str,
        scratch: &Path,
        navigation_timeout: Duration,
    ) -> Result<Bytes, RenderError> {
        let png_path = scratch.join("capture.png");
        let mut args = Self::base_args(navigation_timeout);
        args.push("--window-size=1920,1080".to_string());
        args.push(format!("--screenshot={}", png_path.display()));
        args.push(url.to_string());

        self.run_browser(args, &png_path, navigation_timeout)
            .await?;

        // Second pass: print a single-image wrapper page so the capture
        // lands in a paginated PDF.
        let html_path = scratch.join("capture.html");
        let wrapper = format!(
            "<!doctype html><html><head><meta charset=\"utf-8\">\
             <style>@page {{ margin: 0; }} body {{ margin: 0; }} \
             img {{ width: 100%; display: block; }}</style></head>\
             <body><img src=\"file://{}\"></body></html>",
            png_path.display()
        );
        fs::write(&html_path, wrapper).await.map_err(|err| {
            RenderError::Transient(format!("failed to stage wrapper page: {err}"))
        })?;

        let wrapper_url = format!("file://{}", html_path.display());
        self.print_to_pdf(&wrapper_url, scratch, navigation_timeout, true)
            .await
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn render(&self, request: RenderRequest) -> Result<Bytes, RenderError> {
        let scratch = TempDir::new().map_err(|err| {
            RenderError::Transient(format!("failed to create scratch dir: {err}"))
        })?;

        match request.mode {
            RenderMode::PrintToPdf => {
                self.print_to_pdf(
                    &request.url,
                    scratch.path(),
                    request.navigation_timeout,
                    false,
                )
                .await
            }
            RenderMode::ScreenshotToPdf => {
                self.screenshot_to_pdf(&request.url, scratch.path(), request.navigation_timeout)
                    .await
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs as std_fs;
    use std::os::unix::fs::PermissionsExt;

    fn fake_browser(dir: &Path, script_body: &str) -> PathBuf {
        let path = dir.join("fake-chromium");
        std_fs::write(&path, format!("#!/bin/sh\nset -eu\n{script_body}")).expect("write script");
        let mut perms = std_fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        std_fs::set_permissions(&path, perms).expect("set perms");
        path
    }

    fn request(mode: RenderMode) -> RenderRequest {
        RenderRequest {
            url: "https://example.com/".to_string(),
            mode,
            navigation_timeout: Duration::from_secs(5),
        }
    }

    const WRITE_OUTPUTS: &str = r#"
for arg in "$@"; do
  case "$arg" in
    --print-to-pdf=*)
      printf '%%PDF-1.7 fake' > "${arg#--print-to-pdf=}"
      ;;
    --screenshot=*)
      printf 'PNGDATA' > "${arg#--screenshot=}"
      ;;
  esac
done
"#;

    #[tokio::test]
    async fn print_mode_returns_pdf_bytes() {
        let dir = TempDir::new().expect("temp dir");
        let binary = fake_browser(dir.path(), WRITE_OUTPUTS);
        let renderer = ChromiumRenderer::new(binary);

        let bytes = renderer
            .render(request(RenderMode::PrintToPdf))
            .await
            .expect("render succeeds");
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn screenshot_mode_runs_both_passes() {
        let dir = TempDir::new().expect("temp dir");
        let binary = fake_browser(dir.path(), WRITE_OUTPUTS);
        let renderer = ChromiumRenderer::new(binary);

        let bytes = renderer
            .render(request(RenderMode::ScreenshotToPdf))
            .await
            .expect("render succeeds");
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_transient() {
        let dir = TempDir::new().expect("temp dir");
        let binary = fake_browser(
            dir.path(),
            "echo 'net::ERR_NAME_NOT_RESOLVED' >&2\nexit 1\n",
        );
        let renderer = ChromiumRenderer::new(binary);

        let err = renderer
            .render(request(RenderMode::PrintToPdf))
            .await
            .expect_err("render fails");
        assert!(err.is_transient(), "expected transient, got {err:?}");
    }

    #[tokio::test]
    async fn empty_output_is_transient() {
        let dir = TempDir::new().expect("temp dir");
        let binary = fake_browser(dir.path(), "exit 0\n");
        let renderer = ChromiumRenderer::new(binary);

        let err = renderer
            .render(request(RenderMode::PrintToPdf))
            .await
            .expect_err("render fails");
        assert!(err.is_transient(), "expected transient, got {err:?}");
    }

    #[tokio::test]
    async fn missing_binary_is_permanent() {
        let renderer = ChromiumRenderer::new(PathBuf::from("/nonexistent/chromium-binary"));

        let err = renderer
            .render(request(RenderMode::PrintToPdf))
            .await
            .expect_err("render fails");
        assert!(!err.is_transient(), "expected permanent, got {err:?}");
    }
}
