//! Password-protected archiving of encrypted containers (`.ctz`, `.ctx`).

use crate::{CherryTreeError, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

/// Exit status and error output of one archiver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub code: i32,
    pub stderr: String,
}

impl ArchiveOutcome {
    pub fn success() -> Self {
        Self {
            code: 0,
            stderr: String::new(),
        }
    }

    /// Converts a non-zero exit into [`CherryTreeError::ArchiveTool`].
    pub fn into_result(self) -> Result<()> {
        if self.code == 0 {
            return Ok(());
        }
        Err(CherryTreeError::ArchiveTool {
            code: self.code,
            stderr: self.stderr,
        })
    }
}

/// An external collaborator that packs a single file into a password-protected archive.
pub trait Archiver {
    /// Extracts the file stored in `archive` into `out_dir`.
    fn extract(&self, archive: &Path, password: &str, out_dir: &Path) -> Result<ArchiveOutcome>;

    /// Packs `input` into a new archive at `output`.
    fn archive(&self, input: &Path, password: &str, output: &Path) -> Result<ArchiveOutcome>;
}

/// Runs the p7zip `7za` binary.
#[derive(Debug, Clone)]
pub struct SevenZipArchiver {
    program: PathBuf,
    threads: usize,
    timeout: Option<Duration>,
}

impl Default for SevenZipArchiver {
    fn default() -> Self {
        Self {
            program: PathBuf::from("7za"),
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            timeout: None,
        }
    }
}

impl SevenZipArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Kills the process and reports failure when it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn run(&self, args: &[String]) -> Result<ArchiveOutcome> {
        log::debug!("running {} {}", self.program.display(), args.first().map(String::as_str).unwrap_or(""));
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let out_reader = std::thread::spawn(move || {
            let mut text = String::new();
            if let Some(pipe) = stdout.as_mut() {
                let _ = pipe.read_to_string(&mut text);
            }
            text
        });
        let err_reader = std::thread::spawn(move || {
            let mut text = String::new();
            if let Some(pipe) = stderr.as_mut() {
                let _ = pipe.read_to_string(&mut text);
            }
            text
        });

        let status = match self.timeout {
            None => Some(child.wait()?),
            Some(limit) => {
                let started = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break Some(status);
                    }
                    if started.elapsed() >= limit {
                        log::error!("{} timed out after {limit:?}", self.program.display());
                        child.kill()?;
                        child.wait()?;
                        break None;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        };

        let out_text = out_reader.join().unwrap_or_default();
        let err_text = err_reader.join().unwrap_or_default();
        let combined = [err_text.trim(), out_text.trim()]
            .into_iter()
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(match status {
            Some(status) => ArchiveOutcome {
                code: status.code().unwrap_or(-1),
                stderr: combined,
            },
            None => ArchiveOutcome {
                code: -1,
                stderr: "archiver timed out".to_string(),
            },
        })
    }
}

impl Archiver for SevenZipArchiver {
    fn extract(&self, archive: &Path, password: &str, out_dir: &Path) -> Result<ArchiveOutcome> {
        let args = vec![
            "e".to_string(),
            format!("-p{password}"),
            format!("-w{}", out_dir.display()),
            "-bd".to_string(),
            "-bso0".to_string(),
            "-bsp0".to_string(),
            "-bse1".to_string(),
            "-y".to_string(),
            format!("-o{}", out_dir.display()),
            archive.display().to_string(),
        ];
        self.run(&args)
    }

    fn archive(&self, input: &Path, password: &str, output: &Path) -> Result<ArchiveOutcome> {
        let work_dir = output.parent().unwrap_or_else(|| Path::new("."));
        let args = vec![
            "a".to_string(),
            format!("-p{password}"),
            format!("-w{}", work_dir.display()),
            "-t7z".to_string(),
            "-m0=LZMA2:d64k:fb32".to_string(),
            "-ms=8m".to_string(),
            format!("-mmt={}", self.threads),
            "-mx=1".to_string(),
            "-bd".to_string(),
            "-bso0".to_string(),
            "-bsp0".to_string(),
            "-y".to_string(),
            "--".to_string(),
            output.display().to_string(),
            input.display().to_string(),
        ];
        self.run(&args)
    }
}

/// In-process AES-256 zip archiver; needs no external binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipAesArchiver;

impl ZipAesArchiver {
    fn try_extract(archive: &Path, password: &str, out_dir: &Path) -> Result<()> {
        let mut zip = ZipArchive::new(std::fs::File::open(archive)?)?;
        for index in 0..zip.len() {
            let mut entry = zip.by_index_decrypt(index, password.as_bytes())?;
            if entry.is_dir() {
                continue;
            }
            let Some(name) = entry
                .enclosed_name()
                .and_then(|p| p.file_name().map(|n| n.to_os_string()))
            else {
                log::warn!("skipping archive entry with unsafe name {:?}", entry.name());
                continue;
            };
            let mut out = std::fs::File::create(out_dir.join(name))?;
            std::io::copy(&mut entry, &mut out)?;
        }
        Ok(())
    }

    fn try_archive(input: &Path, password: &str, output: &Path) -> Result<()> {
        let name = input
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CherryTreeError::InvalidDocument(format!("bad file name {}", input.display())))?
            .to_string();
        let bytes = std::fs::read(input)?;
        let mut zip = ZipWriter::new(std::fs::File::create(output)?);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .with_aes_encryption(AesMode::Aes256, password);
        zip.start_file(name, options)?;
        zip.write_all(&bytes)?;
        zip.finish()?;
        Ok(())
    }
}

fn outcome_of(result: Result<()>) -> Result<ArchiveOutcome> {
    match result {
        Ok(()) => Ok(ArchiveOutcome::success()),
        Err(CherryTreeError::Zip(e)) => Ok(ArchiveOutcome {
            code: 2,
            stderr: e.to_string(),
        }),
        Err(e) => Err(e),
    }
}

impl Archiver for ZipAesArchiver {
    fn extract(&self, archive: &Path, password: &str, out_dir: &Path) -> Result<ArchiveOutcome> {
        outcome_of(Self::try_extract(archive, password, out_dir))
    }

    fn archive(&self, input: &Path, password: &str, output: &Path) -> Result<ArchiveOutcome> {
        outcome_of(Self::try_archive(input, password, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_zip_aes_round_trip() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("doc.ctb");
        std::fs::write(&input, b"payload bytes").unwrap();
        let archive = dir.path().join("doc.ctx");
        let outcome = ZipAesArchiver.archive(&input, "s3cret", &archive).unwrap();
        assert_eq!(outcome, ArchiveOutcome::success());

        let out = TempDir::new().unwrap();
        ZipAesArchiver
            .extract(&archive, "s3cret", out.path())
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(std::fs::read(out.path().join("doc.ctb")).unwrap(), b"payload bytes");
    }

    #[test]
    fn test_zip_aes_wrong_password() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("doc.ctd");
        std::fs::write(&input, b"<cherrytree/>").unwrap();
        let archive = dir.path().join("doc.ctz");
        ZipAesArchiver.archive(&input, "right", &archive).unwrap();

        let out = TempDir::new().unwrap();
        let outcome = ZipAesArchiver.extract(&archive, "wrong", out.path()).unwrap();
        assert_ne!(outcome.code, 0);
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.user_message(), "Wrong password or corrupt archive");
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let dir = TempDir::new().unwrap();
        let archiver = SevenZipArchiver::new().with_program(dir.path().join("no-such-7za"));
        let err = archiver
            .archive(&dir.path().join("a"), "pw", &dir.path().join("b"))
            .unwrap_err();
        assert!(matches!(err, CherryTreeError::Io(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_and_timeout() {
        let dir = TempDir::new().unwrap();
        let failing = SevenZipArchiver::new().with_program("false");
        let outcome = failing
            .archive(&dir.path().join("a"), "pw", &dir.path().join("b"))
            .unwrap();
        assert_eq!(outcome.code, 1);

        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 5\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let slow = SevenZipArchiver::new()
            .with_program(&script)
            .with_timeout(Duration::from_millis(200));
        let outcome = slow
            .extract(&dir.path().join("a"), "pw", dir.path())
            .unwrap();
        assert_eq!(outcome.code, -1);
    }
}
