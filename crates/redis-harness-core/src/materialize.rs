//! Resource materialization into the scratch directory.
//!
//! The server binary and the config template are copied into a fixed
//! scratch directory before any instance is launched. Copies are skipped when
//! the destination already holds identical content, and an exclusive file
//! lock keeps parallel test processes from racing on the same files.
//!
//! Per-instance config and data files live next to them, named
//! `redis-<port>-<owner pid>-<uuid>.{conf,rdb}` so leftovers from crashed
//! runs can be identified and swept.

use crate::config::{HarnessConfig, HarnessDefaults};
use crate::error::{HarnessError, Result};
use crate::platform::{self, find_on_path, is_process_alive, server_binary_name};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stock template compiled into the library.
pub const EMBEDDED_TEMPLATE: &str = include_str!("../resources/redis.conf");

/// Paths produced by [`ResourceMaterializer::materialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedResources {
    pub server_binary: PathBuf,
    pub config_template: PathBuf,
}

/// Copies the server binary and config template into the scratch directory.
#[derive(Debug, Clone)]
pub struct ResourceMaterializer {
    scratch_dir: PathBuf,
    server_binary: Option<PathBuf>,
    config_template: Option<PathBuf>,
}

impl ResourceMaterializer {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            scratch_dir: config.scratch_dir.clone(),
            server_binary: config.server_binary.clone(),
            config_template: config.config_template.clone(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Locate the server binary to copy.
    ///
    /// An explicitly configured path wins; otherwise `redis-server` is looked
    /// up on `PATH`.
    pub fn resolve_server_binary(&self) -> Result<PathBuf> {
        match &self.server_binary {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(path) => Err(HarnessError::ResourceNotFound {
                resource: "redis server binary".to_string(),
                searched: vec![path.clone()],
            }),
            None => find_on_path(server_binary_name()).ok_or_else(|| {
                HarnessError::ResourceNotFound {
                    resource: format!("{} on PATH", server_binary_name()),
                    searched: std::env::var_os("PATH")
                        .map(|value| std::env::split_paths(&value).collect())
                        .unwrap_or_default(),
                }
            }),
        }
    }

    /// Load the template text, from the configured file or the embedded copy.
    pub fn load_template(&self) -> Result<String> {
        match &self.config_template {
            Some(path) if path.is_file() => {
                fs::read_to_string(path).map_err(|e| HarnessError::io_with_path(e, path))
            }
            Some(path) => Err(HarnessError::ResourceNotFound {
                resource: "redis config template".to_string(),
                searched: vec![path.clone()],
            }),
            None => Ok(EMBEDDED_TEMPLATE.to_string()),
        }
    }

    /// Ensure the scratch directory holds the server binary and template.
    pub fn materialize(&self) -> Result<MaterializedResources> {
        fs::create_dir_all(&self.scratch_dir)
            .map_err(|e| HarnessError::io_with_path(e, &self.scratch_dir))?;

        let source_binary = self.resolve_server_binary()?;
        let template = self.load_template()?;

        let _lock = self.lock_scratch_dir()?;

        let server_binary = self.scratch_dir.join(server_binary_name());
        if same_file(&source_binary, &server_binary) {
            debug!("Server binary already in scratch dir: {}", server_binary.display());
        } else {
            let contents = fs::read(&source_binary)
                .map_err(|e| HarnessError::io_with_path(e, &source_binary))?;
            install_file(&self.scratch_dir, &server_binary, &contents, true)?;
        }

        let config_template = self.scratch_dir.join(HarnessDefaults::TEMPLATE_FILE_NAME);
        install_file(&self.scratch_dir, &config_template, template.as_bytes(), false)?;

        Ok(MaterializedResources {
            server_binary,
            config_template,
        })
    }

    fn lock_scratch_dir(&self) -> Result<File> {
        let lock_path = self.scratch_dir.join(HarnessDefaults::LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| HarnessError::io_with_path(e, &lock_path))?;
        file.lock_exclusive()
            .map_err(|e| HarnessError::io_with_path(e, &lock_path))?;
        Ok(file)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Write `contents` to `dest` unless it already holds exactly that.
///
/// The new content goes to a temp file in `dir` first and is renamed into
/// place, so a server already running from `dest` keeps its inode.
fn install_file(dir: &Path, dest: &Path, contents: &[u8], executable: bool) -> Result<()> {
    if is_up_to_date(dest, contents) {
        debug!("Up to date: {}", dest.display());
        return Ok(());
    }

    let mut staged =
        NamedTempFile::new_in(dir).map_err(|e| HarnessError::io_with_path(e, dir))?;
    staged
        .write_all(contents)
        .and_then(|()| staged.flush())
        .map_err(|e| HarnessError::io_with_path(e, staged.path()))?;
    if executable {
        platform::set_executable(staged.path())?;
    }

    match staged.persist(dest) {
        Ok(_) => {
            info!("Materialized {}", dest.display());
            Ok(())
        }
        // Windows refuses to replace a running executable; keep the old copy.
        Err(e) if dest.exists() => {
            warn!("Could not replace {}: {}; keeping existing copy", dest.display(), e.error);
            Ok(())
        }
        Err(e) => Err(HarnessError::io_with_path(e.error, dest)),
    }
}

fn is_up_to_date(dest: &Path, contents: &[u8]) -> bool {
    let Ok(metadata) = fs::metadata(dest) else {
        return false;
    };
    if metadata.len() != contents.len() as u64 {
        return false;
    }
    fs::read(dest)
        .map(|existing| blake3::hash(&existing) == blake3::hash(contents))
        .unwrap_or(false)
}

/// Config and data file paths reserved for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFiles {
    pub config_path: PathBuf,
    pub data_path: PathBuf,
}

impl InstanceFiles {
    /// Reserve unique file names for an instance on `port`.
    pub fn allocate(scratch_dir: &Path, port: u16) -> Self {
        let stem = format!(
            "{}{}-{}-{}",
            HarnessDefaults::INSTANCE_FILE_PREFIX,
            port,
            std::process::id(),
            Uuid::new_v4()
        );
        Self {
            config_path: scratch_dir.join(format!("{stem}.conf")),
            data_path: scratch_dir.join(format!("{stem}.rdb")),
        }
    }

    /// File name of the data file, as written into the `dbfilename` directive.
    pub fn data_file_name(&self) -> String {
        self.data_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Delete both files, ignoring failures.
    pub fn remove(&self) {
        remove_quietly(&self.config_path);
        remove_quietly(&self.data_path);
    }
}

/// Remove a file, logging instead of failing.
pub(crate) fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Owner pid encoded in an instance file name, if `name` is one.
fn instance_file_owner(name: &str) -> Option<u32> {
    let stem = name
        .strip_suffix(".conf")
        .or_else(|| name.strip_suffix(".rdb"))?;
    let rest = stem.strip_prefix(HarnessDefaults::INSTANCE_FILE_PREFIX)?;
    let mut parts = rest.splitn(3, '-');
    let _port: u16 = parts.next()?.parse().ok()?;
    let pid: u32 = parts.next()?.parse().ok()?;
    Uuid::parse_str(parts.next()?).ok()?;
    Some(pid)
}

/// Delete instance files left behind by harness processes that no longer run.
///
/// Returns the number of files removed.
pub fn sweep_stale_files(scratch_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(scratch_dir) else {
        return 0;
    };
    let current = std::process::id();
    let mut removed = 0;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(owner) = instance_file_owner(&name.to_string_lossy()) else {
            continue;
        };
        if owner == current || is_process_alive(owner) {
            continue;
        }
        if fs::remove_file(entry.path()).is_ok() {
            debug!("Swept stale instance file {}", entry.path().display());
            removed += 1;
        }
    }

    if removed > 0 {
        info!("Swept {} stale instance files from {}", removed, scratch_dir.display());
    }
    removed
}
