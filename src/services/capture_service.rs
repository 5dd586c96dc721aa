//! Photo capture and upload adapters.
//!
//! Capturing never fails from the game's point of view: a missing or broken camera yields an
//! empty placeholder file, and uploads are best effort.

use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use futures::future::BoxFuture;
use time::{OffsetDateTime, macros::format_description};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::{CaptureError, UploadError},
    services::dispatcher::{Dispatcher, GameMessage, TimerTag},
};

/// A captured (or placeholder) photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    /// Handle used by presentation adapters.
    pub id: Uuid,
    /// File holding the image.
    pub path: PathBuf,
    /// The camera failed and the file is an empty stand-in.
    pub placeholder: bool,
}

/// Why a photo was taken; decides whether it is shown right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoPurpose {
    /// Taken on a target hit and displayed immediately.
    Hit,
    /// Taken during the chug and displayed when the ball returns.
    Chug,
}

impl PhotoPurpose {
    /// File name prefix and caption.
    pub fn prefix(self) -> &'static str {
        match self {
            PhotoPurpose::Hit => "hit",
            PhotoPurpose::Chug => "chug",
        }
    }
}

/// Still camera able to write a JPEG to a path.
pub trait Camera: Send + Sync {
    /// Take a picture into `path`.
    fn capture(&self, path: PathBuf) -> BoxFuture<'static, Result<(), CaptureError>>;
}

/// Outbound transfer of captured files.
pub trait Uploader: Send + Sync {
    /// Whether uploads are configured at all.
    fn enabled(&self) -> bool;
    /// Copy `path` to the remote.
    fn upload(&self, path: PathBuf) -> BoxFuture<'static, Result<(), UploadError>>;
}

/// Camera driven through `libcamera-still` or `raspistill`.
#[derive(Debug, Clone)]
pub struct CommandCamera {
    program: PathBuf,
    args: Vec<&'static str>,
}

impl CommandCamera {
    /// Find a camera command on `PATH`, preferring `libcamera-still`.
    pub fn detect() -> Option<Self> {
        let candidates: [(&str, &[&'static str]); 2] = [
            (
                "libcamera-still",
                &[
                    "-n",
                    "--immediate",
                    "--width",
                    "1280",
                    "--height",
                    "720",
                    "-o",
                ],
            ),
            (
                "raspistill",
                &["-n", "-t", "1", "-w", "1280", "-h", "720", "-o"],
            ),
        ];

        candidates.into_iter().find_map(|(name, args)| {
            find_program(name).map(|program| {
                info!(program = %program.display(), "camera command found");
                Self {
                    program,
                    args: args.to_vec(),
                }
            })
        })
    }
}

impl Camera for CommandCamera {
    fn capture(&self, path: PathBuf) -> BoxFuture<'static, Result<(), CaptureError>> {
        let program = self.program.clone();
        let args = self.args.clone();
        Box::pin(async move {
            let command = program.display().to_string();
            let status = tokio::process::Command::new(&program)
                .args(&args)
                .arg(&path)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map_err(|source| CaptureError::Spawn {
                    command: command.clone(),
                    source,
                })?;

            if status.success() {
                Ok(())
            } else {
                Err(CaptureError::Exit {
                    command,
                    status: status.to_string(),
                })
            }
        })
    }
}

/// Camera used when no camera command is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCamera;

impl Camera for NoCamera {
    fn capture(&self, _path: PathBuf) -> BoxFuture<'static, Result<(), CaptureError>> {
        Box::pin(async { Err(CaptureError::NoCamera) })
    }
}

/// Uploads through `rclone copy <file> <remote>`.
#[derive(Debug, Clone)]
pub struct RcloneUploader {
    remote: Option<String>,
}

impl RcloneUploader {
    /// Uploader for `remote`; disabled when no remote is set or rclone is missing.
    pub fn new(remote: Option<String>) -> Self {
        let Some(remote) = remote else {
            info!("RCLONE_REMOTE not set; uploads disabled");
            return Self { remote: None };
        };
        if find_program("rclone").is_none() {
            warn!("rclone command not found; uploads disabled");
            return Self { remote: None };
        }
        info!(%remote, "uploader configured");
        Self {
            remote: Some(remote),
        }
    }

    /// Uploader that never uploads.
    pub fn disabled() -> Self {
        Self { remote: None }
    }
}

impl Uploader for RcloneUploader {
    fn enabled(&self) -> bool {
        self.remote.is_some()
    }

    fn upload(&self, path: PathBuf) -> BoxFuture<'static, Result<(), UploadError>> {
        let remote = self.remote.clone();
        Box::pin(async move {
            let remote = remote.ok_or(UploadError::Disabled)?;
            let status = tokio::process::Command::new("rclone")
                .arg("copy")
                .arg(&path)
                .arg(&remote)
                .stdout(Stdio::null())
                .status()
                .await
                .map_err(UploadError::Spawn)?;
            if status.success() {
                Ok(())
            } else {
                Err(UploadError::Exit(status.to_string()))
            }
        })
    }
}

/// Produces photos in background tasks and reports them back through the dispatcher.
#[derive(Clone)]
pub struct CaptureService {
    inner: Arc<CaptureInner>,
}

struct CaptureInner {
    dir: PathBuf,
    camera: Arc<dyn Camera>,
    uploader: Arc<dyn Uploader>,
}

impl CaptureService {
    /// Service writing into `dir`.
    pub fn new(dir: PathBuf, camera: Arc<dyn Camera>, uploader: Arc<dyn Uploader>) -> Self {
        Self {
            inner: Arc::new(CaptureInner {
                dir,
                camera,
                uploader,
            }),
        }
    }

    /// Detect the camera and uploader and clear captures left by a previous run.
    pub fn from_config(config: &AppConfig) -> Self {
        clear_stale_captures(&config.capture_dir);
        let camera: Arc<dyn Camera> = match CommandCamera::detect() {
            Some(camera) => Arc::new(camera),
            None => {
                warn!("no camera command found; using placeholder images");
                Arc::new(NoCamera)
            }
        };
        let uploader = Arc::new(RcloneUploader::new(config.rclone_remote.clone()));
        Self::new(config.capture_dir.clone(), camera, uploader)
    }

    /// Placeholder-only service, nothing uploaded.
    pub fn placeholder_only(dir: PathBuf) -> Self {
        Self::new(dir, Arc::new(NoCamera), Arc::new(RcloneUploader::disabled()))
    }

    /// Take a photo, falling back to a placeholder.
    pub async fn capture(&self, prefix: &str) -> Photo {
        let id = Uuid::new_v4();
        let path = self.inner.dir.join(capture_file_name(prefix, id));
        if let Err(err) = fs::create_dir_all(&self.inner.dir) {
            warn!(dir = %self.inner.dir.display(), error = %err, "capture directory unavailable");
        }

        match self.inner.camera.capture(path.clone()).await {
            Ok(()) => {
                debug!(path = %path.display(), "photo captured");
                Photo {
                    id,
                    path,
                    placeholder: false,
                }
            }
            Err(err) => {
                match err {
                    CaptureError::NoCamera => debug!(prefix, "no camera; writing placeholder"),
                    err => warn!(prefix, error = %err, "capture failed; writing placeholder"),
                }
                if let Err(err) = write_placeholder(&path) {
                    warn!(error = %err, "placeholder not written");
                }
                Photo {
                    id,
                    path,
                    placeholder: true,
                }
            }
        }
    }

    /// Upload `photo` if uploads are enabled. Failures are logged only.
    pub async fn upload(&self, photo: &Photo) {
        if !self.inner.uploader.enabled() {
            debug!(path = %photo.path.display(), "upload skipped; uploader not configured");
            return;
        }
        match self.inner.uploader.upload(photo.path.clone()).await {
            Ok(()) => info!(path = %photo.path.display(), "photo uploaded"),
            Err(err) => warn!(path = %photo.path.display(), error = %err, "photo upload failed"),
        }
    }

    /// Capture in the background, hand the photo to the game loop, then upload it.
    pub fn spawn_capture(&self, purpose: PhotoPurpose, tag: TimerTag, dispatcher: Dispatcher) {
        let service = self.clone();
        tokio::spawn(async move {
            let photo = service.capture(purpose.prefix()).await;
            dispatcher.deliver(GameMessage::PhotoCaptured {
                purpose,
                tag,
                photo: photo.clone(),
            });
            service.upload(&photo).await;
        });
    }
}

/// `<prefix>_<YYYYmmdd_HHMMSS>_<id>.jpg` in local time, `<id>` being the first eight hex
/// digits of the photo id.
fn capture_file_name(prefix: &str, id: Uuid) -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let stamp = now
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    format!("{prefix}_{stamp}_{:08x}.jpg", id.as_fields().0)
}

fn write_placeholder(path: &Path) -> Result<(), CaptureError> {
    fs::write(path, b"").map_err(|source| CaptureError::Placeholder {
        path: path.to_path_buf(),
        source,
    })
}

/// Remove `.jpg` files left in `dir` by an earlier run.
pub fn clear_stale_captures(dir: &Path) {
    if let Err(err) = fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %err, "cannot create capture directory");
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for path in entries.flatten().map(|entry| entry.path()) {
        let is_jpg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg"));
        if !is_jpg {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed old capture"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove old capture"),
        }
    }
}

fn find_program(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
