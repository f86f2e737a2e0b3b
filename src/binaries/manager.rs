use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use crate::binaries::checksum::checksum_matches;
use crate::binaries::store::VersionStore;
use crate::binaries::{
    BinaryInfo, BinaryState, BinaryStatus, ContainerFormat, ToolPaths, ToolProvisioning, FFMPEG, YTDLP,
};
use crate::downloader::http_pool::ArtifactSource;
use crate::errors::{AppError, Result};

const DOWNLOAD_SHARE: f32 = 0.9;
const VERIFYING_PROGRESS: f32 = 0.9;
const EXTRACTING_PROGRESS: f32 = 0.95;

/// Installs and tracks the external tools in one managed directory.
///
/// At most one install runs per binary name; concurrent callers wait for it
/// and reuse the result.
pub struct BinaryManager {
    binary_dir: PathBuf,
    catalog: Vec<BinaryInfo>,
    source: Arc<dyn ArtifactSource>,
    store: VersionStore,
    states: watch::Sender<BTreeMap<String, BinaryState>>,
    install_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

impl BinaryManager {
    pub async fn new(
        binary_dir: impl Into<PathBuf>,
        catalog: Vec<BinaryInfo>,
        source: Arc<dyn ArtifactSource>,
    ) -> Result<Self> {
        let binary_dir = binary_dir.into();
        tokio::fs::create_dir_all(&binary_dir).await?;
        let store = VersionStore::open(binary_dir.join("versions.json")).await;

        let initial = catalog
            .iter()
            .map(|info| (info.name.clone(), BinaryState::new(info.clone(), BinaryStatus::NotInstalled)))
            .collect();
        let (states, _) = watch::channel(initial);

        let manager = Self {
            binary_dir,
            catalog,
            source,
            store,
            states,
            install_locks: Mutex::new(HashMap::new()),
        };
        manager.check_installed().await;
        Ok(manager)
    }

    pub fn binary_dir(&self) -> &Path {
        &self.binary_dir
    }

    pub fn catalog(&self) -> &[BinaryInfo] {
        &self.catalog
    }

    pub fn binary_path(&self, info: &BinaryInfo) -> PathBuf {
        self.binary_dir.join(info.file_name())
    }

    fn info(&self, name: &str) -> Result<&BinaryInfo> {
        self.catalog
            .iter()
            .find(|info| info.name == name)
            .ok_or_else(|| AppError::NotFound(format!("Unknown binary: {}", name)))
    }

    /// Live per-binary states keyed by name.
    pub fn subscribe(&self) -> watch::Receiver<BTreeMap<String, BinaryState>> {
        self.states.subscribe()
    }

    pub fn states(&self) -> Vec<BinaryState> {
        self.states.borrow().values().cloned().collect()
    }

    fn update_state(&self, name: &str, update: impl FnOnce(&mut BinaryState)) {
        self.states.send_modify(|states| {
            if let Some(state) = states.get_mut(name) {
                update(state);
            }
        });
    }

    fn set_status(&self, name: &str, status: BinaryStatus, progress: f32) {
        self.update_state(name, |state| {
            state.status = status;
            state.progress = progress;
            if status != BinaryStatus::Failed {
                state.error = None;
            }
        });
    }

    fn set_failed(&self, name: &str, message: &str) {
        self.update_state(name, |state| {
            state.status = BinaryStatus::Failed;
            state.progress = 0.0;
            state.error = Some(message.to_string());
        });
    }

    async fn status_of(&self, info: &BinaryInfo) -> (BinaryStatus, Option<String>) {
        let installed_version = self.store.installed_version(&info.name).await;
        let status = if !is_executable(&self.binary_path(info)) {
            BinaryStatus::NotInstalled
        } else {
            match &installed_version {
                Some(version) if version != &info.version => BinaryStatus::UpdateAvailable,
                _ => BinaryStatus::Installed,
            }
        };
        (status, installed_version)
    }

    /// Recomputes every binary's status from disk and the version store.
    /// Never touches the network.
    pub async fn check_installed(&self) -> Vec<BinaryState> {
        for info in &self.catalog {
            let (status, installed_version) = self.status_of(info).await;
            self.update_state(&info.name, |state| {
                if state.status.is_busy() {
                    return;
                }
                state.status = status;
                state.installed_version = installed_version;
                state.progress = if status == BinaryStatus::NotInstalled { 0.0 } else { 1.0 };
                state.error = None;
            });
        }
        self.states()
    }

    async fn install_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.install_locks.lock().await;
        locks.entry(name.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Returns the local path of `name`, installing it on a cache miss.
    pub async fn ensure(&self, name: &str) -> Result<PathBuf> {
        let info = self.info(name)?.clone();
        let lock = self.install_lock(name).await;
        let _guard = lock.lock().await;

        let path = self.binary_path(&info);
        if self.cached_copy_is_valid(&info, &path).await {
            log::debug!("✅ [PROVISION] {} already present at {:?}", info.name, path);
            let (status, installed_version) = self.status_of(&info).await;
            self.update_state(&info.name, |state| {
                state.status = status;
                state.installed_version = installed_version;
                state.progress = 1.0;
                state.error = None;
            });
            return Ok(path);
        }

        self.install(&info).await
    }

    /// Downloads and installs `name` even when a copy is present.
    pub async fn reinstall(&self, name: &str) -> Result<PathBuf> {
        let info = self.info(name)?.clone();
        let lock = self.install_lock(name).await;
        let _guard = lock.lock().await;
        self.install(&info).await
    }

    async fn cached_copy_is_valid(&self, info: &BinaryInfo, path: &Path) -> bool {
        if !is_executable(path) {
            return false;
        }
        // Without a version record the file's origin is unknown; check it
        // against the catalog checksum when one exists.
        let Some(expected) = info.checksum.clone() else { return true };
        if self.store.installed_version(&info.name).await.is_some() {
            return true;
        }

        let algorithm = info.checksum_algorithm;
        let file = path.to_path_buf();
        match tokio::task::spawn_blocking(move || algorithm.digest_file(&file)).await {
            Ok(Ok(actual)) if checksum_matches(&expected, &actual) => true,
            _ => {
                log::warn!("⚠️ [PROVISION] Existing {} failed verification, reinstalling", info.name);
                false
            }
        }
    }

    fn staging_path(&self, info: &BinaryInfo, idx: usize) -> PathBuf {
        self.binary_dir.join(".staging").join(format!("{}-{}.part", info.name, idx))
    }

    fn extracted_path(&self, info: &BinaryInfo) -> PathBuf {
        self.binary_dir.join(format!("{}.new", info.file_name()))
    }

    async fn install(&self, info: &BinaryInfo) -> Result<PathBuf> {
        let guard = InstallGuard {
            manager: self,
            info,
            armed: true,
        };
        let result = self.install_from_mirrors(info).await;
        guard.disarm();
        result
    }

    async fn install_from_mirrors(&self, info: &BinaryInfo) -> Result<PathBuf> {
        tokio::fs::create_dir_all(self.binary_dir.join(".staging")).await?;

        let never_cancel = CancellationToken::new();
        let mut last_error: Option<AppError> = None;

        for (idx, url) in info.urls().enumerate() {
            let staging = self.staging_path(info, idx);
            log::info!("⬇️ [PROVISION] Downloading {} from {} (attempt {})", info.name, url, idx + 1);
            self.set_status(&info.name, BinaryStatus::Downloading, 0.0);

            let size_hint = info.size_hint;
            let name = info.name.clone();
            let on_progress = move |downloaded: u64, total: Option<u64>| {
                let total = total.unwrap_or(size_hint);
                if total == 0 {
                    return;
                }
                let fraction = (downloaded as f32 / total as f32).min(1.0) * DOWNLOAD_SHARE;
                self.update_state(&name, |state| state.progress = fraction);
            };

            match self.source.fetch_to_file(url, &staging, &on_progress, &never_cancel).await {
                Ok(bytes) => {
                    log::info!("✅ [PROVISION] {} bytes for {} from {}", bytes, info.name, url);
                    let result = self.finish_install(info, url, &staging).await;
                    let _ = tokio::fs::remove_file(&staging).await;
                    if let Err(e) = &result {
                        let _ = tokio::fs::remove_file(self.extracted_path(info)).await;
                        self.set_failed(&info.name, &e.to_string());
                    }
                    return result;
                }
                Err(e) if e.is_network() => {
                    log::warn!("⚠️ [PROVISION] {} failed from {}: {}", info.name, url, e);
                    let _ = tokio::fs::remove_file(&staging).await;
                    last_error = Some(e);
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&staging).await;
                    self.set_failed(&info.name, &e.to_string());
                    return Err(e);
                }
            }
        }

        let message = match last_error {
            Some(e) => format!("All download URLs failed for {}: {}", info.display_name, e),
            None => format!("No download URLs configured for {}", info.display_name),
        };
        log::error!("❌ [PROVISION] {}", message);
        self.set_failed(&info.name, &message);
        Err(AppError::Network(message))
    }

    async fn finish_install(&self, info: &BinaryInfo, url: &str, staging: &Path) -> Result<PathBuf> {
        if let Some(expected) = &info.checksum {
            self.set_status(&info.name, BinaryStatus::Verifying, VERIFYING_PROGRESS);
            let algorithm = info.checksum_algorithm;
            let file = staging.to_path_buf();
            let actual = tokio::task::spawn_blocking(move || algorithm.digest_file(&file))
                .await
                .map_err(|e| AppError::InvalidState(format!("Checksum task failed: {}", e)))??;

            if !checksum_matches(expected, &actual) {
                log::error!("❌ [PROVISION] Checksum mismatch for {}", info.name);
                return Err(AppError::Integrity {
                    name: info.name.clone(),
                    expected: expected.to_lowercase(),
                    actual,
                });
            }
        }

        self.set_status(&info.name, BinaryStatus::Extracting, EXTRACTING_PROGRESS);
        let format = ContainerFormat::from_url(url);
        let final_path = self.binary_path(info);
        let extracted = self.extracted_path(info);
        {
            let archive = staging.to_path_buf();
            let member = info.file_name();
            let dest = extracted.clone();
            tokio::task::spawn_blocking(move || format.extract_single_file(&archive, &member, &dest))
                .await
                .map_err(|e| AppError::InvalidState(format!("Extraction task failed: {}", e)))??;
        }

        mark_executable(&extracted)?;
        tokio::fs::rename(&extracted, &final_path).await?;
        self.store.set_installed_version(&info.name, &info.version).await?;

        self.update_state(&info.name, |state| {
            state.status = BinaryStatus::Installed;
            state.installed_version = Some(info.version.clone());
            state.progress = 1.0;
            state.error = None;
        });
        log::info!("🎉 [PROVISION] {} installed at {:?}", info.display_name, final_path);
        Ok(final_path)
    }

    /// Deletes the binary and forgets its version.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let info = self.info(name)?.clone();
        let lock = self.install_lock(name).await;
        let _guard = lock.lock().await;

        let path = self.binary_path(&info);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        self.store.remove(&info.name).await?;
        self.update_state(&info.name, |state| {
            state.status = BinaryStatus::NotInstalled;
            state.installed_version = None;
            state.progress = 0.0;
            state.error = None;
        });
        log::info!("🗑️ [PROVISION] Removed {}", info.display_name);
        Ok(())
    }

    /// Ensures every catalog entry. Required failures abort; optional ones
    /// are logged and left out of the result.
    pub async fn ensure_all(&self) -> Result<BTreeMap<String, PathBuf>> {
        let mut paths = BTreeMap::new();
        for info in &self.catalog {
            match self.ensure(&info.name).await {
                Ok(path) => {
                    paths.insert(info.name.clone(), path);
                }
                Err(e) if info.required => return Err(e),
                Err(e) => {
                    log::warn!("⚠️ [PROVISION] Optional {} unavailable: {}", info.display_name, e);
                }
            }
        }
        Ok(paths)
    }
}

/// Resets a binary whose install future was dropped midway: staging and
/// extraction leftovers are removed and the state leaves the busy statuses,
/// so `check_installed` and later installs can take over.
struct InstallGuard<'a> {
    manager: &'a BinaryManager,
    info: &'a BinaryInfo,
    armed: bool,
}

impl InstallGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InstallGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::warn!("⚠️ [PROVISION] Install of {} was abandoned", self.info.name);
        for idx in 0..self.info.urls().count() {
            let _ = std::fs::remove_file(self.manager.staging_path(self.info, idx));
        }
        let _ = std::fs::remove_file(self.manager.extracted_path(self.info));
        self.manager.update_state(&self.info.name, |state| {
            state.status = BinaryStatus::NotInstalled;
            state.progress = 0.0;
            state.error = None;
        });
    }
}

#[async_trait]
impl ToolProvisioning for BinaryManager {
    async fn ensure_tools(&self) -> Result<ToolPaths> {
        let mut paths = self.ensure_all().await?;
        let fetch_tool = paths
            .remove(YTDLP)
            .ok_or_else(|| AppError::NotFound(format!("{} is not in the binary catalog", YTDLP)))?;
        let transcode_tool = paths
            .remove(FFMPEG)
            .ok_or_else(|| AppError::NotFound(format!("{} is not in the binary catalog", FFMPEG)))?;
        Ok(ToolPaths {
            fetch_tool,
            transcode_tool,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binaries::ChecksumAlgorithm;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves canned bodies per URL and counts requests.
    struct FakeSource {
        bodies: HashMap<String, std::result::Result<Vec<u8>, String>>,
        calls: AtomicUsize,
        requested: std::sync::Mutex<Vec<String>>,
        delay: Duration,
    }

    impl FakeSource {
        fn new(bodies: Vec<(&str, std::result::Result<Vec<u8>, String>)>) -> Self {
            Self {
                bodies: bodies.into_iter().map(|(url, body)| (url.to_string(), body)).collect(),
                calls: AtomicUsize::new(0),
                requested: std::sync::Mutex::new(Vec::new()),
                delay: Duration::from_millis(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl ArtifactSource for FakeSource {
        async fn fetch_to_file(
            &self,
            url: &str,
            dest: &Path,
            on_progress: &(dyn Fn(u64, Option<u64>) + Send + Sync),
            _cancel: &CancellationToken,
        ) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push(url.to_string());
            tokio::fs::write(dest, b"PARTIAL").await?;
            tokio::time::sleep(self.delay).await;
            match self.bodies.get(url) {
                Some(Ok(body)) => {
                    tokio::fs::write(dest, body).await?;
                    on_progress(body.len() as u64, Some(body.len() as u64));
                    Ok(body.len() as u64)
                }
                // Partial bytes stay behind like an interrupted transfer.
                Some(Err(message)) => Err(AppError::Network(message.clone())),
                None => Err(AppError::Network(format!("404 {}", url))),
            }
        }
    }

    fn ok(body: &[u8]) -> std::result::Result<Vec<u8>, String> {
        Ok(body.to_vec())
    }

    fn fail(message: &str) -> std::result::Result<Vec<u8>, String> {
        Err(message.to_string())
    }

    fn tool(name: &str, primary: &str, mirrors: &[&str]) -> BinaryInfo {
        BinaryInfo {
            name: name.to_string(),
            display_name: name.to_string(),
            description: String::new(),
            version: "1.0".to_string(),
            required: true,
            download_url: primary.to_string(),
            alternative_urls: mirrors.iter().map(|m| m.to_string()).collect(),
            checksum: None,
            checksum_algorithm: ChecksumAlgorithm::Sha256,
            size_hint: 0,
            architecture: "x86_64".to_string(),
        }
    }

    async fn manager_with(
        dir: &Path,
        catalog: Vec<BinaryInfo>,
        source: Arc<FakeSource>,
    ) -> BinaryManager {
        BinaryManager::new(dir.join("bin"), catalog, source).await.unwrap()
    }

    #[tokio::test]
    async fn mirror_fallback_installs_only_the_successful_body() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(vec![
            ("https://primary/yt-dlp", fail("connection reset")),
            ("https://mirror/yt-dlp", ok(b"#!/bin/sh\necho mirror\n")),
        ]));
        let info = tool("yt-dlp", "https://primary/yt-dlp", &["https://mirror/yt-dlp", "https://unused/yt-dlp"]);
        let manager = manager_with(dir.path(), vec![info], source.clone()).await;

        let path = manager.ensure("yt-dlp").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"#!/bin/sh\necho mirror\n");
        assert!(is_executable(&path));
        assert_eq!(
            *source.requested.lock().unwrap(),
            vec!["https://primary/yt-dlp".to_string(), "https://mirror/yt-dlp".to_string()]
        );
        let state = &manager.states()[0];
        assert_eq!(state.status, BinaryStatus::Installed);
        assert_eq!(state.installed_version.as_deref(), Some("1.0"));
        assert!(!dir.path().join("bin/.staging/yt-dlp-0.part").exists());
    }

    #[tokio::test]
    async fn exhausting_all_urls_fails_with_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(vec![]));
        let info = tool("ffmpeg", "https://a/ffmpeg", &["https://b/ffmpeg"]);
        let manager = manager_with(dir.path(), vec![info], source.clone()).await;

        let err = manager.ensure("ffmpeg").await.unwrap_err();
        assert!(matches!(err, AppError::Network(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.states()[0].status, BinaryStatus::Failed);
        assert!(!manager.binary_path(&manager.catalog()[0]).exists());
    }

    #[tokio::test]
    async fn checksum_mismatch_is_an_integrity_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(vec![("https://a/ffmpeg", ok(b"tampered"))]));
        let mut info = tool("ffmpeg", "https://a/ffmpeg", &[]);
        info.checksum = Some("E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855".to_string());
        let manager = manager_with(dir.path(), vec![info], source).await;

        let err = manager.ensure("ffmpeg").await.unwrap_err();
        assert!(matches!(err, AppError::Integrity { .. }));
        let state = &manager.states()[0];
        assert_eq!(state.status, BinaryStatus::Failed);
        assert!(!manager.binary_path(&state.info).exists());
        assert!(!dir.path().join("bin/.staging/ffmpeg-0.part").exists());
    }

    #[tokio::test]
    async fn matching_checksum_is_accepted_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(vec![("https://a/tool", ok(b"hello\n"))]));
        let mut info = tool("tool", "https://a/tool", &[]);
        info.checksum = Some("5891B5B522D5DF086D0FF0B110FBD9D21BB4FC7163AF34D08286A2E846F6BE03".to_string());
        let manager = manager_with(dir.path(), vec![info], source).await;

        assert!(manager.ensure("tool").await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_ensure_downloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(
            FakeSource::new(vec![("https://a/yt-dlp", ok(b"bin"))]).with_delay(Duration::from_millis(100)),
        );
        let manager = Arc::new(
            manager_with(dir.path(), vec![tool("yt-dlp", "https://a/yt-dlp", &[])], source.clone()).await,
        );

        let (a, b) = tokio::join!(manager.ensure("yt-dlp"), manager.ensure("yt-dlp"));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_install_is_reset_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(
            FakeSource::new(vec![("https://a/yt-dlp", ok(b"bin"))]).with_delay(Duration::from_secs(60)),
        );
        let manager = manager_with(dir.path(), vec![tool("yt-dlp", "https://a/yt-dlp", &[])], source.clone()).await;

        let abandoned = tokio::time::timeout(Duration::from_millis(200), manager.ensure("yt-dlp")).await;
        assert!(abandoned.is_err());

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("bin/.staging/yt-dlp-0.part").exists());
        let state = &manager.check_installed().await[0];
        assert_eq!(state.status, BinaryStatus::NotInstalled);
        assert!(!state.status.is_busy());
    }

    #[tokio::test]
    async fn present_binary_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(vec![("https://a/ffmpeg", ok(b"bin"))]));
        let manager = manager_with(dir.path(), vec![tool("ffmpeg", "https://a/ffmpeg", &[])], source.clone()).await;

        manager.ensure("ffmpeg").await.unwrap();
        manager.ensure("ffmpeg").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn check_installed_reports_versions() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(vec![("https://a/ffmpeg", ok(b"bin"))]));
        let catalog = vec![tool("ffmpeg", "https://a/ffmpeg", &[]), tool("yt-dlp", "https://a/yt-dlp", &[])];
        let manager = manager_with(dir.path(), catalog.clone(), source.clone()).await;
        manager.ensure("ffmpeg").await.unwrap();
        drop(manager);

        let mut newer = catalog;
        newer[0].version = "2.0".to_string();
        let manager = manager_with(dir.path(), newer, source).await;
        let states: BTreeMap<String, BinaryStatus> = manager
            .check_installed()
            .await
            .into_iter()
            .map(|s| (s.info.name.clone(), s.status))
            .collect();
        assert_eq!(states["ffmpeg"], BinaryStatus::UpdateAvailable);
        assert_eq!(states["yt-dlp"], BinaryStatus::NotInstalled);
    }

    #[tokio::test]
    async fn remove_deletes_file_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(vec![("https://a/ffmpeg", ok(b"bin"))]));
        let manager = manager_with(dir.path(), vec![tool("ffmpeg", "https://a/ffmpeg", &[])], source).await;
        let path = manager.ensure("ffmpeg").await.unwrap();

        manager.remove("ffmpeg").await.unwrap();
        assert!(!path.exists());
        assert_eq!(manager.states()[0].status, BinaryStatus::NotInstalled);
        assert!(manager.remove("nope").await.is_err());
    }

    #[tokio::test]
    async fn optional_failure_does_not_block_tools() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(vec![
            ("https://a/yt-dlp", ok(b"y")),
            ("https://a/ffmpeg", ok(b"f")),
        ]));
        let mut extra = tool("ffprobe", "https://a/ffprobe", &[]);
        extra.required = false;
        let catalog = vec![
            tool("yt-dlp", "https://a/yt-dlp", &[]),
            tool("ffmpeg", "https://a/ffmpeg", &[]),
            extra,
        ];
        let manager = manager_with(dir.path(), catalog, source).await;

        let tools = manager.ensure_tools().await.unwrap();
        assert!(tools.fetch_tool.ends_with(format!("yt-dlp{}", std::env::consts::EXE_SUFFIX)));
        let states = manager.states();
        let extra_state = states.iter().find(|s| s.info.name == "ffprobe").unwrap();
        assert_eq!(extra_state.status, BinaryStatus::Failed);
    }

    #[tokio::test]
    async fn required_failure_aborts_tools() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(vec![("https://a/yt-dlp", ok(b"y"))]));
        let catalog = vec![
            tool("yt-dlp", "https://a/yt-dlp", &[]),
            tool("ffmpeg", "https://a/ffmpeg", &[]),
        ];
        let manager = manager_with(dir.path(), catalog, source).await;
        assert!(manager.ensure_tools().await.is_err());
    }
}
