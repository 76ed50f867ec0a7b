use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use zip::ZipArchive;

use crate::cache;
use crate::cdm::Cdm;
use crate::error::{Error, Result};
use crate::fallback::{Failure, Strategy, first_success};
use crate::http::HttpClient;
use crate::uri::Uri;
use crate::wvd;

pub const WVD_FILE: &str = "wvd";
pub const CLIENT_ID_FILE: &str = "client_id";
pub const PRIVATE_KEY_FILE: &str = "client_private_key";
pub const ZIP_FILE: &str = "wvd.zip";
pub const ZIP_MD5_FILE: &str = "wvd.zip.md5";

/**
    Widevine device material, either as a composed WVD container or as the
    raw client id blob and private key it is composed from.
*/
#[derive(Clone, PartialEq, Eq)]
pub enum DeviceIdentity {
    Wvd(Vec<u8>),
    Raw {
        client_id: Vec<u8>,
        private_key: Vec<u8>,
    },
}

impl DeviceIdentity {
    /**
        The identity as a WVD container. Raw parts are composed, which
        validates them with the CDM.
    */
    pub fn to_wvd(&self, cdm: &dyn Cdm) -> Result<Vec<u8>> {
        match self {
            DeviceIdentity::Wvd(bytes) => Ok(bytes.clone()),
            DeviceIdentity::Raw {
                client_id,
                private_key,
            } => compose(cdm, client_id, private_key),
        }
    }

    /// Split into `(client_id, private_key)`.
    pub fn into_raw(self) -> Result<(Vec<u8>, Vec<u8>)> {
        match self {
            DeviceIdentity::Wvd(bytes) => {
                let parts = wvd::decode(&bytes)?;
                Ok((parts.client_id, parts.private_key))
            }
            DeviceIdentity::Raw {
                client_id,
                private_key,
            } => Ok((client_id, private_key)),
        }
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceIdentity::Wvd(bytes) => write!(f, "Wvd(<{} bytes>)", bytes.len()),
            DeviceIdentity::Raw {
                client_id,
                private_key,
            } => write!(
                f,
                "Raw(client_id: <{} bytes>, private_key: <{} bytes>)",
                client_id.len(),
                private_key.len()
            ),
        }
    }
}

/**
    Compose a WVD container from a client id blob and a private key (PEM or
    DER), and check that the CDM accepts it.
*/
pub fn compose(cdm: &dyn Cdm, client_id: &[u8], private_key: &[u8]) -> Result<Vec<u8>> {
    let private_key = cdm.private_key_der(private_key)?;
    let bytes = wvd::encode(client_id, &private_key)?;
    cdm.check_device(&bytes)?;
    Ok(bytes)
}

/// Check that the CDM can build a device from `bytes`.
pub fn validate(cdm: &dyn Cdm, bytes: &[u8]) -> Result<()> {
    cdm.check_device(bytes)
}

/**
    Device sources as written in the configuration file.
*/
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSources {
    /// Comma-separated mirror list of WVD containers; one is picked at random.
    pub wvd_uri: Option<String>,
    /// Zip bundle of WVD containers; one entry is picked at random.
    pub wvd_zip_uri: Option<String>,
    /// Published MD5 of the bundle, compared with the cached copy's.
    pub wvd_zip_md5_uri: Option<String>,
    pub client_id_uri: Option<String>,
    pub private_key_uri: Option<String>,
    pub prefer_cache: bool,
}

/**
    Where a device may be loaded from, highest priority first.
*/
#[derive(Clone, Default)]
pub struct DeviceOptions {
    pub wvd: Option<Vec<u8>>,
    /// `(client_id, private_key)`
    pub raw: Option<(Vec<u8>, Vec<u8>)>,
    pub wvd_uri: Option<String>,
    pub wvd_zip_uri: Option<Uri>,
    pub wvd_zip_md5_uri: Option<Uri>,
    pub client_id_uri: Option<Uri>,
    pub private_key_uri: Option<Uri>,
    /// Try the local cache before everything else.
    pub prefer_cache: bool,
}

impl From<&DeviceSources> for DeviceOptions {
    fn from(sources: &DeviceSources) -> Self {
        let uri = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Uri::parse)
        };
        Self {
            wvd: None,
            raw: None,
            wvd_uri: sources.wvd_uri.clone().filter(|s| !s.trim().is_empty()),
            wvd_zip_uri: uri(&sources.wvd_zip_uri),
            wvd_zip_md5_uri: uri(&sources.wvd_zip_md5_uri),
            client_id_uri: uri(&sources.client_id_uri),
            private_key_uri: uri(&sources.private_key_uri),
            prefer_cache: sources.prefer_cache,
        }
    }
}

impl fmt::Debug for DeviceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceOptions")
            .field("wvd", &self.wvd.as_ref().map(Vec::len))
            .field("raw", &self.raw.is_some())
            .field("wvd_uri", &self.wvd_uri)
            .field("wvd_zip_uri", &self.wvd_zip_uri.as_ref().map(Uri::describe))
            .field("client_id_uri", &self.client_id_uri.as_ref().map(Uri::describe))
            .field("private_key_uri", &self.private_key_uri.as_ref().map(Uri::describe))
            .field("prefer_cache", &self.prefer_cache)
            .finish()
    }
}

/**
    A validated device, ready to open CDM sessions.
*/
#[derive(Clone)]
pub struct Device {
    wvd: Vec<u8>,
    source: &'static str,
}

impl Device {
    pub fn wvd(&self) -> &[u8] {
        &self.wvd
    }

    /// Name of the option the device was loaded from.
    pub fn source(&self) -> &'static str {
        self.source
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("wvd", &format_args!("<{} bytes>", self.wvd.len()))
            .field("source", &self.source)
            .finish()
    }
}

const SOURCE_CACHE: &str = "cache";

/**
    Loads the device identity once per process and keeps a copy on disk.
*/
pub struct DeviceStore {
    http: HttpClient,
    cdm: Arc<dyn Cdm>,
    cache_dir: PathBuf,
    options: DeviceOptions,
    device: OnceCell<Arc<Device>>,
}

impl DeviceStore {
    pub fn new(
        http: HttpClient,
        cdm: Arc<dyn Cdm>,
        cache_dir: impl Into<PathBuf>,
        options: DeviceOptions,
    ) -> Self {
        Self {
            http,
            cdm,
            cache_dir: cache_dir.into(),
            options,
            device: OnceCell::new(),
        }
    }

    pub fn cdm(&self) -> &Arc<dyn Cdm> {
        &self.cdm
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /**
        Whether a device could be loaded at all: an option is configured,
        the cache holds a device, or one is already loaded.
    */
    pub fn has_source(&self) -> bool {
        let options = &self.options;
        let cached = |name: &str| self.cache_dir.join(name).is_file();
        self.device.initialized()
            || options.wvd.is_some()
            || options.raw.is_some()
            || options.wvd_uri.is_some()
            || options.wvd_zip_uri.is_some()
            || (options.client_id_uri.is_some() && options.private_key_uri.is_some())
            || cached(WVD_FILE)
            || (cached(CLIENT_ID_FILE) && cached(PRIVATE_KEY_FILE))
    }

    /**
        The process-wide device, loaded on first use. A failed load is not
        remembered, so a later call tries again.
    */
    pub async fn get(&self) -> Result<Arc<Device>> {
        self.device
            .get_or_try_init(|| async { self.load().await.map(Arc::new) })
            .await
            .cloned()
    }

    /**
        Load a device, trying in order: the in-memory container, raw bytes,
        a WVD mirror, a zipped WVD bundle, the raw client id/private key URIs
        and finally the
        local cache (first with `prefer_cache`). The first device the CDM
        accepts wins and is persisted unless it came from the cache.
    */
    pub async fn load(&self) -> Result<Device> {
        let options = &self.options;
        let mut strategies = Vec::new();

        if options.prefer_cache {
            strategies.push(Strategy::new(SOURCE_CACHE, self.from_cache()));
        }
        if let Some(bytes) = &options.wvd {
            strategies.push(Strategy::new("wvd", self.accept(DeviceIdentity::Wvd(bytes.clone()))));
        }
        if let Some((client_id, private_key)) = &options.raw {
            let identity = DeviceIdentity::Raw {
                client_id: client_id.clone(),
                private_key: private_key.clone(),
            };
            strategies.push(Strategy::new("raw", self.accept(identity)));
        }
        if let Some(list) = &options.wvd_uri {
            strategies.push(Strategy::new("wvd_uri", self.from_mirror(list)));
        }
        if let Some(bundle) = &options.wvd_zip_uri {
            let md5 = options.wvd_zip_md5_uri.as_ref();
            strategies.push(Strategy::new("wvd_zip", self.from_zip(bundle, md5)));
        }
        if let (Some(client_id), Some(private_key)) =
            (&options.client_id_uri, &options.private_key_uri)
        {
            strategies.push(Strategy::new("raw_uri", self.from_raw_uris(client_id, private_key)));
        }
        if !options.prefer_cache {
            strategies.push(Strategy::new(SOURCE_CACHE, self.from_cache()));
        }

        let (source, (identity, bytes)) =
            first_success(strategies)
                .await
                .map_err(|failure| match failure {
                    Failure::Cancelled => Error::Cancelled,
                    exhausted => Error::DeviceUnavailable(exhausted.summary()),
                })?;

        if source != SOURCE_CACHE {
            if let Err(e) = self.persist(&identity, &bytes) {
                tracing::warn!(dir = %self.cache_dir.display(), error = %e, "failed to cache device");
            }
        }

        tracing::info!(source, "device identity loaded");
        Ok(Device { wvd: bytes, source })
    }

    async fn accept(&self, identity: DeviceIdentity) -> Result<(DeviceIdentity, Vec<u8>)> {
        let bytes = identity.to_wvd(self.cdm.as_ref())?;
        // Composing already ran the check for raw parts.
        if matches!(identity, DeviceIdentity::Wvd(_)) {
            validate(self.cdm.as_ref(), &bytes)?;
        }
        Ok((identity, bytes))
    }

    async fn from_mirror(&self, list: &str) -> Result<(DeviceIdentity, Vec<u8>)> {
        let uri = Uri::pick_mirror(list)
            .ok_or_else(|| Error::DeviceUnavailable("WVD mirror list is empty".to_string()))?;
        tracing::debug!(uri = %uri.describe(), "fetching WVD");
        let bytes = uri.read(&self.http).await.map_err(Error::DeviceUnavailable)?;
        self.accept(DeviceIdentity::Wvd(bytes)).await
    }

    async fn from_raw_uris(
        &self,
        client_id: &Uri,
        private_key: &Uri,
    ) -> Result<(DeviceIdentity, Vec<u8>)> {
        let (client_id, private_key) =
            tokio::join!(client_id.read(&self.http), private_key.read(&self.http));
        let client_id = client_id.map_err(|e| self.read_error("client id", e))?;
        let private_key = private_key.map_err(|e| self.read_error("private key", e))?;
        self.accept(DeviceIdentity::Raw {
            client_id,
            private_key,
        })
        .await
    }

    fn read_error(&self, what: &str, message: String) -> Error {
        if self.http.cancellation().is_cancelled() {
            Error::Cancelled
        } else {
            Error::DeviceUnavailable(format!("{what}: {message}"))
        }
    }

    /**
        Pick a device from a zipped bundle.

        The cached `wvd.zip` is reused while its recorded MD5 matches the
        published one; otherwise the bundle is downloaded again and cached
        with the new MD5. Without an MD5 source the bundle is always fetched.
    */
    async fn from_zip(&self, bundle: &Uri, md5: Option<&Uri>) -> Result<(DeviceIdentity, Vec<u8>)> {
        let local = self.cache_dir.join(ZIP_FILE);
        let local_md5 = self.cache_dir.join(ZIP_MD5_FILE);

        let latest_md5 = match md5 {
            Some(uri) => match uri.read(&self.http).await {
                Ok(data) => Some(String::from_utf8_lossy(&data).trim().to_string()),
                Err(e) => {
                    tracing::warn!(uri = %uri.describe(), error = %e, "failed to read bundle MD5");
                    None
                }
            },
            None => None,
        };

        if let Some(latest) = &latest_md5 {
            let cached_md5 = cache::read(&local_md5)?
                .map(|d| String::from_utf8_lossy(&d).trim().to_string());
            if cached_md5.is_some_and(|c| c.eq_ignore_ascii_case(latest)) {
                if let Some(data) = cache::read(&local)? {
                    match select_from_zip(&data) {
                        Ok(bytes) => return self.accept(DeviceIdentity::Wvd(bytes)).await,
                        Err(e) => tracing::warn!(error = %e, "cached WVD bundle unusable"),
                    }
                }
            }
        }

        tracing::debug!(uri = %bundle.describe(), "fetching WVD bundle");
        let data = bundle
            .read(&self.http)
            .await
            .map_err(|e| self.read_error("WVD bundle", e))?;
        let device = self.accept(DeviceIdentity::Wvd(select_from_zip(&data)?)).await?;

        let persisted = cache::write_atomic(&local, &data).and_then(|()| match &latest_md5 {
            Some(md5) => cache::write_atomic(&local_md5, md5.as_bytes()),
            None => Ok(()),
        });
        if let Err(e) = persisted {
            tracing::warn!(dir = %self.cache_dir.display(), error = %e, "failed to cache WVD bundle");
        }
        Ok(device)
    }

    /// Cached container first, then the cached raw pair.
    async fn from_cache(&self) -> Result<(DeviceIdentity, Vec<u8>)> {
        let read = |name: &str| {
            let path = self.cache_dir.join(name);
            cache::read(&path).map(|data| data.filter(|d| !d.is_empty()))
        };

        let identity = if let Some(bytes) = read(WVD_FILE)? {
            DeviceIdentity::Wvd(bytes)
        } else {
            match (read(CLIENT_ID_FILE)?, read(PRIVATE_KEY_FILE)?) {
                (Some(client_id), Some(private_key)) => DeviceIdentity::Raw {
                    client_id,
                    private_key,
                },
                _ => {
                    return Err(Error::DeviceUnavailable(format!(
                        "no cached device in {}",
                        self.cache_dir.display()
                    )));
                }
            }
        };
        self.accept(identity).await
    }

    /// Writes the container, plus the raw pair when loaded from raw parts.
    fn persist(&self, identity: &DeviceIdentity, bytes: &[u8]) -> Result<()> {
        cache::write_atomic(&self.cache_dir.join(WVD_FILE), bytes)?;
        if let DeviceIdentity::Raw {
            client_id,
            private_key,
        } = identity
        {
            cache::write_atomic(&self.cache_dir.join(CLIENT_ID_FILE), client_id)?;
            cache::write_atomic(&self.cache_dir.join(PRIVATE_KEY_FILE), private_key)?;
        }
        Ok(())
    }
}

/// Contents of one file of a zip bundle, chosen at random.
fn select_from_zip(data: &[u8]) -> Result<Vec<u8>> {
    let invalid = |e: zip::result::ZipError| Error::DeviceUnavailable(format!("invalid WVD bundle: {e}"));

    let mut archive = ZipArchive::new(Cursor::new(data)).map_err(invalid)?;
    let files: Vec<usize> = (0..archive.len())
        .filter(|&i| archive.by_index(i).is_ok_and(|f| !f.is_dir()))
        .collect();
    let &index = files
        .choose(&mut rand::rng())
        .ok_or_else(|| Error::DeviceUnavailable("WVD bundle has no files".to_string()))?;

    let mut file = archive.by_index(index).map_err(invalid)?;
    let mut wvd = Vec::new();
    file.read_to_end(&mut wvd)?;
    Ok(wvd)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cdm::CdmSession;

    /// Accepts any well-formed container whose private key is not `bad`.
    #[derive(Default)]
    struct FramingCdm {
        checks: AtomicUsize,
    }

    impl Cdm for FramingCdm {
        fn private_key_der(&self, private_key: &[u8]) -> Result<Vec<u8>> {
            Ok(private_key.to_vec())
        }

        fn check_device(&self, bytes: &[u8]) -> Result<()> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            let parts = wvd::decode(bytes)?;
            if parts.private_key == b"bad" {
                return Err(Error::DeviceUnavailable("bad key".into()));
            }
            Ok(())
        }

        fn service_certificate_request(&self) -> Vec<u8> {
            Vec::new()
        }

        fn open(&self, _wvd: &[u8]) -> Result<Box<dyn CdmSession>> {
            Err(Error::DeviceUnavailable("no sessions".into()))
        }
    }

    fn store(dir: &Path, options: DeviceOptions) -> DeviceStore {
        let http = HttpClient::new(&crate::Config::default()).unwrap();
        http.cancellation().cancel();
        DeviceStore::new(http, Arc::new(FramingCdm::default()), dir, options)
    }

    #[test]
    fn compose_then_split() {
        let cdm = FramingCdm::default();
        let bytes = compose(&cdm, b"client", b"key").unwrap();
        let (client_id, private_key) = DeviceIdentity::Wvd(bytes.clone()).into_raw().unwrap();
        assert_eq!(client_id, b"client");
        assert_eq!(private_key, b"key");
        assert_eq!(compose(&cdm, &client_id, &private_key).unwrap(), bytes);
        assert!(compose(&cdm, b"client", b"bad").is_err());
    }

    #[tokio::test]
    async fn raw_bytes_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let options = DeviceOptions {
            raw: Some((b"client".to_vec(), b"key".to_vec())),
            ..Default::default()
        };
        let device = store(dir.path(), options).load().await.unwrap();
        assert_eq!(device.source(), "raw");
        assert_eq!(
            std::fs::read(dir.path().join(WVD_FILE)).unwrap(),
            device.wvd()
        );
        assert_eq!(std::fs::read(dir.path().join(CLIENT_ID_FILE)).unwrap(), b"client");
        assert_eq!(std::fs::read(dir.path().join(PRIVATE_KEY_FILE)).unwrap(), b"key");
    }

    #[tokio::test]
    async fn rejected_option_falls_through_to_next() {
        let dir = tempfile::tempdir().unwrap();
        let options = DeviceOptions {
            wvd: Some(wvd::encode(b"client", b"bad").unwrap()),
            raw: Some((b"client".to_vec(), b"good".to_vec())),
            ..Default::default()
        };
        let device = store(dir.path(), options).load().await.unwrap();
        assert_eq!(device.source(), "raw");
    }

    #[tokio::test]
    async fn cache_is_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        let cached = wvd::encode(b"cached", b"key").unwrap();
        std::fs::write(dir.path().join(WVD_FILE), &cached).unwrap();

        let options = DeviceOptions {
            wvd: Some(b"garbage".to_vec()),
            ..Default::default()
        };
        let device = store(dir.path(), options).load().await.unwrap();
        assert_eq!(device.source(), SOURCE_CACHE);
        assert_eq!(device.wvd(), cached);
    }

    #[tokio::test]
    async fn cached_raw_pair_is_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CLIENT_ID_FILE), b"client").unwrap();
        std::fs::write(dir.path().join(PRIVATE_KEY_FILE), b"key").unwrap();

        let device = store(dir.path(), DeviceOptions::default()).load().await.unwrap();
        assert_eq!(device.wvd(), wvd::encode(b"client", b"key").unwrap());
    }

    #[tokio::test]
    async fn prefer_cache_skips_other_options() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(WVD_FILE), wvd::encode(b"cached", b"key").unwrap())
            .unwrap();

        let options = DeviceOptions {
            wvd: Some(wvd::encode(b"fresh", b"key").unwrap()),
            prefer_cache: true,
            ..Default::default()
        };
        let device = store(dir.path(), options).load().await.unwrap();
        assert_eq!(device.source(), SOURCE_CACHE);
    }

    #[tokio::test]
    async fn nothing_available() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(dir.path(), DeviceOptions::default())
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn raw_uris_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let client_id = dir.path().join("cid.bin");
        let private_key = dir.path().join("key.pem");
        std::fs::write(&client_id, b"client").unwrap();
        std::fs::write(&private_key, b"key").unwrap();

        let options = DeviceOptions {
            client_id_uri: Some(Uri::Path(client_id)),
            private_key_uri: Some(Uri::Path(private_key)),
            ..Default::default()
        };
        let store = store(&dir.path().join("cache"), options);
        let first = store.get().await.unwrap();
        let second = store.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.source(), "raw_uri");
    }

    #[test]
    fn sources_map_to_options() {
        let sources = DeviceSources {
            wvd_uri: Some("https://a.example/wvd,https://b.example/wvd".into()),
            client_id_uri: Some("/data/client_id".into()),
            private_key_uri: Some("  ".into()),
            wvd_zip_uri: Some("https://a.example/wvd.zip".into()),
            prefer_cache: true,
            ..Default::default()
        };
        let options = DeviceOptions::from(&sources);
        assert!(options.wvd_uri.is_some());
        assert_eq!(options.client_id_uri, Some(Uri::parse("/data/client_id")));
        assert_eq!(options.private_key_uri, None);
        assert_eq!(
            options.wvd_zip_uri,
            Some(Uri::Url("https://a.example/wvd.zip".into()))
        );
        assert_eq!(options.wvd_zip_md5_uri, None);
        assert!(options.prefer_cache);
    }

    fn bundle(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.add_directory("devices/", SimpleFileOptions::default())
            .unwrap();
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn zip_bundle_is_cached_with_md5() {
        let dir = tempfile::tempdir().unwrap();
        let device = wvd::encode(b"zipped", b"key").unwrap();
        let remote = dir.path().join("remote.zip");
        std::fs::write(&remote, bundle(&[("devices/a.wvd", device.clone())])).unwrap();

        let cache_dir = dir.path().join("cache");
        let options = DeviceOptions {
            wvd_zip_uri: Some(Uri::Path(remote.clone())),
            wvd_zip_md5_uri: Some(Uri::Bytes(b"0123abcd\n".to_vec())),
            ..Default::default()
        };
        let loaded = store(&cache_dir, options).load().await.unwrap();
        assert_eq!(loaded.source(), "wvd_zip");
        assert_eq!(loaded.wvd(), device);
        assert_eq!(
            std::fs::read(cache_dir.join(ZIP_FILE)).unwrap(),
            std::fs::read(&remote).unwrap()
        );
        assert_eq!(std::fs::read(cache_dir.join(ZIP_MD5_FILE)).unwrap(), b"0123abcd");
    }

    #[tokio::test]
    async fn cached_bundle_reused_until_md5_changes() {
        let dir = tempfile::tempdir().unwrap();
        let cached = wvd::encode(b"cached", b"key").unwrap();
        let fresh = wvd::encode(b"fresh", b"key").unwrap();
        let remote = dir.path().join("remote.zip");
        std::fs::write(&remote, bundle(&[("fresh.wvd", fresh.clone())])).unwrap();

        let cache_dir = dir.path().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(cache_dir.join(ZIP_FILE), bundle(&[("cached.wvd", cached.clone())])).unwrap();
        std::fs::write(cache_dir.join(ZIP_MD5_FILE), b"ABCD").unwrap();

        let options = |md5: &[u8]| DeviceOptions {
            wvd_zip_uri: Some(Uri::Path(remote.clone())),
            wvd_zip_md5_uri: Some(Uri::Bytes(md5.to_vec())),
            ..Default::default()
        };

        let same = store(&cache_dir, options(b"abcd")).load().await.unwrap();
        assert_eq!(same.wvd(), cached);

        let changed = store(&cache_dir, options(b"ef01")).load().await.unwrap();
        assert_eq!(changed.wvd(), fresh);
        assert_eq!(std::fs::read(cache_dir.join(ZIP_MD5_FILE)).unwrap(), b"ef01");
    }

    #[test]
    fn empty_bundle_rejected() {
        assert!(matches!(
            select_from_zip(&bundle(&[])),
            Err(Error::DeviceUnavailable(_))
        ));
        assert!(matches!(
            select_from_zip(b"not a zip"),
            Err(Error::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn has_source_reflects_options_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!store(dir.path(), DeviceOptions::default()).has_source());

        let options = DeviceOptions {
            wvd: Some(wvd::encode(b"client", b"key").unwrap()),
            ..Default::default()
        };
        assert!(store(dir.path(), options).has_source());

        std::fs::write(dir.path().join(CLIENT_ID_FILE), b"client").unwrap();
        assert!(!store(dir.path(), DeviceOptions::default()).has_source());
        std::fs::write(dir.path().join(PRIVATE_KEY_FILE), b"key").unwrap();
        assert!(store(dir.path(), DeviceOptions::default()).has_source());
    }
}
