use sample_cache_core::config::AppConfig;
use sample_cache_core::enumerate::{CatalogEntry, CatalogQuery};
use sample_cache_core::samples::{
    FileAttrs, FileFlags, Location, Sample, SampleEntry, SampleKey, SampleSource, StageStatus,
};
use sample_cache_core::staging::{CopyRequest, RemoteCopy};
use sample_cache_core::{Error, SamplesCache, SilentReporter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct CountingCatalog {
    calls: AtomicUsize,
}

impl CatalogQuery for CountingCatalog {
    fn query_files(&self, dasname: &str, _instance: &str) -> Result<Vec<CatalogEntry>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((1..=3)
            .map(|i| CatalogEntry {
                name: format!("/store/mc{}/{}.root", dasname, i),
                size: 100 * i,
                nevents: 10 * i,
                adler32: i as u32,
            })
            .collect())
    }
}

/// Unreachable on the first query, healthy afterwards.
#[derive(Default)]
struct FlakyCatalog {
    calls: AtomicUsize,
}

impl CatalogQuery for FlakyCatalog {
    fn query_files(&self, dasname: &str, _instance: &str) -> Result<Vec<CatalogEntry>, Error> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(Error::Enumeration {
                sample: dasname.to_string(),
                reason: "catalog unavailable".to_string(),
            });
        }
        Ok(vec![CatalogEntry {
            name: "/store/mc/flaky/1.root".to_string(),
            size: 100,
            nevents: 10,
            adler32: 1,
        }])
    }
}

#[derive(Default)]
struct CountingCopy {
    calls: AtomicUsize,
    fail: bool,
    delay: Option<Duration>,
}

impl RemoteCopy for CountingCopy {
    fn copy(&self, request: &CopyRequest<'_>) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Other(format!("cannot reach {}", request.source)));
        }
        fs::write(request.destination, b"payload")?;
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        Ok(())
    }
}

fn make_test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.samples_cache.db_path = PathBuf::new();
    config.samples_cache.threads = 2;
    config
}

fn make_test_cache(config: AppConfig, catalog: Arc<CountingCatalog>) -> SamplesCache {
    SamplesCache::new(config).unwrap().with_catalog(catalog)
}

fn write_sized(path: &Path, size: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, vec![0u8; size]).unwrap();
}

const DAS_DEFINITIONS: &str = r#"
- name: /MC/ttbar
  tree_name: Events
  dasname: /TTbar/Run3-v1/NANOAODSIM
- name: /MC/all
  samples:
    - name: /MC/wjets
      tree_name: Events
      dasname: /WJets/Run3-v1/NANOAODSIM
"#;

#[test]
fn test_second_refresh_is_served_from_cache() {
    let catalog = Arc::new(CountingCatalog::default());
    let cache = make_test_cache(make_test_config(), Arc::clone(&catalog));

    let first = cache.loads(DAS_DEFINITIONS, &SilentReporter).unwrap();
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    assert_eq!(first[0].len(false), 3);

    let mut second = sample_cache_core::definition::parse_definitions(DAS_DEFINITIONS).unwrap();
    let report = cache.refresh(&mut second, &SilentReporter).unwrap();
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.requested, 2);
    assert_eq!(report.cache_hits, 2);
    assert_eq!(report.enumerated, 0);
    assert_eq!(second, first);
    assert_eq!(second[1].size(), Some(600));
    assert_eq!(second[1].entries(), Some(60));
}

#[test]
fn test_forced_refresh_enumerates_again() {
    let catalog = Arc::new(CountingCatalog::default());
    let config = make_test_config();
    let cache = make_test_cache(config, Arc::clone(&catalog)).with_refresh(true);

    cache.loads(DAS_DEFINITIONS, &SilentReporter).unwrap();
    let entries = cache.loads(DAS_DEFINITIONS, &SilentReporter).unwrap();
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 4);
    assert_eq!(entries[0].len(false), 3);
}

#[test]
fn test_filesystem_sample_example() {
    let data = tempfile::tempdir().unwrap();
    write_sized(&data.path().join("f1.root"), 10);
    write_sized(&data.path().join("sub/f2.root"), 20);
    write_sized(&data.path().join("f3.root"), 30);
    write_sized(&data.path().join("README"), 99);

    let definitions = format!(
        "- name: /A/b\n  tree_name: Events\n  directory: \"{}\"\n",
        data.path().display()
    );
    let catalog = Arc::new(CountingCatalog::default());
    let cache = make_test_cache(make_test_config(), Arc::clone(&catalog));

    let entries = cache.loads(&definitions, &SilentReporter).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].samples_len(), 1);
    assert_eq!(entries[0].len(false), 3);
    assert_eq!(entries[0].size(), Some(60));
    assert_eq!(entries[0].entries(), None);
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 0);

    let session = cache.store().session().unwrap();
    let stored = session
        .read_sample(&SampleKey::parse("/A/b"))
        .unwrap()
        .unwrap();
    assert_eq!(stored.size(), Some(60));
}

#[test]
fn test_empty_source_still_persists() {
    let data = tempfile::tempdir().unwrap();
    let definitions = format!(
        "- name: /A/empty\n  tree_name: Events\n  directory: \"{}\"\n",
        data.path().display()
    );
    let cache = make_test_cache(make_test_config(), Arc::new(CountingCatalog::default()));

    let entries = cache.loads(&definitions, &SilentReporter).unwrap();
    assert_eq!(entries[0].len(false), 0);
    assert_eq!(entries[0].size(), Some(0));

    let mut again = sample_cache_core::definition::parse_definitions(&definitions).unwrap();
    let report = cache.refresh(&mut again, &SilentReporter).unwrap();
    assert_eq!(report.cache_hits, 1);
}

#[test]
fn test_enumeration_failure_does_not_abort_batch() {
    let data = tempfile::tempdir().unwrap();
    write_sized(&data.path().join("good/1.root"), 5);
    let definitions = format!(
        "- name: /A/missing\n  tree_name: Events\n  directory: \"{}\"\n\
         - name: /A/good\n  tree_name: Events\n  directory: \"{}\"\n",
        data.path().join("missing").display(),
        data.path().join("good").display()
    );
    let cache = make_test_cache(make_test_config(), Arc::new(CountingCatalog::default()));

    let mut entries = sample_cache_core::definition::parse_definitions(&definitions).unwrap();
    let report = cache.refresh(&mut entries, &SilentReporter).unwrap();
    assert_eq!(report.requested, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.enumerated, 1);
    assert!(entries[0].samples()[0].is_empty());
    assert_eq!(entries[1].size(), Some(5));
}

#[test]
fn test_failed_enumeration_is_retried_on_next_load() {
    let catalog = Arc::new(FlakyCatalog::default());
    let cache = SamplesCache::new(make_test_config())
        .unwrap()
        .with_catalog(catalog.clone());
    let definitions = "- name: /MC/flaky\n  tree_name: Events\n  dasname: /Flaky/Run3-v1/NANOAODSIM\n";

    let first = cache.loads(definitions, &SilentReporter).unwrap();
    assert_eq!(first[0].len(false), 0);
    assert!(cache
        .store()
        .session()
        .unwrap()
        .read_sample(&SampleKey::parse("/MC/flaky"))
        .unwrap()
        .is_none());

    let second = cache.loads(definitions, &SilentReporter).unwrap();
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    assert_eq!(second[0].len(false), 1);
    assert_eq!(second[0].size(), Some(100));
}

#[test]
fn test_cache_hit_adopts_files_despite_kind_mismatch() {
    let catalog = Arc::new(CountingCatalog::default());
    let cache = make_test_cache(make_test_config(), Arc::clone(&catalog));
    cache.loads(DAS_DEFINITIONS, &SilentReporter).unwrap();
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);

    let data = tempfile::tempdir().unwrap();
    let definitions = format!(
        "- name: /MC/ttbar\n  tree_name: Events\n  directory: \"{}\"\n",
        data.path().join("absent").display()
    );
    let mut entries = sample_cache_core::definition::parse_definitions(&definitions).unwrap();
    let report = cache.refresh(&mut entries, &SilentReporter).unwrap();

    assert_eq!(report.cache_hits, 1);
    assert_eq!(report.enumerated, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    assert_eq!(entries[0].len(false), 3);
    assert_eq!(entries[0].size(), Some(600));
}

#[test]
fn test_group_without_members_is_valid() {
    let cache = make_test_cache(make_test_config(), Arc::new(CountingCatalog::default()));
    let entries = cache
        .loads("- name: /G/none\n  samples: []\n", &SilentReporter)
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].samples_len(), 0);
    assert_eq!(entries[0].size(), Some(0));
}

#[test]
fn test_file_store_is_shared_between_instances() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = make_test_config();
    config.samples_cache.db_path = dir.path().join("cache/sample.db");

    let catalog = Arc::new(CountingCatalog::default());
    make_test_cache(config.clone(), Arc::clone(&catalog))
        .loads(DAS_DEFINITIONS, &SilentReporter)
        .unwrap();
    let entries = make_test_cache(config, Arc::clone(&catalog))
        .loads(DAS_DEFINITIONS, &SilentReporter)
        .unwrap();

    assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    assert_eq!(entries[0].len(false), 3);
    assert!(fs::symlink_metadata(dir.path().join("cache/sample.db.lock")).is_err());
}

fn staging_entries() -> Vec<SampleEntry> {
    let mut sample = Sample::new("/MC/stage", "Events", SampleSource::Plain);
    sample.put_file("/store/mc/stage/local.root", FileAttrs::default());
    sample.put_file(
        "/store/mc/stage/remote.root",
        FileAttrs {
            flags: FileFlags {
                location: Location::Remote,
                ..FileFlags::default()
            },
            ..FileAttrs::default()
        },
    );
    vec![sample.into()]
}

fn staging_config(cache_dir: &Path) -> AppConfig {
    let mut config = make_test_config();
    config.site.file_cache_path = cache_dir.to_path_buf();
    config.site.local_prefix = "root://local/".to_string();
    config.site.remote_prefix = "root://remote/".to_string();
    config
}

#[test]
fn test_staging_existing_destination_needs_no_transfer() {
    let cache_dir = tempfile::tempdir().unwrap();
    write_sized(&cache_dir.path().join("store/mc/stage/local.root"), 1);

    let copier = Arc::new(CountingCopy::default());
    let cache = SamplesCache::new(staging_config(cache_dir.path()))
        .unwrap()
        .with_copier(copier.clone());
    let mut entries = staging_entries();

    let report = cache.stage(&mut entries, &SilentReporter).unwrap();
    assert_eq!(report.already_staged, 1);
    assert_eq!(report.transferred, 0);
    assert_eq!(copier.calls.load(Ordering::SeqCst), 0);

    let sample = &entries[0].samples()[0];
    let local = sample.get("/store/mc/stage/local.root").unwrap();
    assert_eq!(local.flags.stage_status, StageStatus::Staged);
    let remote = sample.get("/store/mc/stage/remote.root").unwrap();
    assert_eq!(remote.flags.stage_status, StageStatus::Unstaged);
}

#[test]
fn test_staging_includes_remote_files_when_enabled() {
    let cache_dir = tempfile::tempdir().unwrap();
    let copier = Arc::new(CountingCopy::default());
    let cache = SamplesCache::new(staging_config(cache_dir.path()))
        .unwrap()
        .with_copier(copier.clone())
        .with_remote(true);
    let mut entries = staging_entries();

    let report = cache.stage(&mut entries, &SilentReporter).unwrap();
    assert_eq!(report.transferred, 2);
    assert_eq!(copier.calls.load(Ordering::SeqCst), 2);
    assert!(entries[0]
        .files()
        .all(|file| file.flags.stage_status == StageStatus::Staged));

    let site = &cache.config().site;
    let remote = entries[0].samples()[0]
        .get("/store/mc/stage/remote.root")
        .unwrap();
    assert_eq!(
        PathBuf::from(remote.url_or_path(site)),
        cache_dir.path().join("store/mc/stage/remote.root")
    );
}

#[test]
fn test_staging_failure_aborts_the_call() {
    let cache_dir = tempfile::tempdir().unwrap();
    let copier = Arc::new(CountingCopy {
        fail: true,
        ..CountingCopy::default()
    });
    let cache = SamplesCache::new(staging_config(cache_dir.path()))
        .unwrap()
        .with_copier(copier)
        .with_remote(true);
    let mut entries = staging_entries();

    let result = cache.stage(&mut entries, &SilentReporter);
    assert!(matches!(result, Err(Error::Staging(_))));
    assert!(entries[0]
        .files()
        .all(|file| file.flags.stage_status != StageStatus::Staged));
}

#[test]
fn test_staging_transfers_a_shared_path_once() {
    let cache_dir = tempfile::tempdir().unwrap();
    let copier = Arc::new(CountingCopy {
        delay: Some(Duration::from_millis(100)),
        ..CountingCopy::default()
    });
    let cache = SamplesCache::new(staging_config(cache_dir.path()))
        .unwrap()
        .with_copier(copier.clone());

    let mut a = Sample::new("/MC/a", "Events", SampleSource::Plain);
    a.put_file("/store/mc/shared.root", FileAttrs::default());
    let mut b = Sample::new("/MC/b", "Events", SampleSource::Plain);
    b.put_file("/store/mc/shared.root", FileAttrs::default());
    let mut entries: Vec<SampleEntry> = vec![a.into(), b.into()];

    let report = cache.stage(&mut entries, &SilentReporter).unwrap();
    assert_eq!(report.transferred, 1);
    assert_eq!(copier.calls.load(Ordering::SeqCst), 1);
    assert!(entries
        .iter()
        .flat_map(|entry| entry.files())
        .all(|file| file.flags.stage_status == StageStatus::Staged));
    assert!(cache_dir.path().join("store/mc/shared.root").is_file());
    assert!(!cache_dir.path().join("store/mc/shared.root.part").exists());
}

#[test]
fn test_staging_skips_files_outside_storage_namespace() {
    let cache_dir = tempfile::tempdir().unwrap();
    let copier = Arc::new(CountingCopy::default());
    let cache = SamplesCache::new(staging_config(cache_dir.path()))
        .unwrap()
        .with_copier(copier.clone());

    let mut sample = Sample::new("/MC/mixed", "Events", SampleSource::Plain);
    sample.put_file("/store/mc/mixed/1.root", FileAttrs::default());
    sample.put_file("/data/user/mixed/2.root", FileAttrs::default());
    let mut entries: Vec<SampleEntry> = vec![sample.into()];

    let report = cache.stage(&mut entries, &SilentReporter).unwrap();
    assert_eq!(report.transferred, 1);
    assert_eq!(copier.calls.load(Ordering::SeqCst), 1);
    let sample = &entries[0].samples()[0];
    assert_eq!(
        sample.get("/data/user/mixed/2.root").unwrap().flags.stage_status,
        StageStatus::Unstaged
    );
    assert!(!cache_dir.path().join("data/user/mixed/2.root").exists());
}

#[test]
fn test_site_stage_stages_on_load() {
    let site_root = tempfile::tempdir().unwrap();
    let data = site_root.path().join("store/mc/x");
    write_sized(&data.join("1.root"), 4);
    write_sized(&data.join("2.root"), 8);
    let definitions = format!(
        "- name: /A/x\n  tree_name: Events\n  directory: \"{}\"\n",
        data.display()
    );

    let cache_dir = tempfile::tempdir().unwrap();
    let mut config = staging_config(cache_dir.path());
    config.site.store_path = site_root.path().to_string_lossy().into_owned();
    config.site.stage = true;
    let copier = Arc::new(CountingCopy::default());
    let cache = SamplesCache::new(config)
        .unwrap()
        .with_copier(copier.clone());

    let entries = cache.loads(&definitions, &SilentReporter).unwrap();
    assert_eq!(copier.calls.load(Ordering::SeqCst), 2);
    assert!(entries[0]
        .files()
        .all(|file| file.flags.stage_status == StageStatus::Staged));
    assert!(cache_dir.path().join("store/mc/x/1.root").is_file());

    let entries = cache
        .with_stage(false)
        .loads(&definitions, &SilentReporter)
        .unwrap();
    assert_eq!(copier.calls.load(Ordering::SeqCst), 2);
    assert!(entries[0]
        .files()
        .all(|file| file.flags.stage_status == StageStatus::Unstaged));
}
