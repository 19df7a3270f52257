use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use mockall::mock;
use tempfile::TempDir;

use hpxml_schema::KvBackend;
use hpxml_schema::error::{CacheError, CacheResult};

/// Paths of the checked-in schema fixtures
pub struct TestFixtures {
    pub fixtures_dir: PathBuf,
}

impl TestFixtures {
    pub fn new() -> Self {
        let fixtures_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures");

        Self { fixtures_dir }
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.fixtures_dir.join("schema")
    }

    pub fn sample_xsd(&self) -> PathBuf {
        self.schema_dir().join("sample_hpxml.xsd")
    }

    pub fn sample_schematron(&self) -> PathBuf {
        self.schema_dir().join("sample_schematron.xml")
    }
}

impl Default for TestFixtures {
    fn default() -> Self {
        Self::new()
    }
}

pub const WALL: &str = "/HPXML/Building/BuildingDetails/Enclosure/Walls/Wall";
pub const WINDOW: &str = "/HPXML/Building/BuildingDetails/Enclosure/Windows/Window";
pub const ROOF: &str = "/HPXML/Building/BuildingDetails/Enclosure/Roofs/Roof";

/// Schema directory laid out as `<version>/HPXML.xsd`, one per version,
/// each a copy of the sample schema.
pub fn versioned_schema_dir(versions: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let sample = std::fs::read_to_string(TestFixtures::new().sample_xsd()).unwrap();
    for version in versions {
        let version_dir = dir.path().join(version);
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(version_dir.join("HPXML.xsd"), &sample).unwrap();
    }
    dir
}

/// Copy a fixture into `dir` so tests can modify it.
pub fn copy_fixture(source: &Path, dir: &Path) -> PathBuf {
    let target = dir.join(source.file_name().unwrap());
    std::fs::copy(source, &target).unwrap();
    target
}

/// Push the modification time forward so the file reads as changed.
pub fn touch(path: &Path) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();
}

mock! {
    pub FailingBackend {}

    #[async_trait]
    impl KvBackend for FailingBackend {
        fn name(&self) -> String;
        async fn ping(&self) -> CacheResult<()>;
        async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;
        async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;
        async fn delete(&self, key: &str) -> CacheResult<()>;
        async fn flush(&self, prefix: &str) -> CacheResult<()>;
        async fn len(&self, prefix: &str) -> CacheResult<u64>;
    }
}

fn connection_refused() -> CacheError {
    CacheError::Backend {
        backend: "failing".to_string(),
        details: "connection refused".to_string(),
    }
}

/// Backend whose every operation fails, as if the server went away.
pub fn failing_backend() -> MockFailingBackend {
    let mut backend = MockFailingBackend::new();
    backend.expect_name().returning(|| "failing".to_string());
    backend.expect_ping().returning(|| Err(connection_refused()));
    backend.expect_get().returning(|_| Err(connection_refused()));
    backend
        .expect_set_ex()
        .returning(|_, _, _| Err(connection_refused()));
    backend.expect_delete().returning(|_| Err(connection_refused()));
    backend.expect_flush().returning(|_| Err(connection_refused()));
    backend.expect_len().returning(|_| Err(connection_refused()));
    backend
}
