//! Tests for credential stores.

use super::*;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct FileFixture {
    _tmp: TempDir,
    path: Utf8PathBuf,
    store: FileCredentialStore,
}

#[fixture]
fn file_fixture() -> FileFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("state").join("credentials.json"))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    let store = FileCredentialStore::new(path.clone());
    FileFixture {
        _tmp: tmp,
        path,
        store,
    }
}

fn ubuntu() -> LoginCredentials {
    LoginCredentials::for_user("ubuntu").with_private_key("-----BEGIN KEY-----")
}

#[rstest]
fn node_keys_round_trip_through_helpers() {
    let key = credential_key("us-east-1/i-1");
    assert_eq!(key, "node#us-east-1/i-1");
    assert_eq!(node_id_from_key(&key), Some("us-east-1/i-1"));
    assert_eq!(node_id_from_key("image#x"), None);
}

#[rstest]
fn in_memory_store_puts_and_removes() {
    let store = InMemoryCredentialStore::new();
    store
        .put("node#a", &ubuntu())
        .unwrap_or_else(|err| panic!("put: {err}"));

    assert_eq!(store.get("node#a"), Ok(Some(ubuntu())));
    assert_eq!(store.keys(), Ok(vec![String::from("node#a")]));
    assert_eq!(store.remove("node#a"), Ok(Some(ubuntu())));
    assert_eq!(store.get("node#a"), Ok(None));
}

#[rstest]
fn missing_file_reads_as_empty(file_fixture: FileFixture) {
    let FileFixture { store, path, .. } = file_fixture;
    assert_eq!(store.get("node#a"), Ok(None));
    assert_eq!(store.keys(), Ok(Vec::new()));
    assert!(!path.exists(), "reads must not create the file");
}

#[rstest]
fn file_store_persists_across_instances(file_fixture: FileFixture) {
    let FileFixture { store, path, .. } = file_fixture;
    store
        .put("node#a", &ubuntu())
        .unwrap_or_else(|err| panic!("put: {err}"));

    let reopened = FileCredentialStore::new(path.clone());
    assert_eq!(reopened.get("node#a"), Ok(Some(ubuntu())));

    assert_eq!(reopened.remove("node#a"), Ok(Some(ubuntu())));
    assert_eq!(store.get("node#a"), Ok(None));
    assert!(
        !path.with_extension("json.tmp").exists(),
        "temporary file should be renamed away"
    );
}

#[rstest]
fn corrupt_file_reports_parse_error(file_fixture: FileFixture) {
    let FileFixture { store, path, .. } = file_fixture;
    let parent = path
        .parent()
        .unwrap_or_else(|| panic!("fixture path should have a parent"));
    std::fs::create_dir_all(parent).unwrap_or_else(|err| panic!("mkdir: {err}"));
    std::fs::write(&path, "{not json").unwrap_or_else(|err| panic!("write: {err}"));

    let err = store.get("node#a").expect_err("corrupt content should fail");
    assert!(
        matches!(err, CredentialStoreError::Parse { ref path, .. } if path.ends_with("credentials.json")),
        "unexpected error: {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn async_helpers_round_trip_through_file_store(file_fixture: FileFixture) {
    let FileFixture { path, .. } = file_fixture;
    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(path.clone()));

    save(&store, credential_key("us-east-1/i-1"), ubuntu())
        .await
        .unwrap_or_else(|err| panic!("save: {err}"));
    assert_eq!(
        load(&store, credential_key("us-east-1/i-1")).await,
        Ok(Some(ubuntu()))
    );
    assert_eq!(
        discard(&store, credential_key("us-east-1/i-1")).await,
        Ok(Some(ubuntu()))
    );
    assert_eq!(FileCredentialStore::new(path).keys(), Ok(Vec::new()));
}

/// Records the thread every call runs on.
#[derive(Default)]
struct ThreadRecorder {
    threads: Mutex<Vec<std::thread::ThreadId>>,
}

impl ThreadRecorder {
    fn record(&self) {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(std::thread::current().id());
    }
}

impl CredentialStore for ThreadRecorder {
    fn get(&self, _key: &str) -> Result<Option<LoginCredentials>, CredentialStoreError> {
        self.record();
        Ok(None)
    }

    fn put(&self, _key: &str, _credentials: &LoginCredentials) -> Result<(), CredentialStoreError> {
        self.record();
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<Option<LoginCredentials>, CredentialStoreError> {
        self.record();
        Ok(None)
    }

    fn keys(&self) -> Result<Vec<String>, CredentialStoreError> {
        Ok(Vec::new())
    }
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn async_helpers_keep_store_calls_off_the_runtime_thread() {
    let recorder = Arc::new(ThreadRecorder::default());
    let store: Arc<dyn CredentialStore> = Arc::clone(&recorder) as Arc<dyn CredentialStore>;
    let runtime_thread = std::thread::current().id();

    save(&store, credential_key("a"), ubuntu())
        .await
        .unwrap_or_else(|err| panic!("save: {err}"));
    load(&store, credential_key("a"))
        .await
        .unwrap_or_else(|err| panic!("load: {err}"));
    discard(&store, credential_key("a"))
        .await
        .unwrap_or_else(|err| panic!("discard: {err}"));

    let threads = recorder
        .threads
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    assert_eq!(threads.len(), 3);
    assert!(threads.iter().all(|thread| *thread != runtime_thread));
}
