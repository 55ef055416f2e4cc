//! Session persistence across restarts and failure paths.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use comfyqueue_client::api::{ApiClient, ApiError};
use comfyqueue_client::session::{SessionError, SessionStore};
use comfyqueue_client::storage::{FileStorage, SessionStorage, KEY_ROLE, KEY_THEME, KEY_TOKEN};
use comfyqueue_core::roles::Role;
use comfyqueue_core::theme::Theme;
use common::{Backend, EDITOR};

fn store_at(path: &std::path::Path) -> Arc<SessionStore> {
    Arc::new(SessionStore::restore(Box::new(FileStorage::open(path))))
}

#[tokio::test]
async fn login_persists_and_restart_resumes() {
    let backend = Backend::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("session.json");

    let store = store_at(&path);
    let api = ApiClient::new(&backend.config(), Arc::clone(&store)).unwrap();
    let session = store.login(&api, EDITOR.0, EDITOR.1).await.unwrap();
    assert_eq!(session.token, "t1");
    assert_eq!(session.role, Role::Editor);

    let on_disk = FileStorage::open(&path);
    assert_eq!(on_disk.get(KEY_TOKEN).as_deref(), Some("t1"));
    assert_eq!(on_disk.get(KEY_ROLE).as_deref(), Some("editor"));

    // A new process reads the same file and is already authenticated.
    let restored = store_at(&path);
    assert_eq!(restored.current(), Some(session));
    let api = ApiClient::new(&backend.config(), Arc::clone(&restored)).unwrap();
    assert!(api.list_jobs().await.is_ok());
}

#[tokio::test]
async fn failed_login_persists_nothing() {
    let backend = Backend::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let store = store_at(&path);
    let api = ApiClient::new(&backend.config(), Arc::clone(&store)).unwrap();
    let err = store.login(&api, EDITOR.0, "nope").await.unwrap_err();

    assert_matches!(err, SessionError::Api(ApiError::Auth { .. }));
    assert!(store.current().is_none());
    let on_disk = FileStorage::open(&path);
    assert!(on_disk.get(KEY_TOKEN).is_none());
    assert!(on_disk.get(KEY_ROLE).is_none());
}

#[tokio::test]
async fn blank_credentials_never_reach_the_backend() {
    // Nothing listens on this port; a request would be a network error.
    let config = comfyqueue_client::config::ClientConfig::new("http://127.0.0.1:9").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(&dir.path().join("session.json"));
    let api = ApiClient::new(&config, Arc::clone(&store)).unwrap();

    let err = store.login(&api, "  ", "secret").await.unwrap_err();
    assert_matches!(err, SessionError::Api(ApiError::Validation { status: None, .. }));
}

#[tokio::test]
async fn logout_clears_persisted_keys() {
    let backend = Backend::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let store = store_at(&path);
    let api = ApiClient::new(&backend.config(), Arc::clone(&store)).unwrap();
    store.login(&api, EDITOR.0, EDITOR.1).await.unwrap();
    store.set_theme(Theme::Light).unwrap();

    store.logout().unwrap();

    let on_disk = FileStorage::open(&path);
    for key in [KEY_TOKEN, KEY_ROLE, KEY_THEME] {
        assert!(on_disk.get(key).is_none(), "{key} should be cleared");
    }
    assert!(store_at(&path).current().is_none());
}

#[test]
fn theme_survives_restart_without_login() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let store = store_at(&path);
    assert_eq!(store.theme(), Theme::Dark);
    assert_eq!(store.toggle_theme().unwrap(), Theme::Light);

    assert_eq!(store_at(&path).theme(), Theme::Light);
}
