//! Shared harness for the app store integration tests.
#![allow(clippy::expect_used, dead_code)]

use std::{sync::Arc, time::Duration};

use appstore_authn::{MemoryMailer, MemoryUserDirectory, sign, unix_now};
use appstore_core::{
    AppStore, AppStoreConfig, Collaborators, Container, ContainerInfoRequest, ObjectStorage,
    PresignedUrlSigner, SignedFetchRequest,
};
use appstore_storage::MemoryBackend;

pub const OBJECT_BASE_URL: &str = "https://objects.test/artifacts";

pub struct Harness {
    pub store: AppStore,
    pub backend: MemoryBackend,
    pub mailer: MemoryMailer,
    pub directory: MemoryUserDirectory,
    pub signer: PresignedUrlSigner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AppStoreConfig::default())
    }

    pub fn with_config(config: AppStoreConfig) -> Self {
        let signer =
            PresignedUrlSigner::new(OBJECT_BASE_URL, b"object-key".to_vec()).expect("signer");
        Self::with_objects(config, Arc::new(signer.clone()), signer)
    }

    pub fn with_objects(
        config: AppStoreConfig,
        objects: Arc<dyn ObjectStorage>,
        signer: PresignedUrlSigner,
    ) -> Self {
        let backend = MemoryBackend::new();
        let mailer = MemoryMailer::new();
        let directory = MemoryUserDirectory::new();
        let store = AppStore::new(
            Collaborators::builder()
                .store(Arc::new(backend.clone()))
                .cache(Arc::new(MemoryBackend::new()))
                .directory(Arc::new(directory.clone()))
                .mailer(Arc::new(mailer.clone()))
                .objects(objects)
                .build(),
            config,
        )
        .expect("valid config");
        Self { store, backend, mailer, directory, signer }
    }

    /// Logs `email` in through the mailed code and returns the session token.
    pub async fn login(&self, email: &str) -> String {
        self.store.issue_login_code(email).await.expect("code issued");
        let code = self.mailer.last_to(email).expect("code mailed").body;
        self.store.login(email, &code).await.expect("login succeeds")
    }

    pub async fn uid(&self, token: &str) -> String {
        self.store.resolve_uid(token).await.expect("session resolves")
    }
}

/// Config with a short resend cooldown so tests can log several users in.
pub fn fast_config() -> AppStoreConfig {
    let mut config = AppStoreConfig::default();
    config.session.code_resend_cooldown = Duration::from_millis(10);
    config
}

pub fn fetch_request(container: &Container, appid: &str, ver: &str, ability: &str) -> SignedFetchRequest {
    let mut request = SignedFetchRequest {
        id: container.id.clone(),
        appid: appid.to_owned(),
        ver: ver.to_owned(),
        ability: ability.to_owned(),
        timestamp: unix_now(),
        sign: String::new(),
    };
    request.sign = sign(&container.secret, &request.fields());
    request
}

pub fn info_request(container: &Container, ver: u64) -> ContainerInfoRequest {
    let mut request = ContainerInfoRequest {
        id: container.id.clone(),
        timestamp: unix_now(),
        ver,
        sign: String::new(),
    };
    request.sign = sign(&container.secret, &request.fields());
    request
}
