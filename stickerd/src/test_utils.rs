//! Test utilities for integration testing (available with `test-utils` feature).
//!
//! In-process fakes for the three external services. Each fake records how often it was called
//! so tests can assert that a request stopped before reaching a provider.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::json;
use url::Url;

use crate::{
    AppState,
    auth::{
        current_user::CurrentUser,
        provider::{AuthError, AuthProvider, AuthenticatedUser, OtpKind, SignUpOutcome},
        session::{self, SessionTokens},
    },
    config::{Config, StorageBackend, StorageConfig, SupabaseConfig, TransformProviderKind},
    stickers::{StickerService, StickerSettings},
    storage::{ObjectStorage, ObjectUpload, StorageError, StoredObject, memory::MemoryStorage},
    transform::{EditRequest, EditResponse, GeneratedImage, ImageTransformer, RetryPolicy, TransformError},
};

pub const PUBLIC_BASE_URL: &str = "http://localhost:3001/files";

/// Configuration with fake credentials, the memory storage backend and the dummy transformer.
pub fn create_test_config() -> Config {
    let mut config = Config {
        supabase: SupabaseConfig {
            url: Some(Url::parse("https://testproject.supabase.co").unwrap()),
            anon_key: Some("anon-key".to_string()),
        },
        storage: StorageConfig {
            backend: StorageBackend::Memory,
            public_base_url: Some(Url::parse(PUBLIC_BASE_URL).unwrap()),
            ..Default::default()
        },
        ..Default::default()
    };
    config.transform.provider = TransformProviderKind::Dummy;
    config.auth.cookie_secure = false;
    config
}

pub fn memory_storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new(&create_test_config().storage))
}

/// Application state wired to fakes. Anything not supplied gets a permissive default.
#[bon::builder]
pub fn test_state(
    auth: Option<Arc<dyn AuthProvider>>,
    transformer: Option<Arc<dyn ImageTransformer>>,
    storage: Option<Arc<dyn ObjectStorage>>,
    config: Option<Config>,
) -> AppState {
    let config = config.unwrap_or_else(create_test_config);
    let auth: Arc<dyn AuthProvider> = match auth {
        Some(auth) => auth,
        None => StaticAuthProvider::with_user("good-token", "user-1", "user@example.com"),
    };
    let transformer: Arc<dyn ImageTransformer> = match transformer {
        Some(transformer) => transformer,
        None => ScriptedTransformer::new([]),
    };
    let storage: Arc<dyn ObjectStorage> = match storage {
        Some(storage) => storage,
        None => memory_storage(),
    };

    let mut settings = StickerSettings::from(&config);
    settings.retry = RetryPolicy {
        max_attempts: settings.retry.max_attempts,
        delay: std::time::Duration::from_millis(10),
    };

    AppState::builder()
        .config(config)
        .auth(auth)
        .stickers(StickerService::new(transformer, storage, settings))
        .build()
}

/// `Cookie` header value carrying a session with `access_token`.
pub fn session_cookie_for(cookie_name: &str, access_token: &str) -> String {
    let tokens = session_for(access_token, "user-1", "user@example.com");
    let value = session::encode_session(&tokens).unwrap();
    format!("{cookie_name}={value}")
}

pub fn session_for(access_token: &str, user_id: &str, email: &str) -> SessionTokens {
    SessionTokens {
        access_token: access_token.to_string(),
        refresh_token: Some(format!("refresh-{access_token}")),
        token_type: Some("bearer".to_string()),
        expires_in: Some(3600),
        expires_at: None,
        user: Some(json!({"id": user_id, "email": email})),
    }
}

pub fn current_user() -> CurrentUser {
    CurrentUser {
        user: AuthenticatedUser {
            id: "user-1".to_string(),
            email: Some("user@example.com".to_string()),
        },
        access_token: "good-token".to_string(),
    }
}

pub fn generated(b64: &str) -> EditResponse {
    EditResponse {
        data: vec![GeneratedImage {
            b64_json: Some(b64.to_string()),
        }],
    }
}

pub fn edit_request() -> EditRequest {
    EditRequest {
        image: Bytes::from(png_bytes(8, 8)),
        file_name: "user_input.png".to_string(),
        content_type: "image/png".to_string(),
        prompt: Some("sticker".to_string()),
        size: "1024x1024".to_string(),
        n: 1,
    }
}

fn encode_test_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 200])
    }));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_test_image(width, height, ImageFormat::Jpeg)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_test_image(width, height, ImageFormat::Png)
}

/// Transformer answering from a fixed script, recording every request it receives.
pub struct ScriptedTransformer {
    script: Mutex<VecDeque<Result<EditResponse, TransformError>>>,
    calls: Mutex<Vec<EditRequest>>,
}

impl ScriptedTransformer {
    pub fn new(script: impl IntoIterator<Item = Result<EditResponse, TransformError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<EditRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageTransformer for ScriptedTransformer {
    async fn edit(&self, request: EditRequest) -> Result<EditResponse, TransformError> {
        self.calls.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransformError::Other("no scripted response left".to_string())))
    }
}

/// Storage that refuses every upload.
pub struct FailingStorage {
    message: String,
    attempts: AtomicUsize,
}

impl FailingStorage {
    pub fn new(message: &str) -> Arc<Self> {
        Arc::new(Self {
            message: message.to_string(),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for FailingStorage {
    fn bucket(&self) -> &str {
        "uploads"
    }

    async fn upload(&self, _upload: ObjectUpload) -> Result<StoredObject, StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Api {
            status: 403,
            message: self.message.clone(),
        })
    }

    fn public_url(&self, path: &str) -> Option<String> {
        Some(format!("{PUBLIC_BASE_URL}/uploads/{path}"))
    }
}

/// Auth provider backed by fixed tables of tokens, passwords and one-time codes.
#[derive(Default)]
pub struct StaticAuthProvider {
    users: HashMap<String, AuthenticatedUser>,
    passwords: HashMap<(String, String), String>,
    otp_codes: HashMap<(String, String), String>,
    refresh_tokens: HashMap<String, String>,
    confirm_sign_up: bool,
    failure: Option<AuthError>,
    lookups: AtomicUsize,
    otp_requests: Mutex<Vec<(String, bool)>>,
    refreshes: Mutex<Vec<String>>,
    sign_outs: Mutex<Vec<String>>,
}

impl StaticAuthProvider {
    pub fn with_user(token: &str, id: &str, email: &str) -> Arc<Self> {
        Arc::new(Self::default().user(token, id, email))
    }

    pub fn failing(error: AuthError) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(error),
            ..Default::default()
        })
    }

    pub fn user(mut self, token: &str, id: &str, email: &str) -> Self {
        self.users.insert(
            token.to_string(),
            AuthenticatedUser {
                id: id.to_string(),
                email: Some(email.to_string()),
            },
        );
        self
    }

    /// Accept `password` for `email`; signing in yields `token`.
    pub fn password(mut self, email: &str, password: &str, token: &str) -> Self {
        self.passwords
            .insert((email.to_string(), password.to_string()), token.to_string());
        self.user(token, &format!("id-{token}"), email)
    }

    /// Accept `code` for `email`; verifying yields `token`.
    pub fn otp(mut self, email: &str, code: &str, token: &str) -> Self {
        self.otp_codes
            .insert((email.to_string(), code.to_string()), token.to_string());
        self.user(token, &format!("id-{token}"), email)
    }

    /// Accept `refresh_token` once; refreshing yields `token`.
    pub fn refresh(mut self, refresh_token: &str, token: &str, id: &str, email: &str) -> Self {
        self.refresh_tokens
            .insert(refresh_token.to_string(), token.to_string());
        self.user(token, id, email)
    }

    /// Hand out a session straight from sign-up.
    pub fn auto_confirm(mut self) -> Self {
        self.confirm_sign_up = true;
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn otp_requests(&self) -> Vec<(String, bool)> {
        self.otp_requests.lock().unwrap().clone()
    }

    pub fn refreshes(&self) -> Vec<String> {
        self.refreshes.lock().unwrap().clone()
    }

    pub fn sign_outs(&self) -> Vec<String> {
        self.sign_outs.lock().unwrap().clone()
    }

    fn check_failure(&self) -> Result<(), AuthError> {
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn session(&self, token: &str) -> SessionTokens {
        let user = self.users.get(token);
        session_for(
            token,
            user.map(|u| u.id.as_str()).unwrap_or("unknown"),
            user.and_then(|u| u.email.as_deref()).unwrap_or(""),
        )
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthenticatedUser>, AuthError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.users.get(access_token).cloned())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<SessionTokens, AuthError> {
        self.check_failure()?;
        let mut refreshes = self.refreshes.lock().unwrap();
        let already_used = refreshes.iter().any(|used| used == refresh_token);
        refreshes.push(refresh_token.to_string());
        match self.refresh_tokens.get(refresh_token) {
            Some(token) if !already_used => Ok(self.session(token)),
            _ => Err(AuthError::Rejected {
                status: 400,
                message: "Invalid Refresh Token: Refresh Token Not Found".to_string(),
            }),
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<SessionTokens, AuthError> {
        self.check_failure()?;
        match self.passwords.get(&(email.to_string(), password.to_string())) {
            Some(token) => Ok(self.session(token)),
            None => Err(AuthError::Rejected {
                status: 400,
                message: "Invalid login credentials".to_string(),
            }),
        }
    }

    async fn sign_up(&self, email: &str, _password: &str) -> Result<SignUpOutcome, AuthError> {
        self.check_failure()?;
        if self.passwords.keys().any(|(known, _)| known == email) {
            return Err(AuthError::Rejected {
                status: 422,
                message: "User already registered".to_string(),
            });
        }

        let user = AuthenticatedUser {
            id: format!("id-{email}"),
            email: Some(email.to_string()),
        };
        let session = self
            .confirm_sign_up
            .then(|| session_for("signup-token", &user.id, email));
        Ok(SignUpOutcome {
            user: Some(user),
            session,
        })
    }

    async fn send_email_otp(&self, email: &str, create_user: bool) -> Result<(), AuthError> {
        self.check_failure()?;
        self.otp_requests
            .lock()
            .unwrap()
            .push((email.to_string(), create_user));
        Ok(())
    }

    async fn verify_otp(&self, email: &str, token: &str, _kind: OtpKind) -> Result<SessionTokens, AuthError> {
        self.check_failure()?;
        match self.otp_codes.get(&(email.to_string(), token.to_string())) {
            Some(access_token) => Ok(self.session(access_token)),
            None => Err(AuthError::Rejected {
                status: 403,
                message: "Token has expired or is invalid".to_string(),
            }),
        }
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        self.check_failure()?;
        self.sign_outs.lock().unwrap().push(access_token.to_string());
        Ok(())
    }
}
