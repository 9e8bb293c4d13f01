use parking_lot::Mutex;

/// Bearer 認証情報の保管先（取得は外部のポップアップハンドシェイクが行う）
pub trait CredentialStore: Send + Sync {
    fn token(&self) -> Option<String>;
    fn clear(&self);
}

/// メモリ上の認証情報ストア
#[derive(Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Mutex::new(token.filter(|t| !t.is_empty())),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.lock() = Some(token.into());
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    fn clear(&self) {
        self.token.lock().take();
    }
}
