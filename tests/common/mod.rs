#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use mcp_dynamic_auth::auth::discovery::AuthMetadata;
use mcp_dynamic_auth::auth::host::{AuthHost, TokenPersistence};
use mcp_dynamic_auth::auth::protocol::{AuthorizationServerMetadata, ClientRegistration};
use mcp_dynamic_auth::auth::token_store::MemoryPersistence;
use mcp_dynamic_auth::auth::ProviderContext;
use mcp_dynamic_auth::config::AuthConfig;
use mcp_dynamic_auth::error::Result;

/// Scriptable [`AuthHost`] that records what the provider asked for.
#[derive(Default)]
pub struct MockHost {
    pub remote: bool,
    pub continue_answer: bool,
    pub dismiss_device_modal: bool,
    pub registration: Option<ClientRegistration>,
    /// When set, opening an authorization URL simulates the browser
    /// redirect with this code.
    pub redirect_code: Option<String>,
    pub opened: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub device_codes: Mutex<Vec<String>>,
    pub app_uri: Mutex<Option<String>>,
}

impl MockHost {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[async_trait]
impl AuthHost for MockHost {
    async fn open_external_uri(&self, uri: &str) -> bool {
        self.opened.lock().unwrap().push(uri.to_string());

        if let (Some(code), Ok(url)) = (self.redirect_code.clone(), Url::parse(uri)) {
            let redirect = query_value(&url, "redirect_uri");
            let state = query_value(&url, "state").unwrap_or_default();
            if let Some(redirect) = redirect.filter(|r| r.starts_with("http://127.0.0.1")) {
                tokio::spawn(async move {
                    let target = format!("{}?code={}&state={}", redirect, code, state);
                    let _ = reqwest::get(target).await;
                });
            }
        }
        true
    }

    async fn create_app_uri(&self, callback_uri: &str) -> Result<String> {
        *self.app_uri.lock().unwrap() = Some(callback_uri.to_string());
        Ok(callback_uri.to_string())
    }

    async fn wait_for_uri_handler(&self, _expected_uri: &str) -> Result<String> {
        let uri = self.app_uri.lock().unwrap().clone().unwrap_or_default();
        let code = self.redirect_code.clone().unwrap_or_default();
        Ok(format!("{}&code={}", uri, code))
    }

    async fn prompt_for_client_registration(
        &self,
        _server_url: &str,
    ) -> Option<ClientRegistration> {
        self.registration.clone()
    }

    async fn show_continue_notification(&self, message: &str) -> bool {
        self.prompts.lock().unwrap().push(message.to_string());
        self.continue_answer
    }

    async fn show_device_code_modal(&self, user_code: &str, _verification_uri: &str) -> bool {
        self.device_codes.lock().unwrap().push(user_code.to_string());
        !self.dismiss_device_modal
    }

    fn report_progress(&self, _message: &str) {}

    fn is_remote(&self) -> bool {
        self.remote
    }
}

/// Authorization server metadata pointing every endpoint at `base`.
pub fn server_metadata(base: &str) -> AuthorizationServerMetadata {
    AuthorizationServerMetadata {
        issuer: base.to_string(),
        authorization_endpoint: Some(format!("{}/authorize", base)),
        token_endpoint: Some(format!("{}/token", base)),
        registration_endpoint: Some(format!("{}/register", base)),
        device_authorization_endpoint: Some(format!("{}/device", base)),
        response_types_supported: vec!["code".to_string()],
        ..AuthorizationServerMetadata::default()
    }
}

pub fn auth_metadata(base: &str) -> AuthMetadata {
    AuthMetadata {
        authorization_server: Url::parse(base).unwrap(),
        server_metadata: server_metadata(base),
        resource_metadata: None,
    }
}

pub fn client() -> ClientRegistration {
    ClientRegistration {
        client_id: "client-1".to_string(),
        client_secret: None,
    }
}

/// Provider context with in-memory persistence; returns the persistence too.
pub fn provider_context(host: Arc<MockHost>) -> (ProviderContext, Arc<MemoryPersistence>) {
    let persistence = Arc::new(MemoryPersistence::default());
    let dyn_persistence: Arc<dyn TokenPersistence> = persistence.clone();
    let ctx = ProviderContext {
        http: reqwest::Client::new(),
        config: Arc::new(AuthConfig::default()),
        host,
        persistence: dyn_persistence,
    };
    (ctx, persistence)
}
