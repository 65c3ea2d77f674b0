//! Azure Key Vault key resolution
//!
//! Secrets are fetched over the Key Vault REST API with a bearer token. The
//! token comes from an explicit [`TokenCredential`] handed to the client at
//! construction time; there is no process-wide login state.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{ErrorCategory, ErrorKind, NbcryptError, Result};
use crate::key_source::{KeyEncoding, KeyResolver};

/// Resource (audience) that Key Vault access tokens are issued for.
pub const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";

/// Default vault URL; `{vault}` is replaced with the record's `key_vault_name`.
pub const DEFAULT_VAULT_URL_TEMPLATE: &str = "https://{vault}.vault.azure.net";

/// Key Vault REST API version used for secret reads.
pub const API_VERSION: &str = "7.4";

/// Default timeout for a single secret request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of bearer tokens for Key Vault requests.
pub trait TokenCredential {
    /// Obtain an access token valid for `resource`.
    fn access_token(&self, resource: &str) -> Result<Zeroizing<String>>;
}

/// A pre-acquired token, e.g. from `AZURE_ACCESS_TOKEN`.
pub struct StaticTokenCredential {
    token: Zeroizing<String>,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
        }
    }
}

impl TokenCredential for StaticTokenCredential {
    fn access_token(&self, _resource: &str) -> Result<Zeroizing<String>> {
        if self.token.trim().is_empty() {
            return Err(resolution_error(ErrorCategory::User, "access token is empty"));
        }
        Ok(self.token.clone())
    }
}

/// Name of the Azure CLI executable; on Windows it is installed as a batch
/// wrapper that `Command` will not find without the extension.
#[cfg(windows)]
pub const AZURE_CLI_PROGRAM: &str = "az.cmd";
#[cfg(not(windows))]
pub const AZURE_CLI_PROGRAM: &str = "az";

/// Borrows the login of the Azure CLI by running
/// `az account get-access-token`.
pub struct AzureCliCredential {
    program: PathBuf,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self::with_program(AZURE_CLI_PROGRAM)
    }

    /// Use a specific `az` executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliAccessToken {
    access_token: String,
}

impl TokenCredential for AzureCliCredential {
    fn access_token(&self, resource: &str) -> Result<Zeroizing<String>> {
        debug!(program = %self.program.display(), "requesting access token from Azure CLI");

        let output = Command::new(&self.program)
            .args(["account", "get-access-token", "--output", "json", "--resource"])
            .arg(resource)
            .output()
            .map_err(|e| {
                NbcryptError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::KeyResolutionFailed,
                    format!("failed to run {}", self.program.display()),
                    e,
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(resolution_error(
                ErrorCategory::User,
                format!(
                    "Azure CLI could not provide an access token ({}): {}",
                    output.status,
                    stderr.trim()
                ),
            ));
        }

        let stdout = Zeroizing::new(output.stdout);
        let parsed: CliAccessToken = serde_json::from_slice(&stdout).map_err(|e| {
            NbcryptError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::KeyResolutionFailed,
                "unexpected output from Azure CLI",
                e,
            )
        })?;

        Ok(Zeroizing::new(parsed.access_token))
    }
}

/// Settings for [`KeyVaultClient`].
#[derive(Debug, Clone)]
pub struct KeyVaultConfig {
    /// Vault base URL; `{vault}`, if present, is replaced by the vault name.
    pub vault_url_template: String,
    pub api_version: String,
    pub timeout: Duration,
    /// Honour `HTTPS_PROXY` and friends from the environment.
    pub use_system_proxy: bool,
}

impl Default for KeyVaultConfig {
    fn default() -> Self {
        Self {
            vault_url_template: DEFAULT_VAULT_URL_TEMPLATE.to_string(),
            api_version: API_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            use_system_proxy: true,
        }
    }
}

#[derive(Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ServiceError,
}

#[derive(Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Minimal Key Vault secrets client.
pub struct KeyVaultClient {
    http: Client,
    credential: Box<dyn TokenCredential>,
    config: KeyVaultConfig,
}

impl KeyVaultClient {
    pub fn new(credential: Box<dyn TokenCredential>, config: KeyVaultConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("nbcrypt/", env!("CARGO_PKG_VERSION")));
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        let http = builder.build().map_err(|e| {
            NbcryptError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::KeyResolutionFailed,
                "failed to build HTTP client",
                e,
            )
        })?;

        Ok(Self {
            http,
            credential,
            config,
        })
    }

    /// URL of the secret `name` in `vault`, including the API version query.
    pub fn secret_url(&self, vault: &str, name: &str) -> Result<Url> {
        validate_name("key_vault_name", vault)?;
        validate_name("secret_name", name)?;

        let base = self.config.vault_url_template.replace("{vault}", vault);
        let mut url = Url::parse(&base).map_err(|e| {
            NbcryptError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::KeyResolutionFailed,
                format!("invalid vault URL '{}'", base),
                e,
            )
        })?;

        url.path_segments_mut()
            .map_err(|()| {
                resolution_error(
                    ErrorCategory::User,
                    format!("vault URL '{}' cannot carry a path", base),
                )
            })?
            .pop_if_empty()
            .extend(["secrets", name]);
        url.query_pairs_mut()
            .append_pair("api-version", &self.config.api_version);

        Ok(url)
    }

    /// Fetch the current version of a secret's value.
    pub fn get_secret(&self, vault: &str, name: &str) -> Result<Zeroizing<String>> {
        let url = self.secret_url(vault, name)?;
        let token = self.credential.access_token(KEY_VAULT_RESOURCE)?;

        debug!(%url, "fetching secret from Key Vault");

        let response = self
            .http
            .get(url)
            .bearer_auth(token.as_str())
            .send()
            .map_err(|e| {
                NbcryptError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::KeyResolutionFailed,
                    format!("request to vault '{}' failed", vault),
                    e,
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().map_err(|e| {
                NbcryptError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::KeyResolutionFailed,
                    "failed to read Key Vault response",
                    e,
                )
            })?;
            let detail = match serde_json::from_slice::<ErrorEnvelope>(&body) {
                Ok(envelope) => format!("{}: {}", envelope.error.code, envelope.error.message),
                Err(_) => String::from_utf8_lossy(&body).trim().to_string(),
            };
            let category = if status.is_client_error() {
                ErrorCategory::User
            } else {
                ErrorCategory::Internal
            };
            return Err(resolution_error(
                category,
                format!(
                    "Key Vault returned {} for secret '{}' in vault '{}': {}",
                    status, name, vault, detail
                ),
            ));
        }

        let bundle: SecretBundle = response.json().map_err(|e| {
            NbcryptError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::KeyResolutionFailed,
                "unexpected Key Vault response body",
                e,
            )
        })?;

        bundle.value.map(Zeroizing::new).ok_or_else(|| {
            resolution_error(
                ErrorCategory::Internal,
                format!("secret '{}' in vault '{}' has no value", name, vault),
            )
        })
    }
}

/// Resolves record keys from Azure Key Vault secrets.
pub struct AzureKeyVaultResolver {
    client: KeyVaultClient,
    encoding: KeyEncoding,
}

impl AzureKeyVaultResolver {
    pub fn new(client: KeyVaultClient, encoding: KeyEncoding) -> Self {
        Self { client, encoding }
    }
}

impl KeyResolver for AzureKeyVaultResolver {
    fn resolve_key(&mut self, vault: &str, secret: &str) -> Result<Zeroizing<Vec<u8>>> {
        let value = self.client.get_secret(vault, secret)?;
        self.encoding.decode(&value)
    }
}

// Vault and secret names are restricted to ASCII alphanumerics and '-'.
fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(resolution_error(ErrorCategory::User, format!("{} is empty", field)));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(resolution_error(
            ErrorCategory::User,
            format!(
                "{} '{}' may only contain ASCII letters, digits and '-'",
                field, value
            ),
        ));
    }
    Ok(())
}

fn resolution_error(category: ErrorCategory, msg: impl Into<String>) -> NbcryptError {
    NbcryptError::with_kind(category, ErrorKind::KeyResolutionFailed, msg)
}
