//! Credential vault seam
//!
//! Carrier credentials never live in the provider catalog; the catalog's
//! `auth_config` blob is opaque and only a vault implementation turns a
//! credentials reference into usable secrets.

use procura_models::ShipmentServiceProvider;
use procura_utils::{ProcuraError, ProcuraResult};

#[derive(Debug, Clone)]
pub struct CarrierCredentials {
    pub api_key: String,
    pub api_secret: Option<String>,
}

pub trait CredentialVault: Send + Sync {
    fn resolve(
        &self,
        provider: &ShipmentServiceProvider,
        credentials_ref: Option<&str>,
    ) -> ProcuraResult<CarrierCredentials>;
}

/// Environment-backed vault: secrets live under
/// `PROCURA_CARRIER_<REF>_API_KEY` / `..._API_SECRET`, where `<REF>` is the
/// company's credentials reference or the provider code.
pub struct EnvCredentialVault;

impl CredentialVault for EnvCredentialVault {
    fn resolve(
        &self,
        provider: &ShipmentServiceProvider,
        credentials_ref: Option<&str>,
    ) -> ProcuraResult<CarrierCredentials> {
        let reference = credentials_ref
            .unwrap_or(&provider.code)
            .to_uppercase()
            .replace('-', "_");
        let key_var = format!("PROCURA_CARRIER_{reference}_API_KEY");
        let api_key = std::env::var(&key_var).map_err(|_| {
            ProcuraError::Configuration {
                message: format!(
                    "missing credentials for provider {}: {key_var} is not set",
                    provider.code
                ),
            }
        })?;
        let api_secret = std::env::var(format!("PROCURA_CARRIER_{reference}_API_SECRET")).ok();

        Ok(CarrierCredentials {
            api_key,
            api_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(code: &str) -> ShipmentServiceProvider {
        ShipmentServiceProvider {
            id: "prov-1".to_string(),
            code: code.to_string(),
            name: "Ship Fast".to_string(),
            base_url: "https://api.shipfast.test".to_string(),
            capabilities: vec![],
            auth_config: "{}".to_string(),
            is_active: true,
        }
    }

    // Single test: env mutation is process-global and must not run in
    // parallel with other env-touching assertions.
    #[test]
    fn test_env_vault_resolution() {
        let err = EnvCredentialVault
            .resolve(&provider("vault-test-carrier"), None)
            .unwrap_err();
        assert_eq!(err.error_code(), "configuration_error");

        std::env::set_var("PROCURA_CARRIER_VAULT_TEST_CARRIER_API_KEY", "key-123");
        let creds = EnvCredentialVault
            .resolve(&provider("vault-test-carrier"), None)
            .unwrap();
        assert_eq!(creds.api_key, "key-123");
        assert_eq!(creds.api_secret, None);

        std::env::set_var("PROCURA_CARRIER_ACME_REF_API_KEY", "ref-key");
        let creds = EnvCredentialVault
            .resolve(&provider("vault-test-carrier"), Some("acme-ref"))
            .unwrap();
        assert_eq!(creds.api_key, "ref-key");

        std::env::remove_var("PROCURA_CARRIER_VAULT_TEST_CARRIER_API_KEY");
        std::env::remove_var("PROCURA_CARRIER_ACME_REF_API_KEY");
    }
}
