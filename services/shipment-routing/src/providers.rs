//! Carrier client registry
//!
//! A uniform capability interface over per-carrier HTTP integrations. The
//! registry is built once at startup from the active provider catalog and
//! keyed by provider code.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use procura_models::{ProviderCapability, ShipmentServiceProvider};

use crate::vault::{CarrierCredentials, CredentialVault};

/// Payload handed to a carrier's shipment-creation capability.
#[derive(Debug, Clone, Serialize)]
pub struct CarrierDispatch {
    pub order_id: String,
    pub company_id: String,
    pub vendor_id: String,
    pub courier_code: Option<String>,
    pub shipper_name: String,
    pub mode_of_transport: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarrierShipment {
    pub carrier_name: String,
    pub tracking_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingInfo {
    pub tracking_number: String,
    pub status: String,
    pub last_location: Option<String>,
}

#[async_trait]
pub trait CarrierClient: Send + Sync {
    fn provider_code(&self) -> &str;
    async fn health_check(&self) -> Result<()>;
    async fn create_shipment(&self, dispatch: &CarrierDispatch) -> Result<CarrierShipment>;
    async fn track_shipment(&self, tracking_number: &str) -> Result<TrackingInfo>;
    async fn check_serviceability(&self, origin: &str, destination: &str) -> Result<bool>;
}

/// Generic HTTP carrier integration speaking the aggregator JSON contract.
pub struct HttpCarrierClient {
    code: String,
    base_url: String,
    credentials: CarrierCredentials,
    client: reqwest::Client,
}

impl HttpCarrierClient {
    pub fn new(
        provider: &ShipmentServiceProvider,
        credentials: CarrierCredentials,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            code: provider.code.clone(),
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            credentials,
            client,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.credentials.api_key)
    }
}

#[derive(Debug, Deserialize)]
struct ServiceabilityResponse {
    serviceable: bool,
}

#[async_trait]
impl CarrierClient for HttpCarrierClient {
    fn provider_code(&self) -> &str {
        &self.code
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .authorized(self.client.get(format!("{}/health", self.base_url)))
            .send()
            .await
            .context("Carrier health check failed")?;
        response
            .error_for_status()
            .context("Carrier reported unhealthy")?;
        Ok(())
    }

    async fn create_shipment(&self, dispatch: &CarrierDispatch) -> Result<CarrierShipment> {
        let response = self
            .authorized(self.client.post(format!("{}/shipments", self.base_url)))
            .json(dispatch)
            .send()
            .await
            .context("Carrier shipment request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("carrier {} rejected shipment ({status}): {body}", self.code);
        }

        response
            .json::<CarrierShipment>()
            .await
            .context("Carrier returned an unparsable shipment response")
    }

    async fn track_shipment(&self, tracking_number: &str) -> Result<TrackingInfo> {
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/track/{tracking_number}", self.base_url)),
            )
            .send()
            .await
            .context("Carrier tracking request failed")?;

        response
            .error_for_status()
            .context("Carrier tracking lookup failed")?
            .json::<TrackingInfo>()
            .await
            .context("Carrier returned an unparsable tracking response")
    }

    async fn check_serviceability(&self, origin: &str, destination: &str) -> Result<bool> {
        let response = self
            .authorized(self.client.get(format!(
                "{}/serviceability?origin={origin}&destination={destination}",
                self.base_url
            )))
            .send()
            .await
            .context("Carrier serviceability request failed")?;

        let body: ServiceabilityResponse = response
            .error_for_status()
            .context("Carrier serviceability lookup failed")?
            .json()
            .await
            .context("Carrier returned an unparsable serviceability response")?;
        Ok(body.serviceable)
    }
}

/// Carrier clients keyed by provider code.
#[derive(Default)]
pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn CarrierClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn CarrierClient>) {
        self.clients
            .insert(client.provider_code().to_string(), client);
    }

    pub fn client(&self, provider_code: &str) -> Option<Arc<dyn CarrierClient>> {
        self.clients.get(provider_code).cloned()
    }

    /// Builds clients for every active catalog provider that supports
    /// shipment creation. Providers with missing credentials are skipped
    /// with a warning rather than failing startup.
    pub fn from_catalog(
        providers: &[ShipmentServiceProvider],
        vault: &dyn CredentialVault,
        timeout: Duration,
    ) -> Self {
        let mut registry = Self::new();
        for provider in providers {
            if !provider
                .capabilities
                .contains(&ProviderCapability::CreateShipment)
            {
                continue;
            }
            let credentials = match vault.resolve(provider, None) {
                Ok(credentials) => credentials,
                Err(error) => {
                    tracing::warn!(
                        provider = %provider.code,
                        %error,
                        "Skipping carrier registration, credentials unavailable"
                    );
                    continue;
                }
            };
            match HttpCarrierClient::new(provider, credentials, timeout) {
                Ok(client) => {
                    tracing::info!(provider = %provider.code, "Carrier client registered");
                    registry.register(Arc::new(client));
                }
                Err(error) => {
                    tracing::warn!(provider = %provider.code, %error, "Carrier client build failed");
                }
            }
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubCarrier(&'static str);

    #[async_trait]
    impl CarrierClient for StubCarrier {
        fn provider_code(&self) -> &str {
            self.0
        }
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
        async fn create_shipment(&self, _dispatch: &CarrierDispatch) -> Result<CarrierShipment> {
            Ok(CarrierShipment {
                carrier_name: "Stub".to_string(),
                tracking_number: "TRK-1".to_string(),
            })
        }
        async fn track_shipment(&self, tracking_number: &str) -> Result<TrackingInfo> {
            Ok(TrackingInfo {
                tracking_number: tracking_number.to_string(),
                status: "IN_TRANSIT".to_string(),
                last_location: None,
            })
        }
        async fn check_serviceability(&self, _origin: &str, _destination: &str) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_registry_lookup_by_code() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubCarrier("ship-fast")));
        assert!(registry.client("ship-fast").is_some());
        assert!(registry.client("unknown").is_none());
    }
}
