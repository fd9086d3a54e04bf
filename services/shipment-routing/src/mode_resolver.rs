//! Shipment mode resolver
//!
//! Decides MANUAL versus API for one dispatch request. The resolution
//! pipeline runs over a [`ResolutionContext`] built once per request:
//! mode determination, routing-driven enablement auto-repair, the
//! enablement gate, then provider/courier resolution. The central rule is
//! that an AUTOMATIC company never silently receives a MANUAL shipment;
//! every fallback is either an explicit error or a logged, sanctioned one.

use std::sync::Arc;

use procura_database::ShippingStore;
use procura_models::{
    CompanyShipmentMode, CompanyShippingProvider, ShipmentMode, ShipmentServiceProvider,
};
use procura_utils::{ProcuraError, ProcuraResult};

/// Everything the pipeline needs to know about one dispatch request.
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub company_id: String,
    pub vendor_id: String,
    pub order_id: String,
    pub company_mode: CompanyShipmentMode,
    pub requested_mode: Option<ShipmentMode>,
    pub allow_manual_fallback: bool,
    pub explicit_provider_id: Option<String>,
    pub explicit_company_provider_id: Option<String>,
}

impl ResolutionContext {
    pub fn is_automatic(&self) -> bool {
        self.company_mode == CompanyShipmentMode::Automatic
    }

    pub fn api_explicitly_requested(&self) -> bool {
        self.requested_mode == Some(ShipmentMode::Api)
    }

    pub fn should_use_api(&self) -> bool {
        self.api_explicitly_requested() || self.is_automatic()
    }
}

/// Fully resolved API route: provider, enablement row, and courier code.
#[derive(Debug, Clone)]
pub struct ApiRoute {
    pub provider: ShipmentServiceProvider,
    pub company_provider: CompanyShippingProvider,
    pub courier_code: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ResolvedDispatch {
    /// Direct manual creation, or a sanctioned fallback carrying its reason.
    Manual { fallback_reason: Option<String> },
    Api(ApiRoute),
}

pub struct ModeResolver {
    store: Arc<dyn ShippingStore>,
}

impl ModeResolver {
    pub fn new(store: Arc<dyn ShippingStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, ctx: &ResolutionContext) -> ProcuraResult<ResolvedDispatch> {
        if !ctx.should_use_api() {
            return Ok(ResolvedDispatch::Manual {
                fallback_reason: None,
            });
        }

        let routing = self
            .store
            .active_routing(&ctx.vendor_id, &ctx.company_id)
            .await?;

        // Routing pointing at a disabled or missing enablement row is
        // configuration drift; heal it before gating.
        if let Some(routing) = &routing {
            let enabled = self
                .store
                .company_provider(&ctx.company_id, &routing.provider_id)
                .await?
                .map(|row| row.is_enabled)
                .unwrap_or(false);
            if !enabled {
                self.store
                    .enable_company_provider(&ctx.company_id, &routing.provider_id)
                    .await?;
                tracing::info!(
                    company_id = %ctx.company_id,
                    vendor_id = %ctx.vendor_id,
                    provider_id = %routing.provider_id,
                    "Auto-enabled company shipping provider referenced by vendor routing"
                );
            }
        }

        let enabled = self
            .store
            .enabled_company_providers(&ctx.company_id)
            .await?;
        if enabled.is_empty() {
            let message = if ctx.is_automatic() {
                "company shipment mode is AUTOMATIC and no shipping provider is enabled"
            } else {
                "API dispatch was requested but no shipping provider is enabled"
            };
            return Err(ProcuraError::provider_not_enabled(&ctx.company_id, message));
        }

        if ctx.explicit_provider_id.is_some() || ctx.explicit_company_provider_id.is_some() {
            return self.resolve_explicit(ctx).await;
        }

        let Some(routing) = routing else {
            return self.resolution_failure(ctx, "no active vendor shipping routing");
        };
        let Some(provider) = self.store.provider(&routing.provider_id).await? else {
            return self.resolution_failure(ctx, "vendor routing references an unknown provider");
        };
        if !provider.is_active {
            return self.resolution_failure(ctx, "vendor routing references an inactive provider");
        }
        let Some(company_provider) = self
            .store
            .company_provider(&ctx.company_id, &provider.id)
            .await?
            .filter(|row| row.is_enabled)
        else {
            return self.resolution_failure(ctx, "provider is not enabled for the company");
        };

        Ok(ResolvedDispatch::Api(ApiRoute {
            provider,
            company_provider,
            courier_code: Some(routing.primary_courier_code),
        }))
    }

    async fn resolve_explicit(&self, ctx: &ResolutionContext) -> ProcuraResult<ResolvedDispatch> {
        let (Some(provider_id), Some(company_provider_id)) = (
            ctx.explicit_provider_id.as_deref(),
            ctx.explicit_company_provider_id.as_deref(),
        ) else {
            return self.resolution_failure(
                ctx,
                "explicit dispatch requires both provider and company provider ids",
            );
        };

        let Some(provider) = self
            .store
            .provider(provider_id)
            .await?
            .filter(|p| p.is_active)
        else {
            return self.resolution_failure(ctx, "requested provider is unknown or inactive");
        };
        let Some(company_provider) = self
            .store
            .company_provider(&ctx.company_id, provider_id)
            .await?
            .filter(|row| row.is_enabled && row.id == company_provider_id)
        else {
            return self.resolution_failure(
                ctx,
                "requested company shipping provider is unknown or disabled",
            );
        };

        Ok(ResolvedDispatch::Api(ApiRoute {
            provider,
            company_provider,
            courier_code: None,
        }))
    }

    /// Gate shared by every resolution dead end: fatal for AUTOMATIC mode
    /// and explicit API requests, a logged MANUAL fallback otherwise.
    pub fn resolution_failure(
        &self,
        ctx: &ResolutionContext,
        message: &str,
    ) -> ProcuraResult<ResolvedDispatch> {
        if ctx.is_automatic() || ctx.api_explicitly_requested() {
            return Err(ProcuraError::provider_resolution_failed(
                &ctx.company_id,
                &ctx.vendor_id,
                message,
            ));
        }
        Ok(ResolvedDispatch::Manual {
            fallback_reason: Some(message.to_string()),
        })
    }

    /// Gate for a failed carrier API call. AUTOMATIC mode never falls back;
    /// other paths may, when the caller has not forbidden it.
    pub fn api_failure_fallback(
        &self,
        ctx: &ResolutionContext,
        provider_code: &str,
        error: &str,
    ) -> ProcuraResult<String> {
        if ctx.is_automatic() || !ctx.allow_manual_fallback {
            return Err(ProcuraError::api_shipment_failed(provider_code, error));
        }
        Ok(format!("carrier dispatch via {provider_code} failed: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_database::MemoryStore;
    use procura_models::{ProviderCapability, VendorShippingRouting};

    fn ctx(mode: CompanyShipmentMode, requested: Option<ShipmentMode>) -> ResolutionContext {
        ResolutionContext {
            company_id: "CMP-001".to_string(),
            vendor_id: "VND-01".to_string(),
            order_id: "ORD-1001".to_string(),
            company_mode: mode,
            requested_mode: requested,
            allow_manual_fallback: true,
            explicit_provider_id: None,
            explicit_company_provider_id: None,
        }
    }

    fn provider(id: &str, code: &str) -> ShipmentServiceProvider {
        ShipmentServiceProvider {
            id: id.to_string(),
            code: code.to_string(),
            name: "Ship Fast".to_string(),
            base_url: "https://api.shipfast.test".to_string(),
            capabilities: vec![ProviderCapability::CreateShipment],
            auth_config: "{}".to_string(),
            is_active: true,
        }
    }

    fn routing(provider_id: &str) -> VendorShippingRouting {
        VendorShippingRouting {
            id: "rt-1".to_string(),
            vendor_id: "VND-01".to_string(),
            company_id: "CMP-001".to_string(),
            provider_id: provider_id.to_string(),
            primary_courier_code: "BLUEDART".to_string(),
            secondary_courier_code: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_manual_mode_without_api_request_is_manual() {
        let store = MemoryStore::new();
        let resolver = ModeResolver::new(store);
        let resolved = resolver
            .resolve(&ctx(CompanyShipmentMode::Manual, None))
            .await
            .unwrap();
        assert!(matches!(
            resolved,
            ResolvedDispatch::Manual {
                fallback_reason: None
            }
        ));
    }

    #[tokio::test]
    async fn test_automatic_with_no_provider_is_fatal() {
        let store = MemoryStore::new();
        let resolver = ModeResolver::new(store);
        let err = resolver
            .resolve(&ctx(CompanyShipmentMode::Automatic, None))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "provider_not_enabled");
        assert_eq!(err.http_status_code(), 400);
    }

    #[tokio::test]
    async fn test_explicit_api_request_without_provider_is_fatal() {
        let store = MemoryStore::new();
        let resolver = ModeResolver::new(store);
        let err = resolver
            .resolve(&ctx(CompanyShipmentMode::Manual, Some(ShipmentMode::Api)))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "provider_not_enabled");
    }

    #[tokio::test]
    async fn test_auto_repair_enables_provider_from_routing() {
        let store = MemoryStore::new();
        store.put_provider(provider("prov-1", "ship-fast")).await.unwrap();
        store.put_routing(routing("prov-1")).await.unwrap();

        let resolver = ModeResolver::new(store.clone());
        let resolved = resolver
            .resolve(&ctx(CompanyShipmentMode::Automatic, None))
            .await
            .unwrap();

        let ResolvedDispatch::Api(route) = resolved else {
            panic!("expected an API route");
        };
        assert_eq!(route.provider.code, "ship-fast");
        assert_eq!(route.courier_code.as_deref(), Some("BLUEDART"));
        let row = store
            .company_provider("CMP-001", "prov-1")
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_enabled);

        // Repair is idempotent: resolving again reuses the same row.
        let resolved = resolver
            .resolve(&ctx(CompanyShipmentMode::Automatic, None))
            .await
            .unwrap();
        let ResolvedDispatch::Api(route_again) = resolved else {
            panic!("expected an API route");
        };
        assert_eq!(route_again.company_provider.id, row.id);
        assert_eq!(
            store.enabled_company_providers("CMP-001").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_routing_to_inactive_provider_fails_resolution() {
        let store = MemoryStore::new();
        let mut inactive = provider("prov-1", "ship-fast");
        inactive.is_active = false;
        store.put_provider(inactive).await.unwrap();
        store.put_routing(routing("prov-1")).await.unwrap();

        let resolver = ModeResolver::new(store);
        let err = resolver
            .resolve(&ctx(CompanyShipmentMode::Automatic, None))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "provider_resolution_failed");
    }

    #[tokio::test]
    async fn test_api_failure_gates() {
        let store = MemoryStore::new();
        let resolver = ModeResolver::new(store);

        // AUTOMATIC never falls back.
        let automatic = ctx(CompanyShipmentMode::Automatic, None);
        let err = resolver
            .api_failure_fallback(&automatic, "ship-fast", "invalid credentials")
            .unwrap_err();
        assert_eq!(err.error_code(), "api_shipment_failed");
        assert_eq!(err.http_status_code(), 502);

        // Explicit API on a MANUAL company may fall back unless forbidden.
        let mut requested = ctx(CompanyShipmentMode::Manual, Some(ShipmentMode::Api));
        let reason = resolver
            .api_failure_fallback(&requested, "ship-fast", "timeout")
            .unwrap();
        assert!(reason.contains("ship-fast"));

        requested.allow_manual_fallback = false;
        let err = resolver
            .api_failure_fallback(&requested, "ship-fast", "timeout")
            .unwrap_err();
        assert_eq!(err.error_code(), "api_shipment_failed");
    }
}
