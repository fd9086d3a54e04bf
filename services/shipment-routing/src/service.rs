//! Shipment dispatch service
//!
//! Runs the mode resolution pipeline, drives the carrier client for API
//! dispatches, and keeps the order's dispatch fields in sync with the
//! shipment record: both always share the shipment id as
//! `shipmentReferenceNumber`.

use std::sync::Arc;

use chrono::Utc;
use validator::Validate;

use procura_database::{EntityStore, ShippingStore};
use procura_models::{
    DispatchOutcome, DispatchRequest, DispatchUpdate, EntitySnapshot, EntityType, Shipment,
    ShipmentMode, ShipmentStatus, UnifiedStatus,
};
use procura_utils::{ProcuraError, ProcuraResult};

use crate::mode_resolver::{ApiRoute, ModeResolver, ResolutionContext, ResolvedDispatch};
use crate::providers::{CarrierDispatch, ProviderRegistry};

pub struct ShipmentService {
    store: Arc<dyn ShippingStore>,
    entities: Arc<dyn EntityStore>,
    resolver: ModeResolver,
    registry: Arc<ProviderRegistry>,
}

impl ShipmentService {
    pub fn new(
        store: Arc<dyn ShippingStore>,
        entities: Arc<dyn EntityStore>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            resolver: ModeResolver::new(store.clone()),
            store,
            entities,
            registry,
        }
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> ProcuraResult<DispatchOutcome> {
        request.validate()?;

        let order = self
            .entities
            .snapshot(EntityType::Order, &request.pr_id)
            .await?
            .ok_or_else(|| ProcuraError::not_found(format!("order {}", request.pr_id)))?;

        let data = &request.shipment_data;
        let ctx = ResolutionContext {
            company_id: order.company_id.clone(),
            vendor_id: request.vendor_id.clone(),
            order_id: request.pr_id.clone(),
            company_mode: self.store.company_shipment_mode(&order.company_id).await?,
            requested_mode: data.shipment_mode,
            allow_manual_fallback: data.allow_manual_fallback.unwrap_or(true),
            explicit_provider_id: data.provider_id.clone(),
            explicit_company_provider_id: data.company_shipping_provider_id.clone(),
        };

        match self.resolver.resolve(&ctx).await? {
            ResolvedDispatch::Manual { fallback_reason } => {
                self.create_manual(&ctx, &order, &request, fallback_reason)
                    .await
            }
            ResolvedDispatch::Api(route) => self.create_api(&ctx, &order, &request, route).await,
        }
    }

    pub async fn shipment(&self, shipment_id: &str) -> ProcuraResult<Shipment> {
        self.store
            .shipment(shipment_id)
            .await?
            .ok_or_else(|| ProcuraError::not_found(format!("shipment {shipment_id}")))
    }

    pub async fn shipments_for_order(&self, order_id: &str) -> ProcuraResult<Vec<Shipment>> {
        self.store.shipments_for_order(order_id).await
    }

    async fn create_api(
        &self,
        ctx: &ResolutionContext,
        order: &EntitySnapshot,
        request: &DispatchRequest,
        route: ApiRoute,
    ) -> ProcuraResult<DispatchOutcome> {
        let Some(client) = self.registry.client(&route.provider.code) else {
            return match self
                .resolver
                .resolution_failure(ctx, "no carrier client registered for provider")?
            {
                ResolvedDispatch::Manual { fallback_reason } => {
                    self.create_manual(ctx, order, request, fallback_reason).await
                }
                ResolvedDispatch::Api(_) => unreachable!("resolution failure never yields API"),
            };
        };

        let shipment_id = Shipment::generate_id();
        let dispatch = CarrierDispatch {
            order_id: ctx.order_id.clone(),
            company_id: ctx.company_id.clone(),
            vendor_id: ctx.vendor_id.clone(),
            courier_code: route.courier_code.clone(),
            shipper_name: request.shipment_data.shipper_name.clone(),
            mode_of_transport: request.shipment_data.mode_of_transport.clone(),
        };

        let carrier = match client.create_shipment(&dispatch).await {
            Ok(carrier) => carrier,
            Err(error) => {
                let reason = self.resolver.api_failure_fallback(
                    ctx,
                    &route.provider.code,
                    &format!("{error:#}"),
                )?;
                return self.create_manual(ctx, order, request, Some(reason)).await;
            }
        };

        let shipment = Shipment {
            id: shipment_id,
            company_id: ctx.company_id.clone(),
            order_id: ctx.order_id.clone(),
            vendor_id: ctx.vendor_id.clone(),
            shipment_mode: ShipmentMode::Api,
            shipment_status: ShipmentStatus::Created,
            carrier_name: Some(carrier.carrier_name.clone()),
            tracking_number: Some(carrier.tracking_number.clone()),
            courier_code: route.courier_code,
            provider_id: Some(route.provider.id.clone()),
            company_shipping_provider_id: Some(route.company_provider.id.clone()),
            created_at: Utc::now(),
        };
        self.store.create_shipment(shipment.clone()).await?;
        self.record_order_dispatch(order, &shipment).await?;

        tracing::info!(
            company_id = %ctx.company_id,
            order_id = %ctx.order_id,
            shipment_id = %shipment.id,
            provider = %route.provider.code,
            tracking_number = %carrier.tracking_number,
            "API shipment created"
        );

        Ok(DispatchOutcome {
            shipment_mode: ShipmentMode::Api,
            shipment_id: shipment.id,
            carrier_name: shipment.carrier_name,
            tracking_number: shipment.tracking_number,
        })
    }

    async fn create_manual(
        &self,
        ctx: &ResolutionContext,
        order: &EntitySnapshot,
        request: &DispatchRequest,
        fallback_reason: Option<String>,
    ) -> ProcuraResult<DispatchOutcome> {
        if let Some(reason) = &fallback_reason {
            tracing::warn!(
                company_id = %ctx.company_id,
                order_id = %ctx.order_id,
                reason,
                "Falling back to MANUAL shipment"
            );
        }

        let shipment = Shipment {
            id: Shipment::generate_id(),
            company_id: ctx.company_id.clone(),
            order_id: ctx.order_id.clone(),
            vendor_id: ctx.vendor_id.clone(),
            shipment_mode: ShipmentMode::Manual,
            shipment_status: ShipmentStatus::InTransit,
            carrier_name: Some(request.shipment_data.shipper_name.clone()),
            tracking_number: None,
            courier_code: None,
            provider_id: None,
            company_shipping_provider_id: None,
            created_at: Utc::now(),
        };
        self.store.create_shipment(shipment.clone()).await?;
        self.record_order_dispatch(order, &shipment).await?;

        tracing::info!(
            company_id = %ctx.company_id,
            order_id = %ctx.order_id,
            shipment_id = %shipment.id,
            "Manual shipment created"
        );

        Ok(DispatchOutcome {
            shipment_mode: ShipmentMode::Manual,
            shipment_id: shipment.id,
            carrier_name: shipment.carrier_name,
            tracking_number: None,
        })
    }

    /// Writes dispatch fields back onto the order. The shipment id doubles
    /// as the order's shipment reference number.
    async fn record_order_dispatch(
        &self,
        order: &EntitySnapshot,
        shipment: &Shipment,
    ) -> ProcuraResult<()> {
        self.entities
            .record_dispatch(
                order.entity_type,
                &order.entity_id,
                &DispatchUpdate {
                    carrier_name: shipment.carrier_name.clone(),
                    tracking_number: shipment.tracking_number.clone(),
                    shipment_reference_number: shipment.id.clone(),
                    dispatch_status: UnifiedStatus::Dispatched,
                },
            )
            .await
    }
}
