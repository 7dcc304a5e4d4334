use super::{Handler, HandlerContext, HandlerError, HandlerOutcome, Params};
use crate::entities::ThumbnailMapping;
use crate::key::derive_domain_key;
use async_trait::async_trait;
use omidx_sdk::objects::Event;

/// Keeps the current thumbnail of each market.
///
/// Consumes `ImageUpdated` logs. `image_hash` is overwritten on every event;
/// `changer` only when the event carries one, since older deployments of the
/// contract do not emit it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailMappingHandler;

#[async_trait]
impl Handler for ThumbnailMappingHandler {
    fn name(&self) -> &'static str {
        "ThumbnailMapping"
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let params = Params::new(event);
        let market_address = params.address("marketAddress")?;
        let image_hash = params.bytes("image_hash")?;
        let changer = params.optional_address("changer")?;

        let key = derive_domain_key(market_address.as_slice());
        let saved = ctx
            .upsert(
                key,
                |_| ThumbnailMapping::new(market_address),
                |mapping: &mut ThumbnailMapping| {
                    mapping.image_hash = Some(image_hash);
                    if let Some(changer) = changer {
                        mapping.changer = Some(changer);
                    }
                },
            )
            .await?;
        Ok(HandlerOutcome::Saved(saved))
    }
}
