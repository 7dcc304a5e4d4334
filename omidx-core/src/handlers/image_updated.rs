use super::{Handler, HandlerContext, HandlerError, HandlerOutcome, Params};
use crate::entities::ImageUpdated;
use crate::key::EventKeyScheme;
use async_trait::async_trait;
use omidx_sdk::objects::Event;

pub const IMAGE_UPDATED_SIGNATURE: &str = "ImageUpdated(address,bytes32,address)";

/// Records every thumbnail change as its own `ImageUpdated` entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageUpdatedHandler {
    key_scheme: EventKeyScheme,
}

impl ImageUpdatedHandler {
    pub fn new(key_scheme: EventKeyScheme) -> Self {
        Self { key_scheme }
    }
}

#[async_trait]
impl Handler for ImageUpdatedHandler {
    fn name(&self) -> &'static str {
        "ImageUpdated"
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let params = Params::new(event);
        let entity = ImageUpdated {
            id: self.key_scheme.derive(event),
            market_address: params.address("marketAddress")?,
            image_hash: params.bytes("image_hash")?,
            changer: params.address("changer")?,
        };
        Ok(HandlerOutcome::Saved(ctx.save(&entity).await?))
    }
}
