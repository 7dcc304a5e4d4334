use super::{DecodeError, Handler, HandlerContext, HandlerError, HandlerOutcome, Params};
use crate::entities::PredictionAdded;
use crate::key::EventKeyScheme;
use async_trait::async_trait;
use omidx_sdk::objects::Event;

pub const PREDICTION_ADDED_SIGNATURE: &str =
    "PredictionAdded(address,uint16,address,bytes32[],bytes32)";

/// Records every agent prediction as its own `PredictionAdded` entity.
///
/// With [`EventKeyScheme::TxLog`] the entity also stores the log's block
/// number and transaction hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredictionAddedHandler {
    key_scheme: EventKeyScheme,
}

impl PredictionAddedHandler {
    pub fn new(key_scheme: EventKeyScheme) -> Self {
        Self { key_scheme }
    }
}

#[async_trait]
impl Handler for PredictionAddedHandler {
    fn name(&self) -> &'static str {
        "PredictionAdded"
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let params = Params::new(event);
        let (block_number, transaction_hash) = match self.key_scheme {
            EventKeyScheme::ChainBlockLog => (None, None),
            EventKeyScheme::TxLog => {
                let block_number =
                    i64::try_from(event.block_number).map_err(|_| DecodeError::Overflow {
                        signature: event.signature.clone(),
                        param: "blockNumber".to_string(),
                        value: event.block_number,
                    })?;
                (Some(block_number), Some(event.transaction_hash.clone()))
            }
        };
        let entity = PredictionAdded {
            id: self.key_scheme.derive(event),
            market_address: params.address("marketAddress")?,
            estimated_probability_bps: params.int("estimatedProbabilityBps")?,
            publisher_address: params.address("publisherAddress")?,
            tx_hashes: params.bytes_array("txHashes")?,
            ipfs_hash: params.bytes("ipfsHash")?,
            block_number,
            transaction_hash,
        };
        Ok(HandlerOutcome::Saved(ctx.save(&entity).await?))
    }
}
