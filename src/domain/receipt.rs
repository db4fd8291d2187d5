use {
    super::error::PipelineError,
    super::provider::Platform,
    super::store::BoxFuture,
    sha2::{Digest, Sha256},
};

/// What the store says about a client-submitted receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedReceipt {
    pub transaction_id: String,
    pub original_transaction_id: String,
}

/// Receipt authenticity check against the issuing store.
pub trait ReceiptValidator: Send + Sync {
    fn validate<'a>(
        &'a self,
        receipt: &'a str,
        product_id: &'a str,
        platform: Platform,
    ) -> BoxFuture<'a, Result<ValidatedReceipt, PipelineError>>;
}

/// Accepts every receipt without a store round-trip.
///
/// A storeB receipt is the purchase token itself, so it doubles as the
/// transaction and lineage id and matches later webhooks. Other receipts
/// are identified by their SHA-256 digest.
#[derive(Debug, Clone, Default)]
pub struct UnverifiedReceiptValidator;

impl ReceiptValidator for UnverifiedReceiptValidator {
    fn validate<'a>(
        &'a self,
        receipt: &'a str,
        _product_id: &'a str,
        platform: Platform,
    ) -> BoxFuture<'a, Result<ValidatedReceipt, PipelineError>> {
        Box::pin(async move {
            let receipt = receipt.trim();
            if receipt.is_empty() {
                return Err(PipelineError::Validation("receipt is empty".into()));
            }
            let id = match platform {
                Platform::StoreB => receipt.to_string(),
                Platform::StoreA | Platform::Web => {
                    format!("rcpt_{}", hex::encode(Sha256::digest(receipt.as_bytes())))
                }
            };
            Ok(ValidatedReceipt {
                transaction_id: id.clone(),
                original_transaction_id: id,
            })
        })
    }
}
