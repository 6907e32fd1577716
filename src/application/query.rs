use crate::config::{BackendKind, QueryDefaults};
use crate::domain::block::parse_block_number;
use crate::domain::ports::BlockFetcher;
use crate::error::{PipelineError, Result};
use tracing::info;

/// Exclusive upper bound on the blocks one run may request.
pub const MAX_BLOCKS_AMOUNT: u32 = 20;
/// `lastBlock` value asking for the most recent block.
pub const LATEST_BLOCK_TOKEN: &str = "last";

/// Query parameters as received, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pub library: Option<String>,
    pub blocks_amount: Option<String>,
    pub last_block: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    pub library: BackendKind,
    pub blocks_amount: u32,
    pub last_block: String,
    /// `last_block` in decimal.
    pub last_block_number: u64,
}

/// Applies defaults and validates every parameter. Only the `last` token
/// touches the fetcher.
pub async fn resolve(
    params: QueryParams,
    defaults: &QueryDefaults,
    fetcher: &dyn BlockFetcher,
) -> Result<ValidatedQuery> {
    let library = match params.library.as_deref() {
        None => defaults.library,
        Some(name) => name.parse()?,
    };

    let blocks_amount = match params.blocks_amount.as_deref() {
        None => defaults.blocks_amount,
        Some(raw) => parse_blocks_amount(raw)?,
    };

    let last_block = match params.last_block {
        None => defaults.last_block.clone(),
        Some(token) if token == LATEST_BLOCK_TOKEN => {
            let latest = fetcher.latest_block_number().await?;
            info!(block = %latest, "resolved latest block");
            latest
        }
        Some(raw) => raw,
    };
    let last_block_number = parse_last_block(&last_block)?;

    if u64::from(blocks_amount) > last_block_number {
        return Err(PipelineError::Validation(format!(
            "incorrect last block number! It should be >= blocksAmount ({})",
            blocks_amount
        )));
    }

    Ok(ValidatedQuery {
        library,
        blocks_amount,
        last_block,
        last_block_number,
    })
}

fn parse_blocks_amount(raw: &str) -> Result<u32> {
    let amount: i64 = raw
        .trim()
        .parse()
        .map_err(|_| PipelineError::Validation("incorrect number of blocks!".to_string()))?;
    if amount <= 0 {
        return Err(PipelineError::Validation(
            "incorrect number of blocks!".to_string(),
        ));
    }
    if amount >= i64::from(MAX_BLOCKS_AMOUNT) {
        return Err(PipelineError::Validation(
            "too much blocks! the process will take a lot of time!".to_string(),
        ));
    }
    Ok(amount as u32)
}

fn parse_last_block(raw: &str) -> Result<u64> {
    match parse_block_number(raw) {
        Some(number) if number > 1 => Ok(number),
        _ => Err(PipelineError::Validation(
            "incorrect last block number! It should be > 1".to_string(),
        )),
    }
}
