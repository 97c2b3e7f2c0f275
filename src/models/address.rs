//! Domain types produced by the Aggregator.

use std::num::ParseFloatError;

use alloy::primitives::U256;
use alloy::primitives::utils::{UnitsError, format_units};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Unit name for gas prices.
pub const GWEI: &str = "gwei";

/// Unit name for balances.
pub const ETHER: &str = "ether";

/// A wei amount that could not be rendered in a display unit.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("cannot format wei as {unit}: {source}")]
    Units {
        unit: &'static str,
        #[source]
        source: UnitsError,
    },

    #[error("formatted {unit} amount is not a number: {source}")]
    Parse {
        unit: &'static str,
        #[source]
        source: ParseFloatError,
    },
}

/// Gas price in wei with its gwei rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct GasPrice {
    pub wei: U256,
    pub gwei: f64,
}

impl GasPrice {
    pub fn from_wei(wei: U256) -> Result<Self, ConversionError> {
        Ok(Self {
            wei,
            gwei: wei_to_unit(wei, GWEI)?,
        })
    }
}

/// Account balance in wei with its ether rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub wei: U256,
    pub ether: f64,
}

impl Balance {
    pub fn from_wei(wei: U256) -> Result<Self, ConversionError> {
        Ok(Self {
            wei,
            ether: wei_to_unit(wei, ETHER)?,
        })
    }
}

/// Everything the API reports about an address, captured at one instant.
///
/// Only the Aggregator constructs this, and only once all three upstream
/// values are present.
#[derive(Debug, Clone)]
pub struct AddressInfo {
    address: String,
    gas_price: GasPrice,
    current_block: u64,
    balance: Balance,
    timestamp: DateTime<Utc>,
}

impl AddressInfo {
    pub(crate) fn new(
        address: String,
        gas_price_wei: U256,
        current_block: u64,
        balance_wei: U256,
    ) -> Result<Self, ConversionError> {
        Ok(Self {
            address,
            gas_price: GasPrice::from_wei(gas_price_wei)?,
            current_block,
            balance: Balance::from_wei(balance_wei)?,
            timestamp: Utc::now(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn gas_price(&self) -> &GasPrice {
        &self.gas_price
    }

    pub fn current_block(&self) -> u64 {
        self.current_block
    }

    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Render `wei` in `unit` (`"gwei"`, `"ether"`, ...) as the nearest `f64`.
///
/// alloy formats the exact decimal quotient, so rounding happens once, in
/// the final parse.
pub fn wei_to_unit(wei: U256, unit: &'static str) -> Result<f64, ConversionError> {
    let decimal =
        format_units(wei, unit).map_err(|source| ConversionError::Units { unit, source })?;
    decimal
        .parse()
        .map_err(|source| ConversionError::Parse { unit, source })
}
