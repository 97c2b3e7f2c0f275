mod address;
mod api;

pub use address::{AddressInfo, Balance, ConversionError, ETHER, GWEI, GasPrice, wei_to_unit};
pub use api::{
    AddressInfoResponse, ApiResponse, BalanceResponse, GasPriceResponse, HealthResponse,
    format_timestamp,
};
