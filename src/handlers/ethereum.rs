//! Address lookup endpoint.
//!
//! # Endpoints
//!
//! - `GET /api/ethereum/{address}` - gas price, latest block and balance
//!
//! ```json
//! {
//!   "status": "success",
//!   "data": {
//!     "address": "0x742d35cc6634c0532925a3b844bc454e4438f44e",
//!     "gasPrice": {"wei": "12000000000", "gwei": 12.0},
//!     "currentBlock": 19000000,
//!     "balance": {"wei": "2500000000000000000", "ether": 2.5},
//!     "timestamp": "2024-01-15T10:30:00Z"
//!   }
//! }
//! ```

use axum::Json;
use axum::extract::{Extension, Path, State};
use tracing::{Span, info, instrument};

use crate::context::RequestContext;
use crate::error::AppResult;
use crate::middleware::Principal;
use crate::models::{AddressInfoResponse, ApiResponse};
use crate::state::AppState;
use crate::validation::validate_address;

/// Validate the path address, then aggregate the three upstream reads under
/// the request's deadline.
#[instrument(skip(state, ctx, principal), fields(principal = tracing::field::Empty))]
pub async fn get_address_info(
    State(state): State<AppState>,
    Path(address): Path<String>,
    ctx: Option<Extension<RequestContext>>,
    principal: Option<Extension<Principal>>,
) -> AppResult<Json<ApiResponse<AddressInfoResponse>>> {
    let address = validate_address(&address)?;

    if let Some(Extension(principal)) = &principal {
        Span::current().record("principal", principal.as_str());
    }
    // Outside the Timeout stage (e.g. direct handler tests) there is no deadline
    let ctx = ctx.map(|Extension(ctx)| ctx).unwrap_or_default();

    let info = state.aggregator.get_address_info(&ctx, &address).await?;
    info!(
        address = %info.address(),
        block = info.current_block(),
        "Address info retrieved"
    );

    Ok(Json(ApiResponse::success(AddressInfoResponse::from(&info))))
}
