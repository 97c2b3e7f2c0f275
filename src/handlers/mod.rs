mod ethereum;
mod health;

pub use ethereum::get_address_info;
pub use health::{health_check, ping};
