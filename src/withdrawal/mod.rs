pub mod service;
pub mod status;

pub use service::{WithdrawalService, operator_keyboard};
pub use status::WithdrawalStatus;
