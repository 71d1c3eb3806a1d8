pub mod withdraw_withheld;
pub use withdraw_withheld::*;

pub mod payout;
pub use payout::*;
