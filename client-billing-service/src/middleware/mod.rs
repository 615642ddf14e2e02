pub mod operator;
pub mod user_id;

pub use operator::require_operator;
pub use user_id::UserId;
