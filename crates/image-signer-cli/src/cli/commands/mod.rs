mod dispatch;
pub mod sign;

pub use dispatch::dispatch;
