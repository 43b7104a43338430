//! Order lifecycle: persistence, creation saga, cancellation window,
//! compensation queue

pub mod compensation;
pub mod manager;
pub mod store;
pub mod window;

pub use compensation::{CompensationIntent, CompensationSweeper};
pub use manager::{OrdersManager, SubmitReceipt};
pub use store::OrderStore;
