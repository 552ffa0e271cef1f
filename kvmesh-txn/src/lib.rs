pub mod core;
pub mod merge;
pub mod push;
pub mod role;
pub mod transaction;

pub use core::{Collaborator, Core, Destination, Outbound};
pub use push::{schedule_push, PushBatch};
pub use role::{Mode, RoleController};
pub use transaction::{ClientHandle, Transaction, TransactionTable, TxnEvent};
