// Thin re-export module: the block type, derived balance state, validity
// checks and the ledger live in their own files under `blockchain/`.

pub mod block;
pub mod ledger;
pub mod state;
pub mod validation;

pub use block::*;
pub use ledger::*;
pub use state::*;
pub use validation::*;
