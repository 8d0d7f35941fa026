//! Domain model (IDs, task status, ledger, errors).

pub mod errors;
pub mod ids;
pub mod ledger;
pub mod state;

pub use self::errors::{ErrorKind, TallyError};
pub use self::ids::{OwnerToken, TaskId};
pub use self::ledger::{LEDGER_FORMAT_VERSION, Ledger, TaskRecord};
pub use self::state::TaskStatus;
