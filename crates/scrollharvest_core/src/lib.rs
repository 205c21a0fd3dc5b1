pub mod checkpoint;
pub mod collect;
pub mod config;
pub mod dedupe;
pub mod doctor;
pub mod error;
pub mod extract;
pub mod idle;
pub mod page;
pub mod raw;
pub mod record;
pub mod resume;
pub mod retry;
pub mod state;
pub mod webdriver;

pub use collect::{CancelToken, CollectionLoop, RunOutcome};
pub use error::HarvestError;
pub use page::PageAdapter;
pub use state::{CollectionState, RunStatus};
