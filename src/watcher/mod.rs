//! Folder watching and change debouncing.
//!
//! # Architecture
//!
//! ```text
//! FolderChangeSource (notify: native or polling)
//!   - filters paths against WatchedFolder
//!   - emits ChangeEvent / WatchError
//!         |
//!      Debouncer (shared DelayQueue, one timer per path)
//!         |
//!      Settled(path) -> reload worker
//! ```

mod debouncer;
mod error;
mod event;
mod source;

pub use debouncer::{Debouncer, Settled};
pub use error::WatchError;
pub use event::{ChangeEvent, ChangeKind, WatchedFolder};
pub use source::{ActiveBackend, FolderChangeSource, SourceEvent, WatchBackend};
