// ABOUTME: Image fixup and content-copy engine.
// ABOUTME: Resolution strategies, manifest walking, bounded scheduling, and registry capability traits.

mod copier;
mod error;
pub mod events;
pub mod fixup;
mod local_content;
pub mod progress;
pub mod scheduler;
mod traits;
mod walker;

pub use copier::{ACTION_COPY, ACTION_MOUNTED, ACTION_SKIP_FOREIGN, DISTRIBUTION_SOURCE_LABEL};
pub use error::RemoteError;
pub use events::{EventCallback, FixupEvent, FixupEventType};
pub use fixup::{FixupError, FixupOptions, fixup_bundle};
pub use local_content::LocalContentFetcher;
pub use progress::{DescriptorProgressSnapshot, ProgressSnapshot};
pub use scheduler::{Dependency, ScheduleError, Scheduler, TaskError, task_error, when_all};
pub use traits::{ContentStream, ContentWriter, Fetcher, MAX_MANIFEST_SIZE, Pusher, Resolver, fetch_all};
pub use walker::{ACTION_SKIP_DUPLICATE, ACTION_SKIP_PRESENT};
