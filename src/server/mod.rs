pub mod context;
pub mod file_api;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod runtime;
pub mod search;
pub mod terminal_registry;

pub use context::{ApiError, AppContext};
pub use file_api::{resolve_sandboxed_path, FileApiError, FileEntry, FileStat};
pub use router::build_router;
pub use runtime::{RunningServer, RuntimeError, ServerRuntime, ServiceStatus};
pub use search::{search_workspace, SearchMatch, MAX_SEARCH_RESULTS};
pub use terminal_registry::{TerminalError, TerminalManager, OUTPUT_BUFFER_CHUNKS};
