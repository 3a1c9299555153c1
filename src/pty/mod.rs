pub mod session;

pub use session::PtySession;
