//! Read-only view of who is signed in.
//!
//! Token storage lives outside this crate; the data layer only needs to know
//! whether a user is logged in (background jobs skip work when nobody is) and
//! which user that is.

pub mod session;

pub use session::{Session, SessionData};

use uuid::Uuid;

pub trait AuthContext: Send + Sync {
    /// The signed-in user, if any.
    fn current_user_id(&self) -> Option<Uuid>;

    fn is_logged_in(&self) -> bool {
        self.current_user_id().is_some()
    }
}
