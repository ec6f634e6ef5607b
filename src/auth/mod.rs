//! # Authentication
//!
//! Request identity: credential resolution, sessions, the per-request
//! authorization context, password crypto, login lockout and third-party
//! auth data.

mod auth_data;
mod cache;
mod context;
pub mod crypto;
mod lockout;
mod resolver;
mod session;

pub use auth_data::{AnonymousValidator, AuthDataManager, AuthDataValidator, ProviderIdentity};
pub use cache::SessionCache;
pub use context::{Auth, UserRef};
pub use lockout::{AccountLockout, FAILED_LOGIN_COUNT, LOCKOUT_EXPIRES_AT};
pub use resolver::{AuthResolver, Credentials};
pub use session::{SessionAction, SessionManager};
