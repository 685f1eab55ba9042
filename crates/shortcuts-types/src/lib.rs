//! Entity model for the shortcut store.
//!
//! Plain data types only: typed identifiers, the Base root, categories,
//! shortcuts with their header/parameter children, variables, pending
//! executions and the app lock. All mutation rules live in `shortcuts-store`.

pub mod category;
pub mod execution;
pub mod ids;
pub mod lock;
pub mod shortcut;
pub mod variable;

pub use category::{insert_clamped, Base, Category, LayoutType};
pub use execution::{ExecutionRequest, PendingExecution};
pub use ids::{CategoryId, ChildId, EntityKind, ExecutionId, ShortcutId, VariableId};
pub use lock::AppLock;
pub use shortcut::{Header, HttpMethod, Parameter, RetryPolicy, Shortcut};
pub use variable::{Variable, VariableType};
