pub mod clock;
pub mod date_status;
pub mod error;
pub mod notifications;
pub mod presentation;
pub mod scheduler;
pub mod service;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod todo;

pub use crate::error::{Result, TodoError};
pub use crate::scheduler::{NotificationScheduler, SchedulerConfig, SchedulerEvent};
pub use crate::service::{TodoService, TodoServiceBuilder};
pub use crate::todo::{NewTodo, Todo, TodoId, TodoPatch};
