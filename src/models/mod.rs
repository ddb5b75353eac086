pub mod category;
pub mod event;
pub mod user;

pub use category::{Category, CategoryId};
pub use event::{Event, EventChanges, EventId, EventResponse, EventStatus, NewEvent};
pub use user::{User, UserId};
