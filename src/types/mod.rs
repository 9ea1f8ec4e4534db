mod ai;
mod auth;
mod calls;
mod chat;
mod customers;

pub use ai::*;
pub use auth::*;
pub use calls::*;
pub use chat::*;
pub use customers::*;
