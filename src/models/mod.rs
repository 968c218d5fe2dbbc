pub mod api;
pub mod credential;
pub mod history;
pub mod job;
