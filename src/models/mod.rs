pub mod chat;
pub mod frame;
