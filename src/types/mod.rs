mod chat;

pub use chat::*;
