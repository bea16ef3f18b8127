pub mod cipher;
pub mod client;
pub mod decoder;
pub mod messages;
