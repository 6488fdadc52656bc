#![allow(dead_code)]

pub mod builders;
pub mod db;
pub mod mail;

pub use builders::{ConsentRequestBuilder, RecipientBuilder};
pub use db::{TestApp, TestDb};
pub use mail::{token_from_email, RecordingTransport};
