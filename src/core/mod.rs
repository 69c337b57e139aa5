pub mod chat;
pub mod completion;
pub mod controller;
pub mod error;
pub mod prober;
pub mod services;
pub mod traits;
