pub mod http;
pub mod settings;
pub mod storage;
