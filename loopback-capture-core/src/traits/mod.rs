pub mod endpoint;
pub mod observer;
