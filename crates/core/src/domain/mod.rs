pub mod entity;
pub mod execution;
pub mod intent;
pub mod notification;
