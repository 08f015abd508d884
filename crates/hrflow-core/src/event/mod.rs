//! Event distribution for workflow lifecycle notifications.

pub mod bus;
