//! Background and domain services layered on top of the core stores.

pub mod booking_service;
pub mod housekeeping;
