pub mod booking;
pub mod event;
pub mod seat;
pub mod user;

pub use booking::{Booking, BookingStatus};
pub use event::{Event, EventStatus};
pub use seat::{Seat, SeatStatus};
pub use user::User;
