pub mod booking;
pub mod customer;
pub mod package;

pub use booking::{Booking, BookingStatus, SessionType};
pub use customer::Customer;
pub use package::{Package, PackageStatus};
