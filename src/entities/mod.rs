pub mod adoption_request;
pub mod appointment;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod pet;
pub mod product;
pub mod surrender_request;
pub mod user;

pub use adoption_request::RequestStatus;
pub use appointment::{AppointmentStatus, ServiceType};
pub use order::{OrderStatus, PaymentStatus};
pub use pet::PetStatus;
pub use product::StockStatus;
pub use user::UserRole;
