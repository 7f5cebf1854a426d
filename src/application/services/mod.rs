pub mod auth_service;

pub mod recipient_service;

pub use auth_service::{AuthService, AuthServiceImpl};
pub use recipient_service::{RecipientService, RecipientServiceImpl};
