pub mod auth;

pub mod recipient;

pub mod user;
