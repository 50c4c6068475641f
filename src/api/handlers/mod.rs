pub mod health;
pub mod rotation;
