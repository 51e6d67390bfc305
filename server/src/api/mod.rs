pub mod health;
pub mod players;
