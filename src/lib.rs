pub mod augment;
pub mod commands;
pub mod connection;
pub mod definitions;
pub mod homie;
pub mod output;
