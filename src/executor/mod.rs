pub mod action;
pub mod budget;
