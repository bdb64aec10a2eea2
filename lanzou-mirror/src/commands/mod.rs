pub mod check;
pub mod mirror;
