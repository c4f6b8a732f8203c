pub mod controller;
pub mod program;
