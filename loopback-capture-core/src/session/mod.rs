pub mod capture;
pub mod controller;
pub mod directory;
pub mod negotiator;
