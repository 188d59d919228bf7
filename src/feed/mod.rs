pub mod connection;
pub mod proxy;
pub mod repository;
pub mod simulation;
pub mod supervisor;
