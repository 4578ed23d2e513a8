/// Database layer: connection pool, embedded migrations and advisory locks
///
/// Models live in the crate-level `models` module.

pub mod locks;
pub mod migrations;
pub mod pool;
