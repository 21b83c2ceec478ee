//! SQL for each table. Repositories are unit structs with static async
//! methods; callers pass a pool or, inside a transaction, `&mut *tx`.

pub mod aggregate_repo;
pub mod rate_limit_repo;
pub mod session_repo;
pub mod user_repo;
pub mod visitor_repo;

pub use aggregate_repo::AggregateRepo;
pub use rate_limit_repo::RateLimitRepo;
pub use session_repo::SessionRepo;
pub use user_repo::UserRepo;
pub use visitor_repo::VisitorRepo;
