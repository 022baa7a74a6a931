pub mod governor;
pub mod middleware;

pub use governor::RateGovernor;
