pub mod audit;
pub mod convergence;
pub mod dismissal;
pub mod scenario;
pub mod session;
