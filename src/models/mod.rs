pub mod contract;
pub mod filter;
pub mod marker;
pub mod offer;
