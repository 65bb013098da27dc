pub mod contracts;
pub mod discovery;
pub mod ledger;
pub mod lifecycle;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;
