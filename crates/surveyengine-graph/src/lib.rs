pub mod condition;
pub mod executor;
pub mod oracle;

pub use executor::{ExecOutcome, ExecutorError, GraphExecutor};
pub use oracle::{HttpOracle, MockOracle, Oracle, OracleError};
