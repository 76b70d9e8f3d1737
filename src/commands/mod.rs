//! CLI commands implementation

pub mod init;
pub mod query;
pub mod status;
pub mod tutor;
pub mod work;

pub use init::*;
pub use query::*;
pub use status::*;
pub use tutor::*;
pub use work::*;
