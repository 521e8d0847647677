pub mod connectors;
pub mod jobs;
pub mod reap;
pub mod status;
pub mod util;
pub mod worker;

pub use connectors::ConnectorsArgs;
pub use jobs::JobsCmd;
pub use reap::ReapArgs;
pub use status::StatusArgs;
pub use worker::WorkerArgs;
