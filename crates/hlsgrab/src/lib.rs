pub mod config;
pub mod decrypt;
pub mod detect;
pub mod download;
pub mod error;
pub mod fetch;
pub mod job;
pub mod m3u8;
pub mod message;
pub mod mp4;
pub mod progress;
pub mod remux;
pub mod session;
pub mod sink;
pub mod util;

pub use download::OrderedDownloader;
pub use error::{HlsError, HlsResult};
pub use job::{Job, JobRequest, JobStatus};
pub use message::{JobEvent, Request};
pub use session::{SessionId, SessionRegistry};
