//! The data layer: policy-driven reads, invalidating writes, and the service
//! that ties them to the cache and background jobs.

pub mod operation;
pub mod policy;
pub mod reader;
pub mod service;
pub mod writer;

pub use operation::{
    create_activity, delete_activity, respond_to_friend_request, send_friend_request,
    update_activity, update_profile_info, FriendRequestBody, HttpMethod, WriteOperation,
};
pub use policy::{CachePolicy, DataResult, DataSource};
pub use reader::DataReader;
pub use service::DataService;
pub use writer::DataWriter;
