pub mod file_storage_service;
pub mod webhdfs;

pub use file_storage_service::{join_remote, remote_parent, LocalWarehouseStore, WarehouseStore};
pub use webhdfs::WebHdfsStore;
